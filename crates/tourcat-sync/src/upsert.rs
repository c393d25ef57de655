use std::sync::Arc;

use tourcat_core::{CatalogEntry, RawListing};
use tourcat_storage::{CatalogRepository, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(CatalogEntry),
    Updated(CatalogEntry),
    /// A title-keyed entry already existed and was left untouched.
    Skipped(CatalogEntry),
}

impl UpsertOutcome {
    pub fn entry(&self) -> &CatalogEntry {
        match self {
            Self::Created(entry) | Self::Updated(entry) | Self::Skipped(entry) => entry,
        }
    }
}

/// Merges listings into the catalog: URL-keyed listings overwrite, title-keyed ones are
/// append-once.
#[derive(Clone)]
pub struct UpsertEngine {
    catalog: Arc<dyn CatalogRepository>,
}

impl UpsertEngine {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }

    pub async fn upsert(&self, listing: RawListing) -> Result<UpsertOutcome, RepositoryError> {
        if listing.dedup_url().is_some() {
            let result = self.catalog.upsert_by_url(listing).await?;
            return Ok(if result.created {
                UpsertOutcome::Created(result.entry)
            } else {
                UpsertOutcome::Updated(result.entry)
            });
        }

        if let Some(existing) = self.catalog.find_by_title_or_url(&listing.title, None).await? {
            return Ok(UpsertOutcome::Skipped(existing));
        }
        let title = listing.title.clone();
        match self.catalog.create(listing).await {
            Ok(entry) => Ok(UpsertOutcome::Created(entry)),
            Err(err) if err.is_duplicate() => self
                .catalog
                .find_by_title_or_url(&title, None)
                .await?
                .map(UpsertOutcome::Skipped)
                .ok_or(err),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourcat_core::{BUILTIN_SOURCE_TYPE, SEED_LIVE_SOURCE_TYPE};
    use tourcat_storage::MemoryCatalogRepository;

    fn listing(title: &str, url: Option<&str>, image: Option<&str>) -> RawListing {
        RawListing {
            title: title.into(),
            city: "Lisbon".into(),
            location: "Lisbon".into(),
            recurring_schedule: "Daily 10:00".into(),
            source_url: "https://tours.example.com/lisbon".into(),
            external_page_url: url.map(Into::into),
            image: image.map(Into::into),
            source_type: if url.is_some() {
                SEED_LIVE_SOURCE_TYPE.into()
            } else {
                BUILTIN_SOURCE_TYPE.into()
            },
        }
    }

    #[tokio::test]
    async fn url_keyed_listing_is_overwritten() {
        let catalog = Arc::new(MemoryCatalogRepository::new());
        let engine = UpsertEngine::new(catalog.clone());
        let url = Some("https://walks.example.com/alfama");

        let first = engine.upsert(listing("Alfama Walk", url, None)).await.unwrap();
        let second = engine
            .upsert(listing("Alfama Sunset Walk", url, None))
            .await
            .unwrap();

        assert!(matches!(first, UpsertOutcome::Created(_)));
        assert!(matches!(second, UpsertOutcome::Updated(_)));
        assert_eq!(first.entry().id, second.entry().id);
        let all = catalog.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].listing.title, "Alfama Sunset Walk");
    }

    #[tokio::test]
    async fn title_keyed_listing_is_append_once() {
        let catalog = Arc::new(MemoryCatalogRepository::new());
        let engine = UpsertEngine::new(catalog.clone());

        engine
            .upsert(listing("Tram 28 Tour", None, Some("https://img.example.com/first.jpg")))
            .await
            .unwrap();
        let again = engine
            .upsert(listing("Tram 28 Tour", Some("  "), Some("https://img.example.com/second.jpg")))
            .await
            .unwrap();

        assert!(matches!(again, UpsertOutcome::Skipped(_)));
        let all = catalog.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            all[0].listing.image.as_deref(),
            Some("https://img.example.com/first.jpg")
        );
    }
}
