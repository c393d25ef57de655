use std::sync::Arc;

use anyhow::Result;
use tourcat_core::{normalize_city_name, strip_qualifier, City};
use tourcat_storage::CityRepository;

/// Known cities. Registration is race-free because the repository rejects duplicate names.
#[derive(Clone)]
pub struct CityRegistry {
    repo: Arc<dyn CityRepository>,
}

impl CityRegistry {
    pub fn new(repo: Arc<dyn CityRepository>) -> Self {
        Self { repo }
    }

    pub fn normalize(name: &str) -> String {
        normalize_city_name(name)
    }

    /// Case-insensitive; `"Halle"` and `"Halle (Saale)"` are the same city.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let normalized = Self::normalize(name);
        let wanted = normalized.to_lowercase();
        let wanted_base = strip_qualifier(&normalized).to_lowercase();
        Ok(self.repo.list().await?.iter().any(|city| {
            city.name.to_lowercase() == wanted
                || strip_qualifier(&city.name).to_lowercase() == wanted_base
        }))
    }

    /// Returns `true` only for the caller whose insert went through.
    pub async fn add_if_absent(&self, name: &str) -> Result<bool> {
        let normalized = Self::normalize(name);
        if normalized.is_empty() || self.exists(&normalized).await? {
            return Ok(false);
        }
        match self.repo.insert(City::new(normalized)).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_duplicate() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Names this call inserted, sorted and deduplicated.
    pub async fn add_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for name in names {
            let name = name.as_ref();
            if name.trim().is_empty() {
                continue;
            }
            if self.add_if_absent(name).await? {
                added.push(Self::normalize(name));
            }
        }
        added.sort();
        added.dedup();
        Ok(added)
    }

    pub async fn list_all(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .repo
            .list()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        Ok(names)
    }
}
