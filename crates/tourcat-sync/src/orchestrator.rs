use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tourcat_adapters::{adapter_for, load_source_descriptors, AdapterSettings, SourceKind};
use tourcat_core::{SourceDescriptor, KNOWN_SOURCE_TYPES};
use tourcat_storage::{CatalogRepository, CityRepository, RenderEngine, RunLog};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::registry::CityRegistry;
use crate::upsert::{UpsertEngine, UpsertOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CityRunSummary {
    pub city: String,
    pub full_refresh: bool,
    pub deleted: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed_upserts: usize,
    pub failed_sources: Vec<String>,
    /// Set when the pass aborted before or between adapters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cities: Vec<CityRunSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCityOutcome {
    pub added: bool,
    pub message: String,
}

pub struct IngestionOrchestrator {
    engine: Arc<dyn RenderEngine>,
    registry: CityRegistry,
    catalog: Arc<dyn CatalogRepository>,
    upserts: UpsertEngine,
    run_log: RunLog,
    settings: AdapterSettings,
    sources_file: PathBuf,
}

impl IngestionOrchestrator {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        cities: Arc<dyn CityRepository>,
        catalog: Arc<dyn CatalogRepository>,
        run_log: RunLog,
        settings: AdapterSettings,
        sources_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            registry: CityRegistry::new(cities),
            upserts: UpsertEngine::new(Arc::clone(&catalog)),
            catalog,
            run_log,
            settings,
            sources_file: sources_file.into(),
        }
    }

    pub fn registry(&self) -> &CityRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogRepository> {
        &self.catalog
    }

    pub fn run_log(&self) -> &RunLog {
        &self.run_log
    }

    pub fn engine(&self) -> &dyn RenderEngine {
        self.engine.as_ref()
    }

    pub fn settings(&self) -> &AdapterSettings {
        &self.settings
    }

    fn load_descriptors(&self) -> Vec<SourceDescriptor> {
        match load_source_descriptors(&self.sources_file) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                self.run_log
                    .warn(format!("source descriptors unavailable, using none: {err:#}"));
                Vec::new()
            }
        }
    }

    /// One sequential pass over every adapter for `city`. A failing adapter or upsert is
    /// logged and the pass moves on.
    pub async fn run_city(&self, city: &str, full_refresh: bool) -> Result<CityRunSummary> {
        let city = CityRegistry::normalize(city);
        let descriptors = self.load_descriptors();
        let mut summary = CityRunSummary {
            city: city.clone(),
            full_refresh,
            ..CityRunSummary::default()
        };

        if full_refresh {
            let mut source_types: Vec<String> =
                KNOWN_SOURCE_TYPES.iter().map(|s| s.to_string()).collect();
            for descriptor in &descriptors {
                if !source_types.contains(&descriptor.source_type) {
                    source_types.push(descriptor.source_type.clone());
                }
            }
            summary.deleted = self
                .catalog
                .delete_by_city_and_source_types(&city, &source_types)
                .await
                .with_context(|| format!("clearing catalog entries for {city}"))?;
            self.run_log
                .info(format!("{city}: removed {} existing entries", summary.deleted));
        }

        let kinds = [SourceKind::Builtin, SourceKind::Seed, SourceKind::SeedLive]
            .into_iter()
            .chain(descriptors.into_iter().map(SourceKind::Generic));
        for kind in kinds {
            let adapter = adapter_for(&kind, &self.settings);
            let output = match adapter.scrape(self.engine.as_ref(), &city).await {
                Ok(output) => output,
                Err(err) => {
                    self.run_log
                        .warn(format!("{city}: source {} failed: {err}", adapter.name()));
                    summary.failed_sources.push(adapter.name().to_string());
                    continue;
                }
            };
            for warning in &output.warnings {
                self.run_log
                    .warn(format!("{city}: source {}: {warning}", adapter.name()));
            }
            self.run_log.info(format!(
                "{city}: source {} returned {} listings",
                adapter.name(),
                output.listings.len()
            ));
            for listing in output.listings {
                let title = listing.title.clone();
                match self.upserts.upsert(listing).await {
                    Ok(UpsertOutcome::Created(_)) => summary.created += 1,
                    Ok(UpsertOutcome::Updated(_)) => summary.updated += 1,
                    Ok(UpsertOutcome::Skipped(_)) => summary.skipped += 1,
                    Err(err) => {
                        self.run_log
                            .warn(format!("{city}: could not store `{title}`: {err}"));
                        summary.failed_upserts += 1;
                    }
                }
            }
        }

        self.run_log.info(format!(
            "{city}: done ({} created, {} updated, {} skipped, {} failed sources)",
            summary.created,
            summary.updated,
            summary.skipped,
            summary.failed_sources.len()
        ));
        Ok(summary)
    }

    /// Full refresh of every known city, one at a time.
    pub async fn run_all(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cities = self.registry.list_all().await.context("listing cities")?;
        self.run_log
            .info(format!("full refresh started for {} cities", cities.len()));

        let mut summaries = Vec::with_capacity(cities.len());
        for city in cities {
            let span = info_span!("run_city", %run_id, city = %city);
            match self.run_city(&city, true).instrument(span).await {
                Ok(summary) => summaries.push(summary),
                Err(err) => {
                    self.run_log
                        .error(format!("{city}: refresh aborted: {err:#}"));
                    summaries.push(CityRunSummary {
                        city,
                        full_refresh: true,
                        error: Some(format!("{err:#}")),
                        ..CityRunSummary::default()
                    });
                }
            }
        }

        let finished_at = Utc::now();
        self.run_log.info(format!(
            "full refresh finished in {}s",
            (finished_at - started_at).num_seconds()
        ));
        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            cities: summaries,
        })
    }

    /// Register `name` and run a non-destructive pass, unless the city is already known.
    pub async fn scrape_new_city_once(&self, name: &str) -> Result<NewCityOutcome> {
        let city = CityRegistry::normalize(name);
        if city.is_empty() {
            return Ok(NewCityOutcome {
                added: false,
                message: "city name is empty".to_string(),
            });
        }
        if self.registry.exists(&city).await? {
            return Ok(NewCityOutcome {
                added: false,
                message: format!("{city} already exists"),
            });
        }
        if !self.registry.add_if_absent(&city).await? {
            self.run_log
                .info(format!("{city}: added concurrently, skipping"));
            return Ok(NewCityOutcome {
                added: false,
                message: format!("{city} was added concurrently, skipping"),
            });
        }

        self.run_log.info(format!("{city}: new city registered"));
        if let Err(err) = self.run_city(&city, false).await {
            self.run_log
                .error(format!("{city}: first scrape failed: {err:#}"));
        }
        Ok(NewCityOutcome {
            added: true,
            message: format!("{city} added and scraped"),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tempfile::NamedTempFile;
    use tokio::sync::Barrier;
    use tourcat_core::{City, LogLevel, RawListing, BUILTIN_SOURCE_TYPE, SEED_SOURCE_TYPE};
    use tourcat_storage::{
        FixtureRenderEngine, MemoryCatalogRepository, MemoryCityRepository, RenderError,
        RepositoryError,
    };

    pub(crate) const MUNICH_CARDS: &str = r#"<html><body>
        <div class="tour-card"><h3 class="tour-card__title">Old Town Free Walk</h3></div>
        <div class="tour-card"><h3 class="tour-card__title">Beer Hall History</h3></div>
        </body></html>"#;

    pub(crate) const SEED_YAML: &str = r#"
tours:
  - city: Munich
    title: Nymphenburg Palace Walk
    source_url: https://seed.example.com/munich
    external_page_url: https://seed.example.com/munich/nymphenburg
"#;

    /// City repository whose reads and writes always fail.
    pub(crate) struct BrokenCityRepository;

    #[async_trait]
    impl CityRepository for BrokenCityRepository {
        async fn insert(&self, _city: City) -> Result<(), RepositoryError> {
            Err(RepositoryError::Backend("city table unavailable".into()))
        }

        async fn list(&self) -> Result<Vec<City>, RepositoryError> {
            Err(RepositoryError::Backend("city table unavailable".into()))
        }
    }

    /// Holds the first two `list` calls at a barrier after reading, so two concurrent
    /// registrations both see the city as absent.
    pub(crate) struct GatedCityRepository {
        inner: MemoryCityRepository,
        gate: Barrier,
        lists: AtomicUsize,
    }

    impl GatedCityRepository {
        pub(crate) fn new() -> Self {
            Self {
                inner: MemoryCityRepository::new(),
                gate: Barrier::new(2),
                lists: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CityRepository for GatedCityRepository {
        async fn insert(&self, city: City) -> Result<(), RepositoryError> {
            self.inner.insert(city).await
        }

        async fn list(&self) -> Result<Vec<City>, RepositoryError> {
            let cities = self.inner.list().await?;
            if self.lists.fetch_add(1, Ordering::SeqCst) < 2 {
                self.gate.wait().await;
            }
            Ok(cities)
        }
    }

    const WALKS_SOURCES: &str = "sources:
  - name: walks
    source_type: walks
    url_template: https://walks.example.com/{city}/
";

    pub(crate) fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    pub(crate) struct Harness {
        pub orchestrator: IngestionOrchestrator,
        pub catalog: Arc<MemoryCatalogRepository>,
        pub engine: Arc<FixtureRenderEngine>,
        _seed: NamedTempFile,
        _sources: NamedTempFile,
    }

    pub(crate) fn harness(
        engine: FixtureRenderEngine,
        seed_yaml: &str,
        sources_yaml: &str,
    ) -> Harness {
        let cities = Arc::new(MemoryCityRepository::new());
        harness_with_cities(engine, seed_yaml, sources_yaml, cities)
    }

    pub(crate) fn harness_with_cities(
        engine: FixtureRenderEngine,
        seed_yaml: &str,
        sources_yaml: &str,
        cities: Arc<dyn CityRepository>,
    ) -> Harness {
        let seed = write_temp(seed_yaml);
        let sources = write_temp(sources_yaml);
        let engine = Arc::new(engine);
        let catalog = Arc::new(MemoryCatalogRepository::new());
        let settings = AdapterSettings {
            seed_file: seed.path().to_path_buf(),
            ..AdapterSettings::default()
        };
        let orchestrator = IngestionOrchestrator::new(
            engine.clone(),
            cities,
            catalog.clone(),
            RunLog::new(),
            settings,
            sources.path(),
        );
        Harness {
            orchestrator,
            catalog,
            engine,
            _seed: seed,
            _sources: sources,
        }
    }

    fn listing(city: &str, title: &str, source_type: &str) -> RawListing {
        RawListing {
            title: title.into(),
            city: city.into(),
            location: city.into(),
            recurring_schedule: String::new(),
            source_url: format!("https://tours.example.com/{}", city.to_lowercase()),
            external_page_url: None,
            image: None,
            source_type: source_type.into(),
        }
    }

    #[tokio::test]
    async fn full_refresh_with_failing_adapters_leaves_no_known_entries() {
        let h = harness(
            FixtureRenderEngine::failing_launch("browser binary missing"),
            "tours: []\n",
            WALKS_SOURCES,
        );
        for (city, title, source_type) in [
            ("Paris", "Louvre Highlights", BUILTIN_SOURCE_TYPE),
            ("Paris", "Montmartre Seed Walk", SEED_SOURCE_TYPE),
            ("Paris", "Latin Quarter", "walks"),
            ("Paris", "Eiffel One-Off", "curated"),
            ("Berlin", "Wall Walk", BUILTIN_SOURCE_TYPE),
        ] {
            h.catalog.create(listing(city, title, source_type)).await.unwrap();
        }

        let summary = h.orchestrator.run_city("Paris", true).await.unwrap();

        assert_eq!(summary.deleted, 3);
        assert_eq!(summary.created, 0);
        assert_eq!(summary.failed_sources, vec!["built-in catalog", "walks"]);
        let paris = h.catalog.list_by_city("Paris").await.unwrap();
        assert_eq!(paris.len(), 1);
        assert_eq!(paris[0].listing.source_type, "curated");
        assert_eq!(h.catalog.list_by_city("Berlin").await.unwrap().len(), 1);
        assert!(h
            .orchestrator
            .run_log()
            .entries()
            .iter()
            .any(|e| e.level == LogLevel::Warn && e.message.contains("browser binary missing")));
    }

    #[tokio::test]
    async fn adapters_run_in_order_and_failures_are_isolated() {
        let engine = FixtureRenderEngine::new()
            .with_page("https://tours.example.com/munich/free-tours", MUNICH_CARDS)
            .with_page(
                "https://seed.example.com/munich/nymphenburg",
                r#"<html><head>
                <meta property="og:title" content="Nymphenburg Palace Walk">
                </head></html>"#,
            );
        let h = harness(engine, SEED_YAML, WALKS_SOURCES);

        let summary = h.orchestrator.run_city("munich", false).await.unwrap();

        // builtin: 2 created; seed: 1 created; seed-live: same url, updated; walks: failed
        assert_eq!(summary.created, 3);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.failed_sources, vec!["walks"]);
        assert_eq!(summary.deleted, 0);
        let entries = h.catalog.list_by_city("Munich").await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(h.engine.open_pages(), 0);
    }

    #[tokio::test]
    async fn skipped_detail_pages_and_stale_seeds_reach_the_run_log() {
        let engine = FixtureRenderEngine::new()
            .with_page(
                "https://walks.example.com/munich/",
                r#"<a href="/tours/gone">Gone</a>"#,
            )
            .with_failure(
                "https://walks.example.com/tours/gone",
                RenderError::Navigation {
                    url: "https://walks.example.com/tours/gone".into(),
                    message: "connection refused".into(),
                },
            );
        let h = harness(engine, SEED_YAML, WALKS_SOURCES);

        let summary = h.orchestrator.run_city("Munich", false).await.unwrap();

        assert!(summary.failed_sources.iter().all(|s| s != "walks"));
        let warnings: Vec<_> = h
            .orchestrator
            .run_log()
            .entries()
            .into_iter()
            .filter(|e| e.level == LogLevel::Warn)
            .map(|e| e.message)
            .collect();
        let detail = warnings
            .iter()
            .find(|m| m.starts_with("Munich: source walks:"))
            .expect("detail page warning");
        assert!(detail.contains("https://walks.example.com/tours/gone"));
        assert!(detail.contains("connection refused"));
        let seed = warnings
            .iter()
            .find(|m| m.starts_with("Munich: source live seed:"))
            .expect("live seed warning");
        assert!(seed.contains("kept seed values for `Nymphenburg Palace Walk`"));
    }

    #[tokio::test]
    async fn repeated_full_refresh_is_stable() {
        let engine = FixtureRenderEngine::new()
            .with_page("https://tours.example.com/munich/free-tours", MUNICH_CARDS);
        let h = harness(engine, "tours: []\n", "sources: []\n");

        let first = h.orchestrator.run_city("Munich", true).await.unwrap();
        let second = h.orchestrator.run_city("Munich", true).await.unwrap();

        assert_eq!(first.created, 2);
        assert_eq!(second.deleted, 2);
        assert_eq!(second.created, 2);
        assert_eq!(h.catalog.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unreadable_descriptor_file_means_no_generic_sources() {
        let h = harness(FixtureRenderEngine::new(), "tours: []\n", "sources: [not: valid");
        let summary = h.orchestrator.run_city("Oslo", false).await.unwrap();
        assert_eq!(summary.failed_sources, vec!["built-in catalog"]);
        assert!(h
            .orchestrator
            .run_log()
            .entries()
            .iter()
            .any(|e| e.message.contains("source descriptors unavailable")));
    }

    #[tokio::test]
    async fn concurrent_new_city_requests_scrape_once() {
        let h = harness_with_cities(
            FixtureRenderEngine::new(),
            "tours: []\n",
            "sources: []\n",
            Arc::new(GatedCityRepository::new()),
        );
        let (a, b) = tokio::join!(
            h.orchestrator.scrape_new_city_once("Rome"),
            h.orchestrator.scrape_new_city_once("  rome ")
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.added).count(), 1);
        let loser = outcomes.iter().find(|o| !o.added).unwrap();
        assert_eq!(loser.message, "Rome was added concurrently, skipping");
        assert_eq!(
            h.engine.attempts("https://tours.example.com/rome/free-tours"),
            1
        );
        assert_eq!(
            h.orchestrator.registry().list_all().await.unwrap(),
            vec!["Rome"]
        );
    }

    #[tokio::test]
    async fn known_city_is_not_scraped_again() {
        let h = harness(FixtureRenderEngine::new(), "tours: []\n", "sources: []\n");
        h.orchestrator.registry().add_if_absent("Halle (Saale)").await.unwrap();
        let outcome = h.orchestrator.scrape_new_city_once("halle").await.unwrap();
        assert!(!outcome.added);
        assert_eq!(outcome.message, "Halle already exists");
        assert_eq!(h.engine.total_attempts(), 0);
    }

    #[tokio::test]
    async fn run_all_refreshes_every_city_with_banners() {
        let engine = FixtureRenderEngine::new()
            .with_page("https://tours.example.com/munich/free-tours", MUNICH_CARDS);
        let h = harness(engine, "tours: []\n", "sources: []\n");
        h.orchestrator
            .registry()
            .add_many(&["Munich", "Vienna"])
            .await
            .unwrap();

        let summary = h.orchestrator.run_all().await.unwrap();

        let cities: Vec<_> = summary.cities.iter().map(|c| c.city.as_str()).collect();
        assert_eq!(cities, vec!["Munich", "Vienna"]);
        assert!(summary.cities.iter().all(|c| c.full_refresh));
        assert_eq!(summary.cities[0].created, 2);
        let log = h.orchestrator.run_log().entries();
        assert!(log[0].message.starts_with("full refresh started for 2 cities"));
        assert!(log
            .last()
            .is_some_and(|e| e.message.starts_with("full refresh finished")));
    }

    #[tokio::test]
    async fn run_all_fails_when_cities_cannot_be_listed() {
        let h = harness_with_cities(
            FixtureRenderEngine::new(),
            "tours: []\n",
            "sources: []\n",
            Arc::new(BrokenCityRepository),
        );
        let err = h.orchestrator.run_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("city table unavailable"));
    }
}
