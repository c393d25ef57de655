use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tourcat_adapters::{AdapterError, SingleTourAdapter};
use tourcat_core::{CatalogEntry, RunLogEntry, TourDetail};
use tourcat_storage::{
    MemoryCatalogRepository, MemoryCityRepository, RenderEngine, RunLog, SchedulerConfigStore,
};

use crate::orchestrator::{IngestionOrchestrator, NewCityOutcome};
use crate::registry::CityRegistry;
use crate::scheduler::{SchedulerController, SchedulerError, SchedulerStatus};
use crate::SyncConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeAck {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("{message}: {detail}")]
pub struct ScrapeFailure {
    pub status_code: u16,
    pub message: String,
    pub detail: String,
}

/// Operator-facing control operations over the orchestrator and scheduler.
#[derive(Clone)]
pub struct IngestionService {
    orchestrator: Arc<IngestionOrchestrator>,
    scheduler: Arc<SchedulerController>,
}

impl IngestionService {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        scheduler: Arc<SchedulerController>,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
        }
    }

    /// In-memory catalog wired to `engine` and `store`, with the scheduler bootstrapped.
    pub async fn bootstrap(
        config: &SyncConfig,
        engine: Arc<dyn RenderEngine>,
        store: Arc<dyn SchedulerConfigStore>,
    ) -> Result<Self> {
        let orchestrator = Arc::new(IngestionOrchestrator::new(
            engine,
            Arc::new(MemoryCityRepository::new()),
            Arc::new(MemoryCatalogRepository::new()),
            RunLog::new(),
            config.adapter_settings(),
            config.sources_file.clone(),
        ));
        let scheduler = Arc::new(SchedulerController::new(
            Arc::clone(&orchestrator),
            store,
            config.default_cron.clone(),
        ));
        scheduler.bootstrap(config.scheduler_autoresume).await?;
        Ok(Self::new(orchestrator, scheduler))
    }

    pub fn orchestrator(&self) -> &Arc<IngestionOrchestrator> {
        &self.orchestrator
    }

    fn run_log(&self) -> &RunLog {
        self.orchestrator.run_log()
    }

    /// Register cities and queue a background first scrape for each new one.
    pub async fn add_cities<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>> {
        let added = self.orchestrator.registry().add_many(names).await?;
        for city in added.iter().cloned() {
            let orchestrator = Arc::clone(&self.orchestrator);
            tokio::spawn(async move {
                if let Err(err) = orchestrator.run_city(&city, false).await {
                    orchestrator
                        .run_log()
                        .error(format!("{city}: background scrape failed: {err:#}"));
                }
            });
        }
        if !added.is_empty() {
            self.run_log()
                .info(format!("queued first scrape for {}", added.join(", ")));
        }
        Ok(added)
    }

    pub async fn cities(&self) -> Result<Vec<String>> {
        self.orchestrator.registry().list_all().await
    }

    /// Full refresh of one city, or of every city when `city` is `None`.
    pub async fn run_scrape(&self, city: Option<&str>) -> Result<ScrapeAck, ScrapeFailure> {
        let result = match city.map(str::trim).filter(|c| !c.is_empty()) {
            Some(city) => self.orchestrator.run_city(city, true).await.map(|s| {
                format!(
                    "Scrape completed for {}: {} created, {} updated, {} skipped",
                    s.city, s.created, s.updated, s.skipped
                )
            }),
            None => self
                .orchestrator
                .run_all()
                .await
                .map(|s| format!("Scrape completed for {} cities", s.cities.len())),
        };
        match result {
            Ok(message) => Ok(ScrapeAck { message }),
            Err(err) => {
                self.run_log().error(format!("scrape failed: {err:#}"));
                Err(ScrapeFailure {
                    status_code: 500,
                    message: "Scrape failed".to_string(),
                    detail: format!("{err:#}"),
                })
            }
        }
    }

    pub async fn scrape_new_city_once(&self, city: &str) -> Result<NewCityOutcome> {
        self.orchestrator.scrape_new_city_once(city).await
    }

    /// Fetch one tour page on demand; nothing is stored.
    pub async fn scrape_single_tour(
        &self,
        city: &str,
        slug: &str,
    ) -> Result<TourDetail, AdapterError> {
        let city = CityRegistry::normalize(city);
        let config = self.orchestrator.settings().single_tour.clone();
        let adapter = SingleTourAdapter::new(config, slug);
        match adapter.fetch_detail(self.orchestrator.engine(), &city).await {
            Ok(detail) => {
                self.run_log()
                    .info(format!("{city}: fetched tour `{}`", detail.title));
                Ok(detail)
            }
            Err(err) => {
                self.run_log()
                    .error(format!("{city}: tour `{slug}` unavailable: {err}"));
                Err(err)
            }
        }
    }

    pub async fn catalog(&self, city: Option<&str>) -> Result<Vec<CatalogEntry>> {
        let catalog = self.orchestrator.catalog();
        Ok(match city {
            Some(city) => catalog.list_by_city(city).await?,
            None => catalog.list_all().await?,
        })
    }

    pub fn logs(&self) -> Vec<RunLogEntry> {
        self.run_log().entries()
    }

    pub fn clear_logs(&self) {
        self.run_log().clear();
    }

    pub async fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status().await
    }

    pub async fn pause(&self) -> Result<SchedulerStatus, SchedulerError> {
        self.scheduler.stop().await
    }

    pub async fn resume(&self, cron: Option<&str>) -> Result<SchedulerStatus, SchedulerError> {
        self.scheduler.start(cron).await
    }

    pub async fn set_schedule(&self, cron: &str) -> Result<SchedulerStatus, SchedulerError> {
        self.scheduler.set_cron(cron).await
    }
}
