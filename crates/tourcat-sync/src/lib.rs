//! Ingestion orchestration: city registry, catalog upserts, per-city runs, the recurring
//! scheduler and the operator control surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tourcat_adapters::{AdapterSettings, BuiltinCatalogConfig, SingleTourConfig};
use tourcat_core::DEFAULT_CRON;
use tourcat_storage::{HttpEngineConfig, HttpRenderEngine, JsonFileConfigStore};

mod orchestrator;
mod registry;
mod scheduler;
mod service;
mod upsert;

pub use orchestrator::{CityRunSummary, IngestionOrchestrator, NewCityOutcome, RunSummary};
pub use registry::CityRegistry;
pub use scheduler::{timer_expression, SchedulerController, SchedulerError, SchedulerStatus};
pub use service::{IngestionService, ScrapeAck, ScrapeFailure};
pub use upsert::{UpsertEngine, UpsertOutcome};

pub const CRATE_NAME: &str = "tourcat-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub sources_file: PathBuf,
    pub seed_file: PathBuf,
    pub scheduler_config_file: PathBuf,
    pub scheduler_autoresume: bool,
    pub default_cron: String,
    pub builtin_url_template: Option<String>,
    pub single_tour_url_template: Option<String>,
    pub user_agent: String,
    pub web_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sources_file: PathBuf::from("./config/sources.yaml"),
            seed_file: PathBuf::from("./config/seed_tours.yaml"),
            scheduler_config_file: PathBuf::from("./data/scheduler.json"),
            scheduler_autoresume: false,
            default_cron: DEFAULT_CRON.to_string(),
            builtin_url_template: None,
            single_tour_url_template: None,
            user_agent: "tourcat-bot/0.1".to_string(),
            web_port: 8000,
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sources_file: env_nonempty("TOURCAT_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
            seed_file: env_nonempty("TOURCAT_SEED_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.seed_file),
            scheduler_config_file: env_nonempty("TOURCAT_SCHEDULER_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.scheduler_config_file),
            scheduler_autoresume: env_flag("TOURCAT_SCHEDULER_AUTORESUME"),
            default_cron: env_nonempty("TOURCAT_DEFAULT_CRON").unwrap_or(defaults.default_cron),
            builtin_url_template: env_nonempty("TOURCAT_BUILTIN_URL_TEMPLATE"),
            single_tour_url_template: env_nonempty("TOURCAT_SINGLE_TOUR_URL_TEMPLATE"),
            user_agent: env_nonempty("TOURCAT_USER_AGENT").unwrap_or(defaults.user_agent),
            web_port: std::env::var("TOURCAT_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.web_port),
        }
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        let mut builtin = BuiltinCatalogConfig::default();
        if let Some(template) = &self.builtin_url_template {
            builtin.url_template = template.clone();
        }
        let mut single_tour = SingleTourConfig::default();
        if let Some(template) = &self.single_tour_url_template {
            single_tour.url_template = template.clone();
        }
        AdapterSettings {
            builtin,
            seed_file: self.seed_file.clone(),
            single_tour,
        }
    }
}

/// Service backed by the HTTP render engine and the on-disk scheduler config.
pub async fn service_from_config(config: &SyncConfig) -> Result<IngestionService> {
    let engine = HttpRenderEngine::new(HttpEngineConfig {
        user_agent: Some(config.user_agent.clone()),
    })
    .context("creating render engine")?;
    let store = JsonFileConfigStore::new(config.scheduler_config_file.clone());
    IngestionService::bootstrap(config, Arc::new(engine), Arc::new(store)).await
}

pub async fn service_from_env() -> Result<IngestionService> {
    service_from_config(&SyncConfig::from_env()).await
}
