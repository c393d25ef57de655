//! Repositories, run log, scheduler config persistence and the page render capability.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tourcat_core::{
    normalize_city_name, CatalogEntry, City, LogLevel, RawListing, RunLogEntry, SchedulerConfig,
};
use tracing::{error, info, warn};
use uuid::Uuid;

mod render;

pub use render::{
    extract_from_html, open_with_retry, BackoffPolicy, Extracted, FieldSpec, FixtureRenderEngine,
    HttpEngineConfig, HttpRenderEngine, OpenOptions, PageHandle, PageSession, RenderEngine,
    RenderError, ResourceKind, RetryDisposition, SelectorSpec, NON_ESSENTIAL_RESOURCES,
    PAGE_TIMEOUT, SINGLE_TOUR_TIMEOUT,
};

pub const CRATE_NAME: &str = "tourcat-storage";

pub const RUN_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("duplicate key `{key}`")]
    Duplicate { key: String },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl RepositoryError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// City storage. `insert` enforces a case-insensitive unique constraint on the name.
#[async_trait]
pub trait CityRepository: Send + Sync {
    async fn insert(&self, city: City) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<City>, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct MemoryCityRepository {
    cities: Mutex<BTreeMap<String, City>>,
}

impl MemoryCityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CityRepository for MemoryCityRepository {
    async fn insert(&self, city: City) -> Result<(), RepositoryError> {
        let key = city.name.to_lowercase();
        let mut cities = self.cities.lock().await;
        if cities.contains_key(&key) {
            return Err(RepositoryError::Duplicate { key: city.name });
        }
        cities.insert(key, city);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<City>, RepositoryError> {
        Ok(self.cities.lock().await.values().cloned().collect())
    }
}

#[derive(Debug, Clone)]
pub struct UrlUpsert {
    pub entry: CatalogEntry,
    pub created: bool,
}

/// Catalog storage. Entries are unique by external page URL when present, else by title.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create(&self, listing: RawListing) -> Result<CatalogEntry, RepositoryError>;

    async fn find_by_title_or_url(
        &self,
        title: &str,
        url: Option<&str>,
    ) -> Result<Option<CatalogEntry>, RepositoryError>;

    /// Find-or-create keyed on `listing.external_page_url`, overwriting every other field.
    async fn upsert_by_url(&self, listing: RawListing) -> Result<UrlUpsert, RepositoryError>;

    async fn delete_by_city_and_source_types(
        &self,
        city: &str,
        source_types: &[String],
    ) -> Result<usize, RepositoryError>;

    async fn list_by_city(&self, city: &str) -> Result<Vec<CatalogEntry>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<CatalogEntry>, RepositoryError>;
}

#[derive(Debug, Default)]
pub struct MemoryCatalogRepository {
    entries: Mutex<Vec<CatalogEntry>>,
}

impl MemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_city(a: &str, b: &str) -> bool {
    normalize_city_name(a).to_lowercase() == normalize_city_name(b).to_lowercase()
}

#[async_trait]
impl CatalogRepository for MemoryCatalogRepository {
    async fn create(&self, listing: RawListing) -> Result<CatalogEntry, RepositoryError> {
        let mut entries = self.entries.lock().await;
        let conflict = match listing.dedup_url() {
            Some(url) => entries.iter().any(|e| e.listing.dedup_url() == Some(url)),
            None => entries.iter().any(|e| e.listing.title == listing.title),
        };
        if conflict {
            let key = listing
                .dedup_url()
                .map(ToString::to_string)
                .unwrap_or_else(|| listing.title.clone());
            return Err(RepositoryError::Duplicate { key });
        }
        let entry = CatalogEntry::from_listing(listing);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn find_by_title_or_url(
        &self,
        title: &str,
        url: Option<&str>,
    ) -> Result<Option<CatalogEntry>, RepositoryError> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .find(|e| e.listing.title == title || (url.is_some() && e.listing.dedup_url() == url))
            .cloned())
    }

    async fn upsert_by_url(&self, listing: RawListing) -> Result<UrlUpsert, RepositoryError> {
        let Some(url) = listing.dedup_url().map(ToString::to_string) else {
            return Err(RepositoryError::Backend(format!(
                "upsert_by_url called without an external page url for `{}`",
                listing.title
            )));
        };
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.listing.dedup_url() == Some(url.as_str()))
        {
            existing.listing = listing;
            existing.updated_at = Utc::now();
            return Ok(UrlUpsert {
                entry: existing.clone(),
                created: false,
            });
        }
        let entry = CatalogEntry::from_listing(listing);
        entries.push(entry.clone());
        Ok(UrlUpsert {
            entry,
            created: true,
        })
    }

    async fn delete_by_city_and_source_types(
        &self,
        city: &str,
        source_types: &[String],
    ) -> Result<usize, RepositoryError> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| {
            !(same_city(&e.listing.city, city) && source_types.contains(&e.listing.source_type))
        });
        Ok(before - entries.len())
    }

    async fn list_by_city(&self, city: &str) -> Result<Vec<CatalogEntry>, RepositoryError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| same_city(&e.listing.city, city))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<CatalogEntry>, RepositoryError> {
        Ok(self.entries.lock().await.clone())
    }
}

/// Bounded FIFO event buffer shared by every ingestion component.
///
/// Each record is mirrored to `tracing` at the matching level.
#[derive(Debug, Clone)]
pub struct RunLog {
    entries: Arc<StdMutex<VecDeque<RunLogEntry>>>,
    capacity: usize,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::with_capacity(RUN_LOG_CAPACITY)
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(StdMutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info => info!(target: "tourcat::run_log", "{message}"),
            LogLevel::Warn => warn!(target: "tourcat::run_log", "{message}"),
            LogLevel::Error => error!(target: "tourcat::run_log", "{message}"),
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(RunLogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message);
    }

    /// Oldest first.
    pub fn entries(&self) -> Vec<RunLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
pub trait SchedulerConfigStore: Send + Sync {
    /// `Ok(None)` when nothing has been persisted yet.
    async fn load(&self) -> anyhow::Result<Option<SchedulerConfig>>;
    async fn save(&self, config: &SchedulerConfig) -> anyhow::Result<()>;
}

/// Scheduler config kept in a small JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SchedulerConfigStore for JsonFileConfigStore {
    async fn load(&self) -> anyhow::Result<Option<SchedulerConfig>> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking scheduler config {}", self.path.display()))?
        {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        Ok(Some(config))
    }

    async fn save(&self, config: &SchedulerConfig) -> anyhow::Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating config directory {}", parent.display()))?;

        let bytes = serde_json::to_vec_pretty(config).context("serializing scheduler config")?;
        let temp_path = parent.join(format!(".{}.scheduler.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp config file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp config file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp config file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

/// In-process config store; `failing_writes` simulates an unwritable backing file.
#[derive(Debug, Default)]
pub struct MemorySchedulerConfigStore {
    config: Mutex<Option<SchedulerConfig>>,
    fail_writes: bool,
}

impl MemorySchedulerConfigStore {
    pub fn new(initial: Option<SchedulerConfig>) -> Self {
        Self {
            config: Mutex::new(initial),
            fail_writes: false,
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            config: Mutex::new(None),
            fail_writes: true,
        }
    }

    pub async fn snapshot(&self) -> Option<SchedulerConfig> {
        self.config.lock().await.clone()
    }
}

#[async_trait]
impl SchedulerConfigStore for MemorySchedulerConfigStore {
    async fn load(&self) -> anyhow::Result<Option<SchedulerConfig>> {
        Ok(self.config.lock().await.clone())
    }

    async fn save(&self, config: &SchedulerConfig) -> anyhow::Result<()> {
        if self.fail_writes {
            anyhow::bail!("scheduler config store is read-only");
        }
        *self.config.lock().await = Some(config.clone());
        Ok(())
    }
}
