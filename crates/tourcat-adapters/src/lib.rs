//! Source adapter contract and the catalog adapters (built-in catalog, seed file, live seed and
//! descriptor-driven generic catalogs), plus the single tour page fetcher.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tourcat_core::{
    normalize_city_name, slugify, RawListing, SourceDescriptor, TourDetail, BUILTIN_SOURCE_TYPE,
    SEED_LIVE_SOURCE_TYPE, SEED_SOURCE_TYPE,
};
use tourcat_storage::{
    open_with_retry, BackoffPolicy, FieldSpec, OpenOptions, PageSession, RenderEngine,
    RenderError, SelectorSpec, NON_ESSENTIAL_RESOURCES, SINGLE_TOUR_TIMEOUT,
};
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "tourcat-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Tagged catalog source variants, all dispatched through [`SourceAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Builtin,
    Seed,
    SeedLive,
    Generic(SourceDescriptor),
}

/// Listings from one adapter call, plus per-item failures that did not abort it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapeOutput {
    pub listings: Vec<RawListing>,
    pub warnings: Vec<String>,
}

impl From<Vec<RawListing>> for ScrapeOutput {
    fn from(listings: Vec<RawListing>) -> Self {
        Self {
            listings,
            warnings: Vec::new(),
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Human-readable name used in run logs.
    fn name(&self) -> &str;
    fn source_type(&self) -> &str;

    async fn scrape(
        &self,
        engine: &dyn RenderEngine,
        city: &str,
    ) -> Result<ScrapeOutput, AdapterError>;
}

#[derive(Debug, Clone)]
pub struct BuiltinCatalogConfig {
    pub url_template: String,
    pub card_selector: String,
    pub title_selector: String,
    pub location_selector: String,
    pub schedule_selector: String,
    pub image_selector: String,
}

impl Default for BuiltinCatalogConfig {
    fn default() -> Self {
        Self {
            url_template: "https://tours.example.com/{city}/free-tours".to_string(),
            card_selector: ".tour-card".to_string(),
            title_selector: ".tour-card__title".to_string(),
            location_selector: ".tour-card__location".to_string(),
            schedule_selector: ".tour-card__schedule".to_string(),
            image_selector: "img".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SingleTourConfig {
    /// Contains `{city}` and `{slug}` placeholders.
    pub url_template: String,
    pub retry: BackoffPolicy,
    pub location_selector: String,
    pub schedule_selector: String,
}

impl Default for SingleTourConfig {
    fn default() -> Self {
        Self {
            url_template: "https://tours.example.com/{city}/{slug}".to_string(),
            retry: BackoffPolicy::immediate(3),
            location_selector: ".tour-meeting-point".to_string(),
            schedule_selector: ".tour-schedule".to_string(),
        }
    }
}

impl SingleTourConfig {
    pub fn resolve_url(&self, city: &str, slug: &str) -> String {
        self.url_template
            .replace("{city}", &slugify(city))
            .replace("{slug}", slug.trim().trim_matches('/'))
    }
}

#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub builtin: BuiltinCatalogConfig,
    pub seed_file: PathBuf,
    pub single_tour: SingleTourConfig,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            builtin: BuiltinCatalogConfig::default(),
            seed_file: PathBuf::from("./config/seed_tours.yaml"),
            single_tour: SingleTourConfig::default(),
        }
    }
}

pub fn adapter_for(kind: &SourceKind, settings: &AdapterSettings) -> Box<dyn SourceAdapter> {
    match kind {
        SourceKind::Builtin => Box::new(BuiltinCatalogAdapter {
            config: settings.builtin.clone(),
        }),
        SourceKind::Seed => Box::new(SeedFileAdapter {
            seed_file: settings.seed_file.clone(),
        }),
        SourceKind::SeedLive => Box::new(SeedLiveAdapter {
            seed_file: settings.seed_file.clone(),
        }),
        SourceKind::Generic(descriptor) => Box::new(GenericCatalogAdapter {
            descriptor: descriptor.clone(),
        }),
    }
}

fn read_yaml_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone, Deserialize)]
struct SourceRegistry {
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source_type: Option<String>,
    #[serde(default)]
    url_template: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    link_includes: Vec<String>,
    #[serde(default)]
    link_excludes: Vec<String>,
    #[serde(default)]
    max_links: Option<usize>,
    #[serde(default)]
    city_allow_list: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// Load generic source descriptors. Disabled entries and entries missing `url_template` or
/// `source_type` are skipped.
pub fn load_source_descriptors(path: impl AsRef<Path>) -> Result<Vec<SourceDescriptor>> {
    let registry: SourceRegistry = read_yaml_file(path)?;
    let mut out = Vec::new();
    for (idx, entry) in registry.sources.into_iter().enumerate() {
        let label = entry.name.clone().unwrap_or_else(|| format!("#{idx}"));
        if !entry.enabled {
            debug!(source = %label, "source disabled");
            continue;
        }
        let (Some(source_type), Some(url_template)) = (
            entry.source_type.filter(|s| !s.trim().is_empty()),
            entry.url_template.filter(|s| !s.trim().is_empty()),
        ) else {
            warn!(
                source = %label,
                "skipping source descriptor without url_template or source_type"
            );
            continue;
        };
        out.push(SourceDescriptor {
            name: entry.name.unwrap_or_else(|| source_type.clone()),
            source_type,
            url_template,
            link_includes: entry.link_includes,
            link_excludes: entry.link_excludes,
            max_links: entry.max_links,
            city_allow_list: entry.city_allow_list,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub tours: Vec<SeedTour>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedTour {
    pub city: String,
    pub title: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub recurring_schedule: String,
    pub source_url: String,
    #[serde(default)]
    pub external_page_url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl SeedTour {
    fn to_listing(&self, city: &str, source_type: &str) -> RawListing {
        RawListing {
            title: self.title.clone(),
            city: city.to_string(),
            location: self.location.clone().unwrap_or_else(|| city.to_string()),
            recurring_schedule: self.recurring_schedule.clone(),
            source_url: self.source_url.clone(),
            external_page_url: self.external_page_url.clone(),
            image: self.image.clone(),
            source_type: source_type.to_string(),
        }
    }
}

pub fn load_seed_tours(path: impl AsRef<Path>) -> Result<Vec<SeedTour>> {
    let file: SeedFile = read_yaml_file(path)?;
    Ok(file.tours)
}

fn seed_tours_for_city(path: &Path, city: &str) -> Result<Vec<SeedTour>> {
    let wanted = normalize_city_name(city).to_lowercase();
    Ok(load_seed_tours(path)?
        .into_iter()
        .filter(|t| normalize_city_name(&t.city).to_lowercase() == wanted)
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub image: Option<String>,
}

/// Title from `og:title`, `twitter:title`, then `<title>`; image from `og:image`, then
/// `twitter:image`.
pub fn page_metadata(session: &PageSession<'_>) -> Result<PageMetadata, RenderError> {
    let title = match session.meta("og:title")? {
        Some(t) => Some(t),
        None => match session.meta("twitter:title")? {
            Some(t) => Some(t),
            None => session.title()?,
        },
    };
    let image = match session.meta("og:image")? {
        Some(i) => Some(i),
        None => session.meta("twitter:image")?,
    };
    Ok(PageMetadata { title, image })
}

#[derive(Debug, Clone)]
pub struct BuiltinCatalogAdapter {
    config: BuiltinCatalogConfig,
}

#[async_trait]
impl SourceAdapter for BuiltinCatalogAdapter {
    fn name(&self) -> &str {
        "built-in catalog"
    }

    fn source_type(&self) -> &str {
        BUILTIN_SOURCE_TYPE
    }

    async fn scrape(
        &self,
        engine: &dyn RenderEngine,
        city: &str,
    ) -> Result<ScrapeOutput, AdapterError> {
        let url = self.config.url_template.replace("{city}", &slugify(city));
        let options = OpenOptions::default().wait_for(self.config.card_selector.clone());
        let session = PageSession::open(engine, &url, &options).await?;
        let records = session
            .extract(&SelectorSpec::Records {
                root: self.config.card_selector.clone(),
                fields: vec![
                    FieldSpec::text("title", &self.config.title_selector),
                    FieldSpec::text("location", &self.config.location_selector),
                    FieldSpec::text("schedule", &self.config.schedule_selector),
                    FieldSpec::attr("image", &self.config.image_selector, "src"),
                ],
            })?
            .into_records();

        let listings: Vec<RawListing> = records
            .into_iter()
            .filter_map(|mut record| {
                let title = record.remove("title")?;
                Some(RawListing {
                    title,
                    city: city.to_string(),
                    location: record
                        .remove("location")
                        .unwrap_or_else(|| city.to_string()),
                    recurring_schedule: record.remove("schedule").unwrap_or_default(),
                    source_url: url.clone(),
                    external_page_url: None,
                    image: record.remove("image"),
                    source_type: BUILTIN_SOURCE_TYPE.to_string(),
                })
            })
            .collect();
        Ok(listings.into())
    }
}

#[derive(Debug, Clone)]
pub struct SeedFileAdapter {
    seed_file: PathBuf,
}

#[async_trait]
impl SourceAdapter for SeedFileAdapter {
    fn name(&self) -> &str {
        "seed file"
    }

    fn source_type(&self) -> &str {
        SEED_SOURCE_TYPE
    }

    async fn scrape(
        &self,
        _engine: &dyn RenderEngine,
        city: &str,
    ) -> Result<ScrapeOutput, AdapterError> {
        let listings: Vec<RawListing> = seed_tours_for_city(&self.seed_file, city)?
            .iter()
            .map(|t| t.to_listing(city, SEED_SOURCE_TYPE))
            .collect();
        Ok(listings.into())
    }
}

#[derive(Debug, Clone)]
pub struct SeedLiveAdapter {
    seed_file: PathBuf,
}

#[async_trait]
impl SourceAdapter for SeedLiveAdapter {
    fn name(&self) -> &str {
        "live seed"
    }

    fn source_type(&self) -> &str {
        SEED_LIVE_SOURCE_TYPE
    }

    async fn scrape(
        &self,
        engine: &dyn RenderEngine,
        city: &str,
    ) -> Result<ScrapeOutput, AdapterError> {
        let tours = seed_tours_for_city(&self.seed_file, city)?;
        let mut out = ScrapeOutput::default();
        for tour in &tours {
            let mut listing = tour.to_listing(city, SEED_LIVE_SOURCE_TYPE);
            if let Some(url) = listing.dedup_url().map(ToString::to_string) {
                match refresh_metadata(engine, &url).await {
                    Ok(meta) => {
                        if let Some(title) = meta.title {
                            listing.title = title;
                        }
                        if meta.image.is_some() {
                            listing.image = meta.image;
                        }
                    }
                    Err(err) => {
                        warn!(%url, error = %err, "keeping seed values; page refresh failed");
                        out.warnings.push(format!(
                            "kept seed values for `{}`: {err}",
                            listing.title
                        ));
                    }
                }
            }
            out.listings.push(listing);
        }
        Ok(out)
    }
}

async fn refresh_metadata(
    engine: &dyn RenderEngine,
    url: &str,
) -> Result<PageMetadata, RenderError> {
    let session = PageSession::open(engine, url, &OpenOptions::default()).await?;
    page_metadata(&session)
}

#[derive(Debug, Clone)]
pub struct GenericCatalogAdapter {
    descriptor: SourceDescriptor,
}

/// Keep http(s) links containing any include (all when empty) and no exclude, first
/// occurrence only, at most `max_links`.
pub fn select_links(links: Vec<String>, descriptor: &SourceDescriptor) -> Vec<String> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| {
            link.starts_with("http://") || link.starts_with("https://")
        })
        .filter(|link| {
            descriptor.link_includes.is_empty()
                || descriptor.link_includes.iter().any(|inc| link.contains(inc))
        })
        .filter(|link| {
            !descriptor
                .link_excludes
                .iter()
                .any(|exc| link.contains(exc))
        })
        .filter(|link| seen.insert(link.clone()))
        .take(descriptor.max_links())
        .collect()
}

#[async_trait]
impl SourceAdapter for GenericCatalogAdapter {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn source_type(&self) -> &str {
        &self.descriptor.source_type
    }

    async fn scrape(
        &self,
        engine: &dyn RenderEngine,
        city: &str,
    ) -> Result<ScrapeOutput, AdapterError> {
        if !self.descriptor.allows_city(city) {
            debug!(source = %self.descriptor.name, city, "city not in allow list");
            return Ok(ScrapeOutput::default());
        }
        let list_url = self.descriptor.resolve_url(city);
        let links = {
            let session = PageSession::open(engine, &list_url, &OpenOptions::default()).await?;
            session
                .extract(&SelectorSpec::AllAttrs {
                    selector: "a[href]".to_string(),
                    attr: "href".to_string(),
                })?
                .into_list()
        };
        let links = select_links(links, &self.descriptor);
        debug!(
            source = %self.descriptor.name,
            city,
            links = links.len(),
            "visiting detail links"
        );

        let mut out = ScrapeOutput::default();
        for link in links {
            let meta = match refresh_metadata(engine, &link).await {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(
                        source = %self.descriptor.name,
                        %link,
                        error = %err,
                        "skipping detail page"
                    );
                    out.warnings.push(format!("skipped detail page {link}: {err}"));
                    continue;
                }
            };
            let Some(title) = meta.title else {
                debug!(%link, "detail page has no title");
                continue;
            };
            out.listings.push(RawListing {
                title,
                city: city.to_string(),
                location: city.to_string(),
                recurring_schedule: String::new(),
                source_url: list_url.clone(),
                external_page_url: Some(link),
                image: meta.image,
                source_type: self.descriptor.source_type.clone(),
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct SingleTourAdapter {
    config: SingleTourConfig,
    slug: String,
}

impl SingleTourAdapter {
    pub fn new(config: SingleTourConfig, slug: impl Into<String>) -> Self {
        Self {
            config,
            slug: slug.into(),
        }
    }

    /// Fetch one tour page, retrying navigation failures per the configured policy.
    pub async fn fetch_detail(
        &self,
        engine: &dyn RenderEngine,
        city: &str,
    ) -> Result<TourDetail, AdapterError> {
        let url = self.config.resolve_url(city, &self.slug);
        let options = OpenOptions::with_timeout(SINGLE_TOUR_TIMEOUT)
            .block(&NON_ESSENTIAL_RESOURCES);
        let session = open_with_retry(engine, &url, &options, &self.config.retry).await?;

        let meta = page_metadata(&session)?;
        let title = match session.meta("og:title")? {
            Some(t) => t,
            None => match session.text("h1")? {
                Some(t) => t,
                None => meta.title.ok_or_else(|| {
                    AdapterError::Message(format!("tour page {url} has no title"))
                })?,
            },
        };
        let description = match session.meta("og:description")? {
            Some(d) => Some(d),
            None => session.meta("description")?,
        };

        Ok(TourDetail {
            city: city.to_string(),
            slug: self.slug.clone(),
            url: session.url().to_string(),
            title,
            description,
            image: meta.image,
            location: session.text(&self.config.location_selector)?,
            recurring_schedule: session.text(&self.config.schedule_selector)?,
        })
    }
}
