//! Core domain model for the tour catalog: cities, source descriptors, listings and
//! scheduler state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tourcat-core";

pub const BUILTIN_SOURCE_TYPE: &str = "builtin";
pub const SEED_SOURCE_TYPE: &str = "seed";
pub const SEED_LIVE_SOURCE_TYPE: &str = "seed-live";

/// Source types produced by the built-in adapters; always part of a full refresh.
pub const KNOWN_SOURCE_TYPES: [&str; 3] = [
    BUILTIN_SOURCE_TYPE,
    SEED_SOURCE_TYPE,
    SEED_LIVE_SOURCE_TYPE,
];

pub const DEFAULT_MAX_LINKS: usize = 20;
pub const DEFAULT_CRON: &str = "0 3 * * *";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl City {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Declarative description of one generic catalog source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub source_type: String,
    pub url_template: String,
    #[serde(default)]
    pub link_includes: Vec<String>,
    #[serde(default)]
    pub link_excludes: Vec<String>,
    #[serde(default)]
    pub max_links: Option<usize>,
    #[serde(default)]
    pub city_allow_list: Vec<String>,
}

impl SourceDescriptor {
    pub fn max_links(&self) -> usize {
        self.max_links.unwrap_or(DEFAULT_MAX_LINKS)
    }

    /// An empty allow list admits every city.
    pub fn allows_city(&self, city: &str) -> bool {
        if self.city_allow_list.is_empty() {
            return true;
        }
        let wanted = normalize_city_name(city).to_lowercase();
        self.city_allow_list
            .iter()
            .any(|c| normalize_city_name(c).to_lowercase() == wanted)
    }

    pub fn resolve_url(&self, city: &str) -> String {
        self.url_template.replace("{city}", &slugify(city))
    }
}

/// Scrape output before it is merged into the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: String,
    pub city: String,
    pub location: String,
    #[serde(default)]
    pub recurring_schedule: String,
    pub source_url: String,
    #[serde(default)]
    pub external_page_url: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub source_type: String,
}

impl RawListing {
    /// The URL used as dedup key, if the listing carries a non-blank one.
    pub fn dedup_url(&self) -> Option<&str> {
        self.external_page_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Persisted, user-visible tour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    #[serde(flatten)]
    pub listing: RawListing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn from_listing(listing: RawListing) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            listing,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: DEFAULT_CRON.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Details of one tour page, fetched on demand and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TourDetail {
    pub city: String,
    pub slug: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub location: Option<String>,
    pub recurring_schedule: Option<String>,
}

/// Collapse whitespace, trim, and title-case every letter run; punctuation is kept as-is.
pub fn normalize_city_name(input: &str) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut out = String::with_capacity(collapsed.len());
    let mut in_word = false;
    for ch in collapsed.chars() {
        if ch.is_alphanumeric() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

/// Drop a trailing parenthetical qualifier: `"Halle (Saale)"` becomes `"Halle"`.
pub fn strip_qualifier(name: &str) -> &str {
    let trimmed = name.trim();
    if !trimmed.ends_with(')') {
        return trimmed;
    }
    match trimmed.rfind('(') {
        Some(idx) if !trimmed[..idx].trim().is_empty() => trimmed[..idx].trim_end(),
        _ => trimmed,
    }
}

/// URL path slug for a city name.
pub fn slugify(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_and_title_cases() {
        assert_eq!(normalize_city_name("  new   york  "), "New York");
        assert_eq!(normalize_city_name("New York"), "New York");
        assert_eq!(normalize_city_name("halle (saale)"), "Halle (Saale)");
        assert_eq!(normalize_city_name("BADEN-BADEN"), "Baden-Baden");
        assert_eq!(normalize_city_name("münchen"), "München");
    }

    #[test]
    fn qualifier_is_stripped_only_when_trailing() {
        assert_eq!(strip_qualifier("Halle (Saale)"), "Halle");
        assert_eq!(strip_qualifier("Halle"), "Halle");
        assert_eq!(strip_qualifier("(Saale)"), "(Saale)");
    }

    #[test]
    fn slugs_are_lowercase_and_dashed() {
        assert_eq!(slugify("New York"), "new-york");
        assert_eq!(slugify("Halle (Saale)"), "halle-saale");
        assert_eq!(slugify("  Baden--Baden "), "baden-baden");
    }

    #[test]
    fn blank_external_url_is_not_a_dedup_key() {
        let mut listing = RawListing {
            title: "Old Town Walk".into(),
            city: "Prague".into(),
            location: "Prague".into(),
            recurring_schedule: String::new(),
            source_url: "https://tours.example.com/prague".into(),
            external_page_url: Some("   ".into()),
            image: None,
            source_type: SEED_SOURCE_TYPE.into(),
        };
        assert_eq!(listing.dedup_url(), None);
        listing.external_page_url = Some(" https://x.example/tour ".into());
        assert_eq!(listing.dedup_url(), Some("https://x.example/tour"));
    }

    #[test]
    fn descriptor_allow_list_matches_normalized_names() {
        let descriptor = SourceDescriptor {
            name: "walks".into(),
            source_type: "walks".into(),
            url_template: "https://walks.example.com/{city}/tours".into(),
            link_includes: vec![],
            link_excludes: vec![],
            max_links: None,
            city_allow_list: vec!["new york".into()],
        };
        assert!(descriptor.allows_city("New  York"));
        assert!(!descriptor.allows_city("Boston"));
        assert_eq!(descriptor.max_links(), DEFAULT_MAX_LINKS);
        assert_eq!(
            descriptor.resolve_url("New York"),
            "https://walks.example.com/new-york/tours"
        );
    }
}
