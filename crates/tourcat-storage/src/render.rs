//! Page render capability: open a page, extract values with CSS selectors, close it.
//!
//! Adapters only ever see [`RenderEngine`]. [`PageSession`] closes its page on drop, so every
//! exit path (early return, `?`, timeout) releases the page.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// Navigation timeout for list and detail pages.
pub const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
/// Navigation timeout for a single tour page.
pub const SINGLE_TOUR_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Image,
    Stylesheet,
    Font,
    Script,
}

pub const NON_ESSENTIAL_RESOURCES: [ResourceKind; 4] = [
    ResourceKind::Image,
    ResourceKind::Stylesheet,
    ResourceKind::Font,
    ResourceKind::Script,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub timeout: Duration,
    /// Selector that must be present once the page has loaded.
    pub wait_for: Option<String>,
    pub blocked_resources: Vec<ResourceKind>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            timeout: PAGE_TIMEOUT,
            wait_for: None,
            blocked_resources: Vec::new(),
        }
    }
}

impl OpenOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn wait_for(mut self, selector: impl Into<String>) -> Self {
        self.wait_for = Some(selector.into());
        self
    }

    pub fn block(mut self, kinds: &[ResourceKind]) -> Self {
        self.blocked_resources.extend_from_slice(kinds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHandle {
    pub id: Uuid,
    pub requested_url: String,
    pub final_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    /// Attribute to read; element text when `None`.
    pub attr: Option<String>,
}

impl FieldSpec {
    pub fn text(name: &str, selector: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: None,
        }
    }

    pub fn attr(name: &str, selector: &str, attr: &str) -> Self {
        Self {
            name: name.to_string(),
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorSpec {
    /// Trimmed text of the first match.
    Text(String),
    /// Attribute of the first match.
    Attr {
        selector: String,
        attr: String,
    },
    /// Attribute of every match; `href`/`src` values are resolved against the page URL.
    AllAttrs {
        selector: String,
        attr: String,
    },
    /// `content` of `<meta property=..>` or `<meta name=..>`.
    Meta(String),
    DocumentTitle,
    /// One record per `root` match, with fields selected inside it.
    Records {
        root: String,
        fields: Vec<FieldSpec>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Missing,
    Text(String),
    List(Vec<String>),
    Records(Vec<BTreeMap<String, String>>),
}

impl Extracted {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::List(mut items) if !items.is_empty() => Some(items.remove(0)),
            _ => None,
        }
    }

    pub fn into_list(self) -> Vec<String> {
        match self {
            Self::Text(text) => vec![text],
            Self::List(items) => items,
            _ => Vec::new(),
        }
    }

    pub fn into_records(self) -> Vec<BTreeMap<String, String>> {
        match self {
            Self::Records(records) => records,
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("render engine unavailable: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        url: String,
        message: String,
    },
    #[error("navigation to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },
    #[error("http status {status} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
    },
    #[error("marker `{marker}` not found on {url}")]
    MarkerMissing {
        url: String,
        marker: String,
    },
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
    #[error("page {0} is not open")]
    PageClosed(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RenderError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Navigation { .. } | Self::Timeout { .. } | Self::HttpStatus { .. } => {
                RetryDisposition::Retryable
            }
            _ => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Retries fire back to back.
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open(&self, url: &str, options: &OpenOptions) -> Result<PageHandle, RenderError>;
    fn extract(&self, page: &PageHandle, spec: &SelectorSpec) -> Result<Extracted, RenderError>;
    fn close(&self, page: &PageHandle);
}

/// An open page that is closed when dropped.
pub struct PageSession<'a> {
    engine: &'a dyn RenderEngine,
    page: PageHandle,
}

impl<'a> PageSession<'a> {
    pub async fn open(
        engine: &'a dyn RenderEngine,
        url: &str,
        options: &OpenOptions,
    ) -> Result<PageSession<'a>, RenderError> {
        let page = engine.open(url, options).await?;
        Ok(Self { engine, page })
    }

    pub fn url(&self) -> &str {
        &self.page.final_url
    }

    pub fn extract(&self, spec: &SelectorSpec) -> Result<Extracted, RenderError> {
        self.engine.extract(&self.page, spec)
    }

    pub fn text(&self, selector: &str) -> Result<Option<String>, RenderError> {
        Ok(self
            .extract(&SelectorSpec::Text(selector.to_string()))?
            .into_text())
    }

    pub fn meta(&self, key: &str) -> Result<Option<String>, RenderError> {
        Ok(self
            .extract(&SelectorSpec::Meta(key.to_string()))?
            .into_text())
    }

    pub fn title(&self) -> Result<Option<String>, RenderError> {
        Ok(self.extract(&SelectorSpec::DocumentTitle)?.into_text())
    }
}

impl Drop for PageSession<'_> {
    fn drop(&mut self) {
        self.engine.close(&self.page);
    }
}

/// Open `url`, retrying retryable failures up to `policy.max_retries` times.
pub async fn open_with_retry<'a>(
    engine: &'a dyn RenderEngine,
    url: &str,
    options: &OpenOptions,
    policy: &BackoffPolicy,
) -> Result<PageSession<'a>, RenderError> {
    let mut attempt = 0usize;
    loop {
        match PageSession::open(engine, url, options).await {
            Ok(session) => return Ok(session),
            Err(err)
                if err.disposition() == RetryDisposition::Retryable
                    && attempt < policy.max_retries =>
            {
                warn!(url, attempt = attempt + 1, error = %err, "page open failed; retrying");
                let delay = policy.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, RenderError> {
    Selector::parse(selector)
        .map_err(|_| RenderError::InvalidSelector(selector.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    text_or_none(el.text().collect::<String>())
}

fn element_attr(el: ElementRef<'_>, attr: &str, base: Option<&Url>) -> Option<String> {
    let raw = el
        .value()
        .attr(attr)
        .and_then(|s| text_or_none(s.to_string()))?;
    if matches!(attr, "href" | "src") {
        if let Some(base) = base {
            return base.join(&raw).ok().map(|u| u.to_string()).or(Some(raw));
        }
    }
    Some(raw)
}

fn list_or_missing(items: Vec<String>) -> Extracted {
    if items.is_empty() {
        Extracted::Missing
    } else {
        Extracted::List(items)
    }
}

/// Run one selector spec against an HTML document.
pub fn extract_from_html(
    html: &str,
    page_url: &str,
    spec: &SelectorSpec,
) -> Result<Extracted, RenderError> {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let base = base.as_ref();

    let found = match spec {
        SelectorSpec::Text(selector) => {
            let sel = parse_selector(selector)?;
            document
                .select(&sel)
                .find_map(element_text)
                .map(Extracted::Text)
        }
        SelectorSpec::Attr { selector, attr } => {
            let sel = parse_selector(selector)?;
            document
                .select(&sel)
                .find_map(|el| element_attr(el, attr, base))
                .map(Extracted::Text)
        }
        SelectorSpec::AllAttrs { selector, attr } => {
            let sel = parse_selector(selector)?;
            Some(list_or_missing(
                document
                    .select(&sel)
                    .filter_map(|el| element_attr(el, attr, base))
                    .collect(),
            ))
        }
        SelectorSpec::Meta(key) => {
            let sel = parse_selector(&format!(
                r#"meta[property="{key}"], meta[name="{key}"]"#
            ))?;
            document
                .select(&sel)
                .find_map(|el| element_attr(el, "content", None))
                .map(Extracted::Text)
        }
        SelectorSpec::DocumentTitle => {
            let sel = parse_selector("title")?;
            document
                .select(&sel)
                .find_map(element_text)
                .map(Extracted::Text)
        }
        SelectorSpec::Records { root, fields } => {
            let root_sel = parse_selector(root)?;
            let field_sels = fields
                .iter()
                .map(|f| parse_selector(&f.selector).map(|sel| (f, sel)))
                .collect::<Result<Vec<_>, _>>()?;
            let records = document
                .select(&root_sel)
                .map(|card| {
                    field_sels
                        .iter()
                        .filter_map(|(field, sel)| {
                            let value = card.select(sel).find_map(|el| match &field.attr {
                                Some(attr) => element_attr(el, attr, base),
                                None => element_text(el),
                            })?;
                            Some((field.name.clone(), value))
                        })
                        .collect::<BTreeMap<_, _>>()
                })
                .collect();
            Some(Extracted::Records(records))
        }
    };
    Ok(found.unwrap_or(Extracted::Missing))
}

fn marker_present(html: &str, marker: &str) -> Result<bool, RenderError> {
    let sel = parse_selector(marker)?;
    Ok(Html::parse_document(html).select(&sel).next().is_some())
}

#[derive(Debug)]
struct OpenPage {
    url: String,
    html: String,
}

/// Bodies of currently open pages, keyed by handle id.
#[derive(Debug, Default)]
struct PageStore {
    pages: Mutex<HashMap<Uuid, OpenPage>>,
}

impl PageStore {
    fn insert(&self, requested_url: &str, final_url: String, html: String) -> PageHandle {
        let id = Uuid::new_v4();
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                OpenPage {
                    url: final_url.clone(),
                    html,
                },
            );
        PageHandle {
            id,
            requested_url: requested_url.to_string(),
            final_url,
        }
    }

    fn extract(&self, page: &PageHandle, spec: &SelectorSpec) -> Result<Extracted, RenderError> {
        let pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let open = pages.get(&page.id).ok_or(RenderError::PageClosed(page.id))?;
        extract_from_html(&open.html, &open.url, spec)
    }

    fn remove(&self, page: &PageHandle) {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page.id);
    }

    fn len(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug, Clone)]
pub struct HttpEngineConfig {
    pub user_agent: Option<String>,
}

impl Default for HttpEngineConfig {
    fn default() -> Self {
        Self {
            user_agent: Some("tourcat-bot/0.1".to_string()),
        }
    }
}

/// Static-HTML render engine over `reqwest`.
///
/// Sub-resources are never requested, so `blocked_resources` is satisfied by construction and
/// only recorded on the `page_open` span.
#[derive(Debug)]
pub struct HttpRenderEngine {
    client: reqwest::Client,
    pages: PageStore,
}

impl HttpRenderEngine {
    pub fn new(config: HttpEngineConfig) -> Result<Self, RenderError> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| RenderError::Launch(e.to_string()))?;
        Ok(Self {
            client,
            pages: PageStore::default(),
        })
    }

    fn map_reqwest_error(url: &str, timeout: Duration, err: reqwest::Error) -> RenderError {
        if err.is_timeout() {
            RenderError::Timeout {
                url: url.to_string(),
                secs: timeout.as_secs(),
            }
        } else {
            RenderError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl RenderEngine for HttpRenderEngine {
    async fn open(&self, url: &str, options: &OpenOptions) -> Result<PageHandle, RenderError> {
        let span = info_span!(
            "page_open",
            url,
            timeout_secs = options.timeout.as_secs(),
            blocked = options.blocked_resources.len()
        );
        async {
            let resp = self
                .client
                .get(url)
                .timeout(options.timeout)
                .send()
                .await
                .map_err(|e| Self::map_reqwest_error(url, options.timeout, e))?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(RenderError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let html = resp
                .text()
                .await
                .map_err(|e| Self::map_reqwest_error(url, options.timeout, e))?;

            if let Some(marker) = &options.wait_for {
                if !marker_present(&html, marker)? {
                    return Err(RenderError::MarkerMissing {
                        url: final_url,
                        marker: marker.clone(),
                    });
                }
            }
            debug!(bytes = html.len(), "page loaded");
            Ok::<_, RenderError>(self.pages.insert(url, final_url, html))
        }
        .instrument(span)
        .await
    }

    fn extract(&self, page: &PageHandle, spec: &SelectorSpec) -> Result<Extracted, RenderError> {
        self.pages.extract(page, spec)
    }

    fn close(&self, page: &PageHandle) {
        self.pages.remove(page);
    }
}

#[derive(Debug, Clone)]
struct FixturePage {
    html: Option<String>,
    fail_first: usize,
    failure: Option<RenderError>,
}

/// In-memory pages keyed by URL, with scripted failures and open/attempt counters.
#[derive(Debug, Default)]
pub struct FixtureRenderEngine {
    pages: HashMap<String, FixturePage>,
    launch_failure: Option<String>,
    attempts: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<(String, OpenOptions)>>,
    open: PageStore,
}

impl FixtureRenderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(
            url.to_string(),
            FixturePage {
                html: Some(html.to_string()),
                fail_first: 0,
                failure: None,
            },
        );
        self
    }

    /// Every open of `url` fails with `error`.
    pub fn with_failure(mut self, url: &str, error: RenderError) -> Self {
        self.pages.insert(
            url.to_string(),
            FixturePage {
                html: None,
                fail_first: 0,
                failure: Some(error),
            },
        );
        self
    }

    /// The first `failures` opens of `url` fail, later ones serve `html`.
    pub fn with_flaky_page(
        mut self,
        url: &str,
        failures: usize,
        error: RenderError,
        html: &str,
    ) -> Self {
        self.pages.insert(
            url.to_string(),
            FixturePage {
                html: Some(html.to_string()),
                fail_first: failures,
                failure: Some(error),
            },
        );
        self
    }

    pub fn failing_launch(message: &str) -> Self {
        Self {
            launch_failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn attempts(&self, url: &str) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    /// Options passed to each open of `url`, in call order.
    pub fn open_options(&self, url: &str) -> Vec<OpenOptions> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(requested, _)| requested == url)
            .map(|(_, options)| options.clone())
            .collect()
    }

    pub fn open_pages(&self) -> usize {
        self.open.len()
    }
}

#[async_trait]
impl RenderEngine for FixtureRenderEngine {
    async fn open(&self, url: &str, options: &OpenOptions) -> Result<PageHandle, RenderError> {
        if let Some(message) = &self.launch_failure {
            return Err(RenderError::Launch(message.clone()));
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            let count = attempts.entry(url.to_string()).or_default();
            *count += 1;
            *count
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((url.to_string(), options.clone()));

        let Some(page) = self.pages.get(url) else {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                message: "no fixture page registered".to_string(),
            });
        };
        if let Some(failure) = &page.failure {
            if page.html.is_none() || attempt <= page.fail_first {
                return Err(failure.clone());
            }
        }
        let html = page.html.clone().unwrap_or_default();
        if let Some(marker) = &options.wait_for {
            if !marker_present(&html, marker)? {
                return Err(RenderError::MarkerMissing {
                    url: url.to_string(),
                    marker: marker.clone(),
                });
            }
        }
        Ok(self.open.insert(url, url.to_string(), html))
    }

    fn extract(&self, page: &PageHandle, spec: &SelectorSpec) -> Result<Extracted, RenderError> {
        self.open.extract(page, spec)
    }

    fn close(&self, page: &PageHandle) {
        self.open.remove(page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETAIL: &str = r#"<html><head>
        <title>  Fallback   Title </title>
        <meta name="twitter:title" content="Twitter Title">
        <meta property="og:image" content="/img/cover.jpg">
        </head><body>
        <div class="card"><h3>First</h3><a href="/tours/first">go</a></div>
        <div class="card"><h3>Second</h3></div>
        </body></html>"#;

    #[test]
    fn meta_and_title_extraction() {
        let url = "https://walks.example.com/paris/";
        let twitter = extract_from_html(DETAIL, url, &SelectorSpec::Meta("twitter:title".into()))
            .unwrap();
        assert_eq!(twitter, Extracted::Text("Twitter Title".into()));
        let og_title =
            extract_from_html(DETAIL, url, &SelectorSpec::Meta("og:title".into())).unwrap();
        assert_eq!(og_title, Extracted::Missing);
        let title = extract_from_html(DETAIL, url, &SelectorSpec::DocumentTitle).unwrap();
        assert_eq!(title.into_text().as_deref(), Some("Fallback Title"));
    }

    #[test]
    fn records_are_extracted_per_card_with_resolved_links() {
        let spec = SelectorSpec::Records {
            root: ".card".into(),
            fields: vec![
                FieldSpec::text("title", "h3"),
                FieldSpec::attr("link", "a", "href"),
            ],
        };
        let records = extract_from_html(DETAIL, "https://walks.example.com/paris/", &spec)
            .unwrap()
            .into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["title"], "First");
        assert_eq!(records[0]["link"], "https://walks.example.com/tours/first");
        assert!(!records[1].contains_key("link"));
    }

    #[test]
    fn invalid_selector_is_reported() {
        let err = extract_from_html(DETAIL, "https://x.example", &SelectorSpec::Text("[[".into()))
            .unwrap_err();
        assert_eq!(err, RenderError::InvalidSelector("[[".into()));
    }

    #[test]
    fn immediate_policy_has_no_delay() {
        let policy = BackoffPolicy::immediate(3);
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::ZERO);
        let backoff = BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn sessions_close_pages_on_every_exit_path() {
        let engine = FixtureRenderEngine::new().with_page("https://x.example/a", DETAIL);
        {
            let options = OpenOptions::default();
            let session = PageSession::open(&engine, "https://x.example/a", &options)
                .await
                .unwrap();
            assert_eq!(engine.open_pages(), 1);
            let _ = session.extract(&SelectorSpec::Text("[[".into()));
        }
        assert_eq!(engine.open_pages(), 0);

        let missing_marker = PageSession::open(
            &engine,
            "https://x.example/a",
            &OpenOptions::default().wait_for(".listing-card"),
        )
        .await;
        assert!(matches!(missing_marker, Err(RenderError::MarkerMissing { .. })));
        assert_eq!(engine.open_pages(), 0);
    }

    #[tokio::test]
    async fn retry_stops_after_max_retries() {
        let url = "https://x.example/down";
        let engine = FixtureRenderEngine::new().with_failure(
            url,
            RenderError::Timeout {
                url: url.into(),
                secs: 60,
            },
        );
        let options = OpenOptions::with_timeout(SINGLE_TOUR_TIMEOUT);
        let options = options.block(&NON_ESSENTIAL_RESOURCES);
        let policy = BackoffPolicy::immediate(3);
        let result = open_with_retry(&engine, url, &options, &policy).await;
        assert!(matches!(result, Err(RenderError::Timeout { .. })));
        assert_eq!(engine.attempts(url), 4);
        assert_eq!(engine.open_options(url), vec![options; 4]);
    }

    #[tokio::test]
    async fn flaky_page_recovers_within_budget() {
        let url = "https://x.example/flaky";
        let engine = FixtureRenderEngine::new().with_flaky_page(
            url,
            2,
            RenderError::HttpStatus {
                status: 503,
                url: url.into(),
            },
            DETAIL,
        );
        let policy = BackoffPolicy::immediate(3);
        let session = open_with_retry(&engine, url, &OpenOptions::default(), &policy)
            .await
            .unwrap();
        assert_eq!(session.title().unwrap().as_deref(), Some("Fallback Title"));
        assert_eq!(engine.attempts(url), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let engine = FixtureRenderEngine::failing_launch("no browser");
        let result = open_with_retry(
            &engine,
            "https://x.example/a",
            &OpenOptions::default(),
            &BackoffPolicy::immediate(3),
        )
        .await;
        assert!(matches!(result, Err(RenderError::Launch(_))));
    }
}
