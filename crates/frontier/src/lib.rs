//! Bounded-frontier BFS discovery stage.
//!
//! Starting from a seed URL, the frontier walks pages in FIFO order within
//! a base-URL prefix, persisting each visited page as a `Pending` work
//! record. Discovery-time fetch failures are logged and dropped, never
//! persisted; the fetch stage re-fetches from the durable frontier on its
//! own, so the two stages stay failure-isolated through storage.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use webharvest_shared::{HarvestError, Result, RunId, UrlRecord, urlkey};
use webharvest_store::RecordStore;

// ---------------------------------------------------------------------------
// Configuration and summary
// ---------------------------------------------------------------------------

/// Settings for one discovery run.
#[derive(Debug, Clone)]
pub struct FrontierConfig {
    /// Maximum pages visited and persisted in one run.
    pub budget: usize,
    /// Glob patterns for link paths that must not be followed.
    pub exclude_patterns: Vec<String>,
}

/// Summary of a completed discovery run.
#[derive(Debug, Clone, Default)]
pub struct FrontierSummary {
    /// Pages visited and persisted as `Pending`.
    pub pages_visited: usize,
    /// Links added to the in-memory queue.
    pub links_enqueued: usize,
    /// URLs dropped because the fetch or classify step failed.
    pub fetch_failures: usize,
    /// Visited pages whose record write failed.
    pub persist_failures: usize,
}

/// Per-run traversal state, exclusively owned by one [`Frontier::run`]
/// invocation and discarded at run end.
struct FrontierState {
    queue: VecDeque<String>,
    visited: HashSet<String>,
    pages_visited: usize,
}

impl FrontierState {
    fn new(start_url: &str) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(start_url.to_string());
        Self {
            queue,
            visited: HashSet::new(),
            pages_visited: 0,
        }
    }
}

/// What a discovery fetch produced.
enum Discovered {
    /// An HTML-ish page whose links should be followed.
    Page { page_url: Url, body: String },
    /// A PDF: persisted as pending work, but carries no links.
    Binary,
    /// A content type the pipeline does not ingest.
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// The BFS crawler over one site, writing discovered URLs to the record
/// store as `Pending`.
pub struct Frontier {
    client: Client,
    records: Arc<dyn RecordStore>,
    run_id: RunId,
    budget: usize,
    exclude: Vec<regex::Regex>,
}

impl Frontier {
    /// Create a frontier using an injected long-lived HTTP client.
    pub fn new(
        client: Client,
        records: Arc<dyn RecordStore>,
        run_id: RunId,
        config: &FrontierConfig,
    ) -> Result<Self> {
        let exclude = config
            .exclude_patterns
            .iter()
            .filter_map(|p| glob_to_regex(p))
            .collect();

        Ok(Self {
            client,
            records,
            run_id,
            budget: config.budget,
            exclude,
        })
    }

    /// Walk the site from `start_url`, enqueueing only links under the
    /// `base_url` prefix, until the queue drains or the budget is spent.
    #[instrument(skip_all, fields(start_url = %start_url, budget = self.budget))]
    pub async fn run(&self, start_url: &str, base_url: &str) -> Result<FrontierSummary> {
        if start_url.is_empty() {
            return Err(HarvestError::config("discovery requires a start URL"));
        }

        let mut state = FrontierState::new(start_url);
        let mut summary = FrontierSummary::default();

        info!(run_id = %self.run_id, base_url, "starting discovery");

        while state.pages_visited < self.budget {
            let Some(url) = state.queue.pop_front() else {
                break;
            };

            if urlkey::has_fragment(&url) || state.visited.contains(&url) {
                debug!(%url, "skipping fragment-bearing or already visited URL");
                continue;
            }
            state.visited.insert(url.clone());

            // Crawl-time failures are cheap to drop: the fetch stage will
            // re-fetch anything that made it into the frontier, and what
            // didn't make it is only this run's outbound links.
            match self.fetch_for_discovery(&url).await {
                Ok(Discovered::Page { page_url, body }) => {
                    self.enqueue_links(&body, &page_url, base_url, &mut state, &mut summary);
                }
                Ok(Discovered::Binary) => {
                    debug!(%url, "binary page, no links to follow");
                }
                Ok(Discovered::Unsupported(content_type)) => {
                    debug!(%url, content_type, "unsupported content type, dropping");
                    continue;
                }
                Err(e) => {
                    warn!(%url, error = %e, "discovery fetch failed, dropping URL");
                    summary.fetch_failures += 1;
                    continue;
                }
            }

            let record = UrlRecord::discovered(&url, &self.run_id);
            if let Err(e) = self.records.upsert_discovered(&record).await {
                warn!(%url, error = %e, "failed to persist discovered URL");
                summary.persist_failures += 1;
            }
            state.pages_visited += 1;

            debug!(
                %url,
                visited = state.pages_visited,
                queued = state.queue.len(),
                "page visited"
            );
        }

        summary.pages_visited = state.pages_visited;

        info!(
            run_id = %self.run_id,
            pages_visited = summary.pages_visited,
            links_enqueued = summary.links_enqueued,
            fetch_failures = summary.fetch_failures,
            "discovery complete"
        );

        Ok(summary)
    }

    /// Fetch one page and decide whether its links are worth reading.
    async fn fetch_for_discovery(&self, url: &str) -> Result<Discovered> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("pdf") {
            return Ok(Discovered::Binary);
        }
        if !content_type.contains("text") && !content_type.contains("application/json") {
            return Ok(Discovered::Unsupported(content_type));
        }

        let page_url = Url::parse(url)
            .map_err(|e| HarvestError::parse(format!("invalid page URL '{url}': {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(Discovered::Page { page_url, body })
    }

    /// Resolve every anchor on the page and enqueue the ones in scope.
    fn enqueue_links(
        &self,
        body: &str,
        page_url: &Url,
        base_url: &str,
        state: &mut FrontierState,
        summary: &mut FrontierSummary,
    ) {
        for link in extract_links(body, page_url) {
            if !link.starts_with(base_url) {
                continue;
            }
            if urlkey::has_fragment(&link) {
                continue;
            }
            if state.visited.contains(&link) {
                continue;
            }
            if self.is_excluded(&link) {
                debug!(%link, "excluded by pattern");
                continue;
            }
            // Stop enqueueing once the budget is spent; a link already in
            // the queue may be enqueued again, which the visited set
            // resolves at pop time.
            if state.pages_visited >= self.budget {
                break;
            }
            state.queue.push_back(link);
            summary.links_enqueued += 1;
        }
    }

    fn is_excluded(&self, link: &str) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let Ok(parsed) = Url::parse(link) else {
            return false;
        };
        let path = parsed.path();
        self.exclude.iter().any(|p| p.is_match(path))
    }
}

// ---------------------------------------------------------------------------
// Link extraction
// ---------------------------------------------------------------------------

/// Extract all anchor targets from a page, resolved against the page URL.
///
/// Fragments are kept: fragment-bearing links must be visible to the
/// caller so it can exclude them from the frontier.
fn extract_links(body: &str, page_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(body);
    let link_sel = Selector::parse("a[href]").expect("static selector");
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with("javascript:") || href.starts_with("mailto:") {
                continue;
            }
            if let Ok(resolved) = urlkey::resolve(href, page_url) {
                links.push(resolved.to_string());
            }
        }
    }

    links
}

/// Convert a glob-like pattern to a regex.
fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    regex::Regex::new(&format!("^{escaped}$")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use webharvest_shared::{RecordFilter, RecordStatus};
    use webharvest_store::SqliteRecordStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn test_records() -> Arc<SqliteRecordStore> {
        let tmp = std::env::temp_dir().join(format!("wh_frontier_{}.db", Uuid::now_v7()));
        Arc::new(SqliteRecordStore::open(&tmp).await.expect("open test db"))
    }

    fn test_client() -> Client {
        Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("build client")
    }

    fn frontier(
        records: Arc<SqliteRecordStore>,
        budget: usize,
        exclude: Vec<String>,
    ) -> Frontier {
        Frontier::new(
            test_client(),
            records,
            RunId::new(),
            &FrontierConfig {
                budget,
                exclude_patterns: exclude,
            },
        )
        .expect("build frontier")
    }

    async fn mount_html(server: &MockServer, at: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html"))
            .mount(server)
            .await;
    }

    #[test]
    fn extract_links_resolves_relative() {
        let html = r##"<html><body>
            <a href="/b">B</a>
            <a href="relative/c">C</a>
            <a href="https://other.org/x">External</a>
            <a href="#section">Anchor</a>
            <a href="mailto:admin@example.org">Mail</a>
        </body></html>"##;

        let base = Url::parse("https://example.org/a").unwrap();
        let links = extract_links(html, &base);

        assert!(links.contains(&"https://example.org/b".to_string()));
        assert!(links.contains(&"https://example.org/relative/c".to_string()));
        assert!(links.contains(&"https://other.org/x".to_string()));
        // The bare anchor resolves to the page itself plus a fragment; it
        // stays visible here and is filtered at enqueue time.
        assert!(links.contains(&"https://example.org/a#section".to_string()));
        assert!(!links.iter().any(|l| l.starts_with("mailto:")));
    }

    #[tokio::test]
    async fn end_to_end_scope_and_fragment_rules() {
        let server = MockServer::start().await;
        let base = server.uri();

        let page_a = format!(
            r#"<html><body>
                <a href="/b">B</a>
                <a href="https://other.org/x">Off domain</a>
                <a href="{base}/y#frag">Fragment</a>
            </body></html>"#
        );
        mount_html(&server, "/", &page_a).await;
        mount_html(&server, "/b", "<html><body><p>leaf</p></body></html>").await;

        let records = test_records().await;
        let f = frontier(records.clone(), 3, vec![]);
        let summary = f.run(&base, &base).await.expect("run");

        assert_eq!(summary.pages_visited, 2);

        let all = records.query(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.status == RecordStatus::Pending));
        assert!(all.iter().any(|r| r.url == base));
        assert!(all.iter().any(|r| r.url == format!("{base}/b")));
        // Off-domain and fragment-bearing links were never enqueued.
        assert!(!all.iter().any(|r| r.url.contains("other.org")));
        assert!(!all.iter().any(|r| r.url.contains('#')));
    }

    #[tokio::test]
    async fn budget_caps_visited_pages() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_html(
            &server,
            "/",
            r#"<html><body><a href="/p1">1</a></body></html>"#,
        )
        .await;
        mount_html(
            &server,
            "/p1",
            r#"<html><body><a href="/p2">2</a></body></html>"#,
        )
        .await;
        mount_html(
            &server,
            "/p2",
            r#"<html><body><a href="/p3">3</a></body></html>"#,
        )
        .await;
        mount_html(&server, "/p3", "<html><body><p>deep</p></body></html>").await;

        let records = test_records().await;
        let f = frontier(records.clone(), 2, vec![]);
        let summary = f.run(&base, &base).await.expect("run");

        assert_eq!(summary.pages_visited, 2);
        let all = records.query(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn cycles_do_not_loop() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_html(
            &server,
            "/",
            r#"<html><body><a href="/b">B</a></body></html>"#,
        )
        .await;
        mount_html(
            &server,
            "/b",
            r#"<html><body><a href="/">Back</a></body></html>"#,
        )
        .await;

        let records = test_records().await;
        let f = frontier(records.clone(), 10, vec![]);
        let summary = f.run(&format!("{base}/"), &base).await.expect("run");

        assert_eq!(summary.pages_visited, 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_dropped_not_persisted() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_html(
            &server,
            "/",
            r#"<html><body><a href="/broken">Broken</a></body></html>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let records = test_records().await;
        let f = frontier(records.clone(), 10, vec![]);
        let summary = f.run(&base, &base).await.expect("run");

        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.fetch_failures, 1);

        let all = records.query(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all.iter().any(|r| r.url.contains("broken")));
    }

    #[tokio::test]
    async fn unsupported_content_type_is_not_persisted() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_html(
            &server,
            "/",
            r#"<html><body><a href="/logo">Logo</a></body></html>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/logo"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8; 8], "image/png"))
            .mount(&server)
            .await;

        let records = test_records().await;
        let f = frontier(records.clone(), 10, vec![]);
        f.run(&base, &base).await.expect("run");

        let all = records.query(&RecordFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn pdf_is_persisted_without_link_parsing() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_html(
            &server,
            "/",
            r#"<html><body><a href="/report">Report</a></body></html>"#,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/report"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"%PDF-1.4".to_vec(), "application/pdf"),
            )
            .mount(&server)
            .await;

        let records = test_records().await;
        let f = frontier(records.clone(), 10, vec![]);
        let summary = f.run(&base, &base).await.expect("run");

        assert_eq!(summary.pages_visited, 2);
        let all = records.query(&RecordFilter::default()).await.unwrap();
        assert!(all.iter().any(|r| r.url.ends_with("/report")));
    }

    #[tokio::test]
    async fn exclude_patterns_prune_links() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_html(
            &server,
            "/",
            r#"<html><body>
                <a href="/docs/intro">Docs</a>
                <a href="/blog/post-1">Blog</a>
            </body></html>"#,
        )
        .await;
        mount_html(&server, "/docs/intro", "<html><body><p>docs</p></body></html>").await;

        let records = test_records().await;
        let f = frontier(records.clone(), 10, vec!["/blog/**".into()]);
        f.run(&base, &base).await.expect("run");

        let all = records.query(&RecordFilter::default()).await.unwrap();
        assert!(all.iter().any(|r| r.url.ends_with("/docs/intro")));
        assert!(!all.iter().any(|r| r.url.contains("/blog/")));
    }

    #[tokio::test]
    async fn empty_start_url_is_a_config_error() {
        let records = test_records().await;
        let f = frontier(records, 10, vec![]);
        let err = f.run("", "https://example.org").await.expect_err("must fail");
        assert!(matches!(err, HarvestError::Config { .. }));
    }
}
