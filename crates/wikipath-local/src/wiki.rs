//! Typed client over the MediaWiki action API.
//!
//! Per the API etiquette for bots: one identifying user agent on every
//! request, gzip accepted, and bounded request shapes. Three operations are
//! used, all `GET /w/api.php`:
//! - outbound links: `prop=links`, `pllimit=max`, paginated via `plcontinue`
//! - inbound links: `list=backlinks`, single page of at most 500
//! - resolution: `action=opensearch`, top hit only
//!
//! Failure surfaces are deliberately soft: a page that cannot be fetched
//! dead-ends instead of failing the search that asked about it.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};
use wikipath_core::{ClientConfig, Error, LinkSource, Result};

/// Hard remote bound on backlinks per request.
pub const BACKLINK_REMOTE_CAP: usize = 500;

#[derive(Debug, Clone)]
pub struct WikiClient {
    http: reqwest::Client,
    endpoint: url::Url,
    retry_attempts: u32,
    retry_base: Duration,
}

impl WikiClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .gzip(true)
            .connect_timeout(cfg.connect_timeout())
            .timeout(cfg.request_timeout())
            .pool_max_idle_per_host(cfg.pool_idle_per_host)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint_url()?,
            retry_attempts: cfg.retry_attempts,
            retry_base: cfg.retry_base(),
        })
    }

    /// One API call with bounded retry on transient transport failures.
    /// HTTP status failures are not retried.
    async fn api_get<T: serde::de::DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T> {
        let mut attempt: u32 = 0;
        loop {
            match self.http.get(self.endpoint.clone()).query(params).send().await {
                Ok(resp) => {
                    let resp = resp
                        .error_for_status()
                        .map_err(|e| Error::Http(e.to_string()))?;
                    return resp
                        .json::<T>()
                        .await
                        .map_err(|e| Error::Http(format!("decode: {e}")));
                }
                Err(e) if is_transient(&e) && attempt < self.retry_attempts => {
                    let pause = self.retry_base * 2u32.saturating_pow(attempt);
                    debug!(attempt, error = %e, pause_ms = pause.as_millis() as u64,
                        "transient transport failure, backing off");
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::Http(e.to_string())),
            }
        }
    }

    async fn outbound_links_inner(&self, title: &str) -> Result<Option<Vec<String>>> {
        let mut all: Vec<String> = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("action", "query"),
                ("titles", title),
                ("prop", "links"),
                ("pllimit", "max"),
                ("plnamespace", "0"),
                ("format", "json"),
                ("formatversion", "2"),
                ("redirects", "1"),
            ];
            if let Some(c) = cont.as_deref() {
                params.push(("plcontinue", c));
            }

            let resp: QueryResponse = self.api_get(&params).await?;
            let Some(query) = resp.query else {
                return Ok(None);
            };
            let Some(page) = query.pages.into_iter().next() else {
                return Ok(None);
            };
            if page.missing {
                debug!(title, "page does not exist");
                return Ok(None);
            }
            all.extend(page.links.into_iter().map(|l| l.title));

            match resp.cont.and_then(|c| c.plcontinue) {
                Some(c) => cont = Some(c),
                None => return Ok(Some(all)),
            }
        }
    }

    async fn inbound_links_inner(&self, title: &str, limit: usize) -> Result<Vec<String>> {
        let bllimit = limit.min(BACKLINK_REMOTE_CAP);
        let bllimit_s = bllimit.to_string();
        let params: Vec<(&str, &str)> = vec![
            ("action", "query"),
            ("list", "backlinks"),
            ("bltitle", title),
            ("bllimit", &bllimit_s),
            ("blnamespace", "0"),
            ("format", "json"),
            ("formatversion", "2"),
            ("blredirect", "1"),
        ];

        let resp: QueryResponse = self.api_get(&params).await?;
        let backlinks = resp.query.map(|q| q.backlinks).unwrap_or_default();
        if backlinks.len() >= bllimit {
            // Popular targets get silently truncated; backward BFS accepts
            // the incompleteness.
            debug!(title, limit = bllimit, "backlinks truncated at request cap");
        }
        Ok(backlinks.into_iter().take(limit).map(|l| l.title).collect())
    }

    async fn resolve_inner(&self, query: &str) -> Result<Option<String>> {
        let params: Vec<(&str, &str)> = vec![
            ("action", "opensearch"),
            ("search", query),
            ("limit", "1"),
            ("namespace", "0"),
            ("format", "json"),
        ];
        let v: serde_json::Value = self.api_get(&params).await?;
        Ok(opensearch_top_hit(&v))
    }
}

/// OpenSearch responds `[query, [titles], [descriptions], [urls]]`.
fn opensearch_top_hit(v: &serde_json::Value) -> Option<String> {
    v.get(1)?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

#[async_trait::async_trait]
impl LinkSource for WikiClient {
    async fn outbound_links(&self, title: &str) -> Result<Option<Vec<String>>> {
        match self.outbound_links_inner(title).await {
            Ok(links) => Ok(links),
            Err(e) => {
                warn!(title, error = %e, "link fetch failed, treating page as dead end");
                Ok(Some(Vec::new()))
            }
        }
    }

    async fn inbound_links(&self, title: &str, limit: usize) -> Result<Vec<String>> {
        match self.inbound_links_inner(title, limit).await {
            Ok(links) => Ok(links),
            Err(e) => {
                warn!(title, error = %e, "backlink fetch failed, treating page as dead end");
                Ok(Vec::new())
            }
        }
    }

    async fn resolve(&self, query: &str) -> Result<Option<String>> {
        match self.resolve_inner(query).await {
            Ok(Some(title)) => {
                info!(query, resolved = %title, "resolved search term");
                Ok(Some(title))
            }
            Ok(None) => {
                info!(query, "no article found for search term");
                Ok(None)
            }
            Err(e) => {
                warn!(query, error = %e, "resolution failed");
                Ok(None)
            }
        }
    }
}

// Response shapes, formatversion=2.

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "continue")]
    cont: Option<ContinueBody>,
    query: Option<QueryBody>,
}

#[derive(Debug, Deserialize)]
struct ContinueBody {
    plcontinue: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<PageBody>,
    #[serde(default)]
    backlinks: Vec<LinkBody>,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    #[allow(dead_code)]
    title: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    links: Vec<LinkBody>,
}

#[derive(Debug, Deserialize)]
struct LinkBody {
    title: String,
}
