//! Fetch and search primitives — everything the agent reads from the web
//! comes back fenced and attributed.
//!
//! Search results carry the `search_result` trust tier; fetching a result
//! upgrades it to `external_source`. Fetches go through the SSRF-pinned
//! resolver; the request connects to the address that was checked.

use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use agentos_core::error::{ErrorCode, KernelError, KernelResult};

use crate::guards::attribution::format_attribution;
use crate::guards::fence::{FencedContent, TrustTier};
use crate::net::ssrf::resolve_pinned;

/// Max characters of fetched content forwarded to the agent.
const DEFAULT_MAX_CHARS: usize = 50_000;

/// Request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

// ─────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────

/// SSRF-guarded page fetcher.
pub struct WebFetcher {
    max_chars: usize,
    /// Test hook: skip the destination blocklist (never set in production
    /// construction paths).
    allow_private: bool,
}

impl WebFetcher {
    pub fn new() -> Self {
        WebFetcher {
            max_chars: DEFAULT_MAX_CHARS,
            allow_private: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn allowing_private() -> Self {
        WebFetcher {
            max_chars: DEFAULT_MAX_CHARS,
            allow_private: true,
        }
    }

    /// Fetch a URL and return a fenced, attributed artifact.
    pub async fn fetch(&self, url_str: &str, session_id: &str) -> KernelResult<Value> {
        let url = url::Url::parse(url_str)
            .map_err(|e| KernelError::new(ErrorCode::SsrfBlocked, format!("bad URL: {e}")))?;

        let client = if self.allow_private {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(KernelError::new(
                    ErrorCode::SsrfBlocked,
                    format!("scheme {:?} is not fetchable", url.scheme()),
                ));
            }
            Client::builder()
        } else {
            // Resolve once, verify, and pin the connection to that address
            // so a rebinding DNS answer cannot redirect the request.
            let pinned = resolve_pinned(&url).await?;
            let host = url.host_str().unwrap_or_default().to_string();
            Client::builder().resolve(&host, pinned)
        }
        .timeout(FETCH_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;

        debug!(url = %url, "fetching external content");
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;

        if !response.status().is_success() {
            return Err(KernelError::new(
                ErrorCode::DownloadFailed,
                format!("fetch returned {}", response.status()),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;
        let truncated = agentos_core::utils::truncate_string(&body, self.max_chars);

        // Fetching upgrades trust from search_result to external_source.
        let fenced = FencedContent::wrap(url.to_string(), truncated, TrustTier::ExternalSource);
        Ok(external_artifact(&fenced, "fetch", session_id))
    }
}

impl Default for WebFetcher {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────

/// Web search client (Brave-compatible API).
pub struct SearchClient {
    base_url: String,
    api_key: String,
    client: Client,
    max_results: usize,
}

impl SearchClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url("https://api.search.brave.com/res/v1/web/search", api_key)
    }

    /// Custom endpoint — tests point this at a local fixture server.
    pub fn with_base_url(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        SearchClient {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
            max_results: 5,
        }
    }

    /// Search and return fenced, attributed result artifacts.
    pub async fn search(&self, query: &str, session_id: &str) -> KernelResult<Vec<Value>> {
        debug!(query = %query, "searching web");
        let response = self
            .client
            .get(&self.base_url)
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;

        if !response.status().is_success() {
            return Err(KernelError::new(
                ErrorCode::DownloadFailed,
                format!("search returned {}", response.status()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KernelError::new(ErrorCode::DownloadFailed, e.to_string()))?;

        let results = body["web"]["results"].as_array().cloned().unwrap_or_default();
        Ok(results
            .iter()
            .take(self.max_results)
            .map(|result| {
                let url = result["url"].as_str().unwrap_or_default();
                let title = result["title"].as_str().unwrap_or_default();
                let description = result["description"].as_str().unwrap_or_default();
                let fenced = FencedContent::wrap(
                    url,
                    format!("{title}\n{description}"),
                    TrustTier::SearchResult,
                );
                external_artifact(&fenced, "search", session_id)
            })
            .collect())
    }
}

/// Shape a fenced artifact the way the guards expect it: content + tier +
/// `metadata.attribution`.
fn external_artifact(fenced: &FencedContent, operation: &str, session_id: &str) -> Value {
    json!({
        "source_url": fenced.source_url,
        "trust_tier": fenced.trust_tier.as_str(),
        "content": fenced.envelope(),
        "metadata": {
            "attribution": format_attribution(operation, session_id),
            "source_url": fenced.source_url,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::attribution::enforce_attribution;
    use crate::guards::fence::FENCE_TAG;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_blocks_local_destinations() {
        let fetcher = WebFetcher::new();
        for target in [
            "http://127.0.0.1",
            "http://10.0.0.1",
            "http://192.168.1.1",
            "http://169.254.169.254",
            "http://[::1]",
        ] {
            let err = fetcher.fetch(target, "S1").await.unwrap_err();
            assert_eq!(err.code, ErrorCode::SsrfBlocked, "{target}");
        }
    }

    #[tokio::test]
    async fn test_fetch_wraps_and_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<h1>agentos docs</h1>"))
            .mount(&server)
            .await;

        let fetcher = WebFetcher::allowing_private();
        let artifact = fetcher
            .fetch(&format!("{}/page", server.uri()), "S1")
            .await
            .unwrap();

        assert_eq!(artifact["trust_tier"], "external_source");
        let content = artifact["content"].as_str().unwrap();
        assert!(content.starts_with(FENCE_TAG));
        assert!(content.contains("agentos docs"));
        assert_eq!(
            artifact["metadata"]["attribution"],
            "CommunicationOS (fetch) in session S1"
        );
        assert!(enforce_attribution(&artifact, "S1").is_ok());
        assert!(enforce_attribution(&artifact, "S2").is_err());
    }

    #[tokio::test]
    async fn test_fetch_http_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fetcher = WebFetcher::allowing_private();
        let err = fetcher.fetch(&server.uri(), "S1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DownloadFailed);
    }

    #[tokio::test]
    async fn test_search_returns_search_tier_artifacts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "agentos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {
                    "results": [
                        {"url": "https://example.com/a", "title": "AgentOS", "description": "governance kernel"},
                        {"url": "https://example.com/b", "title": "Docs", "description": "manuals"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = SearchClient::with_base_url(format!("{}/search", server.uri()), "key");
        let results = client.search("agentos", "S1").await.unwrap();

        assert_eq!(results.len(), 2);
        for artifact in &results {
            assert_eq!(artifact["trust_tier"], "search_result");
            assert_eq!(
                artifact["metadata"]["attribution"],
                "CommunicationOS (search) in session S1"
            );
            assert!(artifact["content"].as_str().unwrap().starts_with(FENCE_TAG));
        }
    }

    #[tokio::test]
    async fn test_comm_flow_search_then_fetch_upgrades_trust() {
        use crate::guards::phase::PhaseGate;

        // The comm.* namespace is phase-gated: planning never reaches the
        // network primitives.
        assert!(PhaseGate::check("comm.search", "planning").is_err());
        assert!(PhaseGate::check("comm.search", "execution").is_ok());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "web": {"results": [
                    {"url": format!("{}/page", server.uri()), "title": "AgentOS", "description": "docs"}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("full page body"))
            .mount(&server)
            .await;

        let client = SearchClient::with_base_url(format!("{}/search", server.uri()), "key");
        let results = client.search("agentos", "S1").await.unwrap();
        assert_eq!(results[0]["trust_tier"], "search_result");

        // Fetching the hit upgrades it to external_source, same session.
        let hit_url = results[0]["source_url"].as_str().unwrap();
        assert!(PhaseGate::check("comm.fetch", "execution").is_ok());
        let page = WebFetcher::allowing_private()
            .fetch(hit_url, "S1")
            .await
            .unwrap();
        assert_eq!(page["trust_tier"], "external_source");
        assert_eq!(
            page["metadata"]["attribution"],
            "CommunicationOS (fetch) in session S1"
        );
        assert!(enforce_attribution(&page, "S1").is_ok());
    }

    #[tokio::test]
    async fn test_search_api_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = SearchClient::with_base_url(server.uri(), "key");
        let err = client.search("q", "S1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DownloadFailed);
    }
}
