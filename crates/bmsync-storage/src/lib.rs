//! Feed retrieval over HTTP with a conditional-request response cache.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "bmsync-storage";

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
    /// True when the body was served from the cache after a `304 Not Modified`.
    pub from_cache: bool,
}

impl FetchedResponse {
    /// A fresh `200 OK` response, as produced by fetchers that do not speak HTTP.
    pub fn ok(final_url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: StatusCode::OK,
            final_url: final_url.into(),
            body: body.into(),
            fetched_at: Utc::now(),
            from_cache: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Narrow capability used by the feed reader; swapped for an in-memory fake in tests.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError>;
}

/// Validators and body of the last successful response for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Returns `None` when the server sent no validator, since such a response
    /// can never be revalidated.
    pub fn from_headers(headers: &HeaderMap, body: &[u8]) -> Option<Self> {
        let etag = header_string(headers, ETAG.as_str());
        let last_modified = header_string(headers, LAST_MODIFIED.as_str());
        if etag.is_none() && last_modified.is_none() {
            return None;
        }
        Some(Self {
            etag,
            last_modified,
            body: body.to_vec(),
        })
    }

    pub fn validator_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = self.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(IF_NONE_MATCH, value);
        }
        if let Some(value) = self
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
        headers
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// In-memory response cache keyed by request URL.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, url: &str) -> Option<CachedResponse> {
        self.entries.lock().await.get(url).cloned()
    }

    pub async fn store(&self, url: &str, entry: CachedResponse) {
        self.entries.lock().await.insert(url.to_string(), entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

impl HttpClientConfig {
    pub fn build_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.timeout);

        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        builder.build().context("building reqwest client")
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    cache: ResponseCache,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(config.build_client()?))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: ResponseCache::new(),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    async fn fetch_inner(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let cached = self.cache.get(url).await;

        let mut request = self.client.get(url);
        if let Some(entry) = &cached {
            request = request.headers(entry.validator_headers());
        }

        let resp = request.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if status == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                debug!(%final_url, "feed not modified; serving cached body");
                return Ok(FetchedResponse {
                    status,
                    final_url,
                    body: entry.body,
                    fetched_at: Utc::now(),
                    from_cache: true,
                });
            }
        }

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();
        if let Some(entry) = CachedResponse::from_headers(&headers, &body) {
            self.cache.store(url, entry).await;
        }

        debug!(%final_url, bytes = body.len(), "fetched feed");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
            fetched_at: Utc::now(),
            from_cache: false,
        })
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        self.fetch_inner(url).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers one connection per canned response and returns the request heads.
    async fn serve(responses: Vec<&'static str>) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.expect("accept");
                let mut head = Vec::new();
                let mut chunk = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut chunk).await.expect("read request");
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&chunk[..n]);
                }
                requests.push(String::from_utf8_lossy(&head).to_ascii_lowercase());
                socket.write_all(response.as_bytes()).await.expect("write response");
                socket.shutdown().await.expect("shutdown");
            }
            requests
        });
        (addr, handle)
    }

    fn loopback_fetcher() -> HttpFetcher {
        HttpFetcher::with_client(reqwest::Client::builder().no_proxy().build().expect("client"))
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn responses_without_validators_are_not_cacheable() {
        assert!(CachedResponse::from_headers(&HeaderMap::new(), b"<rss/>").is_none());
    }

    #[test]
    fn validators_become_conditional_request_headers() {
        let entry = CachedResponse::from_headers(
            &headers(&[
                ("etag", "\"abc\""),
                ("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            ]),
            b"<rss/>",
        )
        .expect("cacheable");

        let conditional = entry.validator_headers();
        assert_eq!(conditional.get(IF_NONE_MATCH).unwrap(), "\"abc\"");
        assert_eq!(
            conditional.get(IF_MODIFIED_SINCE).unwrap(),
            "Wed, 21 Oct 2015 07:28:00 GMT"
        );
        assert_eq!(entry.body, b"<rss/>");
    }

    #[test]
    fn etag_only_response_sends_only_if_none_match() {
        let entry = CachedResponse::from_headers(&headers(&[("etag", "W/\"1\"")]), b"x")
            .expect("cacheable");
        let conditional = entry.validator_headers();
        assert!(conditional.contains_key(IF_NONE_MATCH));
        assert!(!conditional.contains_key(IF_MODIFIED_SINCE));
    }

    #[tokio::test]
    async fn cache_is_keyed_by_url() {
        let cache = ResponseCache::new();
        let entry = CachedResponse {
            etag: Some("\"v1\"".into()),
            last_modified: None,
            body: b"first".to_vec(),
        };
        cache.store("http://a/feed", entry.clone()).await;

        assert_eq!(cache.get("http://a/feed").await, Some(entry));
        assert_eq!(cache.get("http://b/feed").await, None);

        cache
            .store(
                "http://a/feed",
                CachedResponse {
                    etag: Some("\"v2\"".into()),
                    last_modified: None,
                    body: b"second".to_vec(),
                },
            )
            .await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("http://a/feed").await.unwrap().body, b"second");
    }

    #[tokio::test]
    async fn not_modified_serves_the_cached_body() {
        let (addr, server) = serve(vec![
            "HTTP/1.1 200 OK\r\nETag: \"v1\"\r\nContent-Length: 6\r\nConnection: close\r\n\r\n<rss/>",
            "HTTP/1.1 304 Not Modified\r\nETag: \"v1\"\r\nConnection: close\r\n\r\n",
        ])
        .await;
        let fetcher = loopback_fetcher();
        let url = format!("http://{addr}/feed");

        let first = fetcher.fetch(&url).await.expect("first fetch");
        assert_eq!(first.status, StatusCode::OK);
        assert!(!first.from_cache);
        assert_eq!(first.body, b"<rss/>");

        let second = fetcher.fetch(&url).await.expect("second fetch");
        assert_eq!(second.status, StatusCode::NOT_MODIFIED);
        assert!(second.from_cache);
        assert_eq!(second.body, first.body);

        let requests = server.await.expect("server task");
        assert!(!requests[0].contains("if-none-match"));
        assert!(requests[1].contains("if-none-match: \"v1\"\r\n"));
    }

    #[tokio::test]
    async fn not_modified_without_cache_entry_is_a_status_error() {
        let (addr, server) =
            serve(vec!["HTTP/1.1 304 Not Modified\r\nConnection: close\r\n\r\n"]).await;

        let err = loopback_fetcher()
            .fetch(&format!("http://{addr}/feed"))
            .await
            .expect_err("nothing cached");
        assert!(matches!(err, FetchError::HttpStatus { status: 304, .. }));
        server.await.expect("server task");
    }
}
