//! HTTP client facade handed to scripts as `client`.
//!
//! The harness only needs `get(path) -> Response`. Two implementations ship
//! with the crate:
//!
//! - [`MockHttpClient`]: canned routes with per-route latency. Unknown paths
//!   answer `404` (see [`MockHttpClient::fallback_status`]); routes
//!   registered with [`MockHttpClient::fail_after`] raise a request error
//!   once their latency has passed. It also records request counts and the peak
//!   number of requests in flight, which is how tests observe concurrency.
//! - [`ReqwestClient`]: a thin adapter over `reqwest` rooted at a base URL.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::embedded::DEMO_ROUTES;
use crate::error::ClientError;

// ── Response ──────────────────────────────────────────────────────────────────

/// A completed HTTP exchange as seen by a script.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    data: String,
    json: OnceLock<Result<Value, ClientError>>,
}

impl Response {
    pub fn new(status: u16, data: impl Into<String>) -> Self {
        Self {
            status,
            data: data.into(),
            json: OnceLock::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Body parsed as JSON. Parsed on first call, cached afterwards.
    pub fn json(&self) -> Result<Value, ClientError> {
        self.json
            .get_or_init(|| {
                serde_json::from_str(&self.data).map_err(|e| ClientError::Parse(e.to_string()))
            })
            .clone()
    }
}

// ── HttpClient ────────────────────────────────────────────────────────────────

/// The client facade bound into every script run.
///
/// Implementations must be reentrant: a script may have many `get` calls in
/// flight at once, and several scripts may share one client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, path: &str) -> Result<Response, ClientError>;
}

// ── MockHttpClient ────────────────────────────────────────────────────────────

/// A canned response served by [`MockHttpClient`].
#[derive(Debug, Clone)]
pub struct MockRoute {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
enum MockEntry {
    Respond(MockRoute),
    Fail { message: String, delay: Duration },
}

/// One entry of a JSON route table (see [`MockHttpClient::from_route_file`]).
#[derive(Debug, Deserialize)]
struct RouteSpec {
    #[serde(default = "default_status")]
    status: u16,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    body_file: Option<String>,
    #[serde(default)]
    delay_ms: u64,
    #[serde(default)]
    error: Option<String>,
}

fn default_status() -> u16 {
    200
}

/// In-memory client with canned routes.
#[derive(Debug)]
pub struct MockHttpClient {
    routes: HashMap<String, MockEntry>,
    fallback_status: u16,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            fallback_status: 404,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Routes for the bundled demo scripts (`/company/info`, `/company/ceo`).
    pub fn demo(delay: Duration) -> Self {
        DEMO_ROUTES.iter().fold(Self::new(), |client, (path, body)| {
            client.route(*path, 200, String::from_utf8_lossy(body), delay)
        })
    }

    /// Serve `body` with `status` for `path` after `delay`.
    pub fn route(
        mut self,
        path: impl Into<String>,
        status: u16,
        body: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.routes.insert(
            path.into(),
            MockEntry::Respond(MockRoute {
                status,
                body: body.into(),
                delay,
            }),
        );
        self
    }

    /// Serve a 200 JSON body for `path` with no delay.
    pub fn json(self, path: impl Into<String>, body: &Value) -> Self {
        self.route(path, 200, body.to_string(), Duration::ZERO)
    }

    /// Make requests for `path` fail with `message` immediately.
    pub fn fail(self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.fail_after(path, message, Duration::ZERO)
    }

    /// Make requests for `path` fail with `message` after `delay`.
    pub fn fail_after(
        mut self,
        path: impl Into<String>,
        message: impl Into<String>,
        delay: Duration,
    ) -> Self {
        self.routes.insert(
            path.into(),
            MockEntry::Fail {
                message: message.into(),
                delay,
            },
        );
        self
    }

    /// Status code answered for unknown paths (default `404`).
    pub fn fallback_status(mut self, status: u16) -> Self {
        self.fallback_status = status;
        self
    }

    /// Build a client from a JSON route table:
    ///
    /// ```json
    /// { "/company/info": { "status": 200, "body_file": "company-info.json", "delay_ms": 50 },
    ///   "/broken":       { "error": "connection reset", "delay_ms": 20 } }
    /// ```
    ///
    /// `body` may be any JSON value (strings are served verbatim);
    /// `body_file` is resolved relative to the table's directory.
    pub fn from_route_file(path: &Path) -> Result<Self, ClientError> {
        let load_err = |msg: String| ClientError::request(path.display().to_string(), msg);
        let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let specs: HashMap<String, RouteSpec> =
            serde_json::from_str(&text).map_err(|e| ClientError::Parse(e.to_string()))?;
        let base = path.parent().unwrap_or(Path::new("."));

        let mut client = Self::new();
        for (route, spec) in specs {
            let delay = Duration::from_millis(spec.delay_ms);
            if let Some(message) = spec.error {
                client = client.fail_after(route, message, delay);
                continue;
            }
            let body = match (spec.body, spec.body_file) {
                (_, Some(file)) => std::fs::read_to_string(base.join(&file))
                    .map_err(|e| load_err(format!("{file}: {e}")))?,
                (Some(Value::String(s)), None) => s,
                (Some(v), None) => v.to_string(),
                (None, None) => String::new(),
            };
            client = client.route(route, spec.status, body, delay);
        }
        Ok(client)
    }

    /// Total number of `get` calls received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Paths requested, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Highest number of requests that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// Tracks one in-flight request; decrements on drop so cancelled calls are
/// accounted for too.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, path: &str) -> Result<Response, ClientError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_owned());

        let entry = self.routes.get(path).cloned();
        let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);
        tracing::trace!(path, "mock request started");

        let response = match entry {
            Some(MockEntry::Respond(route)) => {
                if !route.delay.is_zero() {
                    tokio::time::sleep(route.delay).await;
                }
                Response::new(route.status, route.body)
            }
            Some(MockEntry::Fail { message, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                tracing::trace!(path, "mock request failed");
                return Err(ClientError::request(path, message));
            }
            None => Response::new(self.fallback_status, ""),
        };

        tracing::trace!(path, status = response.status(), "mock request finished");
        Ok(response)
    }
}

// ── ReqwestClient ─────────────────────────────────────────────────────────────

/// Facade over `reqwest` that resolves script paths against a base URL.
///
/// Paths that are already absolute `http(s)://` URLs are used as-is.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    base_url: String,
    http: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::request(&base_url, e.to_string()))?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, path: &str) -> Result<Response, ClientError> {
        let url = self.url_for(path);
        tracing::debug!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::request(path, e.to_string()))?;
        let status = resp.status().as_u16();
        let data = resp
            .text()
            .await
            .map_err(|e| ClientError::request(path, e.to_string()))?;
        Ok(Response::new(status, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_json_parses_and_caches() {
        let r = Response::new(200, r#"{"a": [1, 2]}"#);
        assert_eq!(r.json().unwrap(), json!({"a": [1, 2]}));
        assert_eq!(r.json().unwrap(), json!({"a": [1, 2]}));
    }

    #[test]
    fn response_json_rejects_garbage() {
        let r = Response::new(200, "not json");
        assert!(matches!(r.json(), Err(ClientError::Parse(_))));
    }

    #[tokio::test]
    async fn mock_serves_routes_and_404s() {
        let client = MockHttpClient::new().json("/a", &json!({"x": 1}));
        let ok = client.get("/a").await.unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.json().unwrap(), json!({"x": 1}));

        let missing = client.get("/b").await.unwrap();
        assert_eq!(missing.status(), 404);
        assert_eq!(client.requests(), vec!["/a", "/b"]);
    }

    #[tokio::test]
    async fn mock_fallback_status_applies_to_unknown_paths() {
        let client = MockHttpClient::new().json("/a", &json!(1)).fallback_status(503);
        assert_eq!(client.get("/a").await.unwrap().status(), 200);
        let unknown = client.get("/anything").await.unwrap();
        assert_eq!(unknown.status(), 503);
        assert_eq!(unknown.data(), "");
    }

    #[tokio::test]
    async fn mock_fail_route_is_an_error() {
        let client = MockHttpClient::new().fail("/down", "connection reset");
        let err = client.get("/down").await.unwrap_err();
        assert_eq!(err.to_string(), "request to '/down' failed: connection reset");
    }

    #[tokio::test(start_paused = true)]
    async fn mock_delayed_failures_arrive_in_latency_order() {
        let client = MockHttpClient::new()
            .fail_after("/slow", "slow failure", Duration::from_millis(100))
            .fail_after("/fast", "fast failure", Duration::from_millis(10));
        let started = tokio::time::Instant::now();
        let err = futures::future::try_join_all([client.get("/slow"), client.get("/fast")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fast failure"), "{err}");
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_tracks_peak_concurrency() {
        let client = MockHttpClient::new().route("/slow", 200, "", Duration::from_millis(100));
        let calls = (0..5).map(|_| client.get("/slow"));
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(client.peak_in_flight(), 5);
        assert_eq!(client.request_count(), 5);
    }

    #[test]
    fn route_file_loads_bodies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("body.json"), r#"{"ok": true}"#).unwrap();
        std::fs::write(
            dir.path().join("routes.json"),
            r#"{
                "/file": { "body_file": "body.json", "delay_ms": 5 },
                "/inline": { "status": 201, "body": {"n": 1} },
                "/text": { "body": "plain" },
                "/broken": { "error": "nope", "delay_ms": 5 }
            }"#,
        )
        .unwrap();
        let client = MockHttpClient::from_route_file(&dir.path().join("routes.json")).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            assert_eq!(client.get("/file").await.unwrap().json().unwrap(), json!({"ok": true}));
            let inline = client.get("/inline").await.unwrap();
            assert_eq!(inline.status(), 201);
            assert_eq!(inline.data(), r#"{"n":1}"#);
            assert_eq!(client.get("/text").await.unwrap().data(), "plain");
            assert!(client.get("/broken").await.is_err());
        });
    }

    #[test]
    fn reqwest_client_joins_urls() {
        let c = ReqwestClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(c.base_url(), "http://localhost:8080/");
        assert_eq!(c.url_for("/company/info"), "http://localhost:8080/company/info");
        assert_eq!(c.url_for("ceo"), "http://localhost:8080/ceo");
        assert_eq!(c.url_for("https://example.com/x"), "https://example.com/x");
    }
}
