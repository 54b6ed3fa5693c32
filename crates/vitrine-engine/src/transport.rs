//! Authenticated HTTP transport.
//!
//! The engine never speaks HTTP itself. `AuthTransport` wraps whatever
//! client the host provides and adds the session behavior every list screen
//! relies on:
//!
//! - bearer token attached to each request
//! - per-attempt timeout (`FetchError::Timeout`)
//! - bounded retry of transient statuses with linear backoff
//! - one credential refresh at a time on 401; concurrent 401s wait for it
//!   and replay, or all fail with `AuthExpired`
//!
//! `Endpoint` binds the transport to a path and is a `RawApi`, so it can be
//! handed straight to a `FilterAdapter`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use vitrine_core::{EngineConfig, FetchError};

use crate::contract::{ParamMap, RawApi};
use crate::session::SessionEvents;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    /// Query parameters (GET) or JSON body fields (POST).
    pub params: ParamMap,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>, params: ParamMap) -> Self {
        Self {
            method,
            path: path.into(),
            params,
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

impl HttpResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// The host's HTTP client. Errors are connection-level failures only;
/// non-2xx statuses come back as responses.
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, FetchError>>;
}

/// Source of the bearer credential.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Current access token, if signed in.
    fn token(&self) -> Option<String>;

    /// Obtain a new access token; `token()` returns it afterwards.
    fn refresh(&self) -> BoxFuture<'static, Result<(), FetchError>>;
}

// =============================================================================
// Retry Policy
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub statuses: Vec<u16>,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            statuses: config.retry_statuses.clone(),
            backoff: config.retry_backoff(),
            timeout: config.request_timeout(),
        }
    }

    /// Never retry; keep the timeout.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_retries: 0,
            statuses: Vec::new(),
            backoff: Duration::ZERO,
            timeout,
        }
    }

    fn should_retry(&self, status: u16, retries: u32) -> bool {
        retries < self.max_retries && self.statuses.contains(&status)
    }

    fn delay(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// =============================================================================
// AuthTransport
// =============================================================================

#[derive(Debug, Default)]
struct RefreshState {
    /// Bumped after every refresh attempt.
    epoch: u64,
    /// Whether the latest refresh attempt failed.
    failed: bool,
}

pub struct AuthTransport {
    client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    policy: RetryPolicy,
    session: Option<SessionEvents>,
    refresh: tokio::sync::Mutex<RefreshState>,
}

impl AuthTransport {
    pub fn new(
        client: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            credentials,
            policy,
            session: None,
            refresh: tokio::sync::Mutex::new(RefreshState::default()),
        }
    }

    /// Report failed refreshes to the session handler.
    pub fn with_session(mut self, session: SessionEvents) -> Self {
        self.session = Some(session);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send a request and return the JSON body of a 2xx response.
    pub async fn send(
        &self,
        request: HttpRequest,
        signal: CancellationToken,
    ) -> Result<Value, FetchError> {
        let mut retries = 0;
        let mut refreshed = false;

        loop {
            // Waits here while a refresh is in progress.
            let epoch = self.refresh.lock().await.epoch;

            let response = self.attempt(self.authorize(request.clone()), &signal).await?;
            if response.is_success() {
                return Ok(response.body);
            }

            match response.status {
                401 if !refreshed => {
                    refreshed = true;
                    self.refresh_after(epoch).await?;
                }
                401 => {
                    tracing::warn!("{} still unauthorized after refresh", request.path);
                    self.expired();
                    return Err(FetchError::AuthExpired);
                }
                status if self.policy.should_retry(status, retries) => {
                    retries += 1;
                    let delay = self.policy.delay(retries);
                    tracing::debug!(
                        "{} returned {}, retry {} in {:?}",
                        request.path,
                        status,
                        retries,
                        delay
                    );
                    tokio::select! {
                        _ = signal.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                status => {
                    return Err(FetchError::Network {
                        status: Some(status),
                        message: format!("{} returned {}", request.path, status),
                    })
                }
            }
        }
    }

    fn authorize(&self, mut request: HttpRequest) -> HttpRequest {
        request
            .headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case("authorization"));
        if let Some(token) = self.credentials.token() {
            request
                .headers
                .push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        request
    }

    async fn attempt(
        &self,
        request: HttpRequest,
        signal: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        let timeout = self.policy.timeout;
        let call = self.client.send(request);

        tokio::select! {
            biased;
            _ = signal.cancelled() => Err(FetchError::Cancelled),
            result = tokio::time::timeout(timeout, call) => {
                result.map_err(|_| FetchError::Timeout { duration: timeout })?
            }
        }
    }

    /// Refresh credentials unless someone already did since `seen_epoch`.
    async fn refresh_after(&self, seen_epoch: u64) -> Result<(), FetchError> {
        let mut state = self.refresh.lock().await;
        if state.epoch != seen_epoch {
            return if state.failed {
                Err(FetchError::AuthExpired)
            } else {
                Ok(())
            };
        }

        tracing::debug!("Refreshing credentials");
        let result = self.credentials.refresh().await;
        state.epoch += 1;
        state.failed = result.is_err();

        match result {
            Ok(()) => {
                if let Some(session) = &self.session {
                    session.renewed();
                }
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Credential refresh failed: {}", e);
                self.expired();
                Err(FetchError::AuthExpired)
            }
        }
    }

    fn expired(&self) {
        if let Some(session) = &self.session {
            session.notify_expired();
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// One backend route, usable as a `RawApi`.
#[derive(Clone)]
pub struct Endpoint {
    transport: Arc<AuthTransport>,
    method: Method,
    path: String,
}

impl Endpoint {
    pub fn get(transport: Arc<AuthTransport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            method: Method::Get,
            path: path.into(),
        }
    }

    pub fn post(transport: Arc<AuthTransport>, path: impl Into<String>) -> Self {
        Self {
            transport,
            method: Method::Post,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl RawApi for Endpoint {
    fn call(
        &self,
        params: ParamMap,
        signal: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, FetchError>> {
        let transport = self.transport.clone();
        let request = HttpRequest::new(self.method, self.path.clone(), params);
        Box::pin(async move { transport.send(request, signal).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            statuses: vec![502, 503, 504],
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(5),
        }
    }

    fn signed_in(token: &str) -> MockCredentialProvider {
        let token = token.to_string();
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_token()
            .returning(move || Some(token.clone()));
        credentials
    }

    fn respond_with(
        status: u16,
        body: Value,
    ) -> BoxFuture<'static, Result<HttpResponse, FetchError>> {
        Box::pin(async move { Ok(HttpResponse { status, body }) })
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .withf(|req| {
                req.header("authorization") == Some("Bearer abc") && req.path == "/products"
            })
            .times(1)
            .returning(|_| respond_with(200, json!({"ok": true})));

        let transport = AuthTransport::new(Arc::new(client), Arc::new(signed_in("abc")), policy());
        let body = transport
            .send(
                HttpRequest::new(Method::Get, "/products", ParamMap::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut client = MockHttpClient::new();
        client.expect_send().returning(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                respond_with(503, Value::Null)
            } else {
                respond_with(200, json!([]))
            }
        });

        let transport = AuthTransport::new(Arc::new(client), Arc::new(signed_in("abc")), policy());
        let start = tokio::time::Instant::now();
        let body = transport
            .send(
                HttpRequest::new(Method::Get, "/orders", ParamMap::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(body, json!([]));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of linear backoff.
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(3)
            .returning(|_| respond_with(502, Value::Null));

        let transport = AuthTransport::new(Arc::new(client), Arc::new(signed_in("abc")), policy());
        let err = transport
            .send(
                HttpRequest::new(Method::Get, "/orders", ParamMap::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network { status: Some(502), .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .times(1)
            .returning(|_| respond_with(404, Value::Null));

        let transport = AuthTransport::new(Arc::new(client), Arc::new(signed_in("abc")), policy());
        let err = transport
            .send(
                HttpRequest::new(Method::Get, "/missing", ParamMap::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { status: Some(404), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut client = MockHttpClient::new();
        client.expect_send().returning(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(HttpResponse::ok(Value::Null))
            })
        });

        let transport = AuthTransport::new(Arc::new(client), Arc::new(signed_in("abc")), policy());
        let err = transport
            .send(
                HttpRequest::new(Method::Get, "/slow", ParamMap::new()),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Timeout {
                duration: Duration::from_secs(5)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_by_signal() {
        let mut client = MockHttpClient::new();
        client.expect_send().returning(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(HttpResponse::ok(Value::Null))
            })
        });

        let transport = AuthTransport::new(Arc::new(client), Arc::new(signed_in("abc")), policy());
        let signal = CancellationToken::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = transport
            .send(HttpRequest::new(Method::Get, "/x", ParamMap::new()), signal)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    /// Credentials whose refresh swaps in a new token after a delay.
    fn rotating_credentials(refreshes: usize, succeed: bool) -> MockCredentialProvider {
        let token = Arc::new(Mutex::new("old".to_string()));
        let reader = token.clone();
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_token()
            .returning(move || Some(reader.lock().clone()));
        credentials
            .expect_refresh()
            .times(refreshes)
            .returning(move || {
                let token = token.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if succeed {
                        *token.lock() = "new".to_string();
                        Ok(())
                    } else {
                        Err(FetchError::network("refresh rejected"))
                    }
                })
            });
        credentials
    }

    fn token_checking_client() -> MockHttpClient {
        let mut client = MockHttpClient::new();
        client.expect_send().returning(|req| {
            let status = if req.header("authorization") == Some("Bearer new") {
                200
            } else {
                401
            };
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(HttpResponse {
                    status,
                    body: json!({ "path": req.path }),
                })
            })
        });
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = Arc::new(AuthTransport::new(
            Arc::new(token_checking_client()),
            Arc::new(rotating_credentials(1, true)),
            policy(),
        ));

        let requests = ["/a", "/b", "/c"].map(|path| {
            let transport = transport.clone();
            async move {
                transport
                    .send(
                        HttpRequest::new(Method::Get, path, ParamMap::new()),
                        CancellationToken::new(),
                    )
                    .await
            }
        });
        let results = futures::future::join_all(requests).await;

        for (result, path) in results.into_iter().zip(["/a", "/b", "/c"]) {
            assert_eq!(result.unwrap(), json!({ "path": path }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_expires_everyone() {
        let session = SessionEvents::new();
        let mut events = session.subscribe();
        let transport = Arc::new(
            AuthTransport::new(
                Arc::new(token_checking_client()),
                Arc::new(rotating_credentials(1, false)),
                policy(),
            )
            .with_session(session),
        );

        let requests = ["/a", "/b"].map(|path| {
            let transport = transport.clone();
            async move {
                transport
                    .send(
                        HttpRequest::new(Method::Get, path, ParamMap::new()),
                        CancellationToken::new(),
                    )
                    .await
            }
        });
        let results = futures::future::join_all(requests).await;

        assert!(results
            .iter()
            .all(|r| r == &Err(FetchError::AuthExpired)));
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_endpoint_is_raw_api() {
        let mut client = MockHttpClient::new();
        client
            .expect_send()
            .withf(|req| req.method == Method::Get && req.params["page"] == 2)
            .returning(|_| respond_with(200, json!({"data": []})));

        let transport = Arc::new(AuthTransport::new(
            Arc::new(client),
            Arc::new(signed_in("abc")),
            policy(),
        ));
        let endpoint = Endpoint::get(transport, "/products");

        let mut params = ParamMap::new();
        params.insert("page".to_string(), json!(2));
        let body = endpoint.call(params, CancellationToken::new()).await.unwrap();
        assert_eq!(body, json!({"data": []}));
        assert_eq!(endpoint.path(), "/products");
    }
}
