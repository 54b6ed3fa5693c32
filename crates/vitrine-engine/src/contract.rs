//! Fetch contracts.
//!
//! A `FetchContract` is how a view retrieves one page for a `QueryState`.
//! A `RawApi` is one backend call with an arbitrary JSON response; the
//! `FilterAdapter` turns the latter into the former.
//!
//! Both traits return boxed futures so they stay object-safe and the caller
//! decides where to spawn them.

use std::future::Future;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use vitrine_core::{FetchError, FetchResult, QueryState};

/// Backend parameters assembled from a query.
pub type ParamMap = serde_json::Map<String, Value>;

/// Arguments handed to a fetch contract.
#[derive(Debug, Clone)]
pub struct FetchArgs {
    pub query: QueryState,
    /// Cancelled when the request is superseded or abandoned.
    pub signal: CancellationToken,
}

/// Retrieves one page of a collection.
pub trait FetchContract: Send + Sync {
    fn fetch(&self, args: FetchArgs) -> BoxFuture<'static, Result<FetchResult, FetchError>>;
}

/// One raw backend call.
pub trait RawApi: Send + Sync {
    fn call(
        &self,
        params: ParamMap,
        signal: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, FetchError>>;
}

/// Adapts a closure into a `RawApi`.
pub struct RawApiFn<F>(F);

/// Wrap an async closure as a raw backend call.
pub fn raw_api_fn<F, Fut>(f: F) -> RawApiFn<F>
where
    F: Fn(ParamMap, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    RawApiFn(f)
}

impl<F, Fut> RawApi for RawApiFn<F>
where
    F: Fn(ParamMap, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
{
    fn call(
        &self,
        params: ParamMap,
        signal: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, FetchError>> {
        Box::pin((self.0)(params, signal))
    }
}

// =============================================================================
// Mock Contract for Testing
// =============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    type Responder =
        dyn Fn(&QueryState) -> (Duration, Result<FetchResult, FetchError>) + Send + Sync;

    /// Mock contract that records every call and answers from a script.
    pub struct MockContract {
        pub calls: Arc<Mutex<Vec<QueryState>>>,
        respond: Arc<Responder>,
        honor_signal: bool,
    }

    impl MockContract {
        /// Answer every query immediately from a 25-row collection.
        pub fn new() -> Self {
            Self::with_responder(|query| (Duration::ZERO, Ok(page_for(query, 25))))
        }

        /// Custom per-query delay and result.
        pub fn with_responder<R>(respond: R) -> Self
        where
            R: Fn(&QueryState) -> (Duration, Result<FetchResult, FetchError>)
                + Send
                + Sync
                + 'static,
        {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                respond: Arc::new(respond),
                honor_signal: true,
            }
        }

        /// Keep running after cancellation, like a backend that cannot abort.
        pub fn ignoring_signal(mut self) -> Self {
            self.honor_signal = false;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        pub fn last_call(&self) -> Option<QueryState> {
            self.calls.lock().last().cloned()
        }
    }

    impl Default for MockContract {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FetchContract for MockContract {
        fn fetch(&self, args: FetchArgs) -> BoxFuture<'static, Result<FetchResult, FetchError>> {
            self.calls.lock().push(args.query.clone());
            let (delay, result) = (self.respond)(&args.query);
            let honor_signal = self.honor_signal;

            Box::pin(async move {
                if honor_signal {
                    tokio::select! {
                        _ = args.signal.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                } else if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            })
        }
    }

    /// Rows `{id}` for the requested page of a `total`-row collection.
    pub fn page_for(query: &QueryState, total: usize) -> FetchResult {
        let start = query.page_index.saturating_mul(query.page_size);
        let end = start.saturating_add(query.page_size).min(total);
        let rows = (start..end.max(start))
            .map(|id| serde_json::json!({ "id": id }))
            .collect();
        FetchResult::new(rows, total)
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_raw_api_fn_forwards_params() {
        let api = raw_api_fn(|params: ParamMap, _signal| async move {
            Ok(json!({ "echo": params }))
        });

        let mut params = ParamMap::new();
        params.insert("page".to_string(), json!(2));
        let response = api.call(params, CancellationToken::new()).await.unwrap();
        assert_eq!(response["echo"]["page"], 2);
    }

    #[tokio::test]
    async fn test_mock_contract_records_calls() {
        let contract = MockContract::new();
        let query = QueryState::new(10);

        let result = contract
            .fetch(FetchArgs {
                query: query.clone(),
                signal: CancellationToken::new(),
            })
            .await
            .unwrap();

        assert_eq!(result.rows.len(), 10);
        assert_eq!(result.total, 25);
        assert_eq!(contract.call_count(), 1);
        assert_eq!(contract.last_call(), Some(query));
    }

    #[tokio::test]
    async fn test_mock_contract_honors_signal() {
        let contract = MockContract::with_responder(|q| {
            (std::time::Duration::from_secs(10), Ok(page_for(q, 5)))
        });
        let signal = CancellationToken::new();
        signal.cancel();

        let result = contract
            .fetch(FetchArgs {
                query: QueryState::new(10),
                signal,
            })
            .await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
