//! Collection view engine.
//!
//! Drives paginated, sortable, filterable lists backed by a remote API:
//! - QueryStateStore: observable query state, one per view
//! - RequestCoordinator: debounced, cancellable, out-of-order-safe fetching
//! - ResponseCache: stale-time cache shared across views, single-flight
//! - FilterAdapter: query state to backend params, response to rows/total
//! - DynamicFilterRegistry: declarative filter controls with validation
//! - UrlSyncBridge: shareable query strings
//! - AuthTransport: bearer auth, retry and credential refresh over HTTP

pub mod adapter;
pub mod cache;
pub mod contract;
pub mod coordinator;
pub mod path;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod transport;
pub mod url_sync;

// Re-export commonly used types
pub use adapter::{AdapterConfig, FilterAdapter};
pub use cache::{CacheEntry, CacheKey, CacheTarget, ResponseCache};
pub use contract::{raw_api_fn, FetchArgs, FetchContract, ParamMap, RawApi, RawApiFn};
pub use coordinator::{
    CommittedPage, CoordinatorOptions, FetchPhase, RequestCoordinator, ViewStatus,
};
pub use registry::{
    DynamicFilterRegistry, FilterControl, FilterDescriptor, FilterInput, FilterKind,
    OptionSource, OptionsFetcher, SelectMode,
};
pub use session::{SessionEvent, SessionEvents};
pub use store::{QueryChange, QuerySnapshot, QueryStateStore};
pub use transport::{
    AuthTransport, CredentialProvider, Endpoint, HttpClient, HttpRequest, HttpResponse, Method,
    RetryPolicy,
};
pub use url_sync::{Location, MemoryLocation, UrlSyncBridge, UrlSyncConfig, UrlSyncHandle};

pub use tokio_util::sync::CancellationToken;
