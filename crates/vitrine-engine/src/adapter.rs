//! Filter adapter.
//!
//! Translates between the engine's query vocabulary and one backend endpoint:
//!
//! ```text
//! QueryState ──build_params──▶ {page, limit, search, sortBy, order, <mapped filters>}
//!                                        │
//!                                     RawApi
//!                                        │
//! FetchResult ◀──extract── {data: {items: [...], total: N}}  (dataPath / totalPath)
//! ```
//!
//! Shape mismatches degrade to an empty result. Transport errors propagate.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use vitrine_core::{FetchError, FetchResult, QueryState};

use crate::contract::{FetchArgs, FetchContract, ParamMap, RawApi};
use crate::path::{resolve_count, resolve_rows};

// =============================================================================
// Configuration
// =============================================================================

/// Where rows and totals live in a response, and how filter keys are renamed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Dot path to the row array, e.g. `data.items`.
    pub data_path: String,

    /// Dot path to the total count. Without it, the row count is the total.
    pub total_path: Option<String>,

    /// Internal filter key -> backend parameter name.
    pub filter_mapping: HashMap<String, String>,
}

impl AdapterConfig {
    pub fn new(data_path: impl Into<String>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    pub fn total_path(mut self, path: impl Into<String>) -> Self {
        self.total_path = Some(path.into());
        self
    }

    /// Send filter `internal` to the backend as `backend`.
    pub fn map_filter(mut self, internal: impl Into<String>, backend: impl Into<String>) -> Self {
        self.filter_mapping.insert(internal.into(), backend.into());
        self
    }

    /// Backend parameter name for an internal key (identity if unmapped).
    pub fn backend_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.filter_mapping
            .get(key)
            .map(String::as_str)
            .unwrap_or(key)
    }
}

// =============================================================================
// FilterAdapter
// =============================================================================

/// A `FetchContract` over one raw backend call.
#[derive(Clone)]
pub struct FilterAdapter {
    api: Arc<dyn RawApi>,
    config: Arc<AdapterConfig>,
}

impl FilterAdapter {
    pub fn new(api: impl RawApi + 'static, config: AdapterConfig) -> Self {
        Self::from_arc(Arc::new(api), config)
    }

    pub fn from_arc(api: Arc<dyn RawApi>, config: AdapterConfig) -> Self {
        Self {
            api,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Assemble backend parameters for a query.
    ///
    /// `page` is 1-based. Empty search text and empty filters are omitted.
    pub fn build_params(&self, query: &QueryState) -> ParamMap {
        let mut params = ParamMap::new();
        let page = query.page_index.saturating_add(1);
        params.insert("page".to_string(), Value::from(page));
        params.insert("limit".to_string(), Value::from(query.page_size));

        if !query.global_filter.is_empty() {
            params.insert(
                "search".to_string(),
                Value::String(query.global_filter.clone()),
            );
        }

        if let Some(sort) = query.primary_sort() {
            params.insert("sortBy".to_string(), Value::String(sort.id.clone()));
            let order = if sort.desc { "desc" } else { "asc" };
            params.insert("order".to_string(), Value::String(order.to_string()));
        }

        for (key, value) in &query.filters {
            if value.is_empty() {
                continue;
            }
            params.insert(self.config.backend_key(key).to_string(), value.to_param());
        }

        for filter in &query.column_filters {
            if filter.value.is_null() {
                continue;
            }
            params.insert(
                self.config.backend_key(&filter.id).to_string(),
                filter.value.clone(),
            );
        }

        params
    }

    /// Extract rows and total, failing with `ShapeMismatch` on bad shape.
    pub fn try_extract(&self, response: &Value) -> Result<FetchResult, FetchError> {
        extract(&self.config, response)
    }

    /// Extract rows and total, degrading to an empty result on bad shape.
    pub fn extract(&self, response: &Value) -> FetchResult {
        extract_or_empty(&self.config, response)
    }
}

impl FetchContract for FilterAdapter {
    fn fetch(&self, args: FetchArgs) -> BoxFuture<'static, Result<FetchResult, FetchError>> {
        let params = self.build_params(&args.query);
        let call = self.api.call(params, args.signal);
        let config = self.config.clone();

        Box::pin(async move {
            let response = call.await?;
            Ok(extract_or_empty(&config, &response))
        })
    }
}

fn extract(config: &AdapterConfig, response: &Value) -> Result<FetchResult, FetchError> {
    let rows = resolve_rows(response, &config.data_path).ok_or_else(|| {
        FetchError::ShapeMismatch {
            path: config.data_path.clone(),
        }
    })?;

    let total = match &config.total_path {
        Some(path) => resolve_count(response, path)
            .ok_or_else(|| FetchError::ShapeMismatch { path: path.clone() })?,
        None => rows.len(),
    };

    Ok(FetchResult::new(rows, total))
}

fn extract_or_empty(config: &AdapterConfig, response: &Value) -> FetchResult {
    match extract(config, response) {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("Treating response as empty: {}", e);
            FetchResult::empty()
        }
    }
}
