//! Mirrors part of a view's query state into a shareable query string.
//!
//! Parameters: `sort`, `order` (`asc`/`desc`), `page` (1-based),
//! `pageSize`, `q`, and one repeated parameter per synced filter key.
//! Parameters the bridge does not own are left alone.
//!
//! A sort, search or filter that the view has by default but the user
//! cleared is written as an empty value (`sort=`, `status=`), so hydrating
//! over the same defaults does not bring it back.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;
use vitrine_core::{FilterOption, FilterValue, QueryState, SortingRule, ValidationError};

use crate::registry::DynamicFilterRegistry;
use crate::store::QueryStateStore;

const SORT: &str = "sort";
const ORDER: &str = "order";
const PAGE: &str = "page";
const PAGE_SIZE: &str = "pageSize";
const SEARCH: &str = "q";

/// Deep links past this page are ignored.
const MAX_PAGE: usize = 1_000_000;

// =============================================================================
// Location
// =============================================================================

/// Where the query string lives (browser location, deep link, test double).
pub trait Location: Send + Sync {
    /// Current query string, without the leading `?`.
    fn query_string(&self) -> String;

    /// Replace the query string without adding a history entry.
    fn replace_query(&self, query: &str);
}

/// In-memory location.
#[derive(Debug, Default)]
pub struct MemoryLocation {
    query: Mutex<String>,
    writes: Mutex<usize>,
}

impl MemoryLocation {
    pub fn new(query: impl Into<String>) -> Self {
        let query: String = query.into();
        Self {
            query: Mutex::new(query.trim_start_matches('?').to_string()),
            writes: Mutex::new(0),
        }
    }

    /// Number of times the query string was replaced.
    pub fn writes(&self) -> usize {
        *self.writes.lock()
    }
}

impl Location for MemoryLocation {
    fn query_string(&self) -> String {
        self.query.lock().clone()
    }

    fn replace_query(&self, query: &str) {
        *self.query.lock() = query.to_string();
        *self.writes.lock() += 1;
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Which parts of the query state are mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlSyncConfig {
    pub sorting: bool,
    pub pagination: bool,
    pub search: bool,
    /// Filter keys to mirror.
    pub filters: Vec<String>,
}

impl Default for UrlSyncConfig {
    fn default() -> Self {
        Self {
            sorting: true,
            pagination: true,
            search: true,
            filters: Vec::new(),
        }
    }
}

impl UrlSyncConfig {
    /// Mirror only sorting and the given filters.
    pub fn sorting_and_filters<I, S>(filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sorting: true,
            pagination: false,
            search: false,
            filters: filters.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>) -> Self {
        self.filters.push(key.into());
        self
    }

    fn owned_keys(&self) -> HashSet<&str> {
        let mut keys = HashSet::new();
        if self.sorting {
            keys.extend([SORT, ORDER]);
        }
        if self.pagination {
            keys.extend([PAGE, PAGE_SIZE]);
        }
        if self.search {
            keys.insert(SEARCH);
        }
        keys.extend(self.filters.iter().map(String::as_str));
        keys
    }
}

// =============================================================================
// UrlSyncBridge
// =============================================================================

pub struct UrlSyncBridge {
    config: UrlSyncConfig,
    registry: Option<Arc<DynamicFilterRegistry>>,
    /// View defaults; a cleared default is written as an empty value.
    defaults: Mutex<Option<QueryState>>,
}

impl UrlSyncBridge {
    pub fn new(config: UrlSyncConfig) -> Self {
        Self {
            config,
            registry: None,
            defaults: Mutex::new(None),
        }
    }

    /// Set the view defaults up front. Otherwise `hydrate` records the
    /// store's state before the URL is applied.
    pub fn with_defaults(self, defaults: QueryState) -> Self {
        *self.defaults.lock() = Some(defaults);
        self
    }

    /// Rebuild filter values (kinds and labels) from the view's descriptors.
    pub fn with_registry(mut self, registry: Arc<DynamicFilterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(&self) -> &UrlSyncConfig {
        &self.config
    }

    /// Serialize the mirrored state into `existing`, keeping foreign params.
    pub fn encode(&self, query: &QueryState, existing: &str) -> String {
        let owned = self.config.owned_keys();
        let defaults = self.defaults.lock().clone();
        let mut out = form_urlencoded::Serializer::new(String::new());

        for (key, value) in form_urlencoded::parse(existing.trim_start_matches('?').as_bytes()) {
            if !owned.contains(key.as_ref()) {
                out.append_pair(&key, &value);
            }
        }

        if self.config.sorting {
            if let Some(sort) = query.primary_sort() {
                out.append_pair(SORT, &sort.id);
                out.append_pair(ORDER, if sort.desc { "desc" } else { "asc" });
            } else if defaults.as_ref().is_some_and(|d| d.primary_sort().is_some()) {
                out.append_pair(SORT, "");
            }
        }
        if self.config.pagination {
            if query.page_index > 0 {
                out.append_pair(PAGE, &query.page_index.saturating_add(1).to_string());
            }
            out.append_pair(PAGE_SIZE, &query.page_size.to_string());
        }
        if self.config.search {
            let cleared = defaults
                .as_ref()
                .is_some_and(|d| !d.global_filter.is_empty());
            if !query.global_filter.is_empty() || cleared {
                out.append_pair(SEARCH, &query.global_filter);
            }
        }
        for key in &self.config.filters {
            match query.filters.get(key).filter(|value| !value.is_empty()) {
                Some(value) => {
                    for raw in value.values() {
                        out.append_pair(key, &raw);
                    }
                }
                None => {
                    let cleared = defaults
                        .as_ref()
                        .is_some_and(|d| d.filters.get(key).is_some_and(|v| !v.is_empty()));
                    if cleared {
                        out.append_pair(key, "");
                    }
                }
            }
        }

        out.finish()
    }

    /// Overlay the mirrored params found in `query_string` onto `base`.
    ///
    /// A param present in the URL wins; an absent one keeps the base value,
    /// and an empty one clears it. Malformed values are ignored.
    pub fn decode_into(&self, query_string: &str, base: QueryState) -> QueryState {
        let pairs: Vec<(String, String)> =
            form_urlencoded::parse(query_string.trim_start_matches('?').as_bytes())
                .into_owned()
                .collect();
        let first = |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let mut query = base;

        if self.config.sorting {
            match first(SORT) {
                Some("") => query.sorting.clear(),
                Some(field) => {
                    let rule = match first(ORDER) {
                        Some("desc") => SortingRule::desc(field),
                        _ => SortingRule::asc(field),
                    };
                    query.sorting = vec![rule];
                }
                None => {}
            }
        }
        if self.config.pagination {
            if let Some(size) = first(PAGE_SIZE).and_then(|s| s.parse::<usize>().ok()) {
                if size > 0 {
                    query.page_size = size;
                }
            }
            if let Some(page) = first(PAGE).and_then(|s| s.parse::<usize>().ok()) {
                if page <= MAX_PAGE {
                    query.page_index = page.saturating_sub(1);
                } else {
                    tracing::warn!("Ignoring page {} from URL", page);
                }
            }
        }
        if self.config.search {
            if let Some(text) = first(SEARCH) {
                query.global_filter = text.to_string();
            }
        }
        for key in &self.config.filters {
            let values: Vec<String> = pairs
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .collect();
            if values.is_empty() {
                continue;
            }
            let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
            if values.is_empty() {
                query.filters.remove(key);
                continue;
            }
            if let Some(value) = self.filter_value(key, values) {
                query.filters.insert(key.clone(), value);
            }
        }

        query
    }

    fn filter_value(&self, key: &str, mut values: Vec<String>) -> Option<FilterValue> {
        if let Some(registry) = &self.registry {
            if registry.get(key).is_some() {
                return registry.value_from_raw(key, values);
            }
        }
        if values.len() == 1 {
            let value = values.remove(0);
            Some(FilterValue::Dropdown {
                option: FilterOption::new(value.clone(), value),
            })
        } else {
            Some(FilterValue::Multi {
                options: values
                    .into_iter()
                    .map(|v| FilterOption::new(v.clone(), v))
                    .collect(),
            })
        }
    }

    /// Apply the location's params to the store, URL winning over its current
    /// state. A page size outside the allowed set is dropped.
    pub fn hydrate(
        &self,
        store: &QueryStateStore,
        location: &dyn Location,
    ) -> Result<bool, ValidationError> {
        let base = store.query();
        self.defaults.lock().get_or_insert_with(|| base.clone());
        let mut query = self.decode_into(&location.query_string(), base.clone());
        if !store.is_allowed_page_size(query.page_size) {
            tracing::warn!(
                "Ignoring page size {} from URL; not in {:?}",
                query.page_size,
                store.page_sizes()
            );
            query.page_size = base.page_size;
        }
        store.replace(query)
    }

    /// Write every store change to the location until the handle is dropped.
    pub fn attach(
        self: &Arc<Self>,
        store: &QueryStateStore,
        location: Arc<dyn Location>,
    ) -> UrlSyncHandle {
        let mut snapshots = store.subscribe();
        let bridge = self.clone();
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        bridge.write(&store.query(), location.as_ref());

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let query = snapshots.borrow_and_update().query.clone();
                        bridge.write(&query, location.as_ref());
                    }
                }
            }
            tracing::debug!("URL sync detached");
        });

        UrlSyncHandle {
            shutdown,
            task: Some(task),
        }
    }

    fn write(&self, query: &QueryState, location: &dyn Location) {
        let current = location.query_string();
        let next = self.encode(query, &current);
        if next != current {
            location.replace_query(&next);
        }
    }
}

/// Keeps a location in sync with a store; stops on drop.
pub struct UrlSyncHandle {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UrlSyncHandle {
    pub fn detach(&mut self) {
        self.shutdown.cancel();
        self.task.take();
    }
}

impl Drop for UrlSyncHandle {
    fn drop(&mut self) {
        self.detach();
    }
}
