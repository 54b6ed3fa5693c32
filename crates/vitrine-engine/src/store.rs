//! Observable query state with automatic change notifications.
//!
//! Mutation = notification. Every setter builds a new immutable snapshot and
//! broadcasts it; subscribers never observe a partially-applied state.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use vitrine_core::{
    ColumnFilter, EngineConfig, FilterValue, QueryState, SortingRule, ValidationError, ViewMode,
};

// =============================================================================
// Snapshot
// =============================================================================

/// What kind of mutation produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryChange {
    /// State the store was created with.
    Initial,
    Page,
    PageSize,
    Sorting,
    GlobalFilter,
    Filter,
    ColumnFilters,
    ViewMode,
    /// Whole state replaced (URL hydration, reset).
    Replaced,
}

impl QueryChange {
    /// Only free-text search is debounced before fetching.
    pub fn is_debounced(self) -> bool {
        matches!(self, QueryChange::GlobalFilter)
    }

    /// View mode toggles re-render from the same rows.
    pub fn affects_fetch(self) -> bool {
        !matches!(self, QueryChange::ViewMode)
    }

    fn resets_page(self) -> bool {
        matches!(
            self,
            QueryChange::PageSize
                | QueryChange::Sorting
                | QueryChange::GlobalFilter
                | QueryChange::Filter
                | QueryChange::ColumnFilters
        )
    }
}

/// An immutable view of the store at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot {
    /// Monotonic revision, bumped on every effective mutation.
    pub revision: u64,
    pub query: QueryState,
    pub view_mode: ViewMode,
    pub change: QueryChange,
}

// =============================================================================
// QueryStateStore
// =============================================================================

/// Single source of truth for one view's pagination, sorting, search and
/// filters.
///
/// Uses `parking_lot::RwLock` for the current snapshot and
/// `tokio::sync::watch` for broadcasts. Setters that would not change
/// anything do not broadcast.
pub struct QueryStateStore {
    inner: RwLock<Arc<QuerySnapshot>>,
    page_sizes: Vec<usize>,
    tx: watch::Sender<Arc<QuerySnapshot>>,
}

impl QueryStateStore {
    /// Create a store with an initial state and the allowed page sizes.
    pub fn new(initial: QueryState, page_sizes: Vec<usize>) -> Self {
        let snapshot = Arc::new(QuerySnapshot {
            revision: 0,
            query: initial,
            view_mode: ViewMode::default(),
            change: QueryChange::Initial,
        });
        let (tx, _rx) = watch::channel(snapshot.clone());
        Self {
            inner: RwLock::new(snapshot),
            page_sizes,
            tx,
        }
    }

    /// Create an unfiltered store using the configured default page size.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            QueryState::new(config.default_page_size),
            config.page_sizes.clone(),
        )
    }

    // =========================================================================
    // Mutation Methods (all broadcast automatically)
    // =========================================================================

    /// Go to a page. Does not reset anything else.
    pub fn set_page(&self, index: usize) -> bool {
        self.apply(QueryChange::Page, |query, _| query.page_index = index)
    }

    pub fn next_page(&self) -> bool {
        self.apply(QueryChange::Page, |query, _| {
            query.page_index = query.page_index.saturating_add(1)
        })
    }

    /// Go back one page, stopping at the first.
    pub fn previous_page(&self) -> bool {
        self.apply(QueryChange::Page, |query, _| {
            query.page_index = query.page_index.saturating_sub(1)
        })
    }

    /// Change the page size. Must be one of the allowed sizes.
    pub fn set_page_size(&self, size: usize) -> Result<bool, ValidationError> {
        self.check_page_size(size)?;
        Ok(self.apply(QueryChange::PageSize, |query, _| query.page_size = size))
    }

    pub fn set_sorting(&self, sorting: Vec<SortingRule>) -> bool {
        self.apply(QueryChange::Sorting, |query, _| query.sorting = sorting)
    }

    /// Update the search text immediately; fetching is debounced downstream.
    pub fn set_global_filter(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.apply(QueryChange::GlobalFilter, |query, _| {
            query.global_filter = text
        })
    }

    /// Set a filter value. An empty multi-select clears the key.
    pub fn set_filter(&self, key: impl Into<String>, value: FilterValue) -> bool {
        let key = key.into();
        self.apply(QueryChange::Filter, |query, _| {
            if value.is_empty() {
                query.filters.remove(&key);
            } else {
                query.filters.insert(key, value);
            }
        })
    }

    pub fn clear_filter(&self, key: &str) -> bool {
        self.apply(QueryChange::Filter, |query, _| {
            query.filters.remove(key);
        })
    }

    pub fn set_column_filters(&self, filters: Vec<ColumnFilter>) -> bool {
        self.apply(QueryChange::ColumnFilters, |query, _| {
            query.column_filters = filters
        })
    }

    pub fn set_view_mode(&self, mode: ViewMode) -> bool {
        self.apply(QueryChange::ViewMode, |_, view_mode| *view_mode = mode)
    }

    /// Replace the whole query state (hydration). Keeps the given page index.
    pub fn replace(&self, query: QueryState) -> Result<bool, ValidationError> {
        self.check_page_size(query.page_size)?;
        Ok(self.apply(QueryChange::Replaced, |current, _| *current = query))
    }

    // =========================================================================
    // Read Methods
    // =========================================================================

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Arc<QuerySnapshot> {
        self.inner.read().clone()
    }

    /// Get a copy of the current query state.
    pub fn query(&self) -> QueryState {
        self.inner.read().query.clone()
    }

    /// Subscribe to snapshot changes.
    ///
    /// The receiver starts with the current snapshot marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Arc<QuerySnapshot>> {
        self.tx.subscribe()
    }

    pub fn page_sizes(&self) -> &[usize] {
        &self.page_sizes
    }

    pub fn is_allowed_page_size(&self, size: usize) -> bool {
        self.page_sizes.contains(&size)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn check_page_size(&self, size: usize) -> Result<(), ValidationError> {
        if self.is_allowed_page_size(size) {
            Ok(())
        } else {
            Err(ValidationError::new(
                "pageSize",
                format!("{size} is not one of {:?}", self.page_sizes),
            ))
        }
    }

    /// Apply a mutation to a copy of the current state and broadcast it.
    ///
    /// Returns `false` (and broadcasts nothing) if the result is unchanged.
    fn apply<F>(&self, change: QueryChange, f: F) -> bool
    where
        F: FnOnce(&mut QueryState, &mut ViewMode),
    {
        let mut inner = self.inner.write();
        let mut query = inner.query.clone();
        let mut view_mode = inner.view_mode;
        f(&mut query, &mut view_mode);

        if query == inner.query && view_mode == inner.view_mode {
            return false;
        }
        if change.resets_page() {
            query.page_index = 0;
        }

        let snapshot = Arc::new(QuerySnapshot {
            revision: inner.revision + 1,
            query,
            view_mode,
            change,
        });
        tracing::debug!(
            "Query state revision {} ({:?})",
            snapshot.revision,
            snapshot.change
        );
        *inner = snapshot.clone();
        // Sent under the write lock so broadcasts keep revision order.
        self.tx.send_replace(snapshot);
        true
    }
}
