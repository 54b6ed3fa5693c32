//! Fetch result types.

use serde::{Deserialize, Serialize};

/// One row of a collection. Backends return arbitrary JSON objects.
pub type Row = serde_json::Value;

/// One page of a server-held collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Rows of the requested page, in backend order.
    pub rows: Vec<Row>,

    /// Total matching rows across all pages.
    pub total: usize,
}

impl FetchResult {
    /// Create a result, raising `total` if the backend under-reports it.
    pub fn new(rows: Vec<Row>, total: usize) -> Self {
        let total = total.max(rows.len());
        Self { rows, total }
    }

    /// The empty result used when a response cannot be interpreted.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Number of pages of `page_size` needed to show `total` rows.
    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(page_size)
    }
}
