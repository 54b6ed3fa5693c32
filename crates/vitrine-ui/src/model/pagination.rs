use serde::Serialize;

/// Pagination footer state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page_index: usize,
    pub page_size: usize,
    pub total: usize,
    pub page_count: usize,
    /// 1-based index of the first row shown, 0 when there are none.
    pub first_row: usize,
    /// 1-based index of the last row shown, 0 when there are none.
    pub last_row: usize,
    pub can_previous: bool,
    pub can_next: bool,
}

impl Pagination {
    pub fn new(page_index: usize, page_size: usize, total: usize) -> Self {
        let page_count = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        };
        let start = page_index.saturating_mul(page_size);
        let (first_row, last_row) = if start < total {
            (start + 1, (start + page_size).min(total))
        } else {
            (0, 0)
        };

        Self {
            page_index,
            page_size,
            total,
            page_count,
            first_row,
            last_row,
            can_previous: page_index > 0,
            can_next: page_index.saturating_add(1) < page_count,
        }
    }

    /// 1-based page number for display.
    pub fn page_number(&self) -> usize {
        self.page_index.saturating_add(1)
    }

    pub fn label(&self) -> String {
        if self.total == 0 {
            return "No rows".to_string();
        }
        format!(
            "Rows {}-{} of {}, page {} of {}",
            self.first_row,
            self.last_row,
            self.total,
            self.page_number(),
            self.page_count
        )
    }
}
