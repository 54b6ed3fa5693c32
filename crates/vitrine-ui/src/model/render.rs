use serde::Serialize;
use vitrine_core::ViewMode;
use vitrine_engine::{FetchPhase, FilterControl};

use super::Pagination;

// =============================================================================
// Render Model
// =============================================================================

/// Everything a screen needs to draw one collection view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderModel {
    pub mode: ViewMode,
    pub phase: FetchPhase,
    /// A request is in flight. Previous rows stay in `body`.
    pub loading: bool,
    pub body: RenderBody,
    pub pagination: Pagination,
    pub error: Option<ErrorPanel>,
    pub filters: Vec<FilterControl>,
    pub search: String,
}

impl RenderModel {
    pub fn row_count(&self) -> usize {
        match &self.body {
            RenderBody::Table(table) => table.rows.len(),
            RenderBody::Grid(grid) => grid.cards.len(),
            RenderBody::Empty { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderBody {
    Table(TableView),
    Grid(GridView),
    /// Nothing to show yet, or no matches.
    Empty { message: String },
}

// =============================================================================
// Table
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderCell {
    pub id: String,
    pub title: String,
    pub sortable: bool,
    /// Set on the column the view is sorted by.
    pub sort: Option<SortDirection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub headers: Vec<HeaderCell>,
    /// Formatted cells, one inner vec per row in header order.
    pub rows: Vec<Vec<String>>,
}

// =============================================================================
// Grid
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Card {
    pub title: String,
    pub subtitle: Option<String>,
    /// Label / value pairs.
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GridView {
    pub cards: Vec<Card>,
}

// =============================================================================
// Error
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPanel {
    pub message: String,
    /// Offer a retry action.
    pub retryable: bool,
}
