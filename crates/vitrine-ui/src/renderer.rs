//! Table and card grid rendering.
//!
//! Both modes read the same committed rows; switching between them is a
//! pure re-render and never goes back to the backend.

use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;
use vitrine_core::{FetchError, QueryState, ViewMode};
use vitrine_engine::path::resolve_path;
use vitrine_engine::{FetchPhase, QuerySnapshot, ViewStatus};

use crate::model::{
    Card, ErrorPanel, GridView, HeaderCell, Pagination, RenderBody, RenderModel, SortDirection,
    TableView,
};

const MISSING: &str = "-";
const ELLIPSIS: &str = "…";

// =============================================================================
// Column and Card Templates
// =============================================================================

/// One table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Sort field id.
    pub id: String,
    pub header: String,
    /// Dot path into the row.
    pub accessor: String,
    pub sortable: bool,
    /// Truncate cells longer than this many characters.
    pub max_width: Option<usize>,
}

impl Column {
    pub fn new(id: impl Into<String>, header: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            accessor: id.clone(),
            id,
            header: header.into(),
            sortable: false,
            max_width: None,
        }
    }

    pub fn accessor(mut self, path: impl Into<String>) -> Self {
        self.accessor = path.into();
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn max_width(mut self, width: usize) -> Self {
        self.max_width = Some(width);
        self
    }

    fn cell(&self, row: &Value) -> String {
        let text = format_value(resolve_path(row, &self.accessor));
        match self.max_width {
            Some(width) => truncate(&text, width),
            None => text,
        }
    }
}

/// How a row becomes a card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardTemplate {
    pub title: String,
    pub subtitle: Option<String>,
    pub fields: Vec<Column>,
}

impl CardTemplate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn subtitle(mut self, path: impl Into<String>) -> Self {
        self.subtitle = Some(path.into());
        self
    }

    pub fn field(mut self, column: Column) -> Self {
        self.fields.push(column);
        self
    }

    fn card(&self, row: &Value) -> Card {
        Card {
            title: format_value(resolve_path(row, &self.title)),
            subtitle: self
                .subtitle
                .as_ref()
                .map(|path| format_value(resolve_path(row, path))),
            fields: self
                .fields
                .iter()
                .map(|column| (column.header.clone(), column.cell(row)))
                .collect(),
        }
    }
}

// =============================================================================
// ViewRenderer
// =============================================================================

/// Builds render models from a query snapshot and a view status.
#[derive(Debug, Clone)]
pub struct ViewRenderer {
    columns: Vec<Column>,
    card: CardTemplate,
    empty_message: String,
}

impl ViewRenderer {
    pub fn new(columns: Vec<Column>, card: CardTemplate) -> Self {
        Self {
            columns,
            card,
            empty_message: "No results".to_string(),
        }
    }

    pub fn empty_message(mut self, message: impl Into<String>) -> Self {
        self.empty_message = message.into();
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether a field can be sorted on.
    pub fn is_sortable(&self, id: &str) -> bool {
        self.columns.iter().any(|c| c.id == id && c.sortable)
    }

    pub fn render(&self, snapshot: &QuerySnapshot, status: &ViewStatus) -> RenderModel {
        let query = &snapshot.query;
        let rows = status.rows();
        // The footer describes the rows on screen, which may be older than
        // the snapshot while loading or after a cancel.
        let shown = status.page.as_ref().map_or(query, |page| &page.query);

        let body = if rows.is_empty() {
            RenderBody::Empty {
                message: self.placeholder(status).to_string(),
            }
        } else {
            match snapshot.view_mode {
                ViewMode::Table => RenderBody::Table(self.table(query, rows)),
                ViewMode::Grid => RenderBody::Grid(GridView {
                    cards: rows.iter().map(|row| self.card.card(row)).collect(),
                }),
            }
        };

        RenderModel {
            mode: snapshot.view_mode,
            phase: status.phase,
            loading: status.is_loading(),
            body,
            pagination: Pagination::new(shown.page_index, shown.page_size, status.total()),
            error: status.error.as_ref().map(|error| ErrorPanel {
                message: error_message(error),
                retryable: status.is_retryable(),
            }),
            filters: Vec::new(),
            search: query.global_filter.clone(),
        }
    }

    fn placeholder(&self, status: &ViewStatus) -> &str {
        match status.phase {
            FetchPhase::Idle | FetchPhase::Loading => "Loading...",
            FetchPhase::Error => "Could not load data",
            FetchPhase::Success => &self.empty_message,
        }
    }

    fn table(&self, query: &QueryState, rows: &[Value]) -> TableView {
        let sort = query.primary_sort();
        let headers = self
            .columns
            .iter()
            .map(|column| HeaderCell {
                id: column.id.clone(),
                title: column.header.clone(),
                sortable: column.sortable,
                sort: sort.filter(|s| s.id == column.id).map(|s| {
                    if s.desc {
                        SortDirection::Descending
                    } else {
                        SortDirection::Ascending
                    }
                }),
            })
            .collect();

        TableView {
            headers,
            rows: rows
                .iter()
                .map(|row| self.columns.iter().map(|c| c.cell(row)).collect())
                .collect(),
        }
    }
}

fn error_message(error: &FetchError) -> String {
    match error {
        FetchError::AuthExpired => "Your session has expired. Please sign in again.".to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Text Rendering
// =============================================================================

/// Plain-text rendering of a render model.
pub fn to_text(model: &RenderModel) -> String {
    let mut lines = Vec::new();

    if model.loading {
        lines.push("[loading]".to_string());
    }
    if !model.search.is_empty() {
        lines.push(format!("Search: \"{}\"", model.search));
    }
    let selected: Vec<String> = model
        .filters
        .iter()
        .filter(|control| !control.selected.is_empty())
        .map(|control| {
            let labels: Vec<&str> = control.selected.iter().map(|o| o.label.as_str()).collect();
            format!("{}={}", control.label, labels.join(", "))
        })
        .collect();
    if !selected.is_empty() {
        lines.push(format!("Filters: {}", selected.join("; ")));
    }

    match &model.body {
        RenderBody::Table(table) => table_lines(table, &mut lines),
        RenderBody::Grid(grid) => grid_lines(grid, &mut lines),
        RenderBody::Empty { message } => lines.push(message.clone()),
    }

    if let Some(error) = &model.error {
        let action = if error.retryable { " [retry]" } else { "" };
        lines.push(format!("Error: {}{}", error.message, action));
    }
    lines.push(model.pagination.label());

    lines
        .iter()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

fn table_lines(table: &TableView, lines: &mut Vec<String>) {
    let titles: Vec<String> = table
        .headers
        .iter()
        .map(|header| match header.sort {
            Some(SortDirection::Ascending) => format!("{} ^", header.title),
            Some(SortDirection::Descending) => format!("{} v", header.title),
            None => header.title.clone(),
        })
        .collect();

    let mut widths: Vec<usize> = titles.iter().map(|t| width(t)).collect();
    for row in &table.rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(width(cell));
            }
        }
    }

    lines.push(join_padded(&titles, &widths));
    lines.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in &table.rows {
        lines.push(join_padded(row, &widths));
    }
}

fn grid_lines(grid: &GridView, lines: &mut Vec<String>) {
    for (i, card) in grid.cards.iter().enumerate() {
        if i > 0 {
            lines.push(String::new());
        }
        lines.push(format!("[ {} ]", card.title));
        if let Some(subtitle) = &card.subtitle {
            lines.push(format!("  {subtitle}"));
        }
        for (label, value) in &card.fields {
            lines.push(format!("  {label}: {value}"));
        }
    }
}

fn join_padded(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| pad(cell, *w))
        .collect::<Vec<_>>()
        .join(" | ")
}

// =============================================================================
// Cell Formatting
// =============================================================================

fn width(text: &str) -> usize {
    text.graphemes(true).count()
}

fn pad(text: &str, to: usize) -> String {
    let mut out = text.to_string();
    out.extend(std::iter::repeat(' ').take(to.saturating_sub(width(text))));
    out
}

/// Shorten to at most `max` graphemes, ending in an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if width(text) <= max {
        return text.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = text.graphemes(true).take(max - 1).collect();
    out.push_str(ELLIPSIS);
    out
}

fn format_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING.to_string(),
        Some(Value::String(s)) if s.is_empty() => MISSING.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => (if *b { "Yes" } else { "No" }).to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| format_value(Some(item)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}
