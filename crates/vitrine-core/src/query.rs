//! Query state types.
//!
//! A `QueryState` is everything a collection view wants from the backend:
//! page, sort order, free-text search and filter values.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single sort instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortingRule {
    /// Column / field identifier.
    pub id: String,

    /// Sort descending when true.
    #[serde(default)]
    pub desc: bool,
}

impl SortingRule {
    pub fn asc(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            desc: false,
        }
    }

    pub fn desc(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            desc: true,
        }
    }
}

/// A selectable option: backend value plus display label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterOption {
    pub value: String,
    pub label: String,
}

impl FilterOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

/// A committed filter value.
///
/// Tagged so adapters can match on the control kind that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FilterValue {
    /// One option from a single-select dropdown.
    Dropdown { option: FilterOption },

    /// A calendar date.
    Date { date: NaiveDate },

    /// Any number of options from a multi-select control.
    Multi { options: Vec<FilterOption> },
}

impl FilterValue {
    /// Normalized `{value, label}` list.
    pub fn options(&self) -> Vec<FilterOption> {
        match self {
            FilterValue::Dropdown { option } => vec![option.clone()],
            FilterValue::Date { date } => {
                let text = date.format("%Y-%m-%d").to_string();
                vec![FilterOption::new(text.clone(), text)]
            }
            FilterValue::Multi { options } => options.clone(),
        }
    }

    /// Raw backend values.
    pub fn values(&self) -> Vec<String> {
        self.options().into_iter().map(|o| o.value).collect()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FilterValue::Multi { options } if options.is_empty())
    }

    /// JSON value sent to the backend: scalars for single values,
    /// arrays for multi-select.
    pub fn to_param(&self) -> serde_json::Value {
        match self {
            FilterValue::Multi { options } => serde_json::Value::Array(
                options
                    .iter()
                    .map(|o| serde_json::Value::String(o.value.clone()))
                    .collect(),
            ),
            single => single
                .values()
                .into_iter()
                .next()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A per-column filter set directly by a table header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: String,
    pub value: serde_json::Value,
}

/// Complete description of what one view currently wants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState {
    pub page_index: usize,
    pub page_size: usize,
    #[serde(default)]
    pub sorting: Vec<SortingRule>,
    #[serde(default)]
    pub global_filter: String,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,
    #[serde(default)]
    pub column_filters: Vec<ColumnFilter>,
}

impl QueryState {
    /// Create an unfiltered first page of the given size.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_index: 0,
            page_size,
            sorting: Vec::new(),
            global_filter: String::new(),
            filters: BTreeMap::new(),
            column_filters: Vec::new(),
        }
    }

    pub fn with_sorting(mut self, rule: SortingRule) -> Self {
        self.sorting = vec![rule];
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: FilterValue) -> Self {
        self.filters.insert(key.into(), value);
        self
    }

    pub fn with_global_filter(mut self, text: impl Into<String>) -> Self {
        self.global_filter = text.into();
        self
    }

    /// The sort instruction backends honor (the first one).
    pub fn primary_sort(&self) -> Option<&SortingRule> {
        self.sorting.first()
    }

    /// Canonical serialization used as a cache key.
    ///
    /// Filters live in a `BTreeMap`, so equal states always produce equal keys.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// How a view presents its rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Table,
    Grid,
}
