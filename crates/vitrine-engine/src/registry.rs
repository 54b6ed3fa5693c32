//! Dynamic filter registry.
//!
//! Screens declare their filters as descriptors (dropdown, date,
//! multi-select). The registry validates control input against them,
//! normalizes it into a tagged `FilterValue` and commits it to the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vitrine_core::{
    FetchError, FilterOption, FilterValue, OptionsError, QueryState, ValidationError,
};

use crate::store::QueryStateStore;

// =============================================================================
// Descriptors
// =============================================================================

/// Control kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Dropdown,
    Date,
    Multiselect,
}

/// How many options a control accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMode {
    #[default]
    Single,
    Multi,
}

/// Loads the options of a filter from the backend.
pub trait OptionsFetcher: Send + Sync {
    fn fetch_options(
        &self,
        signal: CancellationToken,
    ) -> BoxFuture<'static, Result<Vec<FilterOption>, FetchError>>;
}

/// Where a filter's options come from.
#[derive(Clone, Default)]
pub enum OptionSource {
    /// Free input (dates).
    #[default]
    None,
    Static(Vec<FilterOption>),
    Remote(Arc<dyn OptionsFetcher>),
}

impl std::fmt::Debug for OptionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionSource::None => write!(f, "None"),
            OptionSource::Static(options) => f.debug_tuple("Static").field(options).finish(),
            OptionSource::Remote(_) => write!(f, "Remote(..)"),
        }
    }
}

/// Declarative description of one filter control.
#[derive(Debug, Clone)]
pub struct FilterDescriptor {
    /// Key in `QueryState::filters`.
    pub data_key: String,
    pub label: String,
    pub kind: FilterKind,
    pub mode: SelectMode,
    pub options: OptionSource,
}

impl FilterDescriptor {
    /// Single-select dropdown with fixed options.
    pub fn dropdown(
        data_key: impl Into<String>,
        label: impl Into<String>,
        options: Vec<FilterOption>,
    ) -> Self {
        Self {
            data_key: data_key.into(),
            label: label.into(),
            kind: FilterKind::Dropdown,
            mode: SelectMode::Single,
            options: OptionSource::Static(options),
        }
    }

    /// Multi-select with fixed options.
    pub fn multiselect(
        data_key: impl Into<String>,
        label: impl Into<String>,
        options: Vec<FilterOption>,
    ) -> Self {
        Self {
            data_key: data_key.into(),
            label: label.into(),
            kind: FilterKind::Multiselect,
            mode: SelectMode::Multi,
            options: OptionSource::Static(options),
        }
    }

    /// Date picker.
    pub fn date(data_key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            data_key: data_key.into(),
            label: label.into(),
            kind: FilterKind::Date,
            mode: SelectMode::Single,
            options: OptionSource::None,
        }
    }

    /// Load options from the backend instead.
    pub fn remote(mut self, fetcher: Arc<dyn OptionsFetcher>) -> Self {
        self.options = OptionSource::Remote(fetcher);
        self
    }

    /// Allow several selections.
    pub fn multi(mut self) -> Self {
        self.mode = SelectMode::Multi;
        self
    }
}

/// Raw input from a control, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterInput {
    /// Selected option values.
    Select(Vec<String>),
    /// A `YYYY-MM-DD` date.
    Date(String),
    Clear,
}

/// Render model for one filter control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterControl {
    pub data_key: String,
    pub label: String,
    pub kind: FilterKind,
    pub mode: SelectMode,
    /// Known options (empty for dates and unloaded remote lists).
    pub options: Vec<FilterOption>,
    /// Current committed selection.
    pub selected: Vec<FilterOption>,
    /// Last rejected input, shown next to the control.
    pub error: Option<String>,
}

// =============================================================================
// DynamicFilterRegistry
// =============================================================================

/// Filter descriptors for one screen, in declaration order.
#[derive(Default)]
pub struct DynamicFilterRegistry {
    descriptors: RwLock<Vec<FilterDescriptor>>,
    /// Memoized remote option lists.
    loaded: RwLock<HashMap<String, Vec<FilterOption>>>,
}

impl DynamicFilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Keys must be unique.
    pub fn register(&self, descriptor: FilterDescriptor) -> Result<(), ValidationError> {
        let mut descriptors = self.descriptors.write();
        if descriptors.iter().any(|d| d.data_key == descriptor.data_key) {
            return Err(ValidationError::new(
                &descriptor.data_key,
                "filter already registered",
            ));
        }
        tracing::debug!("Registered filter '{}'", descriptor.data_key);
        descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<FilterDescriptor> {
        self.descriptors
            .read()
            .iter()
            .find(|d| d.data_key == key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.descriptors
            .read()
            .iter()
            .map(|d| d.data_key.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.descriptors.read().len()
    }

    /// Options known right now: static ones, or remote ones already loaded.
    pub fn options_for(&self, key: &str) -> Vec<FilterOption> {
        match self.get(key).map(|d| d.options) {
            Some(OptionSource::Static(options)) => options,
            Some(OptionSource::Remote(_)) => {
                self.loaded.read().get(key).cloned().unwrap_or_default()
            }
            Some(OptionSource::None) | None => Vec::new(),
        }
    }

    /// Load (and memoize) the options of a filter.
    pub async fn load_options(&self, key: &str) -> Result<Vec<FilterOption>, OptionsError> {
        let descriptor = self
            .get(key)
            .ok_or_else(|| ValidationError::new(key, "unknown filter"))?;

        match descriptor.options {
            OptionSource::Remote(fetcher) => {
                if let Some(options) = self.loaded.read().get(key) {
                    return Ok(options.clone());
                }
                let options = fetcher.fetch_options(CancellationToken::new()).await?;
                tracing::debug!("Loaded {} options for '{}'", options.len(), key);
                self.loaded.write().insert(key.to_string(), options.clone());
                Ok(options)
            }
            OptionSource::Static(options) => Ok(options),
            OptionSource::None => Ok(Vec::new()),
        }
    }

    /// Validate control input and turn it into a filter value.
    ///
    /// `Ok(None)` means the filter should be cleared.
    pub fn normalize(
        &self,
        key: &str,
        input: FilterInput,
    ) -> Result<Option<FilterValue>, ValidationError> {
        let descriptor = self
            .get(key)
            .ok_or_else(|| ValidationError::new(key, "unknown filter"))?;

        match (descriptor.kind, input) {
            (_, FilterInput::Clear) => Ok(None),
            (FilterKind::Date, FilterInput::Date(text)) => {
                let date = NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").map_err(|_| {
                    ValidationError::new(key, format!("'{text}' is not a YYYY-MM-DD date"))
                })?;
                Ok(Some(FilterValue::Date { date }))
            }
            (FilterKind::Date, FilterInput::Select(_)) => {
                Err(ValidationError::new(key, "expected a date"))
            }
            (_, FilterInput::Date(_)) => Err(ValidationError::new(key, "expected a selection")),
            (_, FilterInput::Select(values)) => self.normalize_selection(&descriptor, values),
        }
    }

    fn normalize_selection(
        &self,
        descriptor: &FilterDescriptor,
        values: Vec<String>,
    ) -> Result<Option<FilterValue>, ValidationError> {
        let key = descriptor.data_key.as_str();
        if values.is_empty() {
            return Ok(None);
        }
        if descriptor.mode == SelectMode::Single && values.len() > 1 {
            return Err(ValidationError::new(key, "only one value allowed"));
        }

        let known = self.options_for(key);
        // Remote lists that have not loaded yet cannot be checked.
        let strict = !known.is_empty() || matches!(descriptor.options, OptionSource::Static(_));

        let mut options = Vec::with_capacity(values.len());
        for value in values {
            match known.iter().find(|o| o.value == value) {
                Some(option) => options.push(option.clone()),
                None if strict => {
                    return Err(ValidationError::new(
                        key,
                        format!("'{value}' is not an available option"),
                    ))
                }
                None => options.push(FilterOption::new(value.clone(), value)),
            }
        }
        let options = dedup_options(options);

        let value = match descriptor.mode {
            SelectMode::Multi => FilterValue::Multi { options },
            SelectMode::Single => match options.into_iter().next() {
                Some(option) => FilterValue::Dropdown { option },
                None => return Ok(None),
            },
        };
        Ok(Some(value))
    }

    /// Validate input and commit it to the store. Nothing is fetched on error.
    pub fn commit(
        &self,
        store: &QueryStateStore,
        key: &str,
        input: FilterInput,
    ) -> Result<bool, ValidationError> {
        match self.normalize(key, input)? {
            Some(value) => Ok(store.set_filter(key, value)),
            None => Ok(store.clear_filter(key)),
        }
    }

    /// Clear one filter.
    pub fn clear(&self, store: &QueryStateStore, key: &str) -> bool {
        store.clear_filter(key)
    }

    /// Rebuild a filter value from raw values (URL hydration).
    ///
    /// Lenient: labels come from known options, falling back to the value.
    pub fn value_from_raw(&self, key: &str, values: Vec<String>) -> Option<FilterValue> {
        let descriptor = self.get(key)?;
        if values.is_empty() {
            return None;
        }
        if descriptor.kind == FilterKind::Date {
            let date = NaiveDate::parse_from_str(values[0].trim(), "%Y-%m-%d").ok()?;
            return Some(FilterValue::Date { date });
        }

        let known = self.options_for(key);
        let options = dedup_options(
            values
                .into_iter()
                .map(|value| {
                    known
                        .iter()
                        .find(|o| o.value == value)
                        .cloned()
                        .unwrap_or_else(|| FilterOption::new(value.clone(), value))
                })
                .collect(),
        );

        match descriptor.mode {
            SelectMode::Multi => Some(FilterValue::Multi { options }),
            SelectMode::Single => options
                .into_iter()
                .next()
                .map(|option| FilterValue::Dropdown { option }),
        }
    }

    /// Render models for every control, with the current selection.
    pub fn controls(&self, query: &QueryState) -> Vec<FilterControl> {
        let descriptors = self.descriptors.read().clone();
        descriptors
            .into_iter()
            .map(|d| FilterControl {
                options: self.options_for(&d.data_key),
                selected: query
                    .filters
                    .get(&d.data_key)
                    .map(FilterValue::options)
                    .unwrap_or_default(),
                data_key: d.data_key,
                label: d.label,
                kind: d.kind,
                mode: d.mode,
                error: None,
            })
            .collect()
    }
}

/// Drop repeated values, keeping the first occurrence in order.
fn dedup_options(options: Vec<FilterOption>) -> Vec<FilterOption> {
    let mut seen = HashSet::new();
    options
        .into_iter()
        .filter(|option| seen.insert(option.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn statuses() -> Vec<FilterOption> {
        vec![
            FilterOption::new("active", "Active"),
            FilterOption::new("inactive", "Inactive"),
        ]
    }

    fn registry() -> DynamicFilterRegistry {
        let registry = DynamicFilterRegistry::new();
        registry
            .register(FilterDescriptor::dropdown("status", "Status", statuses()))
            .unwrap();
        registry
            .register(FilterDescriptor::multiselect(
                "skinType",
                "Skin type",
                vec![
                    FilterOption::new("dry", "Dry"),
                    FilterOption::new("oily", "Oily"),
                ],
            ))
            .unwrap();
        registry
            .register(FilterDescriptor::date("createdFrom", "Created from"))
            .unwrap();
        registry
    }

    fn store() -> QueryStateStore {
        QueryStateStore::new(QueryState::new(10), vec![10])
    }

    struct CountingFetcher(AtomicUsize);

    impl OptionsFetcher for CountingFetcher {
        fn fetch_options(
            &self,
            _signal: CancellationToken,
        ) -> BoxFuture<'static, Result<Vec<FilterOption>, FetchError>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(vec![FilterOption::new("7", "Acme")]) })
        }
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let registry = registry();
        let err = registry
            .register(FilterDescriptor::date("status", "Again"))
            .unwrap_err();
        assert_eq!(err.field, "status");
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn test_commit_dropdown_uses_option_label() {
        let registry = registry();
        let store = store();
        store.set_page(4);

        registry
            .commit(&store, "status", FilterInput::Select(vec!["active".to_string()]))
            .unwrap();

        let query = store.query();
        assert_eq!(
            query.filters["status"],
            FilterValue::Dropdown {
                option: FilterOption::new("active", "Active")
            }
        );
        assert_eq!(query.page_index, 0);
    }

    #[test]
    fn test_commit_multiselect() {
        let registry = registry();
        let store = store();
        registry
            .commit(
                &store,
                "skinType",
                FilterInput::Select(vec!["dry".to_string(), "oily".to_string()]),
            )
            .unwrap();

        assert_eq!(store.query().filters["skinType"].values(), vec!["dry", "oily"]);
    }

    #[test]
    fn test_repeated_values_collapse() {
        let registry = registry();
        let store = store();
        let select = |values: &[&str]| {
            FilterInput::Select(values.iter().map(|v| v.to_string()).collect())
        };

        registry
            .commit(&store, "skinType", select(&["dry", "oily", "dry"]))
            .unwrap();
        let first = store.query();
        assert_eq!(first.filters["skinType"].values(), vec!["dry", "oily"]);

        registry.commit(&store, "skinType", select(&["dry", "oily"])).unwrap();
        assert_eq!(store.query().cache_key(), first.cache_key());

        assert_eq!(
            registry
                .value_from_raw("skinType", vec!["oily".into(), "dry".into(), "oily".into()])
                .unwrap()
                .values(),
            vec!["oily", "dry"]
        );
    }

    #[tokio::test]
    async fn test_load_options_for_unknown_filter() {
        let err = registry().load_options("missing").await.unwrap_err();
        assert_eq!(
            err,
            OptionsError::Invalid(ValidationError::new("missing", "unknown filter"))
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_commit_date() {
        let registry = registry();
        let store = store();
        registry
            .commit(&store, "createdFrom", FilterInput::Date("2024-02-29".to_string()))
            .unwrap();

        assert_eq!(store.query().filters["createdFrom"].values(), vec!["2024-02-29"]);
    }

    #[test]
    fn test_validation_errors_leave_store_untouched() {
        let registry = registry();
        let store = store();
        let revision = store.snapshot().revision;

        let cases = vec![
            ("status", FilterInput::Select(vec!["deleted".to_string()])),
            (
                "status",
                FilterInput::Select(vec!["active".to_string(), "inactive".to_string()]),
            ),
            ("createdFrom", FilterInput::Date("2024-13-01".to_string())),
            ("createdFrom", FilterInput::Select(vec!["x".to_string()])),
            ("status", FilterInput::Date("2024-01-01".to_string())),
            ("missing", FilterInput::Select(vec!["x".to_string()])),
        ];
        for (key, input) in cases {
            let err = registry.commit(&store, key, input).unwrap_err();
            assert_eq!(err.field, key);
        }
        assert_eq!(store.snapshot().revision, revision);
    }

    #[test]
    fn test_clear_and_empty_selection() {
        let registry = registry();
        let store = store();
        registry
            .commit(&store, "status", FilterInput::Select(vec!["active".to_string()]))
            .unwrap();
        registry
            .commit(&store, "status", FilterInput::Select(vec![]))
            .unwrap();
        assert!(store.query().filters.is_empty());

        registry
            .commit(&store, "status", FilterInput::Select(vec!["active".to_string()]))
            .unwrap();
        registry.commit(&store, "status", FilterInput::Clear).unwrap();
        assert!(store.query().filters.is_empty());
    }

    #[tokio::test]
    async fn test_remote_options_memoized() {
        let fetcher = Arc::new(CountingFetcher(AtomicUsize::new(0)));
        let registry = DynamicFilterRegistry::new();
        registry
            .register(FilterDescriptor::dropdown("brand", "Brand", vec![]).remote(fetcher.clone()))
            .unwrap();

        // Unloaded remote lists accept any value.
        assert!(registry
            .normalize("brand", FilterInput::Select(vec!["99".to_string()]))
            .unwrap()
            .is_some());

        let options = registry.load_options("brand").await.unwrap();
        registry.load_options("brand").await.unwrap();
        assert_eq!(options, vec![FilterOption::new("7", "Acme")]);
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 1);

        let value = registry
            .normalize("brand", FilterInput::Select(vec!["7".to_string()]))
            .unwrap()
            .unwrap();
        assert_eq!(value.options()[0].label, "Acme");
        assert!(registry
            .normalize("brand", FilterInput::Select(vec!["99".to_string()]))
            .is_err());
    }

    #[test]
    fn test_controls_reflect_selection() {
        let registry = registry();
        let query = QueryState::new(10).with_filter(
            "status",
            FilterValue::Dropdown {
                option: FilterOption::new("inactive", "Inactive"),
            },
        );

        let controls = registry.controls(&query);
        assert_eq!(controls.len(), 3);
        assert_eq!(controls[0].data_key, "status");
        assert_eq!(controls[0].options, statuses());
        assert_eq!(controls[0].selected[0].value, "inactive");
        assert!(controls[1].selected.is_empty());
        assert_eq!(controls[2].kind, FilterKind::Date);
    }

    #[test]
    fn test_value_from_raw() {
        let registry = registry();
        assert_eq!(
            registry.value_from_raw("status", vec!["active".to_string()]),
            Some(FilterValue::Dropdown {
                option: FilterOption::new("active", "Active")
            })
        );
        assert_eq!(
            registry.value_from_raw("skinType", vec!["dry".to_string(), "new".to_string()]),
            Some(FilterValue::Multi {
                options: vec![FilterOption::new("dry", "Dry"), FilterOption::new("new", "new")]
            })
        );
        assert_eq!(registry.value_from_raw("createdFrom", vec!["nope".to_string()]), None);
        assert_eq!(registry.value_from_raw("unknown", vec!["x".to_string()]), None);
    }
}
