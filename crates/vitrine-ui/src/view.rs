//! One collection screen: store, coordinator, filters, URL and renderer.
//!
//! ```text
//! CollectionView::new ──▶ with_defaults / with_filter / with_url_sync
//!        │
//!      mount() ── hydrate from URL ── attach URL writer ── spawn coordinator
//!        │
//!   render() / render_text()     user input ──▶ store setters / apply_filter
//!        │
//!     unmount() ── stop coordinator (cancels in-flight work) ── detach URL writer
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use vitrine_core::{EngineConfig, QueryState, SortingRule, ValidationError, ViewMode};
use vitrine_engine::{
    CoordinatorOptions, DynamicFilterRegistry, FetchContract, FetchPhase, FilterDescriptor,
    FilterInput, Location, QueryStateStore, RequestCoordinator, ResponseCache, SessionEvents,
    UrlSyncBridge, UrlSyncConfig, UrlSyncHandle, ViewStatus,
};

use crate::model::RenderModel;
use crate::renderer::{to_text, ViewRenderer};

struct UrlBinding {
    bridge: Arc<UrlSyncBridge>,
    location: Arc<dyn Location>,
    handle: Option<UrlSyncHandle>,
}

pub struct CollectionView {
    store: Arc<QueryStateStore>,
    registry: Arc<DynamicFilterRegistry>,
    renderer: ViewRenderer,
    contract: Arc<dyn FetchContract>,
    cache: Arc<ResponseCache>,
    options: CoordinatorOptions,
    url: Option<UrlBinding>,
    coordinator: Option<RequestCoordinator>,
    /// Last rejected input per filter key.
    filter_errors: Mutex<HashMap<String, String>>,
}

impl CollectionView {
    pub fn new(
        config: &EngineConfig,
        key_prefix: impl Into<String>,
        contract: Arc<dyn FetchContract>,
        cache: Arc<ResponseCache>,
        renderer: ViewRenderer,
    ) -> Self {
        Self {
            store: Arc::new(QueryStateStore::from_config(config)),
            registry: Arc::new(DynamicFilterRegistry::new()),
            renderer,
            contract,
            cache,
            options: CoordinatorOptions::from_config(key_prefix, config),
            url: None,
            coordinator: None,
            filter_errors: Mutex::new(HashMap::new()),
        }
    }

    /// View-supplied starting state. URL params still win at mount.
    pub fn with_defaults(self, query: QueryState) -> Result<Self, ValidationError> {
        self.store.replace(query)?;
        Ok(self)
    }

    pub fn with_filter(self, descriptor: FilterDescriptor) -> Result<Self, ValidationError> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    pub fn with_session(mut self, session: SessionEvents) -> Self {
        self.options.session = Some(session);
        self
    }

    /// Mirror part of the state into `location`.
    pub fn with_url_sync(mut self, config: UrlSyncConfig, location: Arc<dyn Location>) -> Self {
        let bridge = UrlSyncBridge::new(config).with_registry(self.registry.clone());
        self.url = Some(UrlBinding {
            bridge: Arc::new(bridge),
            location,
            handle: None,
        });
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Hydrate from the URL and start fetching. Idempotent.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(&mut self) -> Result<(), ValidationError> {
        if self.coordinator.is_some() {
            return Ok(());
        }

        if let Some(url) = &mut self.url {
            url.bridge.hydrate(&self.store, url.location.as_ref())?;
            url.handle = Some(url.bridge.attach(&self.store, url.location.clone()));
        }

        self.coordinator = Some(RequestCoordinator::spawn(
            self.store.subscribe(),
            self.contract.clone(),
            self.cache.clone(),
            self.options.clone(),
        ));
        Ok(())
    }

    /// Stop fetching and cancel in-flight work. The view can be mounted again.
    pub fn unmount(&mut self) {
        if let Some(coordinator) = self.coordinator.take() {
            coordinator.stop();
            tracing::info!("Unmounted collection view '{}'", self.options.key_prefix);
        }
        if let Some(url) = &mut self.url {
            url.handle = None;
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.coordinator.is_some()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn store(&self) -> &Arc<QueryStateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<DynamicFilterRegistry> {
        &self.registry
    }

    pub fn renderer(&self) -> &ViewRenderer {
        &self.renderer
    }

    pub fn status(&self) -> ViewStatus {
        self.coordinator
            .as_ref()
            .map(RequestCoordinator::status)
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<ViewStatus>> {
        self.coordinator.as_ref().map(RequestCoordinator::subscribe)
    }

    // =========================================================================
    // Interaction
    // =========================================================================

    /// Validate and apply a filter control's input.
    ///
    /// A rejected input is shown on its control until the next valid commit.
    pub fn apply_filter(&self, key: &str, input: FilterInput) -> Result<bool, ValidationError> {
        let result = self.registry.commit(&self.store, key, input);
        let mut errors = self.filter_errors.lock();
        match &result {
            Ok(_) => {
                errors.remove(key);
            }
            Err(e) => {
                tracing::debug!("Rejected filter input: {}", e);
                errors.insert(key.to_string(), e.message.clone());
            }
        }
        result
    }

    /// Inline error of a filter control, if its last input was rejected.
    pub fn filter_error(&self, key: &str) -> Option<String> {
        self.filter_errors.lock().get(key).cloned()
    }

    /// Sort by a column, or clear sorting with `None`.
    pub fn sort_by(&self, rule: Option<SortingRule>) -> Result<bool, ValidationError> {
        match rule {
            Some(rule) if !self.renderer.is_sortable(&rule.id) => Err(ValidationError::new(
                rule.id,
                "column is not sortable",
            )),
            Some(rule) => Ok(self.store.set_sorting(vec![rule])),
            None => Ok(self.store.set_sorting(Vec::new())),
        }
    }

    pub fn search(&self, text: impl Into<String>) -> bool {
        self.store.set_global_filter(text)
    }

    /// Switch between table and grid. Never refetches.
    pub fn toggle_view_mode(&self) -> ViewMode {
        let next = match self.store.snapshot().view_mode {
            ViewMode::Table => ViewMode::Grid,
            ViewMode::Grid => ViewMode::Table,
        };
        self.store.set_view_mode(next);
        next
    }

    pub fn retry(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.retry();
        }
    }

    pub fn refresh(&self) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.refresh();
        }
    }

    /// Invalidate every cached page of this collection.
    pub fn invalidate(&self) -> usize {
        self.cache.invalidate(self.options.key_prefix.as_str())
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    pub fn render(&self) -> RenderModel {
        let snapshot = self.store.snapshot();
        let mut model = self.renderer.render(&snapshot, &self.status());
        let errors = self.filter_errors.lock();
        model.filters = self
            .registry
            .controls(&snapshot.query)
            .into_iter()
            .map(|mut control| {
                control.error = errors.get(&control.data_key).cloned();
                control
            })
            .collect();
        model
    }

    pub fn render_text(&self) -> String {
        to_text(&self.render())
    }

    /// Wait until the current query state has been answered (or failed).
    ///
    /// Returns immediately when not mounted.
    pub async fn settled(&self) -> ViewStatus {
        let Some(mut rx) = self.subscribe() else {
            return ViewStatus::default();
        };
        loop {
            let status = rx.borrow_and_update().clone();
            let answered = status
                .page
                .as_ref()
                .is_some_and(|page| page.query == self.store.query());
            match status.phase {
                FetchPhase::Error => return status,
                FetchPhase::Success if answered => return status,
                _ => {}
            }
            if rx.changed().await.is_err() {
                return status;
            }
        }
    }
}

impl Drop for CollectionView {
    fn drop(&mut self) {
        self.unmount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::renderer::{CardTemplate, Column};
    use std::time::Duration;
    use vitrine_engine::{FilterAdapter, MemoryLocation};

    fn renderer() -> ViewRenderer {
        ViewRenderer::new(
            vec![
                Column::new("name", "Name").sortable(),
                Column::new("price", "Price").sortable(),
            ],
            CardTemplate::new("name").field(Column::new("price", "Price")),
        )
    }

    fn view(catalog: &Catalog, cache: Arc<ResponseCache>) -> CollectionView {
        let contract = Arc::new(FilterAdapter::new(catalog.clone(), Catalog::adapter_config()));
        let mut view = CollectionView::new(
            &EngineConfig::default(),
            "products",
            contract,
            cache,
            renderer(),
        );
        for descriptor in Catalog::filters() {
            view = view.with_filter(descriptor).unwrap();
        }
        view
    }

    fn cache() -> Arc<ResponseCache> {
        Arc::new(ResponseCache::new(Duration::from_secs(30)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pages_of_partial_collection() {
        let catalog = Catalog::demo();
        let mut view = view(&catalog, cache());
        view.mount().unwrap();

        let status = view.settled().await;
        assert_eq!(status.rows().len(), 10);
        assert_eq!(view.render().pagination.page_count, 3);

        view.store().set_page(2);
        let status = view.settled().await;
        assert_eq!(status.rows().len(), 5);
        assert_eq!(view.render().pagination.label(), "Rows 21-25 of 25, page 3 of 3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_view_mode_does_not_refetch() {
        let catalog = Catalog::demo();
        let mut view = view(&catalog, cache());
        view.mount().unwrap();
        view.settled().await;
        let calls = catalog.calls();

        assert_eq!(view.toggle_view_mode(), ViewMode::Grid);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let grid = view.render();
        assert_eq!(grid.mode, ViewMode::Grid);
        assert_eq!(grid.row_count(), 10);

        assert_eq!(view.toggle_view_mode(), ViewMode::Table);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(view.render().row_count(), 10);
        assert_eq!(catalog.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_wins_over_defaults() {
        let catalog = Catalog::demo();
        let location = Arc::new(MemoryLocation::new("status=inactive&sort=price&order=desc"));
        let defaults = QueryState::new(10)
            .with_sorting(SortingRule::asc("name"))
            .with_filter(
                "status",
                vitrine_core::FilterValue::Dropdown {
                    option: vitrine_core::FilterOption::new("active", "Active"),
                },
            );

        let mut view = view(&catalog, cache())
            .with_defaults(defaults)
            .unwrap()
            .with_url_sync(
                UrlSyncConfig::sorting_and_filters(["status", "skinType"]),
                location.clone(),
            );
        view.mount().unwrap();
        let status = view.settled().await;

        let query = view.store().query();
        assert_eq!(query.sorting, vec![SortingRule::desc("price")]);
        assert_eq!(query.filters["status"].values(), vec!["inactive"]);
        assert!(status.rows().iter().all(|row| row["status"] == "inactive"));
        assert_eq!(status.total(), 4);

        view.apply_filter("skinType", FilterInput::Select(vec!["dry".to_string()]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            location.query_string(),
            "sort=price&order=desc&status=inactive&skinType=dry"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_is_debounced() {
        let catalog = Catalog::demo().with_latency(Duration::from_millis(50));
        let mut view = view(&catalog, cache());
        view.mount().unwrap();
        view.settled().await;
        let calls = catalog.calls();

        for text in ["s", "se", "ser", "serum"] {
            view.search(text);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let status = view.settled().await;

        assert_eq!(catalog.calls(), calls + 1);
        assert_eq!(status.total(), 5);
        assert!(view.render_text().starts_with("Search: \"serum\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_filter_is_rejected_without_fetch() {
        let catalog = Catalog::demo();
        let mut view = view(&catalog, cache());
        view.mount().unwrap();
        view.settled().await;
        let calls = catalog.calls();

        let err = view
            .apply_filter("status", FilterInput::Select(vec!["archived".to_string()]))
            .unwrap_err();
        assert_eq!(err.field, "status");
        assert!(view.sort_by(Some(SortingRule::asc("createdAt"))).is_err());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(catalog.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_filter_shown_on_its_control() {
        let catalog = Catalog::demo();
        let mut view = view(&catalog, cache());
        view.mount().unwrap();
        view.settled().await;

        let _ = view.apply_filter("status", FilterInput::Select(vec!["archived".to_string()]));
        let model = view.render();
        let status = model.filters.iter().find(|c| c.data_key == "status").unwrap();
        assert_eq!(
            status.error.as_deref(),
            Some("'archived' is not an available option")
        );
        assert!(model
            .filters
            .iter()
            .filter(|c| c.data_key != "status")
            .all(|c| c.error.is_none()));

        view.apply_filter("status", FilterInput::Select(vec!["active".to_string()]))
            .unwrap();
        assert_eq!(view.filter_error("status"), None);
        let model = view.render();
        assert!(model.filters.iter().all(|c| c.error.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_url_page_still_settles() {
        let catalog = Catalog::demo();
        let location = Arc::new(MemoryLocation::new("page=18446744073709551615"));
        let mut view = view(&catalog, cache()).with_url_sync(UrlSyncConfig::default(), location);
        view.mount().unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), view.settled())
            .await
            .unwrap();
        assert_eq!(status.phase, FetchPhase::Success);
        assert_eq!(view.store().query().page_index, 0);

        view.store().set_page(usize::MAX);
        let status = tokio::time::timeout(Duration::from_secs(5), view.settled())
            .await
            .unwrap();
        assert_eq!(status.phase, FetchPhase::Success);
        assert!(status.rows().is_empty());
        assert_eq!(status.total(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_views_share_cache() {
        let catalog = Catalog::demo().with_latency(Duration::from_millis(20));
        let cache = cache();
        let mut first = view(&catalog, cache.clone());
        let mut second = view(&catalog, cache);

        first.mount().unwrap();
        second.mount().unwrap();
        first.settled().await;
        second.settled().await;

        assert_eq!(catalog.calls(), 1);
        assert_eq!(first.render(), second.render());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmount_cancels_in_flight() {
        let catalog = Catalog::demo().with_latency(Duration::from_secs(5));
        let mut view = view(&catalog, cache());
        view.mount().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(view.status().is_loading());

        view.unmount();
        assert!(!view.is_mounted());
        assert_eq!(view.status(), ViewStatus::default());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(view.cache.is_empty());
    }
}
