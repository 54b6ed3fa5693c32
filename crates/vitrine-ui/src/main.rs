//! Vitrine demo - main entry point.
//!
//! Mounts a product list over the in-memory catalog, simulates a user
//! typing into the search box, filters, pages and toggles table/grid.

use std::sync::Arc;
use std::time::Duration;

use vitrine_core::{EngineConfig, SortingRule};
use vitrine_engine::{
    FilterAdapter, FilterInput, Location, MemoryLocation, ResponseCache, UrlSyncConfig,
};
use vitrine_ui::{Catalog, CardTemplate, CollectionView, Column, ViewRenderer};

// =============================================================================
// Configuration
// =============================================================================

/// Load the user's config, falling back to defaults on any problem.
fn load_config() -> EngineConfig {
    match EngineConfig::load_or_default() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring config: {}", e);
            EngineConfig::default()
        }
    }
}

fn product_renderer() -> ViewRenderer {
    ViewRenderer::new(
        vec![
            Column::new("name", "Product").sortable().max_width(24),
            Column::new("brand", "Brand").accessor("brand.name"),
            Column::new("price", "Price").sortable(),
            Column::new("skin_type", "Skin type"),
            Column::new("status", "Status"),
        ],
        CardTemplate::new("name")
            .subtitle("brand.name")
            .field(Column::new("price", "Price"))
            .field(Column::new("skin_type", "Skin type")),
    )
    .empty_message("No products match these filters")
}

// =============================================================================
// Demo
// =============================================================================

async fn run(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Catalog::demo().with_latency(Duration::from_millis(40));
    let cache = Arc::new(ResponseCache::new(config.stale_time()));
    let contract = Arc::new(FilterAdapter::new(catalog.clone(), Catalog::adapter_config()));
    let location = Arc::new(MemoryLocation::new("tab=products&sort=price&order=asc"));

    let mut view = CollectionView::new(&config, "products", contract, cache, product_renderer())
        .with_url_sync(
            UrlSyncConfig::default().with_filter("status").with_filter("skinType"),
            location.clone(),
        );
    for descriptor in Catalog::filters() {
        view = view.with_filter(descriptor)?;
    }

    view.mount()?;
    view.settled().await;
    println!("{}\n", view.render_text());

    // Typing burst inside the debounce window: one request.
    for text in ["s", "se", "ser", "seru", "serum"] {
        view.search(text);
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    view.settled().await;
    println!("{}\n", view.render_text());

    view.search("");
    view.apply_filter(
        "skinType",
        FilterInput::Select(vec!["dry".to_string(), "oily".to_string()]),
    )?;
    view.sort_by(Some(SortingRule::desc("price")))?;
    view.settled().await;
    println!("{}\n", view.render_text());

    view.store().next_page();
    view.settled().await;
    println!("{}\n", view.render_text());

    view.toggle_view_mode();
    println!("{}\n", view.render_text());

    println!("URL: ?{}", location.query_string());
    tracing::info!("Catalog served {} requests", catalog.calls());

    view.unmount();
    Ok(())
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Vitrine demo starting...");
    let config = load_config();

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create tokio runtime: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run(config)) {
        tracing::error!("Demo failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
