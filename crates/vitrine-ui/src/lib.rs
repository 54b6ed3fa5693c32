//! Rendering layer for Vitrine collection views.
//!
//! This crate provides:
//! - Render models for tables, card grids and pagination
//! - ViewRenderer and its plain-text rendering
//! - CollectionView, which wires one screen to the engine
//! - An in-memory product catalog for demos and tests

pub mod catalog;
pub mod model;
pub mod renderer;
pub mod view;

// Re-export commonly used types
pub use catalog::Catalog;
pub use model::{
    Card, ErrorPanel, GridView, HeaderCell, Pagination, RenderBody, RenderModel, SortDirection,
    TableView,
};
pub use renderer::{to_text, CardTemplate, Column, ViewRenderer};
pub use view::CollectionView;
