//! Render models for collection views.
//!
//! Plain data describing what a table or card grid should show. No
//! toolkit types, so screens and tests can inspect them directly.

mod pagination;
mod render;

pub use pagination::Pagination;
pub use render::{
    Card, ErrorPanel, GridView, HeaderCell, RenderBody, RenderModel, SortDirection, TableView,
};
