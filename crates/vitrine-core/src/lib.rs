//! Core types for the Vitrine collection view engine.
//!
//! This crate contains the shared data model used by every Vitrine crate:
//! - Query state (pagination, sorting, search, filters)
//! - Tagged filter values
//! - Fetch results
//! - Configuration types
//! - Error types

mod config;
mod error;
mod query;
mod result;

pub use config::{config_dir, config_path, EngineConfig};
pub use error::{ConfigError, FetchError, OptionsError, ValidationError};
pub use query::{ColumnFilter, FilterOption, FilterValue, QueryState, SortingRule, ViewMode};
pub use result::{FetchResult, Row};
