//! In-memory product catalog.
//!
//! Answers list requests the way the marketplace backend does
//! (`{data: {items, total}}`), so views can run without a server.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use vitrine_core::{FetchError, FilterOption};
use vitrine_engine::{AdapterConfig, FilterDescriptor, ParamMap, RawApi};

const BRANDS: [&str; 5] = ["Acme", "Lumen", "Dewdrop", "Nordic Leaf", "Solace"];
const KINDS: [&str; 5] = ["Cleanser", "Toner", "Serum", "Moisturizer", "Sunscreen"];
const SKIN_TYPES: [&str; 4] = ["dry", "oily", "combination", "sensitive"];

/// Parameters that are not row filters.
const RESERVED: [&str; 5] = ["page", "limit", "search", "sortBy", "order"];

/// Cheap to clone; clones share the product list and call counter.
#[derive(Debug, Clone)]
pub struct Catalog {
    products: Arc<Vec<Value>>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
}

impl Catalog {
    pub fn new(products: Vec<Value>) -> Self {
        Self {
            products: Arc::new(products),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 25 skincare products from five brands.
    pub fn demo() -> Self {
        let products = (0..25)
            .map(|i| {
                let brand = i / KINDS.len();
                let kind = i % KINDS.len();
                json!({
                    "id": i + 1,
                    "name": format!("{} {}", BRANDS[brand], KINDS[kind]),
                    "brand": { "id": (brand + 1).to_string(), "name": BRANDS[brand] },
                    "brand_id": (brand + 1).to_string(),
                    "price": 9 + (i * 7) % 40,
                    "status": if i % 7 == 3 { "inactive" } else { "active" },
                    "skin_type": SKIN_TYPES[i % SKIN_TYPES.len()],
                    "createdAt": format!("2024-03-{:02}", i + 1),
                })
            })
            .collect();
        Self::new(products)
    }

    /// Delay every response.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of requests served.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    /// Where rows and totals live, and how filter keys map to params.
    pub fn adapter_config() -> AdapterConfig {
        AdapterConfig::new("data.items")
            .total_path("data.total")
            .map_filter("brand", "brand_id")
            .map_filter("skinType", "skin_type")
    }

    /// Filter controls for the product list.
    pub fn filters() -> Vec<FilterDescriptor> {
        vec![
            FilterDescriptor::dropdown(
                "status",
                "Status",
                vec![
                    FilterOption::new("active", "Active"),
                    FilterOption::new("inactive", "Inactive"),
                ],
            ),
            FilterDescriptor::dropdown(
                "brand",
                "Brand",
                BRANDS
                    .iter()
                    .enumerate()
                    .map(|(i, name)| FilterOption::new((i + 1).to_string(), *name))
                    .collect(),
            ),
            FilterDescriptor::multiselect(
                "skinType",
                "Skin type",
                SKIN_TYPES
                    .iter()
                    .map(|t| FilterOption::new(*t, capitalize(t)))
                    .collect(),
            ),
        ]
    }

    /// Run a list request against the catalog.
    pub fn query(&self, params: &ParamMap) -> Value {
        let search = params
            .get("search")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .unwrap_or_default();

        let mut matches: Vec<&Value> = self
            .products
            .iter()
            .filter(|p| search.is_empty() || matches_search(p, &search))
            .filter(|p| {
                params
                    .iter()
                    .filter(|(key, _)| !RESERVED.contains(&key.as_str()))
                    .all(|(key, wanted)| matches_filter(p.get(key.as_str()), wanted))
            })
            .collect();

        if let Some(field) = params.get("sortBy").and_then(Value::as_str) {
            let desc = params.get("order").and_then(Value::as_str) == Some("desc");
            matches.sort_by(|a, b| {
                let ord = compare(a.get(field), b.get(field));
                if desc {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let total = matches.len();
        let limit = param_usize(params, "limit").unwrap_or(10).max(1);
        let page = param_usize(params, "page").unwrap_or(1).max(1);
        let items: Vec<Value> = matches
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        json!({ "data": { "items": items, "total": total } })
    }
}

impl RawApi for Catalog {
    fn call(
        &self,
        params: ParamMap,
        signal: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, FetchError>> {
        let catalog = self.clone();
        Box::pin(async move {
            catalog.calls.fetch_add(1, AtomicOrdering::SeqCst);
            tracing::debug!("Catalog request {:?}", params);
            if !catalog.latency.is_zero() {
                tokio::select! {
                    _ = signal.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(catalog.latency) => {}
                }
            }
            Ok(catalog.query(&params))
        })
    }
}

fn matches_search(product: &Value, needle: &str) -> bool {
    ["name", "brand.name"].iter().any(|path| {
        vitrine_engine::path::resolve_path(product, path)
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains(needle))
    })
}

fn matches_filter(actual: Option<&Value>, wanted: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match wanted {
        Value::Array(options) => options.iter().any(|o| same(actual, o)),
        single => same(actual, single),
    }
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a == b,
        _ => a.to_string().trim_matches('"') == b.to_string().trim_matches('"'),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn param_usize(params: &ParamMap, key: &str) -> Option<usize> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
