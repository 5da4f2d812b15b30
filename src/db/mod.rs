//! Catalog persistence.
//!
//! Discovery is the only writer of `stored_price`; the read path never
//! persists live lookups.

pub mod catalog;
pub mod models;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CatalogItem, Territory};

pub use catalog::SqliteCatalogStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Items never attempted or last attempted before `stale_before` (unix
    /// seconds), never-attempted first, oldest attempt next. A recorded price
    /// counts as an attempt.
    async fn items_due_for_refresh(&self, stale_before: i64, limit: usize) -> Result<Vec<CatalogItem>>;

    async fn get_item(&self, id: &str) -> Result<Option<CatalogItem>>;

    async fn list_items(&self, limit: usize) -> Result<Vec<CatalogItem>>;

    /// Persist an accepted marketplace price. Non-positive prices are rejected.
    async fn record_price(&self, id: &str, price: f64, checked_at: i64) -> Result<()>;

    async fn record_identifier(&self, id: &str, territory: Territory, identifier: &str) -> Result<()>;

    /// Mark a finished discovery attempt that produced no price. Leaves
    /// `stored_price` and `checked_at` untouched.
    async fn record_attempt(&self, id: &str, attempted_at: i64) -> Result<()>;

    async fn update_cost(&self, id: &str, wholesale_cost: f64) -> Result<()>;
}
