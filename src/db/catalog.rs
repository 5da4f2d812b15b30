use async_trait::async_trait;
use tracing::debug;

use crate::db::models::CatalogRow;
use crate::db::CatalogStore;
use crate::error::{AppError, PricingError, Result};
use crate::types::{CatalogItem, Territory};

const SELECT_COLUMNS: &str = "SELECT id, title, author, category, territory, wholesale_cost, \
     publisher_price, identifier_us, identifier_uk, stored_price, checked_at FROM catalog_items";

/// Last discovery attempt; rows written before `attempted_at` existed fall
/// back to their last accepted price.
const LAST_ATTEMPT: &str = "COALESCE(attempted_at, checked_at)";

#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: sqlx::SqlitePool,
}

impl SqliteCatalogStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    /// Insert or replace the editable fields of an item. Discovery state
    /// (`stored_price`, `checked_at`) is kept when the row already exists.
    pub async fn upsert_item(&self, item: &CatalogItem) -> Result<()> {
        if !item.wholesale_cost.is_finite() || item.wholesale_cost < 0.0 {
            return Err(PricingError::InvalidArgument(format!(
                "wholesale cost must be non-negative, got {}",
                item.wholesale_cost
            ))
            .into());
        }
        let territory = item.territory.to_string();
        sqlx::query(
            r#"
            INSERT INTO catalog_items (
                id, title, author, category, territory, wholesale_cost,
                publisher_price, identifier_us, identifier_uk, stored_price, checked_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                author = excluded.author,
                category = excluded.category,
                territory = excluded.territory,
                wholesale_cost = excluded.wholesale_cost,
                publisher_price = excluded.publisher_price,
                identifier_us = COALESCE(excluded.identifier_us, catalog_items.identifier_us),
                identifier_uk = COALESCE(excluded.identifier_uk, catalog_items.identifier_uk)
            "#,
        )
        .bind(&item.id)
        .bind(&item.title)
        .bind(&item.author)
        .bind(&item.category)
        .bind(territory)
        .bind(item.wholesale_cost)
        .bind(item.publisher_price)
        .bind(&item.identifier_us)
        .bind(&item.identifier_uk)
        .bind(item.stored_price.filter(|p| *p > 0.0))
        .bind(item.checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_items(&self, sql: &str, binds: (Option<i64>, i64)) -> Result<Vec<CatalogItem>> {
        let mut query = sqlx::query_as::<_, CatalogRow>(sql);
        if let Some(stale_before) = binds.0 {
            query = query.bind(stale_before);
        }
        let rows = query.bind(binds.1).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| CatalogItem::try_from(r).map_err(AppError::from))
            .collect()
    }
}

fn ensure_updated(rows: u64, id: &str) -> Result<()> {
    if rows == 0 {
        return Err(AppError::NotFound(format!("catalog item {id}")));
    }
    Ok(())
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn items_due_for_refresh(&self, stale_before: i64, limit: usize) -> Result<Vec<CatalogItem>> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE {LAST_ATTEMPT} IS NULL OR {LAST_ATTEMPT} < ? \
             ORDER BY {LAST_ATTEMPT} IS NOT NULL, {LAST_ATTEMPT} ASC, id ASC LIMIT ?"
        );
        self.fetch_items(&sql, (Some(stale_before), limit_param(limit))).await
    }

    async fn get_item(&self, id: &str) -> Result<Option<CatalogItem>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query_as::<_, CatalogRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(CatalogItem::try_from).transpose().map_err(AppError::from)
    }

    async fn list_items(&self, limit: usize) -> Result<Vec<CatalogItem>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY title ASC, id ASC LIMIT ?");
        self.fetch_items(&sql, (None, limit_param(limit))).await
    }

    async fn record_price(&self, id: &str, price: f64, checked_at: i64) -> Result<()> {
        if !price.is_finite() || price <= 0.0 {
            return Err(PricingError::InvalidArgument(format!(
                "stored price must be positive, got {price}"
            ))
            .into());
        }
        let rounded = (price * 100.0).round() / 100.0;
        let result = sqlx::query(
            "UPDATE catalog_items SET stored_price = ?, checked_at = ?, attempted_at = ? WHERE id = ?",
        )
        .bind(rounded)
        .bind(checked_at)
        .bind(checked_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        ensure_updated(result.rows_affected(), id)?;
        debug!(item_id = %id, price = rounded, "stored price updated");
        Ok(())
    }

    async fn record_identifier(&self, id: &str, territory: Territory, identifier: &str) -> Result<()> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(PricingError::InvalidArgument("identifier must not be blank".to_string()).into());
        }
        let sql = match territory {
            Territory::Us => "UPDATE catalog_items SET identifier_us = ? WHERE id = ?",
            Territory::Uk => "UPDATE catalog_items SET identifier_uk = ? WHERE id = ?",
        };
        let result = sqlx::query(sql)
            .bind(identifier)
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_updated(result.rows_affected(), id)?;
        debug!(item_id = %id, %territory, identifier, "identifier recorded");
        Ok(())
    }

    async fn record_attempt(&self, id: &str, attempted_at: i64) -> Result<()> {
        let result = sqlx::query("UPDATE catalog_items SET attempted_at = ? WHERE id = ?")
            .bind(attempted_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_updated(result.rows_affected(), id)
    }

    async fn update_cost(&self, id: &str, wholesale_cost: f64) -> Result<()> {
        if !wholesale_cost.is_finite() || wholesale_cost < 0.0 {
            return Err(PricingError::InvalidArgument(format!(
                "wholesale cost must be non-negative, got {wholesale_cost}"
            ))
            .into());
        }
        let result = sqlx::query("UPDATE catalog_items SET wholesale_cost = ? WHERE id = ?")
            .bind(wholesale_cost)
            .bind(id)
            .execute(&self.pool)
            .await?;
        ensure_updated(result.rows_affected(), id)
    }
}
