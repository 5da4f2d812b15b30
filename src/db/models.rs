/// Row types for the `catalog_items` table (migrations/0001_catalog.sql).

use crate::types::{CatalogItem, Territory};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogRow {
    pub id: String,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub territory: String,
    pub wholesale_cost: f64,
    pub publisher_price: Option<f64>,
    pub identifier_us: Option<String>,
    pub identifier_uk: Option<String>,
    pub stored_price: Option<f64>,
    pub checked_at: Option<i64>,
}

impl TryFrom<CatalogRow> for CatalogItem {
    type Error = sqlx::Error;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        let territory = row
            .territory
            .parse::<Territory>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        Ok(CatalogItem {
            id: row.id,
            title: row.title,
            author: row.author,
            category: row.category,
            territory,
            wholesale_cost: row.wholesale_cost,
            publisher_price: row.publisher_price,
            identifier_us: row.identifier_us,
            identifier_uk: row.identifier_uk,
            stored_price: row.stored_price,
            checked_at: row.checked_at,
        })
    }
}
