// 📦 Products - catalogue items that invoice lines can reference

use super::ProductType;
use crate::db::{conflict_on_duplicate, record_event, Filter};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub description: String,
    pub sku: Option<String>,
    pub product_type: ProductType,
    pub unit_price: Decimal,
    pub cost_price: Decimal,
    pub track_inventory: bool,
    pub current_stock: i64,
    pub minimum_stock: i64,
    /// Percent, e.g. 12.5
    pub tax_rate: Decimal,
    pub category: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn is_low_stock(&self) -> bool {
        self.track_inventory && self.current_stock <= self.minimum_stock
    }

    /// Margin over the selling price, in percent. Zero for free items.
    pub fn profit_margin(&self) -> Decimal {
        if self.unit_price.is_zero() {
            return Decimal::ZERO;
        }
        money::round_money((self.unit_price - self.cost_price) / self.unit_price * Decimal::ONE_HUNDRED)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub sku: Option<String>,
    pub product_type: ProductType,
    pub unit_price: Decimal,
    #[serde(default)]
    pub cost_price: Decimal,
    #[serde(default)]
    pub track_inventory: bool,
    #[serde(default)]
    pub current_stock: i64,
    #[serde(default)]
    pub minimum_stock: i64,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub category: String,
}

impl NewProduct {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("product name is required"));
        }
        if self.unit_price < Decimal::ZERO || self.cost_price < Decimal::ZERO {
            return Err(LedgerError::validation("prices cannot be negative"));
        }
        money::ensure_amount("unit price", self.unit_price)?;
        money::ensure_amount("cost price", self.cost_price)?;
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation("tax rate must be between 0 and 100"));
        }
        if self.current_stock < 0 || self.minimum_stock < 0 {
            return Err(LedgerError::validation("stock levels cannot be negative"));
        }
        Ok(())
    }
}

const PRODUCT_COLUMNS: &str = "id, company_id, name, description, sku, product_type, unit_price, cost_price,
     track_inventory, current_stock, minimum_stock, tax_rate, category, is_active, created_at";

fn row_to_product(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        sku: row.get("sku")?,
        product_type: row.get("product_type")?,
        unit_price: money::get(row, "unit_price")?,
        cost_price: money::get(row, "cost_price")?,
        track_inventory: row.get("track_inventory")?,
        current_stock: row.get("current_stock")?,
        minimum_stock: row.get("minimum_stock")?,
        tax_rate: money::get(row, "tax_rate")?,
        category: row.get("category")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_product(conn: &Connection, ctx: &TenantContext, new: &NewProduct) -> Result<Product> {
    new.validate()?;
    let sku = new.sku.as_deref().map(str::trim).filter(|s| !s.is_empty());

    conn.execute(
        "INSERT INTO products (company_id, name, description, sku, product_type, unit_price, cost_price,
                               track_inventory, current_stock, minimum_stock, tax_rate, category,
                               is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13)",
        params![
            ctx.company_id,
            new.name.trim(),
            new.description,
            sku,
            new.product_type,
            money::to_sql(&new.unit_price),
            money::to_sql(&new.cost_price),
            new.track_inventory,
            new.current_stock,
            new.minimum_stock,
            money::to_sql(&new.tax_rate),
            new.category,
            Utc::now(),
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("SKU '{}' already exists", sku.unwrap_or_default())))?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "product_created", "product", id, serde_json::json!({ "name": new.name }))?;
    get_product(conn, ctx.company_id, id)
}

pub fn get_product(conn: &Connection, company_id: i64, product_id: i64) -> Result<Product> {
    conn.query_row(
        &format!("SELECT {} FROM products WHERE company_id = ?1 AND id = ?2", PRODUCT_COLUMNS),
        params![company_id, product_id],
        row_to_product,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("product", product_id))
}

pub fn update_product(conn: &Connection, ctx: &TenantContext, product_id: i64, update: &NewProduct) -> Result<Product> {
    update.validate()?;
    get_product(conn, ctx.company_id, product_id)?;

    conn.execute(
        "UPDATE products SET name = ?1, description = ?2, sku = ?3, product_type = ?4, unit_price = ?5,
                             cost_price = ?6, track_inventory = ?7, current_stock = ?8, minimum_stock = ?9,
                             tax_rate = ?10, category = ?11
         WHERE company_id = ?12 AND id = ?13",
        params![
            update.name.trim(),
            update.description,
            update.sku.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            update.product_type,
            money::to_sql(&update.unit_price),
            money::to_sql(&update.cost_price),
            update.track_inventory,
            update.current_stock,
            update.minimum_stock,
            money::to_sql(&update.tax_rate),
            update.category,
            ctx.company_id,
            product_id,
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, "SKU already exists"))?;

    record_event(conn, ctx.company_id, &ctx.actor(), "product_updated", "product", product_id, serde_json::json!({}))?;
    get_product(conn, ctx.company_id, product_id)
}

/// Active products, optionally only those at or below their minimum stock.
pub fn list_products(conn: &Connection, company_id: i64, low_stock_only: bool) -> Result<Vec<Product>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push("is_active = ?", true);

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM products {} ORDER BY name, id",
        PRODUCT_COLUMNS,
        f.where_sql()
    ))?;
    let products = stmt
        .query_map(f.params(), row_to_product)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(products
        .into_iter()
        .filter(|p| !low_stock_only || p.is_low_stock())
        .collect())
}
