// 👥 Customers - who invoices are addressed to

use crate::db::{record_event, Filter, Page, PageRequest};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::{get_company, TenantContext};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub company_name: String,
    pub address: String,
    pub city: String,
    pub country: String,
    pub credit_limit: Option<Decimal>,
    pub payment_terms: String,
    pub currency: String,
    /// 0 (safe) to 100 (risky).
    pub risk_score: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    pub credit_limit: Option<Decimal>,
    pub payment_terms: Option<String>,
    /// Defaults to the company currency.
    pub currency: Option<String>,
    pub risk_score: Option<i64>,
}

impl NewCustomer {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("customer name is required"));
        }
        if !self.email.contains('@') {
            return Err(LedgerError::validation(format!("invalid customer email '{}'", self.email)));
        }
        if let Some(limit) = self.credit_limit {
            if limit < Decimal::ZERO {
                return Err(LedgerError::validation("credit limit cannot be negative"));
            }
            money::ensure_amount("credit limit", limit)?;
        }
        if let Some(score) = self.risk_score {
            if !(0..=100).contains(&score) {
                return Err(LedgerError::validation("risk score must be between 0 and 100"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerFilter {
    pub search: Option<String>,
    pub active: Option<bool>,
}

const CUSTOMER_COLUMNS: &str = "id, company_id, name, email, phone, company_name, address, city, country,
     credit_limit, payment_terms, currency, risk_score, is_active, created_at, updated_at";

fn row_to_customer(row: &Row<'_>) -> rusqlite::Result<Customer> {
    Ok(Customer {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        company_name: row.get("company_name")?,
        address: row.get("address")?,
        city: row.get("city")?,
        country: row.get("country")?,
        credit_limit: money::get_opt(row, "credit_limit")?,
        payment_terms: row.get("payment_terms")?,
        currency: row.get("currency")?,
        risk_score: row.get("risk_score")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create_customer(conn: &Connection, ctx: &TenantContext, new: &NewCustomer) -> Result<Customer> {
    new.validate()?;
    let currency = match new.currency.as_deref() {
        Some(c) if !c.trim().is_empty() => c.trim().to_uppercase(),
        _ => get_company(conn, ctx.company_id)?.currency,
    };
    let now = Utc::now();

    conn.execute(
        "INSERT INTO customers (company_id, name, email, phone, company_name, address, city, country,
                                credit_limit, payment_terms, currency, risk_score, is_active,
                                created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13)",
        params![
            ctx.company_id,
            new.name.trim(),
            new.email.trim(),
            new.phone,
            new.company_name,
            new.address,
            new.city,
            new.country,
            money::opt_to_sql(&new.credit_limit),
            new.payment_terms.as_deref().unwrap_or("Net 30"),
            currency,
            new.risk_score.unwrap_or(50),
            now,
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "customer_created", "customer", id, serde_json::json!({ "name": new.name }))?;
    get_customer(conn, ctx.company_id, id)
}

pub fn get_customer(conn: &Connection, company_id: i64, customer_id: i64) -> Result<Customer> {
    conn.query_row(
        &format!("SELECT {} FROM customers WHERE company_id = ?1 AND id = ?2", CUSTOMER_COLUMNS),
        params![company_id, customer_id],
        row_to_customer,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("customer", customer_id))
}

pub fn update_customer(conn: &Connection, ctx: &TenantContext, customer_id: i64, update: &NewCustomer) -> Result<Customer> {
    update.validate()?;
    let current = get_customer(conn, ctx.company_id, customer_id)?;

    conn.execute(
        "UPDATE customers SET name = ?1, email = ?2, phone = ?3, company_name = ?4, address = ?5,
                              city = ?6, country = ?7, credit_limit = ?8, payment_terms = ?9,
                              currency = ?10, risk_score = ?11, updated_at = ?12
         WHERE company_id = ?13 AND id = ?14",
        params![
            update.name.trim(),
            update.email.trim(),
            update.phone,
            update.company_name,
            update.address,
            update.city,
            update.country,
            money::opt_to_sql(&update.credit_limit),
            update.payment_terms.as_deref().unwrap_or(&current.payment_terms),
            update.currency.as_deref().map(str::to_uppercase).unwrap_or(current.currency),
            update.risk_score.unwrap_or(current.risk_score),
            Utc::now(),
            ctx.company_id,
            customer_id,
        ],
    )?;

    record_event(conn, ctx.company_id, &ctx.actor(), "customer_updated", "customer", customer_id, serde_json::json!({}))?;
    get_customer(conn, ctx.company_id, customer_id)
}

/// Customers are never deleted while invoices point at them; they are retired.
pub fn deactivate_customer(conn: &Connection, ctx: &TenantContext, customer_id: i64) -> Result<Customer> {
    get_customer(conn, ctx.company_id, customer_id)?;
    conn.execute(
        "UPDATE customers SET is_active = 0, updated_at = ?1 WHERE company_id = ?2 AND id = ?3",
        params![Utc::now(), ctx.company_id, customer_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "customer_deactivated", "customer", customer_id, serde_json::json!({}))?;
    get_customer(conn, ctx.company_id, customer_id)
}

pub fn list_customers(
    conn: &Connection,
    company_id: i64,
    filter: &CustomerFilter,
    page: PageRequest,
) -> Result<Page<Customer>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push_search(&["name", "email", "company_name"], filter.search.as_deref());
    f.push_opt("is_active = ?", filter.active);

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM customers {}", f.where_sql()),
        f.params(),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM customers {} ORDER BY name, id {}",
        CUSTOMER_COLUMNS,
        f.where_sql(),
        page.sql()
    ))?;
    let customers = stmt
        .query_map(f.params(), row_to_customer)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Page::new(customers, total, page))
}

#[cfg(test)]
pub(crate) fn sample_customer(name: &str) -> NewCustomer {
    NewCustomer {
        name: name.to_string(),
        email: format!("{}@client.example", name.to_lowercase().replace(' ', ".")),
        company_name: format!("{} Holdings", name),
        ..Default::default()
    }
}
