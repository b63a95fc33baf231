// 🏪 Vendors - who expenses are paid to

use crate::db::record_event;
use crate::error::{LedgerError, Result};
use crate::tenancy::TenantContext;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub address: String,
    pub tax_id: String,
    pub payment_terms: String,
    /// 0 to 100.
    pub reliability_score: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewVendor {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
    pub address: String,
    pub tax_id: String,
    pub payment_terms: String,
    pub reliability_score: Option<i64>,
}

const VENDOR_COLUMNS: &str = "id, company_id, name, email, phone, website, address, tax_id, payment_terms,
     reliability_score, is_active, created_at";

fn row_to_vendor(row: &Row<'_>) -> rusqlite::Result<Vendor> {
    Ok(Vendor {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        website: row.get("website")?,
        address: row.get("address")?,
        tax_id: row.get("tax_id")?,
        payment_terms: row.get("payment_terms")?,
        reliability_score: row.get("reliability_score")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_vendor(conn: &Connection, ctx: &TenantContext, new: &NewVendor) -> Result<Vendor> {
    if new.name.trim().is_empty() {
        return Err(LedgerError::validation("vendor name is required"));
    }
    let score = new.reliability_score.unwrap_or(50);
    if !(0..=100).contains(&score) {
        return Err(LedgerError::validation("reliability score must be between 0 and 100"));
    }

    conn.execute(
        "INSERT INTO vendors (company_id, name, email, phone, website, address, tax_id, payment_terms,
                              reliability_score, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)",
        params![
            ctx.company_id,
            new.name.trim(),
            new.email.trim(),
            new.phone,
            new.website,
            new.address,
            new.tax_id,
            new.payment_terms,
            score,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "vendor_created", "vendor", id, serde_json::json!({ "name": new.name }))?;
    get_vendor(conn, ctx.company_id, id)
}

pub fn get_vendor(conn: &Connection, company_id: i64, vendor_id: i64) -> Result<Vendor> {
    conn.query_row(
        &format!("SELECT {} FROM vendors WHERE company_id = ?1 AND id = ?2", VENDOR_COLUMNS),
        params![company_id, vendor_id],
        row_to_vendor,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("vendor", vendor_id))
}

pub fn list_vendors(conn: &Connection, company_id: i64) -> Result<Vec<Vendor>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM vendors WHERE company_id = ?1 AND is_active = 1 ORDER BY name",
        VENDOR_COLUMNS
    ))?;
    let vendors = stmt
        .query_map(params![company_id], row_to_vendor)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(vendors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::tenancy::fixtures::admin_context;

    #[test]
    fn test_vendor_defaults_and_scope() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);

        let vendor = create_vendor(&conn, &ctx, &NewVendor { name: "Shell Station".into(), ..Default::default() }).unwrap();
        assert_eq!(vendor.reliability_score, 50);
        assert!(matches!(get_vendor(&conn, ctx.company_id + 1, vendor.id), Err(LedgerError::NotFound(_))));

        let bad = NewVendor { name: "X".into(), reliability_score: Some(120), ..Default::default() };
        assert!(create_vendor(&conn, &ctx, &bad).is_err());
        assert_eq!(list_vendors(&conn, ctx.company_id).unwrap().len(), 1);
    }
}
