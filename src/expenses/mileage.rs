// 🚗 Mileage - business trips reimbursed per mile

use super::MileagePurpose;
use crate::db::{record_event, Filter, Page, PageRequest};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 58.5 cents per mile.
pub const DEFAULT_RATE_PER_MILE: Decimal = Decimal::from_parts(585, 0, 0, false, 3);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MileageLog {
    pub id: i64,
    pub company_id: i64,
    pub user_id: i64,
    pub log_date: NaiveDate,
    pub start_location: String,
    pub end_location: String,
    pub purpose: MileagePurpose,
    pub description: String,
    pub miles: Decimal,
    pub rate_per_mile: Decimal,
    pub total_amount: Decimal,
    pub vehicle: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMileageLog {
    pub log_date: NaiveDate,
    pub start_location: String,
    pub end_location: String,
    pub purpose: MileagePurpose,
    #[serde(default)]
    pub description: String,
    pub miles: Decimal,
    pub rate_per_mile: Option<Decimal>,
    #[serde(default)]
    pub vehicle: String,
}

const MILEAGE_COLUMNS: &str = "id, company_id, user_id, log_date, start_location, end_location, purpose,
     description, miles, rate_per_mile, total_amount, vehicle, created_at";

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<MileageLog> {
    Ok(MileageLog {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        user_id: row.get("user_id")?,
        log_date: row.get("log_date")?,
        start_location: row.get("start_location")?,
        end_location: row.get("end_location")?,
        purpose: row.get("purpose")?,
        description: row.get("description")?,
        miles: money::get(row, "miles")?,
        rate_per_mile: money::get(row, "rate_per_mile")?,
        total_amount: money::get(row, "total_amount")?,
        vehicle: row.get("vehicle")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_mileage_log(conn: &Connection, ctx: &TenantContext, new: &NewMileageLog) -> Result<MileageLog> {
    if new.start_location.trim().is_empty() || new.end_location.trim().is_empty() {
        return Err(LedgerError::validation("start and end locations are required"));
    }
    if new.miles <= Decimal::ZERO {
        return Err(LedgerError::validation("miles must be positive"));
    }
    let rate = new.rate_per_mile.unwrap_or(DEFAULT_RATE_PER_MILE);
    if rate < Decimal::ZERO {
        return Err(LedgerError::validation("rate per mile cannot be negative"));
    }
    money::ensure_quantity("miles", new.miles)?;
    money::ensure_amount("rate per mile", rate)?;
    let total = money::round_money(money::checked_mul(new.miles, rate)?);

    conn.execute(
        "INSERT INTO mileage_logs (company_id, user_id, log_date, start_location, end_location, purpose,
                                   description, miles, rate_per_mile, total_amount, vehicle, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            ctx.company_id,
            ctx.user_id,
            new.log_date,
            new.start_location.trim(),
            new.end_location.trim(),
            new.purpose,
            new.description,
            money::to_sql(&new.miles),
            money::to_sql(&rate),
            money::to_sql(&total),
            new.vehicle,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "mileage_logged", "mileage_log", id, serde_json::json!({ "miles": new.miles, "total_amount": total }))?;
    get_mileage_log(conn, ctx.company_id, id)
}

pub fn get_mileage_log(conn: &Connection, company_id: i64, log_id: i64) -> Result<MileageLog> {
    conn.query_row(
        &format!("SELECT {} FROM mileage_logs WHERE company_id = ?1 AND id = ?2", MILEAGE_COLUMNS),
        params![company_id, log_id],
        row_to_log,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("mileage log", log_id))
}

/// Newest trip first, optionally for one user.
pub fn list_mileage_logs(conn: &Connection, company_id: i64, user_id: Option<i64>, page: PageRequest) -> Result<Page<MileageLog>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push_opt("user_id = ?", user_id);

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM mileage_logs {}", f.where_sql()),
        f.params(),
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM mileage_logs {} ORDER BY log_date DESC, id DESC {}",
        MILEAGE_COLUMNS,
        f.where_sql(),
        page.sql()
    ))?;
    let logs = stmt
        .query_map(f.params(), row_to_log)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Page::new(logs, total, page))
}
