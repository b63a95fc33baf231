// 📁 Expense reports - a batch of expenses submitted together

use super::expense::{get_expense, Expense};
use super::ReportStatus;
use crate::db::{atomically, conflict_on_duplicate, record_event};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseReport {
    pub id: i64,
    pub company_id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: ReportStatus,
    /// Sum of expense amounts before tax.
    pub total_amount: Decimal,
    pub total_tax: Decimal,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExpenseReport {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseReportDetail {
    pub report: ExpenseReport,
    pub expenses: Vec<Expense>,
}

const REPORT_COLUMNS: &str = "id, company_id, user_id, title, description, start_date, end_date, status,
     total_amount, total_tax, submitted_at, approved_by, approved_at, created_at";

fn row_to_report(row: &Row<'_>) -> rusqlite::Result<ExpenseReport> {
    Ok(ExpenseReport {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        user_id: row.get("user_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        status: row.get("status")?,
        total_amount: money::get(row, "total_amount")?,
        total_tax: money::get(row, "total_tax")?,
        submitted_at: row.get("submitted_at")?,
        approved_by: row.get("approved_by")?,
        approved_at: row.get("approved_at")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_report(conn: &Connection, ctx: &TenantContext, new: &NewExpenseReport) -> Result<ExpenseReport> {
    if new.title.trim().is_empty() {
        return Err(LedgerError::validation("report title is required"));
    }
    if new.start_date > new.end_date {
        return Err(LedgerError::validation("report start date must not be after its end date"));
    }

    conn.execute(
        "INSERT INTO expense_reports (company_id, user_id, title, description, start_date, end_date,
                                      status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ctx.company_id,
            ctx.user_id,
            new.title.trim(),
            new.description,
            new.start_date,
            new.end_date,
            ReportStatus::Draft,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "expense_report_created", "expense_report", id, serde_json::json!({ "title": new.title }))?;
    get_report(conn, ctx.company_id, id)
}

pub fn get_report(conn: &Connection, company_id: i64, report_id: i64) -> Result<ExpenseReport> {
    conn.query_row(
        &format!("SELECT {} FROM expense_reports WHERE company_id = ?1 AND id = ?2", REPORT_COLUMNS),
        params![company_id, report_id],
        row_to_report,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("expense report", report_id))
}

pub fn list_reports(conn: &Connection, company_id: i64, status: Option<ReportStatus>) -> Result<Vec<ExpenseReport>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM expense_reports
         WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, id DESC",
        REPORT_COLUMNS
    ))?;
    let reports = stmt
        .query_map(params![company_id, status], row_to_report)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(reports)
}

pub fn report_expenses(conn: &Connection, company_id: i64, report_id: i64) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "SELECT expense_id FROM expense_report_items WHERE report_id = ?1 ORDER BY added_at, id",
    )?;
    let ids = stmt
        .query_map(params![report_id], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    ids.into_iter().map(|id| get_expense(conn, company_id, id)).collect()
}

/// Recompute `total_amount` (Σ amount) and `total_tax` (Σ tax) from the
/// attached expenses.
pub fn calculate_totals(conn: &Connection, company_id: i64, report_id: i64) -> Result<ExpenseReport> {
    let expenses = report_expenses(conn, company_id, report_id)?;
    let total_amount: Decimal = expenses.iter().map(|e| e.amount).sum();
    let total_tax: Decimal = expenses.iter().map(|e| e.tax_amount).sum();

    conn.execute(
        "UPDATE expense_reports SET total_amount = ?1, total_tax = ?2 WHERE company_id = ?3 AND id = ?4",
        params![money::to_sql(&total_amount), money::to_sql(&total_tax), company_id, report_id],
    )?;
    get_report(conn, company_id, report_id)
}

fn require_draft(report: &ExpenseReport, action: &'static str) -> Result<()> {
    if report.status != ReportStatus::Draft {
        return Err(LedgerError::transition("expense report", report.status, action));
    }
    Ok(())
}

pub fn add_expense(conn: &Connection, ctx: &TenantContext, report_id: i64, expense_id: i64) -> Result<ExpenseReport> {
    let report = get_report(conn, ctx.company_id, report_id)?;
    require_draft(&report, "add expenses to")?;
    let expense = get_expense(conn, ctx.company_id, expense_id)?;

    atomically(conn, |conn| {
        conn.execute(
            "INSERT INTO expense_report_items (report_id, expense_id, added_at) VALUES (?1, ?2, ?3)",
            params![report.id, expense.id, Utc::now()],
        )
        .map_err(|e| conflict_on_duplicate(e, format!("expense {} is already on this report", expense.id)))?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "expense_report_item_added",
            "expense_report",
            report.id,
            serde_json::json!({ "expense_id": expense.id }),
        )?;
        calculate_totals(conn, ctx.company_id, report.id)
    })
}

pub fn remove_expense(conn: &Connection, ctx: &TenantContext, report_id: i64, expense_id: i64) -> Result<ExpenseReport> {
    let report = get_report(conn, ctx.company_id, report_id)?;
    require_draft(&report, "remove expenses from")?;

    atomically(conn, |conn| {
        let removed = conn.execute(
            "DELETE FROM expense_report_items WHERE report_id = ?1 AND expense_id = ?2",
            params![report.id, expense_id],
        )?;
        if removed == 0 {
            return Err(LedgerError::not_found("report expense", expense_id));
        }
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "expense_report_item_removed",
            "expense_report",
            report.id,
            serde_json::json!({ "expense_id": expense_id }),
        )?;
        calculate_totals(conn, ctx.company_id, report.id)
    })
}

fn transition(
    conn: &Connection,
    ctx: &TenantContext,
    report: &ExpenseReport,
    to: ReportStatus,
    event: &str,
) -> Result<ExpenseReport> {
    atomically(conn, |conn| {
        let now = Utc::now();
        match to {
            ReportStatus::Submitted => {
                conn.execute("UPDATE expense_reports SET submitted_at = ?1 WHERE id = ?2", params![now, report.id])?;
            }
            ReportStatus::Approved => {
                conn.execute(
                    "UPDATE expense_reports SET approved_by = ?1, approved_at = ?2 WHERE id = ?3",
                    params![ctx.user_id, now, report.id],
                )?;
            }
            _ => {}
        }
        conn.execute("UPDATE expense_reports SET status = ?1 WHERE id = ?2", params![to, report.id])?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            event,
            "expense_report",
            report.id,
            serde_json::json!({ "from": report.status, "to": to }),
        )?;
        get_report(conn, ctx.company_id, report.id)
    })
}

/// draft → submitted; the report must contain at least one expense.
pub fn submit_report(conn: &Connection, ctx: &TenantContext, report_id: i64) -> Result<ExpenseReport> {
    let report = get_report(conn, ctx.company_id, report_id)?;
    require_draft(&report, "submit")?;
    if report_expenses(conn, ctx.company_id, report.id)?.is_empty() {
        return Err(LedgerError::validation("cannot submit an empty expense report"));
    }
    transition(conn, ctx, &report, ReportStatus::Submitted, "expense_report_submitted")
}

pub fn approve_report(conn: &Connection, ctx: &TenantContext, report_id: i64) -> Result<ExpenseReport> {
    ctx.require_approver("approving an expense report")?;
    let report = get_report(conn, ctx.company_id, report_id)?;
    if report.status != ReportStatus::Submitted {
        return Err(LedgerError::transition("expense report", report.status, "approve"));
    }
    transition(conn, ctx, &report, ReportStatus::Approved, "expense_report_approved")
}

pub fn reject_report(conn: &Connection, ctx: &TenantContext, report_id: i64) -> Result<ExpenseReport> {
    ctx.require_approver("rejecting an expense report")?;
    let report = get_report(conn, ctx.company_id, report_id)?;
    if report.status != ReportStatus::Submitted {
        return Err(LedgerError::transition("expense report", report.status, "reject"));
    }
    transition(conn, ctx, &report, ReportStatus::Rejected, "expense_report_rejected")
}

pub fn mark_report_paid(conn: &Connection, ctx: &TenantContext, report_id: i64) -> Result<ExpenseReport> {
    ctx.require_approver("paying an expense report")?;
    let report = get_report(conn, ctx.company_id, report_id)?;
    if report.status != ReportStatus::Approved {
        return Err(LedgerError::transition("expense report", report.status, "mark paid"));
    }
    transition(conn, ctx, &report, ReportStatus::Paid, "expense_report_paid")
}

pub fn get_report_with_expenses(conn: &Connection, company_id: i64, report_id: i64) -> Result<ExpenseReportDetail> {
    let report = get_report(conn, company_id, report_id)?;
    let expenses = report_expenses(conn, company_id, report.id)?;
    Ok(ExpenseReportDetail { report, expenses })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::expenses::expense::create_expense;
    use crate::expenses::expense::test_support::receipt;
    use crate::tenancy::fixtures::{admin_context, member_context};
    use crate::tenancy::Role;
    use std::str::FromStr;

    fn april() -> NewExpenseReport {
        NewExpenseReport {
            title: "April travel".into(),
            description: String::new(),
            start_date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 30).unwrap()
    }

    #[test]
    fn test_report_totals_and_lifecycle() {
        let conn = open_in_memory().unwrap();
        let admin = admin_context(&conn);
        let staff = member_context(&conn, &admin, "staff", Role::Employee);

        let report = create_report(&conn, &staff, &april()).unwrap();
        assert!(matches!(submit_report(&conn, &staff, report.id), Err(LedgerError::Validation(_))));

        let taxi = create_expense(&conn, &staff, &receipt("Taxi", "40.00", "6.00", None), today()).unwrap();
        let hotel = create_expense(&conn, &staff, &receipt("Hotel", "300.00", "45.00", None), today()).unwrap();
        add_expense(&conn, &staff, report.id, taxi.id).unwrap();
        let report = add_expense(&conn, &staff, report.id, hotel.id).unwrap();
        assert_eq!(report.total_amount, Decimal::from_str("340.00").unwrap());
        assert_eq!(report.total_tax, Decimal::from_str("51.00").unwrap());

        assert!(matches!(add_expense(&conn, &staff, report.id, taxi.id), Err(LedgerError::Conflict(_))));

        let report = remove_expense(&conn, &staff, report.id, taxi.id).unwrap();
        assert_eq!(report.total_amount, Decimal::from_str("300.00").unwrap());

        let submitted = submit_report(&conn, &staff, report.id).unwrap();
        assert_eq!(submitted.status, ReportStatus::Submitted);
        assert!(submitted.submitted_at.is_some());
        assert!(add_expense(&conn, &staff, report.id, taxi.id).is_err());

        assert!(matches!(approve_report(&conn, &staff, report.id), Err(LedgerError::Forbidden(_))));
        let approved = approve_report(&conn, &admin, report.id).unwrap();
        assert_eq!(approved.approved_by, Some(admin.user_id));
        let paid = mark_report_paid(&conn, &admin, report.id).unwrap();
        assert_eq!(paid.status, ReportStatus::Paid);

        let detail = get_report_with_expenses(&conn, admin.company_id, report.id).unwrap();
        assert_eq!(detail.expenses.len(), 1);
        assert_eq!(detail.expenses[0].id, hotel.id);

        println!("✅ Expense report lifecycle test passed");
    }

    #[test]
    fn test_report_dates_validated() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let mut backwards = april();
        backwards.end_date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert!(create_report(&conn, &ctx, &backwards).is_err());

        let report = create_report(&conn, &ctx, &april()).unwrap();
        reject_report(&conn, &ctx, report.id).unwrap_err();
        assert_eq!(list_reports(&conn, ctx.company_id, Some(ReportStatus::Draft)).unwrap().len(), 1);
        assert!(list_reports(&conn, ctx.company_id, Some(ReportStatus::Paid)).unwrap().is_empty());
    }
}
