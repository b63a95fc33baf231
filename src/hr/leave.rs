// 🏖️ Leave requests - pending → approved | denied, cancellable until taken

use super::employee::{get_employee, set_status as set_employee_status};
use super::{EmployeeStatus, LeaveStatus, LeaveType};
use crate::db::{atomically, record_event};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: i64,
    pub company_id: i64,
    pub employee_id: i64,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_days: Decimal,
    pub reason: String,
    pub is_paid: bool,
    pub status: LeaveStatus,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub denial_reason: String,
    pub created_at: DateTime<Utc>,
}

impl LeaveRequest {
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.start_date <= day && day <= self.end_date
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLeaveRequest {
    pub employee_id: i64,
    pub leave_type: LeaveType,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Inclusive day count when omitted; set it for half days.
    pub total_days: Option<Decimal>,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_paid")]
    pub is_paid: bool,
}

fn default_paid() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeaveFilter {
    pub status: Option<LeaveStatus>,
    pub employee_id: Option<i64>,
}

/// Calendar days from `start` to `end`, both included.
pub fn inclusive_days(start: NaiveDate, end: NaiveDate) -> Decimal {
    Decimal::from((end - start).num_days() + 1)
}

const LEAVE_COLUMNS: &str = "id, company_id, employee_id, leave_type, start_date, end_date, total_days, reason,
     is_paid, status, reviewed_by, reviewed_at, denial_reason, created_at";

fn row_to_leave(row: &Row<'_>) -> rusqlite::Result<LeaveRequest> {
    Ok(LeaveRequest {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        employee_id: row.get("employee_id")?,
        leave_type: row.get("leave_type")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        total_days: money::get(row, "total_days")?,
        reason: row.get("reason")?,
        is_paid: row.get("is_paid")?,
        status: row.get("status")?,
        reviewed_by: row.get("reviewed_by")?,
        reviewed_at: row.get("reviewed_at")?,
        denial_reason: row.get("denial_reason")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_leave_request(conn: &Connection, ctx: &TenantContext, new: &NewLeaveRequest) -> Result<LeaveRequest> {
    let employee = get_employee(conn, ctx.company_id, new.employee_id)?;
    if employee.status == EmployeeStatus::Terminated {
        return Err(LedgerError::validation("terminated employees cannot request leave"));
    }
    if new.start_date > new.end_date {
        return Err(LedgerError::validation("leave start date must not be after its end date"));
    }
    let total_days = new.total_days.unwrap_or_else(|| inclusive_days(new.start_date, new.end_date));
    if total_days <= Decimal::ZERO {
        return Err(LedgerError::validation("leave must cover at least part of a day"));
    }
    money::ensure_quantity("leave days", total_days)?;

    conn.execute(
        "INSERT INTO leave_requests (company_id, employee_id, leave_type, start_date, end_date, total_days,
                                     reason, is_paid, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            ctx.company_id,
            employee.id,
            new.leave_type,
            new.start_date,
            new.end_date,
            money::to_sql(&total_days),
            new.reason,
            new.is_paid,
            LeaveStatus::Pending,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(
        conn,
        ctx.company_id,
        &ctx.actor(),
        "leave_requested",
        "leave_request",
        id,
        serde_json::json!({ "employee_id": employee.id, "leave_type": new.leave_type, "total_days": total_days }),
    )?;
    get_leave_request(conn, ctx.company_id, id)
}

pub fn get_leave_request(conn: &Connection, company_id: i64, leave_id: i64) -> Result<LeaveRequest> {
    conn.query_row(
        &format!("SELECT {} FROM leave_requests WHERE company_id = ?1 AND id = ?2", LEAVE_COLUMNS),
        params![company_id, leave_id],
        row_to_leave,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("leave request", leave_id))
}

fn review(
    conn: &Connection,
    ctx: &TenantContext,
    leave: &LeaveRequest,
    status: LeaveStatus,
    denial_reason: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE leave_requests SET status = ?1, reviewed_by = ?2, reviewed_at = ?3, denial_reason = ?4 WHERE id = ?5",
        params![status, ctx.user_id, Utc::now(), denial_reason, leave.id],
    )?;
    record_event(
        conn,
        ctx.company_id,
        &ctx.actor(),
        "leave_reviewed",
        "leave_request",
        leave.id,
        serde_json::json!({ "from": leave.status, "to": status }),
    )
}

/// pending → approved. Leave that covers `today` puts the employee on leave.
pub fn approve_leave(conn: &Connection, ctx: &TenantContext, leave_id: i64, today: NaiveDate) -> Result<LeaveRequest> {
    ctx.require_approver("approving leave")?;
    let leave = get_leave_request(conn, ctx.company_id, leave_id)?;
    if leave.status != LeaveStatus::Pending {
        return Err(LedgerError::transition("leave request", leave.status, "approve"));
    }
    let employee = get_employee(conn, ctx.company_id, leave.employee_id)?;

    atomically(conn, |conn| {
        review(conn, ctx, &leave, LeaveStatus::Approved, "")?;
        if leave.covers(today) && employee.status == EmployeeStatus::Active {
            set_employee_status(conn, ctx, &employee, EmployeeStatus::OnLeave)?;
        }
        Ok(())
    })?;

    tracing::info!(company_id = ctx.company_id, leave_id, employee_id = employee.id, "leave approved");
    get_leave_request(conn, ctx.company_id, leave_id)
}

/// pending → denied
pub fn deny_leave(conn: &Connection, ctx: &TenantContext, leave_id: i64, reason: &str) -> Result<LeaveRequest> {
    ctx.require_approver("denying leave")?;
    let leave = get_leave_request(conn, ctx.company_id, leave_id)?;
    if leave.status != LeaveStatus::Pending {
        return Err(LedgerError::transition("leave request", leave.status, "deny"));
    }
    review(conn, ctx, &leave, LeaveStatus::Denied, reason.trim())?;
    get_leave_request(conn, ctx.company_id, leave_id)
}

/// pending|approved → cancelled. An employee on this leave returns to active.
///
/// Approvers may cancel any request; everyone else only their own.
pub fn cancel_leave(conn: &Connection, ctx: &TenantContext, leave_id: i64, today: NaiveDate) -> Result<LeaveRequest> {
    atomically(conn, |conn| {
        let leave = get_leave_request(conn, ctx.company_id, leave_id)?;
        let employee = get_employee(conn, ctx.company_id, leave.employee_id)?;
        if !ctx.can_approve() && employee.user_id != Some(ctx.user_id) {
            return Err(LedgerError::Forbidden("only an approver or the employee can cancel this leave".into()));
        }
        if !matches!(leave.status, LeaveStatus::Pending | LeaveStatus::Approved) {
            return Err(LedgerError::transition("leave request", leave.status, "cancel"));
        }

        conn.execute(
            "UPDATE leave_requests SET status = ?1 WHERE id = ?2",
            params![LeaveStatus::Cancelled, leave.id],
        )?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "leave_cancelled",
            "leave_request",
            leave.id,
            serde_json::json!({ "from": leave.status }),
        )?;
        if leave.status == LeaveStatus::Approved && leave.covers(today) && employee.status == EmployeeStatus::OnLeave {
            set_employee_status(conn, ctx, &employee, EmployeeStatus::Active)?;
        }
        Ok(())
    })?;

    get_leave_request(conn, ctx.company_id, leave_id)
}

/// Latest start date first.
pub fn list_leave_requests(conn: &Connection, company_id: i64, filter: &LeaveFilter) -> Result<Vec<LeaveRequest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM leave_requests
         WHERE company_id = ?1 AND (?2 IS NULL OR status = ?2) AND (?3 IS NULL OR employee_id = ?3)
         ORDER BY start_date DESC, id DESC",
        LEAVE_COLUMNS
    ))?;
    let requests = stmt
        .query_map(params![company_id, filter.status, filter.employee_id], row_to_leave)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::hr::employee::{create_employee, sample_employee};
    use crate::tenancy::fixtures::{admin_context, member_context};
    use crate::tenancy::Role;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn vacation(employee_id: i64) -> NewLeaveRequest {
        NewLeaveRequest {
            employee_id,
            leave_type: LeaveType::Vacation,
            start_date: date(2025, 8, 4),
            end_date: date(2025, 8, 8),
            total_days: None,
            reason: "Family trip".into(),
            is_paid: true,
        }
    }

    #[test]
    fn test_total_days_inclusive() {
        assert_eq!(inclusive_days(date(2025, 8, 4), date(2025, 8, 8)), Decimal::from(5));
        assert_eq!(inclusive_days(date(2025, 8, 4), date(2025, 8, 4)), Decimal::ONE);

        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let employee = create_employee(&conn, &ctx, &sample_employee("E-001", "Ops", 1)).unwrap();

        let leave = create_leave_request(&conn, &ctx, &vacation(employee.id)).unwrap();
        assert_eq!(leave.total_days, Decimal::from(5));
        assert_eq!(leave.status, LeaveStatus::Pending);

        let mut backwards = vacation(employee.id);
        backwards.end_date = date(2025, 8, 1);
        assert!(create_leave_request(&conn, &ctx, &backwards).is_err());
    }

    #[test]
    fn test_approval_puts_employee_on_leave() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let staff = member_context(&conn, &ctx, "staff", Role::Employee);
        let employee = create_employee(&conn, &ctx, &sample_employee("E-001", "Ops", 1)).unwrap();
        let leave = create_leave_request(&conn, &ctx, &vacation(employee.id)).unwrap();

        assert!(matches!(approve_leave(&conn, &staff, leave.id, date(2025, 8, 5)), Err(LedgerError::Forbidden(_))));

        let approved = approve_leave(&conn, &ctx, leave.id, date(2025, 8, 5)).unwrap();
        assert_eq!(approved.status, LeaveStatus::Approved);
        assert_eq!(approved.reviewed_by, Some(ctx.user_id));
        assert_eq!(get_employee(&conn, ctx.company_id, employee.id).unwrap().status, EmployeeStatus::OnLeave);

        assert!(deny_leave(&conn, &ctx, leave.id, "too late").is_err());

        let cancelled = cancel_leave(&conn, &ctx, leave.id, date(2025, 8, 6)).unwrap();
        assert_eq!(cancelled.status, LeaveStatus::Cancelled);
        assert_eq!(get_employee(&conn, ctx.company_id, employee.id).unwrap().status, EmployeeStatus::Active);
        assert!(cancel_leave(&conn, &ctx, leave.id, date(2025, 8, 6)).is_err());

        println!("✅ Leave approval test passed");
    }

    #[test]
    fn test_deny_and_filter() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let first = create_employee(&conn, &ctx, &sample_employee("E-001", "Ops", 1)).unwrap();
        let second = create_employee(&conn, &ctx, &sample_employee("E-002", "Ops", 1)).unwrap();

        let leave = create_leave_request(&conn, &ctx, &vacation(first.id)).unwrap();
        create_leave_request(&conn, &ctx, &vacation(second.id)).unwrap();

        let denied = deny_leave(&conn, &ctx, leave.id, "  peak season ").unwrap();
        assert_eq!(denied.status, LeaveStatus::Denied);
        assert_eq!(denied.denial_reason, "peak season");

        let pending = list_leave_requests(&conn, ctx.company_id, &LeaveFilter { status: Some(LeaveStatus::Pending), employee_id: None }).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].employee_id, second.id);

        let for_first = list_leave_requests(&conn, ctx.company_id, &LeaveFilter { status: None, employee_id: Some(first.id) }).unwrap();
        assert_eq!(for_first.len(), 1);
    }

    #[test]
    fn test_only_owner_or_approver_cancels() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let owner = member_context(&conn, &ctx, "kofi", Role::Employee);
        let colleague = member_context(&conn, &ctx, "efua", Role::Employee);
        let manager = member_context(&conn, &ctx, "yaw", Role::Manager);

        let mut new = sample_employee("E-001", "Ops", 1);
        new.user_id = Some(owner.user_id);
        let employee = create_employee(&conn, &ctx, &new).unwrap();

        let first = create_leave_request(&conn, &ctx, &vacation(employee.id)).unwrap();
        let denied = cancel_leave(&conn, &colleague, first.id, date(2025, 8, 1));
        assert!(matches!(denied, Err(LedgerError::Forbidden(_))));
        assert_eq!(get_leave_request(&conn, ctx.company_id, first.id).unwrap().status, LeaveStatus::Pending);

        let own = cancel_leave(&conn, &owner, first.id, date(2025, 8, 1)).unwrap();
        assert_eq!(own.status, LeaveStatus::Cancelled);

        let second = create_leave_request(&conn, &ctx, &vacation(employee.id)).unwrap();
        let by_manager = cancel_leave(&conn, &manager, second.id, date(2025, 8, 1)).unwrap();
        assert_eq!(by_manager.status, LeaveStatus::Cancelled);

        println!("✅ Leave cancellation permission test passed");
    }
}
