// 👥 Employee, payroll and leave routes

use super::{ok, today, ApiResult, AppState, ReasonBody, Tenant};
use crate::db::{Page, PageRequest};
use crate::hr::employee::{self, DepartmentSummary, Employee, EmployeeFilter, NewEmployee};
use crate::hr::leave::{self, LeaveFilter, LeaveRequest, NewLeaveRequest};
use crate::hr::payroll::{self, NewPayrollPeriod, NewPayrollRecord, PayrollPeriod, PayrollRecord};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/employees", get(list_employees).post(create_employee))
        .route("/employees/departments", get(departments))
        .route("/employees/:id", get(get_employee).put(update_employee).delete(delete_employee))
        .route("/employees/:id/terminate", post(terminate_employee))
        .route("/payroll/periods", get(list_periods).post(create_period))
        .route("/payroll/periods/:id", get(get_period))
        .route("/payroll/periods/:id/process", post(process_period))
        .route("/payroll/periods/:id/records", get(list_records).post(add_record))
        .route("/payroll/records/:id", get(get_record))
        .route("/payroll/records/:id/pay", post(pay_record))
        .route("/leave", get(list_leave).post(create_leave))
        .route("/leave/:id", get(get_leave))
        .route("/leave/:id/approve", post(approve_leave))
        .route("/leave/:id/deny", post(deny_leave))
        .route("/leave/:id/cancel", post(cancel_leave))
}

// ============================================================================
// Employees
// ============================================================================

async fn list_employees(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(filter): Query<EmployeeFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<Employee>> {
    let conn = state.conn()?;
    ok(employee::list_employees(&conn, ctx.company_id, &filter, page)?)
}

async fn create_employee(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewEmployee>) -> ApiResult<Employee> {
    let conn = state.conn()?;
    ok(employee::create_employee(&conn, &ctx, &new)?)
}

async fn departments(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<DepartmentSummary>> {
    let conn = state.conn()?;
    ok(employee::department_summary(&conn, ctx.company_id)?)
}

async fn get_employee(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Employee> {
    let conn = state.conn()?;
    ok(employee::get_employee(&conn, ctx.company_id, id)?)
}

async fn update_employee(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<NewEmployee>,
) -> ApiResult<Employee> {
    let conn = state.conn()?;
    ok(employee::update_employee(&conn, &ctx, id, &update)?)
}

async fn delete_employee(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<()> {
    let conn = state.conn()?;
    employee::delete_employee(&conn, &ctx, id)?;
    ok(())
}

#[derive(Deserialize, Default)]
struct TerminateBody {
    date: Option<NaiveDate>,
}

async fn terminate_employee(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<TerminateBody>,
) -> ApiResult<Employee> {
    let conn = state.conn()?;
    ok(employee::terminate_employee(&conn, &ctx, id, body.date.unwrap_or_else(today))?)
}

// ============================================================================
// Payroll
// ============================================================================

async fn list_periods(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<PayrollPeriod>> {
    let conn = state.conn()?;
    ok(payroll::list_periods(&conn, ctx.company_id)?)
}

async fn create_period(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(new): Json<NewPayrollPeriod>,
) -> ApiResult<PayrollPeriod> {
    let conn = state.conn()?;
    ok(payroll::create_period(&conn, &ctx, &new)?)
}

async fn get_period(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<PayrollPeriod> {
    let conn = state.conn()?;
    ok(payroll::get_period(&conn, ctx.company_id, id)?)
}

async fn process_period(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<PayrollPeriod> {
    let conn = state.conn()?;
    ok(payroll::process_period(&conn, &ctx, id)?)
}

async fn list_records(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Vec<PayrollRecord>> {
    let conn = state.conn()?;
    ok(payroll::list_records(&conn, ctx.company_id, id)?)
}

async fn add_record(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(new): Json<NewPayrollRecord>,
) -> ApiResult<PayrollRecord> {
    let conn = state.conn()?;
    ok(payroll::add_record(&conn, &ctx, id, &new)?)
}

async fn get_record(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<PayrollRecord> {
    let conn = state.conn()?;
    ok(payroll::get_record(&conn, ctx.company_id, id)?)
}

async fn pay_record(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<PayrollRecord> {
    let conn = state.conn()?;
    ok(payroll::mark_record_paid(&conn, &ctx, id)?)
}

// ============================================================================
// Leave
// ============================================================================

async fn list_leave(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(filter): Query<LeaveFilter>,
) -> ApiResult<Vec<LeaveRequest>> {
    let conn = state.conn()?;
    ok(leave::list_leave_requests(&conn, ctx.company_id, &filter)?)
}

async fn create_leave(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(new): Json<NewLeaveRequest>,
) -> ApiResult<LeaveRequest> {
    let conn = state.conn()?;
    ok(leave::create_leave_request(&conn, &ctx, &new)?)
}

async fn get_leave(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<LeaveRequest> {
    let conn = state.conn()?;
    ok(leave::get_leave_request(&conn, ctx.company_id, id)?)
}

async fn approve_leave(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<LeaveRequest> {
    let conn = state.conn()?;
    ok(leave::approve_leave(&conn, &ctx, id, today())?)
}

async fn deny_leave(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<LeaveRequest> {
    let conn = state.conn()?;
    ok(leave::deny_leave(&conn, &ctx, id, &body.reason)?)
}

async fn cancel_leave(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<LeaveRequest> {
    let conn = state.conn()?;
    ok(leave::cancel_leave(&conn, &ctx, id, today())?)
}
