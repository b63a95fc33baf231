// 💸 Expense, category, vendor, report and mileage routes

use super::{ok, today, ApiResult, AppState, ReasonBody, Tenant};
use crate::db::{Page, PageRequest};
use crate::expenses::category::{self, ExpenseCategory, NewExpenseCategory};
use crate::expenses::expense::{self, Expense, ExpenseFilter, NewExpense};
use crate::expenses::mileage::{self, MileageLog, NewMileageLog};
use crate::expenses::report::{self, ExpenseReport, ExpenseReportDetail, NewExpenseReport};
use crate::expenses::vendor::{self, NewVendor, Vendor};
use crate::expenses::ReportStatus;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/expense-categories", get(list_categories).post(create_category))
        .route("/expense-categories/:id", get(get_category))
        .route("/vendors", get(list_vendors).post(create_vendor))
        .route("/vendors/:id", get(get_vendor))
        .route("/expenses", get(list_expenses).post(create_expense))
        .route("/expenses/:id", get(get_expense).put(update_expense).delete(delete_expense))
        .route("/expenses/:id/submit", post(submit_expense))
        .route("/expenses/:id/approve", post(approve_expense))
        .route("/expenses/:id/reject", post(reject_expense))
        .route("/expenses/:id/pay", post(pay_expense))
        .route("/expenses/:id/duplicate", post(duplicate_expense))
        .route("/expense-reports", get(list_reports).post(create_report))
        .route("/expense-reports/:id", get(get_report))
        .route(
            "/expense-reports/:id/expenses/:expense_id",
            post(add_to_report).delete(remove_from_report),
        )
        .route("/expense-reports/:id/submit", post(submit_report))
        .route("/expense-reports/:id/approve", post(approve_report))
        .route("/expense-reports/:id/reject", post(reject_report))
        .route("/expense-reports/:id/pay", post(pay_report))
        .route("/mileage", get(list_mileage).post(create_mileage))
        .route("/mileage/:id", get(get_mileage))
}

// ============================================================================
// Categories & vendors
// ============================================================================

async fn list_categories(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<ExpenseCategory>> {
    let conn = state.conn()?;
    ok(category::list_categories(&conn, ctx.company_id)?)
}

async fn create_category(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(new): Json<NewExpenseCategory>,
) -> ApiResult<ExpenseCategory> {
    let conn = state.conn()?;
    ok(category::create_category(&conn, &ctx, &new)?)
}

async fn get_category(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ExpenseCategory> {
    let conn = state.conn()?;
    ok(category::get_category(&conn, ctx.company_id, id)?)
}

async fn list_vendors(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<Vendor>> {
    let conn = state.conn()?;
    ok(vendor::list_vendors(&conn, ctx.company_id)?)
}

async fn create_vendor(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewVendor>) -> ApiResult<Vendor> {
    let conn = state.conn()?;
    ok(vendor::create_vendor(&conn, &ctx, &new)?)
}

async fn get_vendor(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Vendor> {
    let conn = state.conn()?;
    ok(vendor::get_vendor(&conn, ctx.company_id, id)?)
}

// ============================================================================
// Expenses
// ============================================================================

async fn list_expenses(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(filter): Query<ExpenseFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<Expense>> {
    let conn = state.conn()?;
    ok(expense::list_expenses(&conn, ctx.company_id, &filter, page)?)
}

async fn create_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewExpense>) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::create_expense(&conn, &ctx, &new, today())?)
}

async fn get_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::get_expense(&conn, ctx.company_id, id)?)
}

async fn update_expense(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<NewExpense>,
) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::update_expense(&conn, &ctx, id, &update)?)
}

async fn delete_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<()> {
    let conn = state.conn()?;
    expense::delete_expense(&conn, &ctx, id)?;
    ok(())
}

async fn submit_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::submit_expense(&conn, &ctx, id)?)
}

async fn approve_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::approve_expense(&conn, &ctx, id)?)
}

async fn reject_expense(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::reject_expense(&conn, &ctx, id, &body.reason)?)
}

async fn pay_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::mark_expense_paid(&conn, &ctx, id)?)
}

async fn duplicate_expense(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Expense> {
    let conn = state.conn()?;
    ok(expense::duplicate_expense(&conn, &ctx, id, today())?)
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Deserialize)]
struct ReportQuery {
    status: Option<ReportStatus>,
}

async fn list_reports(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Vec<ExpenseReport>> {
    let conn = state.conn()?;
    ok(report::list_reports(&conn, ctx.company_id, query.status)?)
}

async fn create_report(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(new): Json<NewExpenseReport>,
) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::create_report(&conn, &ctx, &new)?)
}

async fn get_report(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ExpenseReportDetail> {
    let conn = state.conn()?;
    ok(report::get_report_with_expenses(&conn, ctx.company_id, id)?)
}

async fn add_to_report(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path((id, expense_id)): Path<(i64, i64)>,
) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::add_expense(&conn, &ctx, id, expense_id)?)
}

async fn remove_from_report(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path((id, expense_id)): Path<(i64, i64)>,
) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::remove_expense(&conn, &ctx, id, expense_id)?)
}

async fn submit_report(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::submit_report(&conn, &ctx, id)?)
}

async fn approve_report(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::approve_report(&conn, &ctx, id)?)
}

async fn reject_report(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::reject_report(&conn, &ctx, id)?)
}

async fn pay_report(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ExpenseReport> {
    let conn = state.conn()?;
    ok(report::mark_report_paid(&conn, &ctx, id)?)
}

// ============================================================================
// Mileage
// ============================================================================

#[derive(Deserialize)]
struct MileageQuery {
    user_id: Option<i64>,
}

async fn list_mileage(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<MileageQuery>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<MileageLog>> {
    let conn = state.conn()?;
    ok(mileage::list_mileage_logs(&conn, ctx.company_id, query.user_id, page)?)
}

async fn create_mileage(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewMileageLog>) -> ApiResult<MileageLog> {
    let conn = state.conn()?;
    ok(mileage::create_mileage_log(&conn, &ctx, &new)?)
}

async fn get_mileage(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<MileageLog> {
    let conn = state.conn()?;
    ok(mileage::get_mileage_log(&conn, ctx.company_id, id)?)
}
