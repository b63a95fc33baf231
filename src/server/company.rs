// 🏢 Users, companies, members, ledger, dashboard and audit routes

use super::tenant::CurrentUser;
use super::{ok, today, ApiResult, AppState, AsOfQuery, Tenant};
use crate::db::{get_events_for_entity, recent_events, AuditEvent, Page, PageRequest};
use crate::ledger::{
    self, BalanceSheet, IncomeStatement, JournalEntry, JournalLine, LedgerAccount, NewJournalEntry, TrialBalance,
};
use crate::reports::{dashboard_summary, DashboardSummary};
use crate::tenancy::{self, Company, Membership, NewCompany, NewUser, Role, User};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
        .route("/companies", get(my_companies).post(create_company))
        .route("/company", get(current_company))
        .route("/members", get(list_members).post(add_member))
        .route("/members/:user_id", delete(remove_member))
        .route("/ledger/accounts", get(list_accounts))
        .route("/ledger/entries", get(list_entries).post(post_entry))
        .route("/ledger/entries/:id", get(get_entry))
        .route("/ledger/trial-balance", get(trial_balance))
        .route("/ledger/income-statement", get(income_statement))
        .route("/ledger/balance-sheet", get(balance_sheet))
        .route("/dashboard", get(dashboard))
        .route("/audit", get(audit_trail))
        .route("/audit/:entity/:id", get(entity_audit))
}

/// POST /api/users
async fn create_user(State(state): State<AppState>, Json(new): Json<NewUser>) -> ApiResult<User> {
    let conn = state.conn()?;
    ok(tenancy::create_user(&conn, &new)?)
}

/// GET /api/users/:id
async fn get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<User> {
    let conn = state.conn()?;
    ok(tenancy::get_user(&conn, id)?)
}

#[derive(Serialize)]
struct CompanyAccess {
    company: Company,
    role: Role,
}

/// GET /api/companies - companies the caller belongs to
async fn my_companies(State(state): State<AppState>, CurrentUser(user_id): CurrentUser) -> ApiResult<Vec<CompanyAccess>> {
    let conn = state.conn()?;
    let companies = tenancy::companies_for_user(&conn, user_id)?
        .into_iter()
        .map(|(company, role)| CompanyAccess { company, role })
        .collect();
    ok(companies)
}

/// POST /api/companies - the caller becomes its admin
async fn create_company(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(new): Json<NewCompany>,
) -> ApiResult<Company> {
    let conn = state.conn()?;
    ok(tenancy::create_company(&conn, user_id, &new)?)
}

/// GET /api/company
async fn current_company(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Company> {
    let conn = state.conn()?;
    ok(tenancy::get_company(&conn, ctx.company_id)?)
}

#[derive(Serialize)]
struct MemberView {
    user: User,
    membership: Membership,
}

/// GET /api/members
async fn list_members(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<MemberView>> {
    let conn = state.conn()?;
    let members = tenancy::list_members(&conn, ctx.company_id)?
        .into_iter()
        .map(|(user, membership)| MemberView { user, membership })
        .collect();
    ok(members)
}

#[derive(Deserialize)]
struct AddMember {
    user_id: i64,
    role: Role,
}

/// POST /api/members
async fn add_member(State(state): State<AppState>, Tenant(ctx): Tenant, Json(body): Json<AddMember>) -> ApiResult<Membership> {
    let conn = state.conn()?;
    ok(tenancy::add_member(&conn, &ctx, body.user_id, body.role)?)
}

/// DELETE /api/members/:user_id
async fn remove_member(State(state): State<AppState>, Tenant(ctx): Tenant, Path(user_id): Path<i64>) -> ApiResult<()> {
    let conn = state.conn()?;
    tenancy::deactivate_member(&conn, &ctx, user_id)?;
    ok(())
}

// ============================================================================
// Ledger
// ============================================================================

async fn list_accounts(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<LedgerAccount>> {
    let conn = state.conn()?;
    ok(ledger::list_accounts(&conn, ctx.company_id)?)
}

async fn list_entries(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<JournalEntry>> {
    let conn = state.conn()?;
    ok(ledger::list_entries(&conn, ctx.company_id, page)?)
}

/// POST /api/ledger/entries - manual balanced entry
async fn post_entry(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(entry): Json<NewJournalEntry>,
) -> ApiResult<JournalEntry> {
    let conn = state.conn()?;
    ok(ledger::post_entry(&conn, &ctx, &entry)?)
}

#[derive(Serialize)]
struct EntryDetail {
    entry: JournalEntry,
    lines: Vec<JournalLine>,
}

async fn get_entry(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<EntryDetail> {
    let conn = state.conn()?;
    let entry = ledger::get_entry(&conn, ctx.company_id, id)?;
    let lines = ledger::entry_lines(&conn, ctx.company_id, id)?;
    ok(EntryDetail { entry, lines })
}

async fn trial_balance(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<TrialBalance> {
    let conn = state.conn()?;
    ok(ledger::trial_balance(&conn, ctx.company_id, query.as_of)?)
}

#[derive(Deserialize)]
struct PeriodQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

/// GET /api/ledger/income-statement?from=&to= (defaults to the year to date)
async fn income_statement(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<IncomeStatement> {
    let to = query.to.unwrap_or_else(today);
    let from = query.from.unwrap_or_else(|| to.with_ordinal(1).unwrap_or(to));
    let conn = state.conn()?;
    ok(ledger::income_statement(&conn, ctx.company_id, from, to)?)
}

/// GET /api/ledger/balance-sheet?as_of=
async fn balance_sheet(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<BalanceSheet> {
    let conn = state.conn()?;
    ok(ledger::balance_sheet(&conn, ctx.company_id, query.as_of.unwrap_or_else(today))?)
}

// ============================================================================
// Dashboard & audit
// ============================================================================

async fn dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<DashboardSummary> {
    let conn = state.conn()?;
    ok(dashboard_summary(&conn, ctx.company_id, query.as_of.unwrap_or_else(today))?)
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: u32,
}

fn default_audit_limit() -> u32 {
    50
}

/// GET /api/audit?limit=50 - newest first
async fn audit_trail(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<AuditEvent>> {
    let conn = state.conn()?;
    ok(recent_events(&conn, ctx.company_id, query.limit.min(500))?)
}

/// GET /api/audit/:entity/:id
async fn entity_audit(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult<Vec<AuditEvent>> {
    let conn = state.conn()?;
    ok(get_events_for_entity(&conn, ctx.company_id, &entity, &id)?)
}
