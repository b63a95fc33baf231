// 🏦 Bank account, statement, rule and reconciliation session routes

use super::{ok, ApiResult, AppState, Tenant};
use crate::reconciliation::bank::{self, BankAccountUpdate};
use crate::reconciliation::engine::check_statement;
use crate::reconciliation::session;
use crate::reconciliation::{
    rules, Adjustment, AutoMatchResult, BankAccount, BankStatement, BankTransaction, ImportSummary,
    MatchStatus, NewAdjustment, NewBankAccount, NewBankStatement, NewBankTransaction, NewReconciliationRule,
    ReconciliationReport, ReconciliationRule, ReconciliationSession,
};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/bank-accounts", get(list_accounts).post(create_account))
        .route("/bank-accounts/:id", get(get_account).put(update_account))
        .route("/bank-accounts/:id/statements", post(create_statement))
        .route("/statements", get(list_statements))
        .route("/statements/:id", get(get_statement))
        .route("/statements/:id/import", post(import_statement))
        .route("/statements/:id/balance-check", get(balance_check))
        .route("/statements/:id/transactions", get(list_transactions).post(add_transaction))
        .route("/reconciliation-rules", get(list_rules).post(create_rule))
        .route("/reconciliation-rules/:id", get(get_rule).put(update_rule).delete(delete_rule))
        .route("/sessions", get(list_sessions).post(start_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/clear", post(clear_transactions))
        .route("/sessions/:id/dispute", post(dispute_transactions))
        .route("/sessions/:id/auto-match", post(auto_match))
        .route("/sessions/:id/adjustments", get(list_adjustments).post(add_adjustment))
        .route("/sessions/:id/pause", post(pause_session))
        .route("/sessions/:id/resume", post(resume_session))
        .route("/sessions/:id/cancel", post(cancel_session))
        .route("/sessions/:id/complete", post(complete_session))
}

#[derive(Deserialize, Default)]
struct AccountQuery {
    bank_account_id: Option<i64>,
    #[serde(default)]
    active_only: bool,
}

// ============================================================================
// Accounts & statements
// ============================================================================

async fn list_accounts(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Vec<BankAccount>> {
    let conn = state.conn()?;
    ok(bank::list_bank_accounts(&conn, ctx.company_id, query.active_only)?)
}

async fn create_account(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewBankAccount>) -> ApiResult<BankAccount> {
    let conn = state.conn()?;
    ok(bank::create_bank_account(&conn, &ctx, &new)?)
}

async fn get_account(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<BankAccount> {
    let conn = state.conn()?;
    ok(bank::get_bank_account(&conn, ctx.company_id, id)?)
}

async fn update_account(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<BankAccountUpdate>,
) -> ApiResult<BankAccount> {
    let conn = state.conn()?;
    ok(bank::update_bank_account(&conn, &ctx, id, &update)?)
}

async fn create_statement(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(new): Json<NewBankStatement>,
) -> ApiResult<BankStatement> {
    let conn = state.conn()?;
    ok(bank::create_statement(&conn, &ctx, id, &new)?)
}

async fn list_statements(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Vec<BankStatement>> {
    let conn = state.conn()?;
    ok(bank::list_statements(&conn, ctx.company_id, query.bank_account_id)?)
}

async fn get_statement(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<BankStatement> {
    let conn = state.conn()?;
    ok(bank::get_statement(&conn, ctx.company_id, id)?)
}

/// POST /api/statements/:id/import - raw CSV body
async fn import_statement(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    body: String,
) -> ApiResult<ImportSummary> {
    let conn = state.conn()?;
    ok(bank::import_statement_csv(&conn, &ctx, id, body.as_bytes())?)
}

async fn balance_check(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
) -> ApiResult<ReconciliationReport> {
    let conn = state.conn()?;
    ok(check_statement(&conn, ctx.company_id, id)?)
}

#[derive(Deserialize)]
struct TransactionQuery {
    status: Option<MatchStatus>,
}

async fn list_transactions(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Query(query): Query<TransactionQuery>,
) -> ApiResult<Vec<BankTransaction>> {
    let conn = state.conn()?;
    ok(bank::list_transactions(&conn, ctx.company_id, id, query.status)?)
}

async fn add_transaction(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(new): Json<NewBankTransaction>,
) -> ApiResult<BankTransaction> {
    let conn = state.conn()?;
    ok(bank::add_transaction(&conn, &ctx, id, &new)?)
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Deserialize)]
struct RuleQuery {
    #[serde(default)]
    active_only: bool,
}

async fn list_rules(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<RuleQuery>,
) -> ApiResult<Vec<ReconciliationRule>> {
    let conn = state.conn()?;
    ok(rules::list_rules(&conn, ctx.company_id, query.active_only)?)
}

async fn create_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(new): Json<NewReconciliationRule>,
) -> ApiResult<ReconciliationRule> {
    let conn = state.conn()?;
    ok(rules::create_rule(&conn, &ctx, &new)?)
}

async fn get_rule(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ReconciliationRule> {
    let conn = state.conn()?;
    ok(rules::get_rule(&conn, ctx.company_id, id)?)
}

async fn update_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<NewReconciliationRule>,
) -> ApiResult<ReconciliationRule> {
    let conn = state.conn()?;
    ok(rules::update_rule(&conn, &ctx, id, &update)?)
}

async fn delete_rule(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<()> {
    let conn = state.conn()?;
    rules::delete_rule(&conn, &ctx, id)?;
    ok(())
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Deserialize)]
struct StartSession {
    bank_account_id: i64,
    statement_id: i64,
    #[serde(default)]
    notes: String,
}

#[derive(Deserialize)]
struct TransactionIds {
    transaction_ids: Vec<i64>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Vec<ReconciliationSession>> {
    let conn = state.conn()?;
    ok(session::list_sessions(&conn, ctx.company_id, query.bank_account_id)?)
}

async fn start_session(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(body): Json<StartSession>,
) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::start_session(&conn, &ctx, body.bank_account_id, body.statement_id, &body.notes)?)
}

async fn get_session(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::get_session(&conn, ctx.company_id, id)?)
}

async fn clear_transactions(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<TransactionIds>,
) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::mark_cleared(&conn, &ctx, id, &body.transaction_ids)?)
}

async fn dispute_transactions(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<TransactionIds>,
) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::mark_disputed(&conn, &ctx, id, &body.transaction_ids)?)
}

async fn auto_match(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AutoMatchResult> {
    let conn = state.conn()?;
    ok(session::auto_match(&conn, &ctx, id)?)
}

async fn list_adjustments(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Vec<Adjustment>> {
    let conn = state.conn()?;
    ok(session::list_adjustments(&conn, ctx.company_id, id)?)
}

async fn add_adjustment(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(new): Json<NewAdjustment>,
) -> ApiResult<Adjustment> {
    let conn = state.conn()?;
    ok(session::add_adjustment(&conn, &ctx, id, &new)?)
}

async fn pause_session(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::pause_session(&conn, &ctx, id)?)
}

async fn resume_session(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::resume_session(&conn, &ctx, id)?)
}

async fn cancel_session(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::cancel_session(&conn, &ctx, id)?)
}

async fn complete_session(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<ReconciliationSession> {
    let conn = state.conn()?;
    ok(session::complete_session(&conn, &ctx, id)?)
}
