// 🤖 Insight, analytics, AI model and automated task routes

use super::{ok, today, ApiResult, AppState, AsOfQuery, Tenant};
use crate::error::LedgerError;
use crate::insights::analytics::{self, CashFlowForecast, CustomerRisk, ExpenseAnalysis, FinancialSummary};
use crate::insights::llm::{generate_insights, test_connection, ConnectionCheck};
use crate::insights::store::{self, AIInsight, AIModel, AutomatedTask, NewAIModel, NewAutomatedTask, PriorityCounts};
use crate::insights::TaskStatus;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/insights", get(list_insights))
        .route("/insights/priorities", get(priorities))
        .route("/insights/generate", post(generate))
        .route("/insights/connection", get(connection))
        .route("/insights/:id", get(get_insight).delete(deactivate_insight))
        .route("/insights/:id/acknowledge", post(acknowledge))
        .route("/insights/:id/feedback", post(feedback))
        .route("/analytics/cash-flow", get(cash_flow))
        .route("/analytics/expenses", get(expenses))
        .route("/analytics/customers", get(customers))
        .route("/analytics/summary", get(summary))
        .route("/ai-models", get(list_models).post(register_model))
        .route("/ai-models/:id", get(get_model))
        .route("/ai-models/:id/predictions", post(record_prediction))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task))
        .route("/tasks/:id/start", post(start_task))
        .route("/tasks/:id/finish", post(finish_task))
        .route("/tasks/:id/cancel", post(cancel_task))
}

// ============================================================================
// Insights
// ============================================================================

#[derive(Deserialize)]
struct InsightQuery {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    20
}

async fn list_insights(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<InsightQuery>,
) -> ApiResult<Vec<AIInsight>> {
    let conn = state.conn()?;
    ok(store::list_active(&conn, ctx.company_id, Utc::now(), query.limit.min(100))?)
}

async fn priorities(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<PriorityCounts> {
    let conn = state.conn()?;
    ok(store::priority_counts(&conn, ctx.company_id)?)
}

/// GET /api/insights/:id - opening an insight marks it viewed
async fn get_insight(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AIInsight> {
    let conn = state.conn()?;
    ok(store::mark_viewed(&conn, &ctx, id)?)
}

async fn deactivate_insight(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AIInsight> {
    let conn = state.conn()?;
    ok(store::deactivate(&conn, &ctx, id)?)
}

async fn acknowledge(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AIInsight> {
    let conn = state.conn()?;
    ok(store::acknowledge(&conn, &ctx, id)?)
}

#[derive(Deserialize)]
struct FeedbackBody {
    feedback: String,
}

async fn feedback(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<FeedbackBody>,
) -> ApiResult<AIInsight> {
    let conn = state.conn()?;
    ok(store::record_feedback(&conn, &ctx, id, &body.feedback)?)
}

/// POST /api/insights/generate - calls the LLM; the database lock is released
/// while the request is in flight.
async fn generate(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<AIInsight>> {
    let client = state
        .completion
        .clone()
        .ok_or_else(|| LedgerError::Config("no completion API key configured".into()))?;
    let insights = generate_insights(client.as_ref(), &state.db, &ctx, today()).await?;
    ok(insights)
}

async fn connection(State(state): State<AppState>, Tenant(_ctx): Tenant) -> ApiResult<ConnectionCheck> {
    let client = state
        .completion
        .clone()
        .ok_or_else(|| LedgerError::Config("no completion API key configured".into()))?;
    ok(test_connection(client.as_ref()).await)
}

// ============================================================================
// Analytics
// ============================================================================

async fn cash_flow(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<CashFlowForecast> {
    let day = query.as_of.unwrap_or_else(today);
    let conn = state.conn()?;
    let history = analytics::monthly_cash_flow(&conn, ctx.company_id, day)?;
    ok(analytics::predict_cash_flow(&history, day))
}

async fn expenses(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<ExpenseAnalysis> {
    let conn = state.conn()?;
    ok(analytics::expense_analysis(&conn, ctx.company_id, query.as_of.unwrap_or_else(today))?)
}

async fn customers(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<Vec<CustomerRisk>> {
    let conn = state.conn()?;
    ok(analytics::customer_risk(&conn, ctx.company_id, query.as_of.unwrap_or_else(today))?)
}

async fn summary(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<AsOfQuery>,
) -> ApiResult<FinancialSummary> {
    let conn = state.conn()?;
    ok(analytics::financial_summary(&conn, ctx.company_id, query.as_of.unwrap_or_else(today))?)
}

// ============================================================================
// AI models
// ============================================================================

async fn list_models(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<Vec<AIModel>> {
    let conn = state.conn()?;
    ok(store::list_models(&conn, ctx.company_id)?)
}

async fn register_model(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewAIModel>) -> ApiResult<AIModel> {
    let conn = state.conn()?;
    ok(store::register_model(&conn, &ctx, &new)?)
}

async fn get_model(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AIModel> {
    let conn = state.conn()?;
    ok(store::get_model(&conn, ctx.company_id, id)?)
}

#[derive(Deserialize)]
struct PredictionBody {
    success: bool,
}

async fn record_prediction(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<PredictionBody>,
) -> ApiResult<AIModel> {
    let conn = state.conn()?;
    ok(store::record_prediction(&conn, &ctx, id, body.success)?)
}

// ============================================================================
// Automated tasks
// ============================================================================

#[derive(Deserialize)]
struct TaskQuery {
    status: Option<TaskStatus>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Vec<AutomatedTask>> {
    let conn = state.conn()?;
    ok(store::list_tasks(&conn, ctx.company_id, query.status)?)
}

async fn create_task(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(new): Json<NewAutomatedTask>,
) -> ApiResult<AutomatedTask> {
    let conn = state.conn()?;
    ok(store::create_task(&conn, &ctx, &new)?)
}

async fn get_task(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AutomatedTask> {
    let conn = state.conn()?;
    ok(store::get_task(&conn, ctx.company_id, id)?)
}

async fn start_task(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AutomatedTask> {
    let conn = state.conn()?;
    ok(store::start_run(&conn, &ctx, id)?)
}

#[derive(Deserialize)]
struct FinishBody {
    success: bool,
    #[serde(default)]
    result: String,
    next_run: Option<DateTime<Utc>>,
}

async fn finish_task(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(body): Json<FinishBody>,
) -> ApiResult<AutomatedTask> {
    let conn = state.conn()?;
    ok(store::finish_run(&conn, &ctx, id, body.success, &body.result, body.next_run)?)
}

async fn cancel_task(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<AutomatedTask> {
    let conn = state.conn()?;
    ok(store::cancel_task(&conn, &ctx, id)?)
}
