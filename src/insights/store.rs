// 💡 Insight store - insights, registered models and automated tasks

use super::{InsightType, Priority, TaskStatus};
use crate::db::{conflict_on_duplicate, record_event, Filter};
use crate::error::{LedgerError, Result};
use crate::tenancy::TenantContext;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let text: String = row.get(column)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

// ============================================================================
// INSIGHTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIInsight {
    pub id: i64,
    pub company_id: i64,
    pub user_id: i64,
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub data_points: serde_json::Value,
    /// 0.0 - 1.0
    pub confidence_score: f64,
    pub priority: Priority,
    pub recommendations: Vec<String>,
    pub potential_impact: String,
    pub is_viewed: bool,
    pub is_acknowledged: bool,
    pub user_feedback: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AIInsight {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.valid_until, Some(until) if until < now)
    }
}

#[derive(Debug, Clone)]
pub struct NewInsight {
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub data_points: serde_json::Value,
    pub confidence_score: f64,
    pub priority: Priority,
    pub recommendations: Vec<String>,
    pub potential_impact: String,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PriorityCounts {
    pub critical: i64,
    pub high: i64,
    pub medium: i64,
    pub low: i64,
}

const INSIGHT_COLUMNS: &str = "id, company_id, user_id, insight_type, title, description, data_points,
     confidence_score, priority, recommendations, potential_impact, is_viewed, is_acknowledged,
     user_feedback, valid_until, is_active, created_at";

/// Critical first, then high, medium, low.
const PRIORITY_ORDER: &str =
    "CASE priority WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END";

fn row_to_insight(row: &Row<'_>) -> rusqlite::Result<AIInsight> {
    Ok(AIInsight {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        user_id: row.get("user_id")?,
        insight_type: row.get("insight_type")?,
        title: row.get("title")?,
        description: row.get("description")?,
        data_points: json_column(row, "data_points")?,
        confidence_score: row.get("confidence_score")?,
        priority: row.get("priority")?,
        recommendations: json_column(row, "recommendations")?,
        potential_impact: row.get("potential_impact")?,
        is_viewed: row.get("is_viewed")?,
        is_acknowledged: row.get("is_acknowledged")?,
        user_feedback: row.get("user_feedback")?,
        valid_until: row.get("valid_until")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_insight(conn: &Connection, ctx: &TenantContext, new: &NewInsight) -> Result<AIInsight> {
    if new.title.trim().is_empty() {
        return Err(LedgerError::validation("insight title is required"));
    }
    if !(0.0..=1.0).contains(&new.confidence_score) {
        return Err(LedgerError::validation("confidence score must be between 0 and 1"));
    }

    conn.execute(
        "INSERT INTO ai_insights (company_id, user_id, insight_type, title, description, data_points,
                                  confidence_score, priority, recommendations, potential_impact,
                                  valid_until, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            ctx.company_id,
            ctx.user_id,
            new.insight_type,
            new.title.trim(),
            new.description,
            serde_json::to_string(&new.data_points)?,
            new.confidence_score,
            new.priority,
            serde_json::to_string(&new.recommendations)?,
            new.potential_impact,
            new.valid_until,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "insight_created", "ai_insight", id, serde_json::json!({
        "insight_type": new.insight_type,
        "priority": new.priority,
    }))?;
    get_insight(conn, ctx.company_id, id)
}

pub fn get_insight(conn: &Connection, company_id: i64, insight_id: i64) -> Result<AIInsight> {
    conn.query_row(
        &format!("SELECT {} FROM ai_insights WHERE company_id = ?1 AND id = ?2", INSIGHT_COLUMNS),
        params![company_id, insight_id],
        row_to_insight,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("insight", insight_id))
}

/// Active, unexpired insights: most urgent first, newest first within a priority.
pub fn list_active(conn: &Connection, company_id: i64, now: DateTime<Utc>, limit: u32) -> Result<Vec<AIInsight>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ai_insights
         WHERE company_id = ?1 AND is_active = 1 AND (valid_until IS NULL OR valid_until >= ?2)
         ORDER BY {}, created_at DESC, id DESC
         LIMIT ?3",
        INSIGHT_COLUMNS, PRIORITY_ORDER
    ))?;
    let insights = stmt
        .query_map(params![company_id, now, limit], row_to_insight)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(insights)
}

pub fn count_active(conn: &Connection, company_id: i64, now: DateTime<Utc>) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM ai_insights
         WHERE company_id = ?1 AND is_active = 1 AND (valid_until IS NULL OR valid_until >= ?2)",
        params![company_id, now],
        |row| row.get(0),
    )?)
}

/// Active insights per priority.
pub fn priority_counts(conn: &Connection, company_id: i64) -> Result<PriorityCounts> {
    let mut stmt = conn.prepare(
        "SELECT priority, COUNT(*) FROM ai_insights WHERE company_id = ?1 AND is_active = 1 GROUP BY priority",
    )?;
    let rows = stmt
        .query_map(params![company_id], |row| Ok((row.get::<_, Priority>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut counts = PriorityCounts::default();
    for (priority, count) in rows {
        match priority {
            Priority::Critical => counts.critical = count,
            Priority::High => counts.high = count,
            Priority::Medium => counts.medium = count,
            Priority::Low => counts.low = count,
        }
    }
    Ok(counts)
}

fn set_flag(conn: &Connection, ctx: &TenantContext, insight_id: i64, column: &str, event: &str) -> Result<AIInsight> {
    get_insight(conn, ctx.company_id, insight_id)?;
    conn.execute(
        &format!("UPDATE ai_insights SET {} = 1 WHERE company_id = ?1 AND id = ?2", column),
        params![ctx.company_id, insight_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), event, "ai_insight", insight_id, serde_json::json!({}))?;
    get_insight(conn, ctx.company_id, insight_id)
}

/// Acknowledging also marks the insight viewed.
pub fn acknowledge(conn: &Connection, ctx: &TenantContext, insight_id: i64) -> Result<AIInsight> {
    set_flag(conn, ctx, insight_id, "is_viewed", "insight_viewed")?;
    set_flag(conn, ctx, insight_id, "is_acknowledged", "insight_acknowledged")
}

pub fn mark_viewed(conn: &Connection, ctx: &TenantContext, insight_id: i64) -> Result<AIInsight> {
    set_flag(conn, ctx, insight_id, "is_viewed", "insight_viewed")
}

pub fn record_feedback(conn: &Connection, ctx: &TenantContext, insight_id: i64, feedback: &str) -> Result<AIInsight> {
    if feedback.trim().is_empty() {
        return Err(LedgerError::validation("feedback cannot be empty"));
    }
    get_insight(conn, ctx.company_id, insight_id)?;
    conn.execute(
        "UPDATE ai_insights SET user_feedback = ?1 WHERE company_id = ?2 AND id = ?3",
        params![feedback.trim(), ctx.company_id, insight_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "insight_feedback", "ai_insight", insight_id, serde_json::json!({}))?;
    get_insight(conn, ctx.company_id, insight_id)
}

pub fn deactivate(conn: &Connection, ctx: &TenantContext, insight_id: i64) -> Result<AIInsight> {
    get_insight(conn, ctx.company_id, insight_id)?;
    conn.execute(
        "UPDATE ai_insights SET is_active = 0 WHERE company_id = ?1 AND id = ?2",
        params![ctx.company_id, insight_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "insight_deactivated", "ai_insight", insight_id, serde_json::json!({}))?;
    get_insight(conn, ctx.company_id, insight_id)
}

// ============================================================================
// MODELS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIModel {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub model_type: String,
    pub version: String,
    pub config: serde_json::Value,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub prediction_count: i64,
    pub success_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AIModel {
    /// Percentage of successful predictions; 0 before the first one.
    pub fn success_rate(&self) -> f64 {
        if self.prediction_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.prediction_count as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAIModel {
    pub name: String,
    pub model_type: String,
    pub version: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
}

const MODEL_COLUMNS: &str = "id, company_id, name, model_type, version, config, accuracy, precision_score,
     recall, f1_score, prediction_count, success_count, is_active, created_at";

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<AIModel> {
    Ok(AIModel {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        model_type: row.get("model_type")?,
        version: row.get("version")?,
        config: json_column(row, "config")?,
        accuracy: row.get("accuracy")?,
        precision: row.get("precision_score")?,
        recall: row.get("recall")?,
        f1_score: row.get("f1_score")?,
        prediction_count: row.get("prediction_count")?,
        success_count: row.get("success_count")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn register_model(conn: &Connection, ctx: &TenantContext, new: &NewAIModel) -> Result<AIModel> {
    ctx.require_finance_role("registering a model")?;
    if new.name.trim().is_empty() || new.version.trim().is_empty() {
        return Err(LedgerError::validation("model name and version are required"));
    }
    for (label, metric) in [
        ("accuracy", new.accuracy),
        ("precision", new.precision),
        ("recall", new.recall),
        ("f1_score", new.f1_score),
    ] {
        if matches!(metric, Some(m) if !(0.0..=1.0).contains(&m)) {
            return Err(LedgerError::validation(format!("{} must be between 0 and 1", label)));
        }
    }
    let config = if new.config.is_null() { serde_json::json!({}) } else { new.config.clone() };

    conn.execute(
        "INSERT INTO ai_models (company_id, name, model_type, version, config, accuracy, precision_score,
                                recall, f1_score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            ctx.company_id,
            new.name.trim(),
            new.model_type.trim(),
            new.version.trim(),
            serde_json::to_string(&config)?,
            new.accuracy,
            new.precision,
            new.recall,
            new.f1_score,
            Utc::now(),
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("model {} {} is already registered", new.name.trim(), new.version.trim())))?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "model_registered", "ai_model", id, serde_json::json!({
        "name": new.name.trim(),
        "version": new.version.trim(),
    }))?;
    get_model(conn, ctx.company_id, id)
}

pub fn get_model(conn: &Connection, company_id: i64, model_id: i64) -> Result<AIModel> {
    conn.query_row(
        &format!("SELECT {} FROM ai_models WHERE company_id = ?1 AND id = ?2", MODEL_COLUMNS),
        params![company_id, model_id],
        row_to_model,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("model", model_id))
}

pub fn list_models(conn: &Connection, company_id: i64) -> Result<Vec<AIModel>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM ai_models WHERE company_id = ?1 ORDER BY name, version",
        MODEL_COLUMNS
    ))?;
    let models = stmt
        .query_map(params![company_id], row_to_model)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(models)
}

pub fn record_prediction(conn: &Connection, ctx: &TenantContext, model_id: i64, success: bool) -> Result<AIModel> {
    let model = get_model(conn, ctx.company_id, model_id)?;
    if !model.is_active {
        return Err(LedgerError::validation(format!("model {} is inactive", model.name)));
    }
    conn.execute(
        "UPDATE ai_models SET prediction_count = prediction_count + 1, success_count = success_count + ?1
         WHERE company_id = ?2 AND id = ?3",
        params![success as i64, ctx.company_id, model_id],
    )?;
    get_model(conn, ctx.company_id, model_id)
}

// ============================================================================
// AUTOMATED TASKS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomatedTask {
    pub id: i64,
    pub company_id: i64,
    pub created_by: i64,
    pub task_type: String,
    pub name: String,
    pub description: String,
    pub config: serde_json::Value,
    pub schedule: String,
    pub status: TaskStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_result: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAutomatedTask {
    pub task_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Free-form, e.g. a cron expression.
    #[serde(default)]
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
}

const TASK_COLUMNS: &str = "id, company_id, created_by, task_type, name, description, config, schedule, status,
     last_run, next_run, success_count, failure_count, last_result, is_active, created_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<AutomatedTask> {
    Ok(AutomatedTask {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        created_by: row.get("created_by")?,
        task_type: row.get("task_type")?,
        name: row.get("name")?,
        description: row.get("description")?,
        config: json_column(row, "config")?,
        schedule: row.get("schedule")?,
        status: row.get("status")?,
        last_run: row.get("last_run")?,
        next_run: row.get("next_run")?,
        success_count: row.get("success_count")?,
        failure_count: row.get("failure_count")?,
        last_result: row.get("last_result")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_task(conn: &Connection, ctx: &TenantContext, new: &NewAutomatedTask) -> Result<AutomatedTask> {
    ctx.require_finance_role("scheduling a task")?;
    if new.name.trim().is_empty() || new.task_type.trim().is_empty() {
        return Err(LedgerError::validation("task name and type are required"));
    }
    let config = if new.config.is_null() { serde_json::json!({}) } else { new.config.clone() };

    conn.execute(
        "INSERT INTO automated_tasks (company_id, created_by, task_type, name, description, config, schedule,
                                      status, next_run, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            ctx.company_id,
            ctx.user_id,
            new.task_type.trim(),
            new.name.trim(),
            new.description,
            serde_json::to_string(&config)?,
            new.schedule.trim(),
            TaskStatus::Pending,
            new.next_run,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "task_created", "automated_task", id, serde_json::json!({
        "task_type": new.task_type.trim(),
    }))?;
    get_task(conn, ctx.company_id, id)
}

pub fn get_task(conn: &Connection, company_id: i64, task_id: i64) -> Result<AutomatedTask> {
    conn.query_row(
        &format!("SELECT {} FROM automated_tasks WHERE company_id = ?1 AND id = ?2", TASK_COLUMNS),
        params![company_id, task_id],
        row_to_task,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("automated task", task_id))
}

pub fn list_tasks(conn: &Connection, company_id: i64, status: Option<TaskStatus>) -> Result<Vec<AutomatedTask>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push_opt("status = ?", status);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM automated_tasks {} ORDER BY next_run IS NULL, next_run, id",
        TASK_COLUMNS,
        f.where_sql()
    ))?;
    let tasks = stmt
        .query_map(f.params(), row_to_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Pending, completed and failed tasks may run again; running and cancelled
/// ones may not.
pub fn start_run(conn: &Connection, ctx: &TenantContext, task_id: i64) -> Result<AutomatedTask> {
    let task = get_task(conn, ctx.company_id, task_id)?;
    if !task.is_active || matches!(task.status, TaskStatus::Running | TaskStatus::Cancelled) {
        return Err(LedgerError::transition("automated task", task.status, "start"));
    }
    conn.execute(
        "UPDATE automated_tasks SET status = ?1, last_run = ?2 WHERE company_id = ?3 AND id = ?4",
        params![TaskStatus::Running, Utc::now(), ctx.company_id, task_id],
    )?;
    tracing::info!(company_id = ctx.company_id, task_id, task_type = %task.task_type, "task started");
    get_task(conn, ctx.company_id, task_id)
}

pub fn finish_run(
    conn: &Connection,
    ctx: &TenantContext,
    task_id: i64,
    success: bool,
    result: &str,
    next_run: Option<DateTime<Utc>>,
) -> Result<AutomatedTask> {
    let task = get_task(conn, ctx.company_id, task_id)?;
    if task.status != TaskStatus::Running {
        return Err(LedgerError::transition("automated task", task.status, "finish"));
    }
    let (status, counter) = if success {
        (TaskStatus::Completed, "success_count")
    } else {
        (TaskStatus::Failed, "failure_count")
    };
    conn.execute(
        &format!(
            "UPDATE automated_tasks SET status = ?1, last_result = ?2, next_run = ?3, {0} = {0} + 1
             WHERE company_id = ?4 AND id = ?5",
            counter
        ),
        params![status, result, next_run, ctx.company_id, task_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "task_finished", "automated_task", task_id, serde_json::json!({
        "success": success,
    }))?;
    if success {
        tracing::info!(company_id = ctx.company_id, task_id, "task completed");
    } else {
        tracing::warn!(company_id = ctx.company_id, task_id, result, "task failed");
    }
    get_task(conn, ctx.company_id, task_id)
}

pub fn cancel_task(conn: &Connection, ctx: &TenantContext, task_id: i64) -> Result<AutomatedTask> {
    ctx.require_finance_role("cancelling a task")?;
    let task = get_task(conn, ctx.company_id, task_id)?;
    if task.status == TaskStatus::Cancelled {
        return Err(LedgerError::transition("automated task", task.status, "cancel"));
    }
    conn.execute(
        "UPDATE automated_tasks SET status = ?1, is_active = 0, next_run = NULL WHERE company_id = ?2 AND id = ?3",
        params![TaskStatus::Cancelled, ctx.company_id, task_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "task_cancelled", "automated_task", task_id, serde_json::json!({}))?;
    get_task(conn, ctx.company_id, task_id)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn insight(priority: Priority, valid_until: Option<DateTime<Utc>>) -> NewInsight {
        NewInsight {
            insight_type: InsightType::TrendAnalysis,
            title: format!("{} insight", priority),
            description: "Revenue is growing".into(),
            data_points: serde_json::json!({ "growth": 4.5 }),
            confidence_score: 0.8,
            priority,
            recommendations: vec!["Keep invoicing promptly".into()],
            potential_impact: String::new(),
            valid_until,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::insight;
    use super::*;
    use crate::db::open_in_memory;
    use crate::tenancy::fixtures::{admin_context, member_context};
    use crate::tenancy::Role;
    use chrono::Duration;

    #[test]
    fn test_active_insights_ordered_by_priority() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let now = Utc::now();

        create_insight(&conn, &ctx, &insight(Priority::Low, None)).unwrap();
        let critical = create_insight(&conn, &ctx, &insight(Priority::Critical, Some(now + Duration::days(7)))).unwrap();
        create_insight(&conn, &ctx, &insight(Priority::High, Some(now - Duration::days(1)))).unwrap();
        let medium = create_insight(&conn, &ctx, &insight(Priority::Medium, None)).unwrap();

        let active = list_active(&conn, ctx.company_id, now, 10).unwrap();
        let priorities: Vec<Priority> = active.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![Priority::Critical, Priority::Medium, Priority::Low]);
        assert_eq!(active[0].id, critical.id);
        assert_eq!(active[0].recommendations, vec!["Keep invoicing promptly".to_string()]);
        assert_eq!(count_active(&conn, ctx.company_id, now).unwrap(), 3);

        deactivate(&conn, &ctx, medium.id).unwrap();
        let counts = priority_counts(&conn, ctx.company_id).unwrap();
        assert_eq!(counts, PriorityCounts { critical: 1, high: 1, medium: 0, low: 1 });

        println!("✅ Active insight ordering test passed");
    }

    #[test]
    fn test_acknowledge_and_feedback() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let created = create_insight(&conn, &ctx, &insight(Priority::High, None)).unwrap();
        assert!(!created.is_viewed);

        let acknowledged = acknowledge(&conn, &ctx, created.id).unwrap();
        assert!(acknowledged.is_viewed && acknowledged.is_acknowledged);

        let with_feedback = record_feedback(&conn, &ctx, created.id, "  Useful  ").unwrap();
        assert_eq!(with_feedback.user_feedback, "Useful");
        assert!(record_feedback(&conn, &ctx, created.id, " ").is_err());

        let mut bad = insight(Priority::Low, None);
        bad.confidence_score = 75.0;
        assert!(create_insight(&conn, &ctx, &bad).is_err());

        println!("✅ Insight acknowledge test passed");
    }

    #[test]
    fn test_model_success_rate() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let new = NewAIModel {
            name: "cash-flow".into(),
            model_type: "forecast".into(),
            version: "1.0".into(),
            config: serde_json::Value::Null,
            accuracy: Some(0.91),
            precision: None,
            recall: None,
            f1_score: None,
        };
        let model = register_model(&conn, &ctx, &new).unwrap();
        assert_eq!(model.success_rate(), 0.0);
        assert!(matches!(register_model(&conn, &ctx, &new), Err(LedgerError::Conflict(_))));

        record_prediction(&conn, &ctx, model.id, true).unwrap();
        record_prediction(&conn, &ctx, model.id, true).unwrap();
        record_prediction(&conn, &ctx, model.id, true).unwrap();
        let model = record_prediction(&conn, &ctx, model.id, false).unwrap();
        assert_eq!(model.prediction_count, 4);
        assert_eq!(model.success_rate(), 75.0);

        println!("✅ Model success rate test passed");
    }

    #[test]
    fn test_task_runs() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let task = create_task(&conn, &ctx, &NewAutomatedTask {
            task_type: "refresh_overdue".into(),
            name: "Nightly overdue sweep".into(),
            description: String::new(),
            config: serde_json::Value::Null,
            schedule: "0 2 * * *".into(),
            next_run: None,
        })
        .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(finish_run(&conn, &ctx, task.id, true, "early", None).is_err());
        start_run(&conn, &ctx, task.id).unwrap();
        assert!(start_run(&conn, &ctx, task.id).is_err());
        let done = finish_run(&conn, &ctx, task.id, false, "database locked", None).unwrap();
        assert_eq!(done.status, TaskStatus::Failed);
        assert_eq!(done.failure_count, 1);
        assert!(done.last_run.is_some());

        start_run(&conn, &ctx, task.id).unwrap();
        let done = finish_run(&conn, &ctx, task.id, true, "3 invoices flagged", None).unwrap();
        assert_eq!(done.success_count, 1);
        assert_eq!(done.last_result, "3 invoices flagged");

        let clerk = member_context(&conn, &ctx, "esi", Role::Employee);
        assert!(matches!(cancel_task(&conn, &clerk, task.id), Err(LedgerError::Forbidden(_))));
        let cancelled = cancel_task(&conn, &ctx, task.id).unwrap();
        assert!(!cancelled.is_active);
        assert!(start_run(&conn, &ctx, task.id).is_err());
        assert_eq!(list_tasks(&conn, ctx.company_id, Some(TaskStatus::Cancelled)).unwrap().len(), 1);

        println!("✅ Automated task test passed");
    }
}
