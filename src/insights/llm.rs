// 🧠 LLM client - chat completions and insight generation
//
// The completion API is behind a trait so the server and tests can swap the
// HTTP client for a canned one. The database lock is never held across an
// await point.

use super::analytics::financial_summary;
use super::store::{create_insight, AIInsight, NewInsight};
use super::{InsightType, Priority};
use crate::config::OpenAiSettings;
use crate::db::{atomically, lock};
use crate::error::{LedgerError, Result};
use crate::tenancy::TenantContext;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;

const SYSTEM_PROMPT: &str = "You are a business intelligence AI. Analyze financial data and provide strategic \
business insights in JSON format with this structure: {'insights': [{'type': str, 'priority': str, \
'content': str, 'recommendations': [str], 'confidence': int}]}";

const PING_PROMPT: &str = "Respond with 'Connected' if you receive this message.";

const FALLBACK_CONTENT_CHARS: usize = 500;
const FALLBACK_CONFIDENCE: f64 = 70.0;
const DEFAULT_CONFIDENCE: f64 = 75.0;
const INSIGHT_VALID_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Falls back to the client's configured limit.
    pub max_tokens: Option<u32>,
    pub json_response: bool,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a chat request and return the first choice's text.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    fn model(&self) -> &str;
}

// ============================================================================
// OPENAI
// ============================================================================

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| LedgerError::Config("OPENAI_API_KEY is not set".into()))?;
        Ok(OpenAiClient {
            http: reqwest::Client::new(),
            api_key,
            model: settings.model.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    fn body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "temperature": self.temperature,
        });
        if request.json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.body(request))
            .send()
            .await
            .map_err(|e| LedgerError::Upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(%status, model = %self.model, "completion request rejected");
            return Err(LedgerError::Upstream(format!("{} {}", status, detail.chars().take(200).collect::<String>())));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LedgerError::Upstream(format!("unreadable response: {}", e)))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| LedgerError::Upstream("response has no message content".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
    pub model: String,
}

/// Ping the model with a ten-token request. Failures are reported, not raised.
pub async fn test_connection(client: &dyn CompletionClient) -> ConnectionCheck {
    let request = ChatRequest {
        messages: vec![ChatMessage::user(PING_PROMPT)],
        max_tokens: Some(10),
        json_response: false,
    };
    match client.complete(&request).await {
        Ok(message) => ConnectionCheck { success: true, message, model: client.model().to_string() },
        Err(e) => ConnectionCheck { success: false, message: e.to_string(), model: client.model().to_string() },
    }
}

// ============================================================================
// PARSING
// ============================================================================

/// One insight as the model described it, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub label: String,
    pub priority: Priority,
    pub content: String,
    pub recommendations: Vec<String>,
    /// As given by the model, usually 0-100.
    pub confidence: Option<f64>,
}

impl InsightDraft {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let recommendations = match value.get("recommendations") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        };
        InsightDraft {
            label: text("type").unwrap_or_else(|| "general".into()),
            priority: text("priority").map(|p| Priority::from_label(&p)).unwrap_or(Priority::Medium),
            content: text("content")
                .or_else(|| text("description"))
                .unwrap_or_else(|| value.to_string()),
            recommendations,
            confidence: value.get("confidence").and_then(Value::as_f64),
        }
    }

    pub fn insight_type(&self) -> InsightType {
        InsightType::from_label(&self.label)
    }

    /// "cash_flow_prediction" → "AI Insight: Cash Flow Prediction"
    pub fn title(&self) -> String {
        let words: Vec<String> = self
            .label
            .split(['_', ' '])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                    None => String::new(),
                }
            })
            .collect();
        format!("AI Insight: {}", words.join(" "))
    }

    /// Confidence on a 0-1 scale. Values above 1 are read as percentages.
    pub fn normalized_confidence(&self) -> f64 {
        let raw = self.confidence.unwrap_or(DEFAULT_CONFIDENCE);
        let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
        scaled.clamp(0.0, 1.0)
    }
}

/// Turn a completion into drafts. Non-JSON text becomes a single general
/// insight holding the first 500 characters.
pub fn parse_insights_response(text: &str) -> Vec<InsightDraft> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => match map.get("insights") {
            Some(Value::Array(items)) => items.iter().map(InsightDraft::from_value).collect(),
            _ => vec![InsightDraft::from_value(&Value::Object(map))],
        },
        Ok(Value::Array(items)) => items.iter().map(InsightDraft::from_value).collect(),
        _ => vec![InsightDraft {
            label: "general".into(),
            priority: Priority::Medium,
            content: text.chars().take(FALLBACK_CONTENT_CHARS).collect(),
            recommendations: Vec::new(),
            confidence: Some(FALLBACK_CONFIDENCE),
        }],
    }
}

// ============================================================================
// GENERATION
// ============================================================================

fn insights_prompt(context: &str, metrics: &Value) -> Result<String> {
    Ok(format!(
        "Analyze the overall business financial health and provide strategic insights:\n\n\
         Financial Summary:\n{}\n\n\
         Detailed Metrics:\n{}\n\n\
         Provide:\n\
         1. Overall business health assessment\n\
         2. Growth opportunities\n\
         3. Financial risks\n\
         4. Strategic recommendations\n\
         5. KPI improvement suggestions",
        context,
        serde_json::to_string_pretty(metrics)?
    ))
}

/// Summarise the books, ask the model, and store one insight per item.
pub async fn generate_insights(
    client: &dyn CompletionClient,
    db: &Mutex<Connection>,
    ctx: &TenantContext,
    today: NaiveDate,
) -> Result<Vec<AIInsight>> {
    let prompt = {
        let conn = lock(db)?;
        let summary = financial_summary(&conn, ctx.company_id, today)?;
        insights_prompt(&summary.to_prompt_context(), &serde_json::to_value(&summary)?)?
    };

    let request = ChatRequest {
        messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
        max_tokens: None,
        json_response: true,
    };
    let response = client.complete(&request).await.map_err(|e| match e {
        LedgerError::Upstream(_) => e,
        other => LedgerError::Upstream(other.to_string()),
    })?;

    let drafts = parse_insights_response(&response);
    let valid_until = Utc::now() + Duration::days(INSIGHT_VALID_DAYS);

    let conn = lock(db)?;
    let stored = atomically(&conn, |conn| {
        drafts
            .iter()
            .map(|draft| {
                create_insight(
                    conn,
                    ctx,
                    &NewInsight {
                        insight_type: draft.insight_type(),
                        title: draft.title(),
                        description: draft.content.clone(),
                        data_points: json!({ "source": "llm", "model": client.model(), "as_of": today }),
                        confidence_score: draft.normalized_confidence(),
                        priority: draft.priority,
                        recommendations: draft.recommendations.clone(),
                        potential_impact: String::new(),
                        valid_until: Some(valid_until),
                    },
                )
            })
            .collect::<Result<Vec<_>>>()
    })?;

    tracing::info!(company_id = ctx.company_id, count = stored.len(), model = client.model(), "insights generated");
    Ok(stored)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::insights::store::count_active;
    use crate::tenancy::fixtures::admin_context;

    struct CannedClient {
        reply: Result<String>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl CannedClient {
        fn replying(text: &str) -> Self {
            CannedClient { reply: Ok(text.to_string()), seen: Mutex::new(Vec::new()) }
        }

        fn failing() -> Self {
            CannedClient { reply: Err(LedgerError::Upstream("503 Service Unavailable".into())), seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, request: &ChatRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(LedgerError::Upstream(e.to_string())),
            }
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    #[test]
    fn test_parse_shapes() {
        let wrapped = parse_insights_response(
            r#"{"insights": [{"type": "cash_flow_prediction", "priority": "HIGH", "content": "Cash is tight",
                 "recommendations": ["Chase receivables"], "confidence": 90},
                {"type": "whatever", "priority": "urgent", "content": "Hmm"}]}"#,
        );
        assert_eq!(wrapped.len(), 2);
        assert_eq!(wrapped[0].insight_type(), InsightType::CashFlowPrediction);
        assert_eq!(wrapped[0].priority, Priority::High);
        assert_eq!(wrapped[0].title(), "AI Insight: Cash Flow Prediction");
        assert!((wrapped[0].normalized_confidence() - 0.9).abs() < 1e-9);
        assert_eq!(wrapped[1].insight_type(), InsightType::General);
        assert_eq!(wrapped[1].priority, Priority::Medium);
        assert!((wrapped[1].normalized_confidence() - 0.75).abs() < 1e-9);

        let single = parse_insights_response(r#"{"type": "trend_analysis", "content": "Up"}"#);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].insight_type(), InsightType::TrendAnalysis);

        let array = parse_insights_response(r#"[{"content": "a"}, {"content": "b"}]"#);
        assert_eq!(array.len(), 2);

        let long_text = "x".repeat(800);
        let text = parse_insights_response(&long_text);
        assert_eq!(text.len(), 1);
        assert_eq!(text[0].content.len(), 500);
        assert_eq!(text[0].label, "general");
        assert!((text[0].normalized_confidence() - 0.7).abs() < 1e-9);

        println!("✅ Insight parsing test passed");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = OpenAiClient::new(&OpenAiSettings::default()).err().unwrap();
        assert!(matches!(err, LedgerError::Config(_)));

        let settings = OpenAiSettings { api_key: Some("sk-test".into()), ..OpenAiSettings::default() };
        let client = OpenAiClient::new(&settings).unwrap();
        let body = client.body(&ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: None,
            json_response: true,
        });
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "user");
        println!("✅ OpenAI client config test passed");
    }

    #[tokio::test]
    async fn test_generate_stores_insights() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let db = Mutex::new(conn);
        let client = CannedClient::replying(
            r#"{"insights": [{"type": "customer_risk", "priority": "critical", "content": "One customer is late",
                 "recommendations": ["Send reminders"], "confidence": 80}]}"#,
        );
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        let stored = generate_insights(&client, &db, &ctx, today).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "AI Insight: Customer Risk");
        assert_eq!(stored[0].priority, Priority::Critical);
        assert!((stored[0].confidence_score - 0.8).abs() < 1e-9);
        assert!(stored[0].valid_until.unwrap() > Utc::now() + Duration::days(6));

        let seen = client.seen.lock().unwrap();
        assert!(seen[0].json_response);
        assert!(seen[0].messages[1].content.contains("Company: Acme Ltd"));
        println!("✅ Insight generation test passed");
    }

    #[tokio::test]
    async fn test_upstream_failure_stores_nothing() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let db = Mutex::new(conn);
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        let err = generate_insights(&CannedClient::failing(), &db, &ctx, today).await.unwrap_err();
        assert!(matches!(err, LedgerError::Upstream(_)));
        let conn = db.lock().unwrap();
        assert_eq!(count_active(&conn, ctx.company_id, Utc::now()).unwrap(), 0);

        let check = test_connection(&CannedClient::failing()).await;
        assert!(!check.success);
        println!("✅ Upstream failure test passed");
    }

    #[tokio::test]
    async fn test_failed_store_keeps_no_partial_batch() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        conn.execute_batch(
            "CREATE TRIGGER one_insight_only BEFORE INSERT ON ai_insights
             WHEN (SELECT COUNT(*) FROM ai_insights) >= 1
             BEGIN SELECT RAISE(ABORT, 'insight table full'); END;",
        )
        .unwrap();
        let db = Mutex::new(conn);
        let client = CannedClient::replying(
            r#"{"insights": [{"type": "trend_analysis", "content": "Revenue up"},
                             {"type": "customer_risk", "content": "One customer is late"}]}"#,
        );
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        let err = generate_insights(&client, &db, &ctx, today).await.unwrap_err();
        assert!(matches!(err, LedgerError::Database(_)));
        let conn = db.lock().unwrap();
        assert_eq!(count_active(&conn, ctx.company_id, Utc::now()).unwrap(), 0);
        assert!(conn.is_autocommit());
        println!("✅ Insight batch rollback test passed");
    }
}
