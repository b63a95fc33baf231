// 🤖 AI Insights - stored insights, models, automated tasks and analytics
//
// Analytics are computed from the books. The LLM only turns a financial
// summary into insight text; nothing is stored when it fails.

pub mod analytics;
pub mod llm;
pub mod store;

use crate::db::sql_enum;

sql_enum! {
    pub enum InsightType {
        CashFlowPrediction => "cash_flow_prediction",
        ExpenseAnomaly => "expense_anomaly",
        RevenueForecast => "revenue_forecast",
        CustomerRisk => "customer_risk",
        CostOptimization => "cost_optimization",
        TaxOptimization => "tax_optimization",
        TrendAnalysis => "trend_analysis",
        BudgetVariance => "budget_variance",
        General => "general",
    }
}

impl InsightType {
    /// Map a free-form model label onto a known type, `general` otherwise.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace([' ', '-'], "_");
        normalized.parse().unwrap_or(InsightType::General)
    }
}

sql_enum! {
    pub enum Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

impl Priority {
    /// Sort key: critical first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// Unknown priorities fall back to medium.
    pub fn from_label(label: &str) -> Self {
        label.trim().to_lowercase().parse().unwrap_or(Priority::Medium)
    }
}

sql_enum! {
    pub enum TaskStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

sql_enum! {
    pub enum RiskLevel {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

pub use analytics::{CashFlowForecast, CustomerRisk, ExpenseAnalysis, FinancialSummary, MonthlyCashFlow};
pub use llm::{ChatMessage, ChatRequest, CompletionClient, InsightDraft, OpenAiClient};
pub use store::{AIInsight, AIModel, AutomatedTask, NewAIModel, NewAutomatedTask, PriorityCounts};
