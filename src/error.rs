// ❗ Error types - One error enum for every store operation

use thiserror::Error;

/// Errors raised by the ledger stores, the importers and the LLM client.
///
/// Business-rule failures (`NotFound`, `Validation`, `Conflict`,
/// `InvalidTransition`, `Forbidden`) are meant to reach the caller as-is.
/// Infrastructure failures (`Database`, `Json`, `Csv`, `Http`, `Internal`)
/// are logged and reported generically by the HTTP layer.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot {action} {entity} in status '{from}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("upstream service error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl LedgerError {
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        LedgerError::NotFound(format!("{} {}", entity, id))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    pub fn transition(entity: &'static str, from: impl std::fmt::Display, action: &'static str) -> Self {
        LedgerError::InvalidTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    /// True for errors the caller caused (bad input, missing rows, wrong state).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::NotFound(_)
                | LedgerError::Validation(_)
                | LedgerError::Conflict(_)
                | LedgerError::InvalidTransition { .. }
                | LedgerError::Forbidden(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(LedgerError::not_found("invoice", 42).to_string(), "invoice 42 not found");
        assert_eq!(
            LedgerError::transition("expense", "paid", "approve").to_string(),
            "cannot approve expense in status 'paid'"
        );
        assert!(LedgerError::validation("amount must be positive").is_client_error());
        assert!(!LedgerError::Internal("poisoned".into()).is_client_error());
    }
}
