// 🌐 HTTP API - axum router over the stores
//
// Every route lives under `/api`. Tenant routes identify the acting user and
// company through the `X-Company-Id` and `X-User-Id` headers (see `tenant`).

mod company;
mod expenses;
mod hr;
mod insights;
mod invoicing;
mod reconciliation;
pub mod tenant;

use crate::db::lock;
use crate::error::LedgerError;
use crate::insights::CompletionClient;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Router;
use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use tenant::{Tenant, COMPANY_HEADER, USER_HEADER};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    /// `None` when no API key is configured; insight generation then fails
    /// with a configuration error.
    pub completion: Option<Arc<dyn CompletionClient>>,
}

impl AppState {
    pub fn new(conn: Connection, completion: Option<Arc<dyn CompletionClient>>) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
            completion,
        }
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        lock(&self.db)
    }
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub(crate) type ApiResult<T> = Result<Json<ApiResponse<T>>, LedgerError>;

pub(crate) fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

/// Server-side "today" for date defaults.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReasonBody {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AsOfQuery {
    pub as_of: Option<NaiveDate>,
}

impl LedgerError {
    fn status_code(&self) -> StatusCode {
        match self {
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
            LedgerError::Conflict(_) | LedgerError::InvalidTransition { .. } => StatusCode::CONFLICT,
            LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
            LedgerError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            LedgerError::Csv(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
            self.to_string()
        };
        (status, Json(ApiResponse::<()>::err(message))).into_response()
    }
}

/// Turn a handler panic into the usual 500 envelope.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else {
        "unknown panic"
    };
    tracing::error!(panic = detail, "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::err("internal server error")),
    )
        .into_response()
}

/// GET /api/health
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::ok("OK"))
}

/// Full application router.
pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(company::routes())
        .merge(invoicing::routes())
        .merge(expenses::routes())
        .merge(hr::routes())
        .merge(reconciliation::routes())
        .merge(insights::routes())
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
