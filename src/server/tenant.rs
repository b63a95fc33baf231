// 🔑 Tenant extractor - who is acting, for which company

use super::AppState;
use crate::error::LedgerError;
use crate::tenancy::{resolve_context, TenantContext};
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub const COMPANY_HEADER: &str = "x-company-id";
pub const USER_HEADER: &str = "x-user-id";

fn header_id(parts: &Parts, name: &str) -> Result<i64, LedgerError> {
    let raw = parts
        .headers
        .get(name)
        .ok_or_else(|| LedgerError::validation(format!("missing {} header", name)))?;
    raw.to_str()
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| LedgerError::validation(format!("invalid {} header", name)))
}

/// Resolved membership of the caller in the requested company.
///
/// Rejects with 400 when a header is missing or malformed and 403 when the
/// user has no active membership.
pub struct Tenant(pub TenantContext);

#[async_trait]
impl FromRequestParts<AppState> for Tenant {
    type Rejection = LedgerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let company_id = header_id(parts, COMPANY_HEADER)?;
        let user_id = header_id(parts, USER_HEADER)?;

        let ctx = {
            let conn = state.conn()?;
            resolve_context(&conn, company_id, user_id)
        };
        match ctx {
            Ok(ctx) => Ok(Tenant(ctx)),
            Err(e) => {
                tracing::warn!(company_id, user_id, uri = %parts.uri, "tenant access denied");
                Err(e)
            }
        }
    }
}

/// Caller identity without a company, for routes that create or list companies.
pub struct CurrentUser(pub i64);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = LedgerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = header_id(parts, USER_HEADER)?;
        let conn = state.conn()?;
        crate::tenancy::get_user(&conn, user_id).map_err(|_| LedgerError::Forbidden(format!("unknown user {}", user_id)))?;
        Ok(CurrentUser(user_id))
    }
}
