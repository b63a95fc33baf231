// 🏢 Tenancy - Companies, users and who may act for which company
//
// A company is the tenant. Users reach a company only through an active
// membership; the membership role decides what they may approve or delete.

use crate::db::{atomically, conflict_on_duplicate, record_event, sql_enum};
use crate::error::{LedgerError, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

sql_enum! {
    /// Role of a user inside one company.
    pub enum Role {
        Admin => "admin",
        Accountant => "accountant",
        Manager => "manager",
        Employee => "employee",
        Client => "client",
    }
}

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub tax_id: Option<String>,
    pub currency: String,
    pub fiscal_year_start: NaiveDate,
    pub timezone: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewCompany {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    pub tax_id: Option<String>,
    pub currency: Option<String>,
    pub fiscal_year_start: Option<NaiveDate>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub id: i64,
    pub company_id: i64,
    pub user_id: i64,
    pub role: Role,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}

/// The acting user inside the acting company. Every store call that writes
/// takes one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TenantContext {
    pub company_id: i64,
    pub user_id: i64,
    pub role: Role,
}

impl TenantContext {
    /// Admins and accountants may delete posted records.
    pub fn can_manage_finances(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Accountant)
    }

    /// Admins, accountants and managers may approve expenses and leave.
    pub fn can_approve(&self) -> bool {
        matches!(self.role, Role::Admin | Role::Accountant | Role::Manager)
    }

    /// Actor string written to the audit trail.
    pub fn actor(&self) -> String {
        format!("user:{}", self.user_id)
    }

    pub fn require_finance_role(&self, action: &str) -> Result<()> {
        if self.can_manage_finances() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(format!(
                "{} requires an admin or accountant role",
                action
            )))
        }
    }

    pub fn require_approver(&self, action: &str) -> Result<()> {
        if self.can_approve() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(format!(
                "{} requires an admin, accountant or manager role",
                action
            )))
        }
    }
}

// ============================================================================
// USERS
// ============================================================================

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        full_name: row.get("full_name")?,
        created_at: row.get("created_at")?,
    })
}

fn validate_email(email: &str) -> Result<()> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(LedgerError::validation(format!("invalid email '{}'", email))),
    }
}

pub fn create_user(conn: &Connection, new: &NewUser) -> Result<User> {
    let username = new.username.trim();
    if username.is_empty() {
        return Err(LedgerError::validation("username is required"));
    }
    validate_email(&new.email)?;

    conn.execute(
        "INSERT INTO users (username, email, full_name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, new.email.trim(), new.full_name.trim(), Utc::now()],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("user '{}' or email already exists", username)))?;

    let user = get_user(conn, conn.last_insert_rowid())?;
    tracing::info!(user_id = user.id, username = %user.username, "user created");
    Ok(user)
}

pub fn get_user(conn: &Connection, user_id: i64) -> Result<User> {
    conn.query_row(
        "SELECT id, username, email, full_name, created_at FROM users WHERE id = ?1",
        params![user_id],
        row_to_user,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("user", user_id))
}

pub fn find_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    Ok(conn
        .query_row(
            "SELECT id, username, email, full_name, created_at FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .optional()?)
}

// ============================================================================
// COMPANIES & MEMBERSHIP
// ============================================================================

const COMPANY_COLUMNS: &str = "c.id, c.name, c.email, c.phone, c.address, c.tax_id, c.currency,
     c.fiscal_year_start, c.timezone, c.created_by, c.created_at";

fn row_to_company(row: &Row<'_>) -> rusqlite::Result<Company> {
    Ok(Company {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        address: row.get("address")?,
        tax_id: row.get("tax_id")?,
        currency: row.get("currency")?,
        fiscal_year_start: row.get("fiscal_year_start")?,
        timezone: row.get("timezone")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_membership(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        user_id: row.get("user_id")?,
        role: row.get("role")?,
        is_active: row.get("is_active")?,
        joined_at: row.get("joined_at")?,
    })
}

/// Create a company; the creator becomes its admin.
pub fn create_company(conn: &Connection, creator_id: i64, new: &NewCompany) -> Result<Company> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("company name is required"));
    }
    validate_email(&new.email)?;
    get_user(conn, creator_id)?;

    let currency = new
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("GHS")
        .to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(LedgerError::validation(format!("currency '{}' must be a 3-letter code", currency)));
    }

    let now = Utc::now();
    let fiscal_year_start = match new.fiscal_year_start {
        Some(date) => date,
        None => NaiveDate::from_ymd_opt(now.year(), 1, 1)
            .ok_or_else(|| LedgerError::Internal("invalid fiscal year start".into()))?,
    };

    let company_id = atomically(conn, |conn| {
        conn.execute(
            "INSERT INTO companies (name, email, phone, address, tax_id, currency,
                                    fiscal_year_start, timezone, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                name,
                new.email.trim(),
                new.phone,
                new.address,
                new.tax_id,
                currency,
                fiscal_year_start,
                new.timezone.as_deref().unwrap_or("UTC"),
                creator_id,
                now,
            ],
        )?;
        let company_id = conn.last_insert_rowid();

        conn.execute(
            "INSERT INTO memberships (company_id, user_id, role, is_active, joined_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![company_id, creator_id, Role::Admin, now],
        )?;

        record_event(
            conn,
            company_id,
            &format!("user:{}", creator_id),
            "company_created",
            "company",
            company_id,
            serde_json::json!({ "name": name, "currency": currency }),
        )?;

        Ok(company_id)
    })?;

    tracing::info!(company_id, creator_id, "company created");
    get_company(conn, company_id)
}

pub fn get_company(conn: &Connection, company_id: i64) -> Result<Company> {
    conn.query_row(
        &format!("SELECT {} FROM companies c WHERE c.id = ?1", COMPANY_COLUMNS),
        params![company_id],
        row_to_company,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("company", company_id))
}

/// Add a user to a company. Re-adding an inactive member reactivates it
/// with the new role.
pub fn add_member(conn: &Connection, ctx: &TenantContext, user_id: i64, role: Role) -> Result<Membership> {
    if ctx.role != Role::Admin {
        return Err(LedgerError::Forbidden("only admins can manage members".into()));
    }
    get_user(conn, user_id)?;

    let existing = find_membership(conn, ctx.company_id, user_id)?;
    match existing {
        Some(m) if m.is_active => {
            return Err(LedgerError::Conflict(format!(
                "user {} is already a member of company {}",
                user_id, ctx.company_id
            )))
        }
        Some(m) => {
            conn.execute(
                "UPDATE memberships SET is_active = 1, role = ?1 WHERE id = ?2",
                params![role, m.id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO memberships (company_id, user_id, role, is_active, joined_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![ctx.company_id, user_id, role, Utc::now()],
            )?;
        }
    }

    record_event(
        conn,
        ctx.company_id,
        &ctx.actor(),
        "member_added",
        "user",
        user_id,
        serde_json::json!({ "role": role }),
    )?;

    find_membership(conn, ctx.company_id, user_id)?
        .ok_or_else(|| LedgerError::not_found("membership", user_id))
}

pub fn deactivate_member(conn: &Connection, ctx: &TenantContext, user_id: i64) -> Result<()> {
    if ctx.role != Role::Admin {
        return Err(LedgerError::Forbidden("only admins can manage members".into()));
    }
    if user_id == ctx.user_id {
        return Err(LedgerError::validation("admins cannot deactivate themselves"));
    }

    let changed = conn.execute(
        "UPDATE memberships SET is_active = 0 WHERE company_id = ?1 AND user_id = ?2 AND is_active = 1",
        params![ctx.company_id, user_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found("membership", user_id));
    }

    record_event(conn, ctx.company_id, &ctx.actor(), "member_deactivated", "user", user_id, serde_json::json!({}))
}

pub fn find_membership(conn: &Connection, company_id: i64, user_id: i64) -> Result<Option<Membership>> {
    Ok(conn
        .query_row(
            "SELECT id, company_id, user_id, role, is_active, joined_at
             FROM memberships WHERE company_id = ?1 AND user_id = ?2",
            params![company_id, user_id],
            row_to_membership,
        )
        .optional()?)
}

pub fn list_members(conn: &Connection, company_id: i64) -> Result<Vec<(User, Membership)>> {
    let mut stmt = conn.prepare(
        "SELECT u.id AS uid, u.username, u.email, u.full_name, u.created_at AS user_created,
                m.id, m.company_id, m.user_id, m.role, m.is_active, m.joined_at
         FROM memberships m JOIN users u ON u.id = m.user_id
         WHERE m.company_id = ?1
         ORDER BY u.username",
    )?;

    let members = stmt
        .query_map(params![company_id], |row| {
            let user = User {
                id: row.get("uid")?,
                username: row.get("username")?,
                email: row.get("email")?,
                full_name: row.get("full_name")?,
                created_at: row.get("user_created")?,
            };
            Ok((user, row_to_membership(row)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(members)
}

/// Companies the user can act for, with the role held in each.
pub fn companies_for_user(conn: &Connection, user_id: i64) -> Result<Vec<(Company, Role)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {}, m.role
         FROM companies c JOIN memberships m ON m.company_id = c.id
         WHERE m.user_id = ?1 AND m.is_active = 1
         ORDER BY c.name",
        COMPANY_COLUMNS
    ))?;

    let companies = stmt
        .query_map(params![user_id], |row| Ok((row_to_company(row)?, row.get("role")?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(companies)
}

/// Resolve the acting context; a missing or inactive membership is `Forbidden`.
pub fn resolve_context(conn: &Connection, company_id: i64, user_id: i64) -> Result<TenantContext> {
    match find_membership(conn, company_id, user_id)? {
        Some(m) if m.is_active => Ok(TenantContext {
            company_id,
            user_id,
            role: m.role,
        }),
        _ => Err(LedgerError::Forbidden(format!(
            "user {} has no access to company {}",
            user_id, company_id
        ))),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared setup for store tests: one company with an admin.

    use super::*;

    pub fn admin_context(conn: &Connection) -> TenantContext {
        let user = create_user(
            conn,
            &NewUser {
                username: "owner".into(),
                email: "owner@example.com".into(),
                full_name: "Owner".into(),
            },
        )
        .unwrap();
        let company = create_company(
            conn,
            user.id,
            &NewCompany {
                name: "Acme Ltd".into(),
                email: "books@acme.example".into(),
                ..Default::default()
            },
        )
        .unwrap();
        resolve_context(conn, company.id, user.id).unwrap()
    }

    /// Add another member with `role` to the context's company.
    pub fn member_context(conn: &Connection, admin: &TenantContext, username: &str, role: Role) -> TenantContext {
        let user = create_user(
            conn,
            &NewUser {
                username: username.into(),
                email: format!("{}@example.com", username),
                full_name: String::new(),
            },
        )
        .unwrap();
        add_member(conn, admin, user.id, role).unwrap();
        resolve_context(conn, admin.company_id, user.id).unwrap()
    }
}
