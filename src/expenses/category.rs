// 🏷️ Expense categories - one ledger expense account per category

use crate::db::{conflict_on_duplicate, record_event};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_COLOR: &str = "#6c757d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseCategory {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub description: String,
    pub color: String,
    pub is_tax_deductible: bool,
    pub budget_limit: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ExpenseCategory {
    /// Name of the expense account approved expenses in this category post to.
    pub fn ledger_account_name(&self) -> String {
        format!("{} Expense", self.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExpenseCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub color: Option<String>,
    #[serde(default = "default_true")]
    pub is_tax_deductible: bool,
    pub budget_limit: Option<Decimal>,
}

fn default_true() -> bool {
    true
}

const CATEGORY_COLUMNS: &str =
    "id, company_id, name, description, color, is_tax_deductible, budget_limit, is_active, created_at";

fn row_to_category(row: &Row<'_>) -> rusqlite::Result<ExpenseCategory> {
    Ok(ExpenseCategory {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        color: row.get("color")?,
        is_tax_deductible: row.get("is_tax_deductible")?,
        budget_limit: money::get_opt(row, "budget_limit")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_category(conn: &Connection, ctx: &TenantContext, new: &NewExpenseCategory) -> Result<ExpenseCategory> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(LedgerError::validation("category name is required"));
    }
    if new.budget_limit.map_or(false, |limit| limit < Decimal::ZERO) {
        return Err(LedgerError::validation("budget limit cannot be negative"));
    }
    if let Some(limit) = new.budget_limit {
        money::ensure_amount("budget limit", limit)?;
    }

    conn.execute(
        "INSERT INTO expense_categories (company_id, name, description, color, is_tax_deductible,
                                         budget_limit, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
        params![
            ctx.company_id,
            name,
            new.description,
            new.color.as_deref().unwrap_or(DEFAULT_COLOR),
            new.is_tax_deductible,
            money::opt_to_sql(&new.budget_limit),
            Utc::now(),
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("category '{}' already exists", name)))?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "expense_category_created", "expense_category", id, serde_json::json!({ "name": name }))?;
    get_category(conn, ctx.company_id, id)
}

pub fn get_category(conn: &Connection, company_id: i64, category_id: i64) -> Result<ExpenseCategory> {
    conn.query_row(
        &format!("SELECT {} FROM expense_categories WHERE company_id = ?1 AND id = ?2", CATEGORY_COLUMNS),
        params![company_id, category_id],
        row_to_category,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("expense category", category_id))
}

pub fn list_categories(conn: &Connection, company_id: i64) -> Result<Vec<ExpenseCategory>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM expense_categories WHERE company_id = ?1 AND is_active = 1 ORDER BY name",
        CATEGORY_COLUMNS
    ))?;
    let categories = stmt
        .query_map(params![company_id], row_to_category)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(categories)
}

#[cfg(test)]
pub(crate) fn sample_category(name: &str) -> NewExpenseCategory {
    NewExpenseCategory {
        name: name.to_string(),
        description: String::new(),
        color: None,
        is_tax_deductible: true,
        budget_limit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::tenancy::fixtures::admin_context;

    #[test]
    fn test_category_names_unique_per_company() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);

        let travel = create_category(&conn, &ctx, &sample_category("Travel")).unwrap();
        assert_eq!(travel.color, DEFAULT_COLOR);
        assert_eq!(travel.ledger_account_name(), "Travel Expense");

        assert!(matches!(create_category(&conn, &ctx, &sample_category("Travel")), Err(LedgerError::Conflict(_))));
        create_category(&conn, &ctx, &sample_category("Meals")).unwrap();

        let names: Vec<String> = list_categories(&conn, ctx.company_id).unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Meals", "Travel"]);

        println!("✅ Expense category test passed");
    }
}
