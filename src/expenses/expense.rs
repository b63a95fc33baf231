// 🧾 Expenses - draft → pending → approved → paid (or rejected)
//
// Approval posts Dr "<Category> Expense" / Cr <payment account> for the full
// amount including tax. Marking paid only re-describes that entry.

use super::category::get_category;
use super::vendor::get_vendor;
use super::{ExpensePaymentMethod, ExpenseStatus};
use crate::db::{atomically, record_event, Filter, Page, PageRequest};
use crate::error::{LedgerError, Result};
use crate::ledger::{self, AccountCategory, JournalEntry, Posting};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const GENERAL_EXPENSE_ACCOUNT: &str = "General Expenses";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: i64,
    pub company_id: i64,
    pub user_id: i64,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub vendor_id: Option<i64>,
    pub vendor_name: Option<String>,
    pub description: String,
    pub amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub expense_date: NaiveDate,
    pub payment_method: ExpensePaymentMethod,
    pub reference_number: String,
    pub status: ExpenseStatus,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub is_billable: bool,
    pub notes: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn ledger_account_name(&self) -> String {
        match &self.category_name {
            Some(name) => format!("{} Expense", name),
            None => GENERAL_EXPENSE_ACCOUNT.to_string(),
        }
    }

    fn journal_description(&self, paid: bool) -> String {
        if paid {
            format!("Expense: {} (Paid)", self.description)
        } else {
            format!("Expense: {}", self.description)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExpense {
    pub category_id: Option<i64>,
    pub vendor_id: Option<i64>,
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub tax_amount: Decimal,
    /// Defaults to today.
    pub expense_date: Option<NaiveDate>,
    pub payment_method: ExpensePaymentMethod,
    #[serde(default)]
    pub reference_number: String,
    #[serde(default)]
    pub is_billable: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub location: String,
    /// Submit for approval straight away (pending) instead of saving a draft.
    #[serde(default)]
    pub submit: bool,
}

impl NewExpense {
    fn validate(&self, conn: &Connection, company_id: i64) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(LedgerError::validation("expense description is required"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::validation("expense amount must be positive"));
        }
        if self.tax_amount < Decimal::ZERO {
            return Err(LedgerError::validation("tax amount cannot be negative"));
        }
        money::ensure_amount("expense amount", self.amount)?;
        money::ensure_amount("tax amount", self.tax_amount)?;
        if let Some(category_id) = self.category_id {
            get_category(conn, company_id, category_id)?;
        }
        if let Some(vendor_id) = self.vendor_id {
            get_vendor(conn, company_id, vendor_id)?;
        }
        Ok(())
    }

    fn total_amount(&self) -> Decimal {
        money::round_money(self.amount + self.tax_amount)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseFilter {
    pub status: Option<ExpenseStatus>,
    pub category_id: Option<i64>,
    pub vendor_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
}

const EXPENSE_SELECT: &str = "SELECT e.id, e.company_id, e.user_id, e.category_id, c.name AS category_name,
            e.vendor_id, v.name AS vendor_name, e.description, e.amount, e.tax_amount, e.total_amount,
            e.expense_date, e.payment_method, e.reference_number, e.status, e.approved_by,
            e.approved_at, e.is_billable, e.notes, e.location, e.created_at, e.updated_at
     FROM expenses e
     LEFT JOIN expense_categories c ON c.id = e.category_id
     LEFT JOIN vendors v ON v.id = e.vendor_id";

fn row_to_expense(row: &Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        user_id: row.get("user_id")?,
        category_id: row.get("category_id")?,
        category_name: row.get("category_name")?,
        vendor_id: row.get("vendor_id")?,
        vendor_name: row.get("vendor_name")?,
        description: row.get("description")?,
        amount: money::get(row, "amount")?,
        tax_amount: money::get(row, "tax_amount")?,
        total_amount: money::get(row, "total_amount")?,
        expense_date: row.get("expense_date")?,
        payment_method: row.get("payment_method")?,
        reference_number: row.get("reference_number")?,
        status: row.get("status")?,
        approved_by: row.get("approved_by")?,
        approved_at: row.get("approved_at")?,
        is_billable: row.get("is_billable")?,
        notes: row.get("notes")?,
        location: row.get("location")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

// ============================================================================
// LEDGER
// ============================================================================

/// Post (or re-describe) the journal entry behind a posted expense.
fn post_expense(conn: &Connection, ctx: &TenantContext, expense: &Expense) -> Result<JournalEntry> {
    let paid = expense.status == ExpenseStatus::Paid;

    if let Some(existing) = ledger::find_entry_for_reference(conn, ctx.company_id, "expense", expense.id)? {
        if paid && !existing.description.contains("(Paid)") {
            ledger::redescribe_entry(conn, ctx.company_id, existing.id, &expense.journal_description(true))?;
            return ledger::get_entry(conn, ctx.company_id, existing.id);
        }
        return Ok(existing);
    }

    let expense_account = expense.ledger_account_name();
    ledger::post_simple(
        conn,
        ctx,
        &Posting {
            reference_type: "expense",
            reference_id: expense.id,
            date: expense.expense_date,
            description: expense.journal_description(paid),
            debit_account: (expense_account.as_str(), AccountCategory::Expense),
            credit_account: expense.payment_method.ledger_account(),
            amount: expense.total_amount,
        },
    )
}

// ============================================================================
// OPERATIONS
// ============================================================================

pub fn create_expense(conn: &Connection, ctx: &TenantContext, new: &NewExpense, today: NaiveDate) -> Result<Expense> {
    new.validate(conn, ctx.company_id)?;
    let status = if new.submit { ExpenseStatus::Pending } else { ExpenseStatus::Draft };
    let now = Utc::now();

    let id = atomically(conn, |conn| {
        conn.execute(
            "INSERT INTO expenses (company_id, user_id, category_id, vendor_id, description, amount,
                                   tax_amount, total_amount, expense_date, payment_method,
                                   reference_number, status, is_billable, notes, location,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)",
            params![
                ctx.company_id,
                ctx.user_id,
                new.category_id,
                new.vendor_id,
                new.description.trim(),
                money::to_sql(&new.amount),
                money::to_sql(&new.tax_amount),
                money::to_sql(&new.total_amount()),
                new.expense_date.unwrap_or(today),
                new.payment_method,
                new.reference_number,
                status,
                new.is_billable,
                new.notes,
                new.location,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "expense_created",
            "expense",
            id,
            serde_json::json!({ "status": status, "total_amount": new.total_amount() }),
        )?;
        Ok(id)
    })?;

    tracing::info!(company_id = ctx.company_id, expense_id = id, status = %status, "expense created");
    get_expense(conn, ctx.company_id, id)
}

pub fn get_expense(conn: &Connection, company_id: i64, expense_id: i64) -> Result<Expense> {
    conn.query_row(
        &format!("{} WHERE e.company_id = ?1 AND e.id = ?2", EXPENSE_SELECT),
        params![company_id, expense_id],
        row_to_expense,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("expense", expense_id))
}

fn require_owner_or_approver(ctx: &TenantContext, expense: &Expense, action: &str) -> Result<()> {
    if expense.user_id == ctx.user_id || ctx.can_approve() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!("{} is limited to the expense owner and approvers", action)))
    }
}

fn set_status(conn: &Connection, ctx: &TenantContext, expense: &Expense, status: ExpenseStatus, event: &str) -> Result<()> {
    conn.execute(
        "UPDATE expenses SET status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status, Utc::now(), expense.id],
    )?;
    record_event(
        conn,
        ctx.company_id,
        &ctx.actor(),
        event,
        "expense",
        expense.id,
        serde_json::json!({ "from": expense.status, "to": status }),
    )
}

/// Edit a draft, pending or rejected expense. A rejected expense goes back to
/// draft (or pending when `submit` is set).
pub fn update_expense(conn: &Connection, ctx: &TenantContext, expense_id: i64, update: &NewExpense) -> Result<Expense> {
    let expense = get_expense(conn, ctx.company_id, expense_id)?;
    require_owner_or_approver(ctx, &expense, "editing an expense")?;
    if !expense.status.is_editable() {
        return Err(LedgerError::transition("expense", expense.status, "edit"));
    }
    update.validate(conn, ctx.company_id)?;

    let status = match (expense.status, update.submit) {
        (_, true) => ExpenseStatus::Pending,
        (ExpenseStatus::Rejected, false) => ExpenseStatus::Draft,
        (current, false) => current,
    };

    atomically(conn, |conn| {
        conn.execute(
            "UPDATE expenses SET category_id = ?1, vendor_id = ?2, description = ?3, amount = ?4,
                                 tax_amount = ?5, total_amount = ?6, expense_date = ?7,
                                 payment_method = ?8, reference_number = ?9, is_billable = ?10,
                                 notes = ?11, location = ?12, status = ?13, updated_at = ?14
             WHERE id = ?15",
            params![
                update.category_id,
                update.vendor_id,
                update.description.trim(),
                money::to_sql(&update.amount),
                money::to_sql(&update.tax_amount),
                money::to_sql(&update.total_amount()),
                update.expense_date.unwrap_or(expense.expense_date),
                update.payment_method,
                update.reference_number,
                update.is_billable,
                update.notes,
                update.location,
                status,
                Utc::now(),
                expense.id,
            ],
        )?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "expense_updated",
            "expense",
            expense.id,
            serde_json::json!({ "status": status, "total_amount": update.total_amount() }),
        )
    })?;

    get_expense(conn, ctx.company_id, expense_id)
}

/// draft → pending
pub fn submit_expense(conn: &Connection, ctx: &TenantContext, expense_id: i64) -> Result<Expense> {
    let expense = get_expense(conn, ctx.company_id, expense_id)?;
    if expense.status != ExpenseStatus::Draft {
        return Err(LedgerError::transition("expense", expense.status, "submit"));
    }
    set_status(conn, ctx, &expense, ExpenseStatus::Pending, "expense_submitted")?;
    get_expense(conn, ctx.company_id, expense_id)
}

/// draft|pending → approved, posting the journal entry.
pub fn approve_expense(conn: &Connection, ctx: &TenantContext, expense_id: i64) -> Result<Expense> {
    ctx.require_approver("approving an expense")?;
    let expense = get_expense(conn, ctx.company_id, expense_id)?;
    if !matches!(expense.status, ExpenseStatus::Draft | ExpenseStatus::Pending) {
        return Err(LedgerError::transition("expense", expense.status, "approve"));
    }

    atomically(conn, |conn| {
        conn.execute(
            "UPDATE expenses SET approved_by = ?1, approved_at = ?2 WHERE id = ?3",
            params![ctx.user_id, Utc::now(), expense.id],
        )?;
        set_status(conn, ctx, &expense, ExpenseStatus::Approved, "expense_approved")?;
        let approved = get_expense(conn, ctx.company_id, expense.id)?;
        post_expense(conn, ctx, &approved)?;
        Ok(())
    })?;

    tracing::info!(company_id = ctx.company_id, expense_id, approver = ctx.user_id, "expense approved");
    get_expense(conn, ctx.company_id, expense_id)
}

/// draft|pending → rejected; the reason is appended to the notes.
pub fn reject_expense(conn: &Connection, ctx: &TenantContext, expense_id: i64, reason: &str) -> Result<Expense> {
    ctx.require_approver("rejecting an expense")?;
    let expense = get_expense(conn, ctx.company_id, expense_id)?;
    if !matches!(expense.status, ExpenseStatus::Draft | ExpenseStatus::Pending) {
        return Err(LedgerError::transition("expense", expense.status, "reject"));
    }

    let reason = reason.trim();
    let notes = match (expense.notes.is_empty(), reason.is_empty()) {
        (_, true) => expense.notes.clone(),
        (true, false) => format!("Rejection reason: {}", reason),
        (false, false) => format!("{}\n\nRejection reason: {}", expense.notes, reason),
    };

    atomically(conn, |conn| {
        conn.execute("UPDATE expenses SET notes = ?1 WHERE id = ?2", params![notes, expense.id])?;
        set_status(conn, ctx, &expense, ExpenseStatus::Rejected, "expense_rejected")
    })?;

    get_expense(conn, ctx.company_id, expense_id)
}

/// approved → paid
pub fn mark_expense_paid(conn: &Connection, ctx: &TenantContext, expense_id: i64) -> Result<Expense> {
    ctx.require_approver("paying an expense")?;
    let expense = get_expense(conn, ctx.company_id, expense_id)?;
    if expense.status != ExpenseStatus::Approved {
        return Err(LedgerError::transition("expense", expense.status, "mark paid"));
    }

    atomically(conn, |conn| {
        set_status(conn, ctx, &expense, ExpenseStatus::Paid, "expense_paid")?;
        let paid = get_expense(conn, ctx.company_id, expense.id)?;
        post_expense(conn, ctx, &paid)?;
        Ok(())
    })?;

    get_expense(conn, ctx.company_id, expense_id)
}

/// Posted (approved/paid) expenses may only be deleted by admins and
/// accountants; their journal entry goes with them.
pub fn delete_expense(conn: &Connection, ctx: &TenantContext, expense_id: i64) -> Result<()> {
    let expense = get_expense(conn, ctx.company_id, expense_id)?;
    require_owner_or_approver(ctx, &expense, "deleting an expense")?;
    if expense.status.is_posted() {
        ctx.require_finance_role("deleting an approved or paid expense")?;
    }

    atomically(conn, |conn| {
        ledger::delete_entries_for_reference(conn, ctx, "expense", expense.id)?;
        conn.execute("DELETE FROM expenses WHERE id = ?1", params![expense.id])?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "expense_deleted",
            "expense",
            expense.id,
            serde_json::json!({ "status": expense.status, "total_amount": expense.total_amount }),
        )
    })?;

    tracing::info!(company_id = ctx.company_id, expense_id, "expense deleted");
    Ok(())
}

/// Copy an expense as a new draft dated today, owned by the caller.
pub fn duplicate_expense(conn: &Connection, ctx: &TenantContext, expense_id: i64, today: NaiveDate) -> Result<Expense> {
    let original = get_expense(conn, ctx.company_id, expense_id)?;
    create_expense(
        conn,
        ctx,
        &NewExpense {
            category_id: original.category_id,
            vendor_id: original.vendor_id,
            description: format!("{} (Copy)", original.description),
            amount: original.amount,
            tax_amount: original.tax_amount,
            expense_date: Some(today),
            payment_method: original.payment_method,
            reference_number: String::new(),
            is_billable: original.is_billable,
            notes: original.notes,
            location: original.location,
            submit: false,
        },
        today,
    )
}

/// Newest first.
pub fn list_expenses(conn: &Connection, company_id: i64, filter: &ExpenseFilter, page: PageRequest) -> Result<Page<Expense>> {
    let mut f = Filter::for_company("e.company_id", company_id);
    f.push_opt("e.status = ?", filter.status);
    f.push_opt("e.category_id = ?", filter.category_id);
    f.push_opt("e.vendor_id = ?", filter.vendor_id);
    f.push_opt("e.expense_date >= ?", filter.date_from);
    f.push_opt("e.expense_date <= ?", filter.date_to);
    f.push_search(&["e.description", "e.reference_number", "e.location", "v.name"], filter.search.as_deref());

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM expenses e LEFT JOIN vendors v ON v.id = e.vendor_id {}",
            f.where_sql()
        ),
        f.params(),
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(&format!(
        "{} {} ORDER BY e.expense_date DESC, e.id DESC {}",
        EXPENSE_SELECT,
        f.where_sql(),
        page.sql()
    ))?;
    let expenses = stmt
        .query_map(f.params(), row_to_expense)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Page::new(expenses, total, page))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::str::FromStr;

    pub fn receipt(description: &str, amount: &str, tax: &str, category_id: Option<i64>) -> NewExpense {
        NewExpense {
            category_id,
            vendor_id: None,
            description: description.into(),
            amount: Decimal::from_str(amount).unwrap(),
            tax_amount: Decimal::from_str(tax).unwrap(),
            expense_date: NaiveDate::from_ymd_opt(2025, 4, 2),
            payment_method: ExpensePaymentMethod::CreditCard,
            reference_number: String::new(),
            is_billable: false,
            notes: String::new(),
            location: String::new(),
            submit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::receipt;
    use super::*;
    use crate::db::open_in_memory;
    use crate::expenses::category::{create_category, sample_category};
    use crate::ledger::{entry_lines, find_entry_for_reference, trial_balance};
    use crate::tenancy::fixtures::{admin_context, member_context};
    use crate::tenancy::Role;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 10).unwrap()
    }

    #[test]
    fn test_total_includes_tax() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);

        let expense = create_expense(&conn, &ctx, &receipt("Taxi", "40.00", "6.00", None), today()).unwrap();
        assert_eq!(expense.total_amount, dec("46.00"));
        assert_eq!(expense.status, ExpenseStatus::Draft);
        assert_eq!(expense.ledger_account_name(), GENERAL_EXPENSE_ACCOUNT);

        let mut bad = receipt("Taxi", "0", "0", None);
        assert!(matches!(create_expense(&conn, &ctx, &bad, today()), Err(LedgerError::Validation(_))));
        bad.amount = dec("10");
        bad.category_id = Some(404);
        assert!(matches!(create_expense(&conn, &ctx, &bad, today()), Err(LedgerError::NotFound(_))));

        let huge = receipt("Yacht", "79228162514264337593543950335", "79228162514264337593543950335", None);
        assert!(matches!(create_expense(&conn, &ctx, &huge, today()), Err(LedgerError::Validation(_))));
        let huge_tax = receipt("Yacht", "10.00", "79228162514264337593543950335", None);
        assert!(matches!(create_expense(&conn, &ctx, &huge_tax, today()), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_approval_posts_journal_entry() {
        let conn = open_in_memory().unwrap();
        let admin = admin_context(&conn);
        let staff = member_context(&conn, &admin, "staff", Role::Employee);
        let travel = create_category(&conn, &admin, &sample_category("Travel")).unwrap();

        let mut new = receipt("Flight to Kumasi", "100.00", "15.00", Some(travel.id));
        new.submit = true;
        let expense = create_expense(&conn, &staff, &new, today()).unwrap();
        assert_eq!(expense.status, ExpenseStatus::Pending);

        assert!(matches!(approve_expense(&conn, &staff, expense.id), Err(LedgerError::Forbidden(_))));

        let approved = approve_expense(&conn, &admin, expense.id).unwrap();
        assert_eq!(approved.status, ExpenseStatus::Approved);
        assert_eq!(approved.approved_by, Some(admin.user_id));

        let entry = find_entry_for_reference(&conn, admin.company_id, "expense", expense.id).unwrap().unwrap();
        assert_eq!(entry.description, "Expense: Flight to Kumasi");
        let lines = entry_lines(&conn, admin.company_id, entry.id).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.account_name == "Travel Expense" && l.debit == dec("115.00")));
        assert!(lines.iter().any(|l| l.account_name == "Credit Card" && l.credit == dec("115.00")));

        let paid = mark_expense_paid(&conn, &admin, expense.id).unwrap();
        assert_eq!(paid.status, ExpenseStatus::Paid);
        let entry = find_entry_for_reference(&conn, admin.company_id, "expense", expense.id).unwrap().unwrap();
        assert_eq!(entry.description, "Expense: Flight to Kumasi (Paid)");
        assert!(trial_balance(&conn, admin.company_id, None).unwrap().is_balanced());

        println!("✅ Expense approval posting test passed");
    }

    #[test]
    fn test_reject_then_edit_returns_to_draft() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let expense = create_expense(&conn, &ctx, &receipt("Lunch", "25.00", "0", None), today()).unwrap();
        submit_expense(&conn, &ctx, expense.id).unwrap();

        let rejected = reject_expense(&conn, &ctx, expense.id, "missing receipt").unwrap();
        assert_eq!(rejected.status, ExpenseStatus::Rejected);
        assert_eq!(rejected.notes, "Rejection reason: missing receipt");
        assert!(mark_expense_paid(&conn, &ctx, expense.id).is_err());

        let edited = update_expense(&conn, &ctx, expense.id, &receipt("Team lunch", "30.00", "0", None)).unwrap();
        assert_eq!(edited.status, ExpenseStatus::Draft);
        assert_eq!(edited.total_amount, dec("30.00"));

        approve_expense(&conn, &ctx, expense.id).unwrap();
        assert!(matches!(
            update_expense(&conn, &ctx, expense.id, &receipt("Late edit", "1", "0", None)),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_delete_posted_expense_requires_finance_role() {
        let conn = open_in_memory().unwrap();
        let admin = admin_context(&conn);
        let manager = member_context(&conn, &admin, "manager", Role::Manager);

        let expense = create_expense(&conn, &manager, &receipt("Printer ink", "60.00", "0", None), today()).unwrap();
        approve_expense(&conn, &manager, expense.id).unwrap();

        assert!(matches!(delete_expense(&conn, &manager, expense.id), Err(LedgerError::Forbidden(_))));
        delete_expense(&conn, &admin, expense.id).unwrap();
        assert!(find_entry_for_reference(&conn, admin.company_id, "expense", expense.id).unwrap().is_none());

        let other = member_context(&conn, &admin, "other", Role::Employee);
        let draft = create_expense(&conn, &manager, &receipt("Paper", "5.00", "0", None), today()).unwrap();
        assert!(matches!(delete_expense(&conn, &other, draft.id), Err(LedgerError::Forbidden(_))));
        delete_expense(&conn, &manager, draft.id).unwrap();
    }

    #[test]
    fn test_duplicate_and_list_filters() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let travel = create_category(&conn, &ctx, &sample_category("Travel")).unwrap();

        let original = create_expense(&conn, &ctx, &receipt("Hotel", "200.00", "0", Some(travel.id)), today()).unwrap();
        approve_expense(&conn, &ctx, original.id).unwrap();
        let copy = duplicate_expense(&conn, &ctx, original.id, today()).unwrap();
        assert_eq!(copy.status, ExpenseStatus::Draft);
        assert_eq!(copy.expense_date, today());
        assert_eq!(copy.description, "Hotel (Copy)");
        create_expense(&conn, &ctx, &receipt("Stationery", "12.00", "0", None), today()).unwrap();

        let in_travel = list_expenses(
            &conn,
            ctx.company_id,
            &ExpenseFilter { category_id: Some(travel.id), ..Default::default() },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(in_travel.total, 2);
        assert_eq!(in_travel.items[0].id, copy.id);

        let drafts = list_expenses(
            &conn,
            ctx.company_id,
            &ExpenseFilter { status: Some(ExpenseStatus::Draft), search: Some("station".into()), ..Default::default() },
            PageRequest::default(),
        )
        .unwrap();
        assert_eq!(drafts.total, 1);
    }
}
