// 🏦 Bank accounts, statements and statement lines
//
// Statement lines are imported from CSV. Each row is fingerprinted with
// SHA-256 (statement, line, date, amount, description, reference) so that
// importing the same file twice inserts nothing the second time.

use super::{BankAccountType, MatchStatus, StatementStatus, TransactionType};
use crate::db::{atomically, conflict_on_duplicate, record_event, Filter};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;

// ============================================================================
// BANK ACCOUNTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub account_number: String,
    pub account_type: BankAccountType,
    pub bank_name: String,
    pub routing_number: String,
    pub opening_balance: Decimal,
    pub current_balance: Decimal,
    pub last_reconciled_date: Option<NaiveDate>,
    pub last_reconciled_balance: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl BankAccount {
    /// `************1234`; numbers of four digits or fewer are shown as is.
    pub fn masked_account_number(&self) -> String {
        mask_account_number(&self.account_number)
    }
}

pub fn mask_account_number(number: &str) -> String {
    let len = number.chars().count();
    if len <= 4 {
        return number.to_string();
    }
    let tail: String = number.chars().skip(len - 4).collect();
    format!("{}{}", "*".repeat(len - 4), tail)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBankAccount {
    pub name: String,
    pub account_number: String,
    pub account_type: BankAccountType,
    pub bank_name: String,
    #[serde(default)]
    pub routing_number: String,
    #[serde(default)]
    pub opening_balance: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BankAccountUpdate {
    pub name: Option<String>,
    pub bank_name: Option<String>,
    pub routing_number: Option<String>,
    pub current_balance: Option<Decimal>,
    pub is_active: Option<bool>,
}

const ACCOUNT_COLUMNS: &str = "id, company_id, name, account_number, account_type, bank_name, routing_number,
     opening_balance, current_balance, last_reconciled_date, last_reconciled_balance, is_active, created_at";

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<BankAccount> {
    Ok(BankAccount {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        account_number: row.get("account_number")?,
        account_type: row.get("account_type")?,
        bank_name: row.get("bank_name")?,
        routing_number: row.get("routing_number")?,
        opening_balance: money::get(row, "opening_balance")?,
        current_balance: money::get(row, "current_balance")?,
        last_reconciled_date: row.get("last_reconciled_date")?,
        last_reconciled_balance: money::get(row, "last_reconciled_balance")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

/// The current balance starts at the opening balance.
pub fn create_bank_account(conn: &Connection, ctx: &TenantContext, new: &NewBankAccount) -> Result<BankAccount> {
    ctx.require_finance_role("adding a bank account")?;
    if new.name.trim().is_empty() || new.bank_name.trim().is_empty() {
        return Err(LedgerError::validation("account name and bank name are required"));
    }
    let number = new.account_number.trim();
    if number.is_empty() {
        return Err(LedgerError::validation("account number is required"));
    }
    money::ensure_amount("opening balance", new.opening_balance)?;

    conn.execute(
        "INSERT INTO bank_accounts (company_id, name, account_number, account_type, bank_name, routing_number,
                                    opening_balance, current_balance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
        params![
            ctx.company_id,
            new.name.trim(),
            number,
            new.account_type,
            new.bank_name.trim(),
            new.routing_number.trim(),
            money::to_sql(&new.opening_balance),
            Utc::now(),
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("bank account {} already exists", mask_account_number(number))))?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "bank_account_created", "bank_account", id, serde_json::json!({
        "name": new.name.trim(),
        "account_number": mask_account_number(number),
    }))?;
    tracing::info!(company_id = ctx.company_id, bank_account_id = id, "bank account created");
    get_bank_account(conn, ctx.company_id, id)
}

pub fn get_bank_account(conn: &Connection, company_id: i64, account_id: i64) -> Result<BankAccount> {
    conn.query_row(
        &format!("SELECT {} FROM bank_accounts WHERE company_id = ?1 AND id = ?2", ACCOUNT_COLUMNS),
        params![company_id, account_id],
        row_to_account,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("bank account", account_id))
}

pub fn list_bank_accounts(conn: &Connection, company_id: i64, active_only: bool) -> Result<Vec<BankAccount>> {
    let mut f = Filter::for_company("company_id", company_id);
    if active_only {
        f.push("is_active = ?", true);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM bank_accounts {} ORDER BY name, id",
        ACCOUNT_COLUMNS,
        f.where_sql()
    ))?;
    let accounts = stmt
        .query_map(f.params(), row_to_account)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(accounts)
}

pub fn update_bank_account(
    conn: &Connection,
    ctx: &TenantContext,
    account_id: i64,
    update: &BankAccountUpdate,
) -> Result<BankAccount> {
    ctx.require_finance_role("editing a bank account")?;
    let current = get_bank_account(conn, ctx.company_id, account_id)?;
    if matches!(&update.name, Some(n) if n.trim().is_empty()) {
        return Err(LedgerError::validation("account name cannot be blank"));
    }
    if let Some(balance) = update.current_balance {
        money::ensure_amount("current balance", balance)?;
    }

    conn.execute(
        "UPDATE bank_accounts SET name = ?1, bank_name = ?2, routing_number = ?3, current_balance = ?4, is_active = ?5
         WHERE company_id = ?6 AND id = ?7",
        params![
            update.name.as_deref().map(str::trim).unwrap_or(&current.name),
            update.bank_name.as_deref().map(str::trim).unwrap_or(&current.bank_name),
            update.routing_number.as_deref().unwrap_or(&current.routing_number),
            money::to_sql(&update.current_balance.unwrap_or(current.current_balance)),
            update.is_active.unwrap_or(current.is_active),
            ctx.company_id,
            account_id,
        ],
    )?;

    record_event(conn, ctx.company_id, &ctx.actor(), "bank_account_updated", "bank_account", account_id, serde_json::json!({
        "current_balance": update.current_balance,
        "is_active": update.is_active,
    }))?;
    get_bank_account(conn, ctx.company_id, account_id)
}

// ============================================================================
// STATEMENTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStatement {
    pub id: i64,
    pub company_id: i64,
    pub bank_account_id: i64,
    pub statement_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub beginning_balance: Decimal,
    pub ending_balance: Decimal,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub total_fees: Decimal,
    pub status: StatementStatus,
    pub transaction_count: i64,
    pub unreconciled_count: i64,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBankStatement {
    pub statement_date: NaiveDate,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub beginning_balance: Decimal,
    pub ending_balance: Decimal,
}

const STATEMENT_SELECT: &str = "SELECT s.id, s.company_id, s.bank_account_id, s.statement_date, s.period_start,
            s.period_end, s.beginning_balance, s.ending_balance, s.total_deposits, s.total_withdrawals,
            s.total_fees, s.status, s.imported_at,
            (SELECT COUNT(*) FROM bank_transactions t WHERE t.statement_id = s.id) AS transaction_count,
            (SELECT COUNT(*) FROM bank_transactions t
              WHERE t.statement_id = s.id AND t.reconciliation_status = 'unreconciled') AS unreconciled_count
     FROM bank_statements s";

fn row_to_statement(row: &Row<'_>) -> rusqlite::Result<BankStatement> {
    Ok(BankStatement {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        bank_account_id: row.get("bank_account_id")?,
        statement_date: row.get("statement_date")?,
        period_start: row.get("period_start")?,
        period_end: row.get("period_end")?,
        beginning_balance: money::get(row, "beginning_balance")?,
        ending_balance: money::get(row, "ending_balance")?,
        total_deposits: money::get(row, "total_deposits")?,
        total_withdrawals: money::get(row, "total_withdrawals")?,
        total_fees: money::get(row, "total_fees")?,
        status: row.get("status")?,
        transaction_count: row.get("transaction_count")?,
        unreconciled_count: row.get("unreconciled_count")?,
        imported_at: row.get("imported_at")?,
    })
}

pub fn create_statement(
    conn: &Connection,
    ctx: &TenantContext,
    bank_account_id: i64,
    new: &NewBankStatement,
) -> Result<BankStatement> {
    ctx.require_finance_role("adding a bank statement")?;
    get_bank_account(conn, ctx.company_id, bank_account_id)?;
    if new.period_start > new.period_end {
        return Err(LedgerError::validation("statement period start must not be after its end"));
    }
    money::ensure_amount("beginning balance", new.beginning_balance)?;
    money::ensure_amount("ending balance", new.ending_balance)?;

    conn.execute(
        "INSERT INTO bank_statements (company_id, bank_account_id, statement_date, period_start, period_end,
                                      beginning_balance, ending_balance, status, imported_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            ctx.company_id,
            bank_account_id,
            new.statement_date,
            new.period_start,
            new.period_end,
            money::to_sql(&new.beginning_balance),
            money::to_sql(&new.ending_balance),
            StatementStatus::Imported,
            Utc::now(),
        ],
    )
    .map_err(|e| conflict_on_duplicate(e, format!("a statement dated {} already exists for this account", new.statement_date)))?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "bank_statement_created", "bank_statement", id, serde_json::json!({
        "bank_account_id": bank_account_id,
        "statement_date": new.statement_date,
    }))?;
    get_statement(conn, ctx.company_id, id)
}

pub fn get_statement(conn: &Connection, company_id: i64, statement_id: i64) -> Result<BankStatement> {
    conn.query_row(
        &format!("{} WHERE s.company_id = ?1 AND s.id = ?2", STATEMENT_SELECT),
        params![company_id, statement_id],
        row_to_statement,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("bank statement", statement_id))
}

/// Newest statement first, optionally for one account.
pub fn list_statements(conn: &Connection, company_id: i64, bank_account_id: Option<i64>) -> Result<Vec<BankStatement>> {
    let mut f = Filter::for_company("s.company_id", company_id);
    f.push_opt("s.bank_account_id = ?", bank_account_id);
    let mut stmt = conn.prepare(&format!(
        "{} {} ORDER BY s.statement_date DESC, s.id DESC",
        STATEMENT_SELECT,
        f.where_sql()
    ))?;
    let statements = stmt
        .query_map(f.params(), row_to_statement)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(statements)
}

pub(crate) fn set_statement_status(conn: &Connection, company_id: i64, statement_id: i64, status: StatementStatus) -> Result<()> {
    conn.execute(
        "UPDATE bank_statements SET status = ?1 WHERE company_id = ?2 AND id = ?3",
        params![status, company_id, statement_id],
    )?;
    Ok(())
}

/// Deposits are the positive lines, withdrawals the negative non-fee lines and
/// fees the fee lines, all as positive totals.
pub fn recompute_statement_totals(conn: &Connection, company_id: i64, statement_id: i64) -> Result<BankStatement> {
    let lines = list_transactions(conn, company_id, statement_id, None)?;

    let mut deposits = Decimal::ZERO;
    let mut withdrawals = Decimal::ZERO;
    let mut fees = Decimal::ZERO;
    for line in &lines {
        if line.transaction_type == TransactionType::Fee {
            fees += line.amount.abs();
        } else if line.amount > Decimal::ZERO {
            deposits += line.amount;
        } else {
            withdrawals += line.amount.abs();
        }
    }

    conn.execute(
        "UPDATE bank_statements SET total_deposits = ?1, total_withdrawals = ?2, total_fees = ?3
         WHERE company_id = ?4 AND id = ?5",
        params![
            money::to_sql(&deposits),
            money::to_sql(&withdrawals),
            money::to_sql(&fees),
            company_id,
            statement_id,
        ],
    )?;
    get_statement(conn, company_id, statement_id)
}

// ============================================================================
// STATEMENT LINES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: i64,
    pub company_id: i64,
    pub statement_id: i64,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub transaction_type: TransactionType,
    /// Signed: money leaving the account is negative.
    pub amount: Decimal,
    pub running_balance: Option<Decimal>,
    pub check_number: String,
    pub reference_number: String,
    pub reconciliation_status: MatchStatus,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub reconciled_by: Option<i64>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl BankTransaction {
    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn is_credit(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBankTransaction {
    pub transaction_date: NaiveDate,
    pub description: String,
    #[serde(default = "default_transaction_type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub running_balance: Option<Decimal>,
    #[serde(default)]
    pub check_number: String,
    #[serde(default)]
    pub reference_number: String,
    #[serde(default)]
    pub notes: String,
}

fn default_transaction_type() -> TransactionType {
    TransactionType::Other
}

impl NewBankTransaction {
    fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(LedgerError::validation("transaction description is required"));
        }
        money::ensure_amount("transaction amount", self.amount)?;
        if let Some(balance) = self.running_balance {
            money::ensure_amount("running balance", balance)?;
        }
        Ok(())
    }
}

/// Lines can only be added while the statement is still being worked on.
fn ensure_accepts_lines(statement: &BankStatement) -> Result<()> {
    match statement.status {
        StatementStatus::Imported | StatementStatus::Processing => Ok(()),
        other => Err(LedgerError::transition("statement", other, "add lines to")),
    }
}

const TRANSACTION_COLUMNS: &str = "id, company_id, statement_id, transaction_date, description, transaction_type,
     amount, running_balance, check_number, reference_number, reconciliation_status, reconciled_at,
     reconciled_by, notes, created_at";

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<BankTransaction> {
    Ok(BankTransaction {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        statement_id: row.get("statement_id")?,
        transaction_date: row.get("transaction_date")?,
        description: row.get("description")?,
        transaction_type: row.get("transaction_type")?,
        amount: money::get(row, "amount")?,
        running_balance: money::get_opt(row, "running_balance")?,
        check_number: row.get("check_number")?,
        reference_number: row.get("reference_number")?,
        reconciliation_status: row.get("reconciliation_status")?,
        reconciled_at: row.get("reconciled_at")?,
        reconciled_by: row.get("reconciled_by")?,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
    })
}

/// Insert one line; `import_hash` lines that already exist are ignored and
/// `None` is returned.
fn insert_transaction(
    conn: &Connection,
    company_id: i64,
    statement_id: i64,
    new: &NewBankTransaction,
    import_hash: Option<&str>,
) -> Result<Option<i64>> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO bank_transactions (company_id, statement_id, transaction_date, description,
                                                  transaction_type, amount, running_balance, check_number,
                                                  reference_number, reconciliation_status, notes, import_hash,
                                                  created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            company_id,
            statement_id,
            new.transaction_date,
            new.description.trim(),
            new.transaction_type,
            money::to_sql(&new.amount),
            money::opt_to_sql(&new.running_balance),
            new.check_number.trim(),
            new.reference_number.trim(),
            MatchStatus::Unreconciled,
            new.notes,
            import_hash,
            Utc::now(),
        ],
    )?;
    Ok((inserted == 1).then(|| conn.last_insert_rowid()))
}

/// Add a line by hand and refresh the statement totals.
pub fn add_transaction(
    conn: &Connection,
    ctx: &TenantContext,
    statement_id: i64,
    new: &NewBankTransaction,
) -> Result<BankTransaction> {
    ctx.require_finance_role("adding a statement line")?;
    new.validate()?;

    let id = atomically(conn, |conn| {
        ensure_accepts_lines(&get_statement(conn, ctx.company_id, statement_id)?)?;
        let id = insert_transaction(conn, ctx.company_id, statement_id, new, None)?
            .ok_or_else(|| LedgerError::Internal("statement line was not inserted".into()))?;
        recompute_statement_totals(conn, ctx.company_id, statement_id)?;
        record_event(conn, ctx.company_id, &ctx.actor(), "bank_transaction_added", "bank_transaction", id, serde_json::json!({
            "statement_id": statement_id,
            "amount": new.amount,
        }))?;
        Ok(id)
    })?;

    get_transaction(conn, ctx.company_id, id)
}

pub fn get_transaction(conn: &Connection, company_id: i64, transaction_id: i64) -> Result<BankTransaction> {
    conn.query_row(
        &format!("SELECT {} FROM bank_transactions WHERE company_id = ?1 AND id = ?2", TRANSACTION_COLUMNS),
        params![company_id, transaction_id],
        row_to_transaction,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("bank transaction", transaction_id))
}

/// Lines of one statement in date order.
pub fn list_transactions(
    conn: &Connection,
    company_id: i64,
    statement_id: i64,
    status: Option<MatchStatus>,
) -> Result<Vec<BankTransaction>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push("statement_id = ?", statement_id);
    f.push_opt("reconciliation_status = ?", status);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM bank_transactions {} ORDER BY transaction_date, id",
        TRANSACTION_COLUMNS,
        f.where_sql()
    ))?;
    let lines = stmt
        .query_map(f.params(), row_to_transaction)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(lines)
}

/// Unreconciled lines across every statement of the company.
pub fn unreconciled_count(conn: &Connection, company_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM bank_transactions WHERE company_id = ?1 AND reconciliation_status = ?2",
        params![company_id, MatchStatus::Unreconciled],
        |row| row.get(0),
    )?)
}

// ============================================================================
// CSV IMPORT
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ImportError {
    /// 1-based file line, counting the header.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub statement_id: i64,
    pub rows_read: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: Vec<ImportError>,
}

impl ImportSummary {
    pub fn summary(&self) -> String {
        format!(
            "Statement {}: {} rows read, {} imported, {} already present, {} rejected",
            self.statement_id,
            self.rows_read,
            self.inserted,
            self.duplicates,
            self.errors.len()
        )
    }
}

/// Fingerprint used to make re-imports idempotent.
pub fn import_hash(
    statement_id: i64,
    line: usize,
    date: NaiveDate,
    amount: Decimal,
    description: &str,
    reference: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}|{}|{}|{}",
        statement_id,
        line,
        date,
        amount.normalize(),
        description.trim(),
        reference.trim()
    ));
    format!("{:x}", hasher.finalize())
}

struct ColumnMap {
    date: usize,
    description: usize,
    amount: usize,
    kind: Option<usize>,
    check_number: Option<usize>,
    reference: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name));
        let required = |name: &str| {
            find(name).ok_or_else(|| LedgerError::validation(format!("CSV is missing the '{}' column", name)))
        };
        Ok(ColumnMap {
            date: required("date")?,
            description: required("description")?,
            amount: required("amount")?,
            kind: find("type"),
            check_number: find("check_number"),
            reference: find("reference"),
        })
    }

    fn parse(&self, record: &csv::StringRecord) -> Result<NewBankTransaction> {
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();
        let optional = |idx: Option<usize>| idx.map(field).unwrap_or("");

        let raw_date = field(self.date);
        let transaction_date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
            .map_err(|_| LedgerError::validation(format!("invalid date '{}' (expected YYYY-MM-DD)", raw_date)))?;
        let description = field(self.description);
        if description.is_empty() {
            return Err(LedgerError::validation("description is empty"));
        }
        let amount = money::ensure_amount("amount", money::parse_amount(field(self.amount))?)?;
        let transaction_type = match optional(self.kind) {
            "" => TransactionType::Other,
            kind => kind.to_lowercase().parse()?,
        };

        Ok(NewBankTransaction {
            transaction_date,
            description: description.to_string(),
            transaction_type,
            amount,
            running_balance: None,
            check_number: optional(self.check_number).to_string(),
            reference_number: optional(self.reference).to_string(),
            notes: String::new(),
        })
    }
}

/// Import statement lines from CSV.
///
/// Headers: `date` (YYYY-MM-DD), `description`, `amount`, and optionally
/// `type`, `check_number`, `reference`. Bad rows are reported and skipped;
/// statement totals are recomputed afterwards.
pub fn import_statement_csv<R: Read>(
    conn: &Connection,
    ctx: &TenantContext,
    statement_id: i64,
    reader: R,
) -> Result<ImportSummary> {
    ctx.require_finance_role("importing a bank statement")?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let columns = ColumnMap::from_headers(csv_reader.headers()?)?;

    let mut summary = ImportSummary {
        statement_id,
        rows_read: 0,
        inserted: 0,
        duplicates: 0,
        errors: Vec::new(),
    };

    atomically(conn, |conn| {
        ensure_accepts_lines(&get_statement(conn, ctx.company_id, statement_id)?)?;
        for (index, result) in csv_reader.records().enumerate() {
            // +2: 1-indexed plus the header row
            let line = index + 2;
            summary.rows_read += 1;

            let parsed = result.map_err(LedgerError::from).and_then(|record| columns.parse(&record));
            let new = match parsed {
                Ok(new) => new,
                Err(err) => {
                    tracing::warn!(statement_id, line, error = %err, "skipping statement row");
                    summary.errors.push(ImportError { line, message: err.to_string() });
                    continue;
                }
            };

            let hash = import_hash(
                statement_id,
                line,
                new.transaction_date,
                new.amount,
                &new.description,
                &new.reference_number,
            );
            match insert_transaction(conn, ctx.company_id, statement_id, &new, Some(&hash))? {
                Some(_) => summary.inserted += 1,
                None => summary.duplicates += 1,
            }
        }

        recompute_statement_totals(conn, ctx.company_id, statement_id)?;
        record_event(conn, ctx.company_id, &ctx.actor(), "bank_statement_imported", "bank_statement", statement_id, serde_json::json!({
            "rows_read": summary.rows_read,
            "inserted": summary.inserted,
            "duplicates": summary.duplicates,
            "errors": summary.errors.len(),
        }))?;
        Ok(())
    })?;

    tracing::info!(
        company_id = ctx.company_id,
        statement_id,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        errors = summary.errors.len(),
        "statement imported"
    );
    Ok(summary)
}
