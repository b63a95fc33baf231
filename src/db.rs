// 🗄️ Database - SQLite + WAL, schema, audit trail, paging
//
// Every business table carries `company_id`; store functions always filter on
// it, so a row of another company is indistinguishable from a missing row.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, ToSql};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// TEXT ENUMS
// ============================================================================

/// Declare a status/choice enum stored as TEXT.
///
/// Generates `as_str`, `ALL`, `Display`, `FromStr` (unknown values are a
/// validation error), serde renames, and the rusqlite `ToSql`/`FromSql` pair.
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::LedgerError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::error::LedgerError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

pub(crate) use sql_enum;

// ============================================================================
// CONNECTION
// ============================================================================

/// Open (or create) the database file and bring the schema up to date.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    tracing::info!(path = %path.display(), "database opened");
    Ok(conn)
}

/// In-memory database with the full schema (tests and dry runs).
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute_batch(TENANCY_SCHEMA)?;
    conn.execute_batch(LEDGER_SCHEMA)?;
    conn.execute_batch(INVOICING_SCHEMA)?;
    conn.execute_batch(EXPENSES_SCHEMA)?;
    conn.execute_batch(HR_SCHEMA)?;
    conn.execute_batch(RECONCILIATION_SCHEMA)?;
    conn.execute_batch(INSIGHTS_SCHEMA)?;
    conn.execute_batch(EVENTS_SCHEMA)?;

    Ok(())
}

// ==========================================================================
// Tenancy
// ==========================================================================
const TENANCY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    tax_id TEXT,
    currency TEXT NOT NULL DEFAULT 'GHS',
    fiscal_year_start TEXT NOT NULL,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    created_by INTEGER NOT NULL REFERENCES users(id),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    joined_at TEXT NOT NULL,
    UNIQUE (company_id, user_id)
);
";

// ==========================================================================
// Ledger (chart of accounts + journal)
// ==========================================================================
const LEDGER_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ledger_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    account_number TEXT NOT NULL,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (company_id, account_number)
);

CREATE TABLE IF NOT EXISTS journal_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    entry_number TEXT NOT NULL,
    entry_date TEXT NOT NULL,
    description TEXT NOT NULL,
    reference_type TEXT,
    reference_id INTEGER,
    created_by INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (company_id, entry_number)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_journal_reference
    ON journal_entries(company_id, reference_type, reference_id)
    WHERE reference_type IS NOT NULL;

CREATE TABLE IF NOT EXISTS journal_lines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id INTEGER NOT NULL REFERENCES journal_entries(id) ON DELETE CASCADE,
    account_id INTEGER NOT NULL REFERENCES ledger_accounts(id),
    debit TEXT NOT NULL DEFAULT '0',
    credit TEXT NOT NULL DEFAULT '0',
    memo TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_journal_lines_entry ON journal_lines(entry_id);
CREATE INDEX IF NOT EXISTS idx_journal_entries_date ON journal_entries(company_id, entry_date);
";

// ==========================================================================
// Invoicing
// ==========================================================================
const INVOICING_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL DEFAULT '',
    company_name TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    country TEXT NOT NULL DEFAULT '',
    credit_limit TEXT,
    payment_terms TEXT NOT NULL DEFAULT 'Net 30',
    currency TEXT NOT NULL,
    risk_score INTEGER NOT NULL DEFAULT 50,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    sku TEXT,
    product_type TEXT NOT NULL,
    unit_price TEXT NOT NULL,
    cost_price TEXT NOT NULL DEFAULT '0',
    track_inventory INTEGER NOT NULL DEFAULT 0,
    current_stock INTEGER NOT NULL DEFAULT 0,
    minimum_stock INTEGER NOT NULL DEFAULT 0,
    tax_rate TEXT NOT NULL DEFAULT '0',
    category TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (company_id, sku)
);

CREATE TABLE IF NOT EXISTS invoices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    customer_id INTEGER NOT NULL REFERENCES customers(id),
    invoice_number TEXT NOT NULL,
    status TEXT NOT NULL,
    date_created TEXT NOT NULL,
    date_due TEXT NOT NULL,
    date_sent TEXT,
    date_paid TEXT,
    last_viewed TEXT,
    view_count INTEGER NOT NULL DEFAULT 0,
    subtotal TEXT NOT NULL DEFAULT '0',
    tax_amount TEXT NOT NULL DEFAULT '0',
    discount_amount TEXT NOT NULL DEFAULT '0',
    total_amount TEXT NOT NULL DEFAULT '0',
    amount_paid TEXT NOT NULL DEFAULT '0',
    notes TEXT NOT NULL DEFAULT '',
    terms TEXT NOT NULL DEFAULT '',
    created_by INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (company_id, invoice_number)
);

CREATE INDEX IF NOT EXISTS idx_invoices_status ON invoices(company_id, status);
CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_id);

CREATE TABLE IF NOT EXISTS invoice_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    invoice_id INTEGER NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
    product_id INTEGER REFERENCES products(id) ON DELETE SET NULL,
    position INTEGER NOT NULL,
    description TEXT NOT NULL,
    quantity TEXT NOT NULL,
    unit_price TEXT NOT NULL,
    tax_rate TEXT NOT NULL DEFAULT '0',
    total TEXT NOT NULL,
    tax_amount TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    invoice_id INTEGER NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
    amount TEXT NOT NULL,
    payment_method TEXT NOT NULL,
    payment_date TEXT NOT NULL,
    reference_number TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    created_by INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id);
";

// ==========================================================================
// Expenses
// ==========================================================================
const EXPENSES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS expense_categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    color TEXT NOT NULL DEFAULT '#6c757d',
    is_tax_deductible INTEGER NOT NULL DEFAULT 1,
    budget_limit TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (company_id, name)
);

CREATE TABLE IF NOT EXISTS vendors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    website TEXT NOT NULL DEFAULT '',
    address TEXT NOT NULL DEFAULT '',
    tax_id TEXT NOT NULL DEFAULT '',
    payment_terms TEXT NOT NULL DEFAULT '',
    reliability_score INTEGER NOT NULL DEFAULT 50,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    category_id INTEGER REFERENCES expense_categories(id) ON DELETE SET NULL,
    vendor_id INTEGER REFERENCES vendors(id) ON DELETE SET NULL,
    description TEXT NOT NULL,
    amount TEXT NOT NULL,
    tax_amount TEXT NOT NULL DEFAULT '0',
    total_amount TEXT NOT NULL,
    expense_date TEXT NOT NULL,
    payment_method TEXT NOT NULL,
    reference_number TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    approved_by INTEGER,
    approved_at TEXT,
    is_billable INTEGER NOT NULL DEFAULT 0,
    notes TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_expenses_company_date ON expenses(company_id, expense_date);

CREATE TABLE IF NOT EXISTS expense_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    status TEXT NOT NULL,
    total_amount TEXT NOT NULL DEFAULT '0',
    total_tax TEXT NOT NULL DEFAULT '0',
    submitted_at TEXT,
    approved_by INTEGER,
    approved_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS expense_report_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id INTEGER NOT NULL REFERENCES expense_reports(id) ON DELETE CASCADE,
    expense_id INTEGER NOT NULL REFERENCES expenses(id) ON DELETE CASCADE,
    added_at TEXT NOT NULL,
    UNIQUE (report_id, expense_id)
);

CREATE TABLE IF NOT EXISTS mileage_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    log_date TEXT NOT NULL,
    start_location TEXT NOT NULL,
    end_location TEXT NOT NULL,
    purpose TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    miles TEXT NOT NULL,
    rate_per_mile TEXT NOT NULL,
    total_amount TEXT NOT NULL,
    vehicle TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
";

// ==========================================================================
// HR
// ==========================================================================
const HR_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS employees (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
    employee_code TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL DEFAULT '',
    employment_type TEXT NOT NULL,
    status TEXT NOT NULL,
    job_title TEXT NOT NULL,
    department TEXT NOT NULL DEFAULT '',
    manager_id INTEGER REFERENCES employees(id) ON DELETE SET NULL,
    hire_date TEXT NOT NULL,
    termination_date TEXT,
    base_salary TEXT NOT NULL DEFAULT '0',
    hourly_rate TEXT,
    health_insurance INTEGER NOT NULL DEFAULT 0,
    dental_insurance INTEGER NOT NULL DEFAULT 0,
    retirement_plan INTEGER NOT NULL DEFAULT 0,
    emergency_contact_name TEXT NOT NULL DEFAULT '',
    emergency_contact_phone TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (company_id, employee_code)
);

CREATE TABLE IF NOT EXISTS payroll_periods (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    frequency TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    pay_date TEXT NOT NULL,
    is_processed INTEGER NOT NULL DEFAULT 0,
    processed_at TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payroll_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    period_id INTEGER NOT NULL REFERENCES payroll_periods(id) ON DELETE CASCADE,
    employee_id INTEGER NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
    regular_hours TEXT NOT NULL DEFAULT '0',
    overtime_hours TEXT NOT NULL DEFAULT '0',
    regular_pay TEXT NOT NULL DEFAULT '0',
    overtime_pay TEXT NOT NULL DEFAULT '0',
    bonus TEXT NOT NULL DEFAULT '0',
    commission TEXT NOT NULL DEFAULT '0',
    health_insurance TEXT NOT NULL DEFAULT '0',
    dental_insurance TEXT NOT NULL DEFAULT '0',
    retirement_contribution TEXT NOT NULL DEFAULT '0',
    federal_tax TEXT NOT NULL DEFAULT '0',
    state_tax TEXT NOT NULL DEFAULT '0',
    social_security TEXT NOT NULL DEFAULT '0',
    medicare TEXT NOT NULL DEFAULT '0',
    garnishments TEXT NOT NULL DEFAULT '0',
    gross_pay TEXT NOT NULL DEFAULT '0',
    net_pay TEXT NOT NULL DEFAULT '0',
    is_processed INTEGER NOT NULL DEFAULT 0,
    is_paid INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (period_id, employee_id)
);

CREATE TABLE IF NOT EXISTS leave_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    employee_id INTEGER NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
    leave_type TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    total_days TEXT NOT NULL,
    reason TEXT NOT NULL DEFAULT '',
    is_paid INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL,
    reviewed_by INTEGER,
    reviewed_at TEXT,
    denial_reason TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);
";

// ==========================================================================
// Bank reconciliation
// ==========================================================================
const RECONCILIATION_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bank_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    account_number TEXT NOT NULL,
    account_type TEXT NOT NULL,
    bank_name TEXT NOT NULL,
    routing_number TEXT NOT NULL DEFAULT '',
    opening_balance TEXT NOT NULL DEFAULT '0',
    current_balance TEXT NOT NULL DEFAULT '0',
    last_reconciled_date TEXT,
    last_reconciled_balance TEXT NOT NULL DEFAULT '0',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (company_id, account_number)
);

CREATE TABLE IF NOT EXISTS bank_statements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    bank_account_id INTEGER NOT NULL REFERENCES bank_accounts(id) ON DELETE CASCADE,
    statement_date TEXT NOT NULL,
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    beginning_balance TEXT NOT NULL,
    ending_balance TEXT NOT NULL,
    total_deposits TEXT NOT NULL DEFAULT '0',
    total_withdrawals TEXT NOT NULL DEFAULT '0',
    total_fees TEXT NOT NULL DEFAULT '0',
    status TEXT NOT NULL,
    imported_at TEXT NOT NULL,
    UNIQUE (bank_account_id, statement_date)
);

CREATE TABLE IF NOT EXISTS bank_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    statement_id INTEGER NOT NULL REFERENCES bank_statements(id) ON DELETE CASCADE,
    transaction_date TEXT NOT NULL,
    description TEXT NOT NULL,
    transaction_type TEXT NOT NULL,
    amount TEXT NOT NULL,
    running_balance TEXT,
    check_number TEXT NOT NULL DEFAULT '',
    reference_number TEXT NOT NULL DEFAULT '',
    reconciliation_status TEXT NOT NULL,
    reconciled_at TEXT,
    reconciled_by INTEGER,
    notes TEXT NOT NULL DEFAULT '',
    import_hash TEXT UNIQUE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bank_transactions_statement
    ON bank_transactions(statement_id, reconciliation_status);

CREATE TABLE IF NOT EXISTS reconciliation_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    rule_type TEXT NOT NULL,
    description_pattern TEXT NOT NULL DEFAULT '',
    amount_min TEXT,
    amount_max TEXT,
    check_number_pattern TEXT NOT NULL DEFAULT '',
    reference_pattern TEXT NOT NULL DEFAULT '',
    auto_match INTEGER NOT NULL DEFAULT 0,
    confidence_threshold INTEGER NOT NULL DEFAULT 80,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reconciliation_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    bank_account_id INTEGER NOT NULL REFERENCES bank_accounts(id) ON DELETE CASCADE,
    statement_id INTEGER NOT NULL REFERENCES bank_statements(id) ON DELETE CASCADE,
    session_name TEXT NOT NULL,
    status TEXT NOT NULL,
    starting_book_balance TEXT NOT NULL,
    ending_book_balance TEXT,
    statement_balance TEXT NOT NULL,
    difference TEXT NOT NULL DEFAULT '0',
    transactions_matched INTEGER NOT NULL DEFAULT 0,
    transactions_unmatched INTEGER NOT NULL DEFAULT 0,
    adjustments_made INTEGER NOT NULL DEFAULT 0,
    reconciled_by INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT,
    notes TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS reconciliation_adjustments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    session_id INTEGER NOT NULL REFERENCES reconciliation_sessions(id) ON DELETE CASCADE,
    adjustment_type TEXT NOT NULL,
    description TEXT NOT NULL,
    amount TEXT NOT NULL,
    affects_bank_balance INTEGER NOT NULL DEFAULT 0,
    affects_book_balance INTEGER NOT NULL DEFAULT 1,
    reference_transaction_id INTEGER REFERENCES bank_transactions(id) ON DELETE SET NULL,
    created_by INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
";

// ==========================================================================
// AI insights
// ==========================================================================
const INSIGHTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS ai_insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id),
    insight_type TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    data_points TEXT NOT NULL DEFAULT '{}',
    confidence_score REAL NOT NULL,
    priority TEXT NOT NULL,
    recommendations TEXT NOT NULL DEFAULT '[]',
    potential_impact TEXT NOT NULL DEFAULT '',
    is_viewed INTEGER NOT NULL DEFAULT 0,
    is_acknowledged INTEGER NOT NULL DEFAULT 0,
    user_feedback TEXT NOT NULL DEFAULT '',
    valid_until TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ai_insights_company ON ai_insights(company_id, is_active);

CREATE TABLE IF NOT EXISTS ai_models (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    model_type TEXT NOT NULL,
    version TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    accuracy REAL,
    precision_score REAL,
    recall REAL,
    f1_score REAL,
    prediction_count INTEGER NOT NULL DEFAULT 0,
    success_count INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (company_id, name, version)
);

CREATE TABLE IF NOT EXISTS automated_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    created_by INTEGER NOT NULL REFERENCES users(id),
    task_type TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    config TEXT NOT NULL DEFAULT '{}',
    schedule TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    last_run TEXT,
    next_run TEXT,
    success_count INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_result TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
";

// ==========================================================================
// Events (audit trail)
// ==========================================================================
const EVENTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT UNIQUE NOT NULL,
    company_id INTEGER,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data TEXT NOT NULL,
    actor TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_company ON events(company_id, timestamp);
";

// ============================================================================
// WRITE HELPERS
// ============================================================================

/// Run `f` atomically.
///
/// At the top level this is a `BEGIN IMMEDIATE` transaction (the write lock is
/// taken up front). Inside an open transaction it becomes a savepoint, so store
/// functions compose without caring who opened the transaction.
pub fn atomically<T, F>(conn: &Connection, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let top_level = conn.is_autocommit();
    let (begin, commit, rollback) = if top_level {
        ("BEGIN IMMEDIATE", "COMMIT", "ROLLBACK")
    } else {
        (
            "SAVEPOINT ledger_op",
            "RELEASE ledger_op",
            "ROLLBACK TO ledger_op; RELEASE ledger_op",
        )
    };

    conn.execute_batch(begin)?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(commit)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.execute_batch(rollback) {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Lock a shared connection.
///
/// A lock poisoned by a panicking holder is recovered: any transaction the
/// holder left open is rolled back before the connection is handed out again.
pub fn lock(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    match db.lock() {
        Ok(guard) => Ok(guard),
        Err(poisoned) => {
            db.clear_poison();
            let guard = poisoned.into_inner();
            if !guard.is_autocommit() {
                tracing::error!("rolling back a transaction left open by a panicked request");
                guard.execute_batch("ROLLBACK")?;
            } else {
                tracing::warn!("recovered a poisoned database lock");
            }
            Ok(guard)
        }
    }
}

/// True when `err` is a UNIQUE/CHECK/FK constraint failure.
pub fn is_constraint_violation(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::ConstraintViolation
    )
}

/// True when another connection holds the write lock.
pub fn is_busy(err: &LedgerError) -> bool {
    matches!(
        err,
        LedgerError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

/// Map a constraint failure to `Conflict`, leave anything else untouched.
pub fn conflict_on_duplicate(err: rusqlite::Error, message: impl Into<String>) -> LedgerError {
    let err = LedgerError::from(err);
    if is_constraint_violation(&err) {
        LedgerError::Conflict(message.into())
    } else {
        err
    }
}

// ============================================================================
// FILTERS & PAGING
// ============================================================================

/// WHERE-clause builder for list queries. Clauses use `?` placeholders and
/// are ANDed in insertion order.
pub struct Filter {
    clauses: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl Filter {
    /// Start with the tenant restriction every list query needs.
    pub fn for_company(column: &str, company_id: i64) -> Self {
        let mut filter = Filter {
            clauses: Vec::new(),
            values: Vec::new(),
        };
        filter.push(&format!("{} = ?", column), company_id);
        filter
    }

    pub fn push<V: ToSql + 'static>(&mut self, clause: &str, value: V) {
        self.clauses.push(clause.to_string());
        self.values.push(Box::new(value));
    }

    pub fn push_opt<V: ToSql + 'static>(&mut self, clause: &str, value: Option<V>) {
        if let Some(value) = value {
            self.push(clause, value);
        }
    }

    /// Case-insensitive substring search across several columns.
    pub fn push_search(&mut self, columns: &[&str], term: Option<&str>) {
        let term = match term.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return,
        };
        let pattern = format!("%{}%", term);
        let ors: Vec<String> = columns.iter().map(|c| format!("{} LIKE ?", c)).collect();
        self.clauses.push(format!("({})", ors.join(" OR ")));
        for _ in columns {
            self.values.push(Box::new(pattern.clone()));
        }
    }

    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn params(&self) -> impl rusqlite::Params + '_ {
        params_from_iter(self.values.iter().map(|v| &**v))
    }
}

pub const DEFAULT_PER_PAGE: u32 = 25;
pub const MAX_PER_PAGE: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

/// 1-based page request, 25 rows per page unless asked otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        PageRequest { page, per_page }
    }

    pub fn limit(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.limit() as u64
    }

    /// `LIMIT … OFFSET …` suffix for list queries.
    pub fn sql(&self) -> String {
        format!("LIMIT {} OFFSET {}", self.limit(), self.offset())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let per_page = request.limit();
        let total_pages = ((total.max(0) as u64 + per_page as u64 - 1) / per_page as u64) as u32;
        Page {
            items,
            total,
            page: request.page.max(1),
            per_page,
            total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Event for audit trail: every state change is recorded.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEvent {
    pub event_id: String,
    pub company_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(
        company_id: Option<i64>,
        event_type: &str,
        entity_type: &str,
        entity_id: impl ToString,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            company_id,
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, company_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.event_id,
            event.company_id,
            event.timestamp,
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Shorthand used by the stores: build and insert in one call.
pub fn record_event(
    conn: &Connection,
    company_id: i64,
    actor: &str,
    event_type: &str,
    entity_type: &str,
    entity_id: i64,
    data: serde_json::Value,
) -> Result<()> {
    let event = AuditEvent::new(Some(company_id), event_type, entity_type, entity_id, data, actor);
    insert_event(conn, &event)
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let data_json: String = row.get("data")?;
    Ok(AuditEvent {
        event_id: row.get("event_id")?,
        company_id: row.get("company_id")?,
        timestamp: row.get("timestamp")?,
        event_type: row.get("event_type")?,
        entity_type: row.get("entity_type")?,
        entity_id: row.get("entity_id")?,
        data: serde_json::from_str(&data_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        actor: row.get("actor")?,
    })
}

/// Events for one entity of one company, newest first.
pub fn get_events_for_entity(
    conn: &Connection,
    company_id: i64,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, company_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE company_id = ?1 AND entity_type = ?2 AND entity_id = ?3
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![company_id, entity_type, entity_id], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Latest events of a company, newest first.
pub fn recent_events(conn: &Connection, company_id: i64, limit: u32) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, company_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE company_id = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;

    let events = stmt
        .query_map(params![company_id, limit.clamp(1, 500)], row_to_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    sql_enum! {
        pub enum Colour {
            Red => "red",
            DarkBlue => "dark_blue",
        }
    }

    #[test]
    fn test_setup_database_is_idempotent() {
        let conn = open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 31);

        println!("✅ Schema created: {} tables", tables);
    }

    #[test]
    fn test_open_database_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.db");

        {
            let conn = open_database(&path).unwrap();
            conn.execute(
                "INSERT INTO users (username, email, full_name, created_at)
                 VALUES ('ama', 'ama@acme.test', 'Ama', '2025-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
        }

        let conn = open_database(&path).unwrap();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0)).unwrap();
        assert_eq!(users, 1);

        println!("✅ File database reopened with {} user", users);
    }

    #[test]
    fn test_sql_enum_text_roundtrip() {
        assert_eq!(Colour::DarkBlue.as_str(), "dark_blue");
        assert_eq!("red".parse::<Colour>().unwrap(), Colour::Red);
        assert!("green".parse::<Colour>().is_err());
        assert_eq!(serde_json::to_string(&Colour::DarkBlue).unwrap(), "\"dark_blue\"");

        let conn = Connection::open_in_memory().unwrap();
        let stored: Colour = conn
            .query_row("SELECT ?1", params![Colour::DarkBlue], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, Colour::DarkBlue);
    }

    #[test]
    fn test_atomically_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();

        let failed: Result<()> = atomically(&conn, |c| {
            c.execute("INSERT INTO t VALUES (1)", [])?;
            Err(LedgerError::validation("boom"))
        });
        assert!(failed.is_err());

        atomically(&conn, |c| {
            c.execute("INSERT INTO t VALUES (2)", [])?;
            // nested call becomes a savepoint
            let inner: Result<()> = atomically(c, |c2| {
                c2.execute("INSERT INTO t VALUES (3)", [])?;
                Err(LedgerError::validation("inner"))
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();

        let values: Vec<i64> = conn
            .prepare("SELECT v FROM t ORDER BY v")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(values, vec![2]);
        assert!(conn.is_autocommit());

        println!("✅ Atomic writes test passed");
    }

    #[test]
    fn test_lock_recovers_after_panic_mid_transaction() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        let db = std::sync::Arc::new(Mutex::new(conn));

        let shared = db.clone();
        let crashed = std::thread::spawn(move || {
            let guard = lock(&shared).unwrap();
            let _: Result<()> = atomically(&guard, |c| {
                c.execute("INSERT INTO t VALUES (1)", [])?;
                panic!("handler panicked mid-write");
            });
        })
        .join();
        assert!(crashed.is_err());
        assert!(db.is_poisoned());

        let guard = lock(&db).unwrap();
        assert!(guard.is_autocommit());
        let count: i64 = guard.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0)).unwrap();
        assert_eq!(count, 0);
        drop(guard);
        assert!(!db.is_poisoned());

        println!("✅ Poisoned lock recovery test passed");
    }

    #[test]
    fn test_page_math() {
        let request = PageRequest::new(3, 10);
        assert_eq!(request.offset(), 20);
        assert_eq!(request.sql(), "LIMIT 10 OFFSET 20");

        let page = Page::new(vec![1, 2], 22, request);
        assert_eq!(page.total_pages, 3);
        assert!(!page.has_next());

        let clamped = PageRequest::new(0, 1000);
        assert_eq!(clamped.limit(), 100);
        assert_eq!(clamped.offset(), 0);
        assert_eq!(PageRequest::default().limit(), 25);
    }

    #[test]
    fn test_filter_builder() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE c (company_id INTEGER, name TEXT, email TEXT);
             INSERT INTO c VALUES (1, 'Acme', 'ops@acme.test'), (1, 'Globex', 'hi@globex.test'), (2, 'Acme Two', 'x@y.test');",
        )
        .unwrap();

        let mut filter = Filter::for_company("company_id", 1);
        filter.push_search(&["name", "email"], Some("ACME"));
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM c {}", filter.where_sql()), filter.params(), |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_event_trail() {
        let conn = open_in_memory().unwrap();
        record_event(&conn, 7, "user:1", "invoice_created", "invoice", 12, serde_json::json!({"total": "10"}))
            .unwrap();
        record_event(&conn, 7, "user:1", "invoice_sent", "invoice", 12, serde_json::json!({})).unwrap();
        record_event(&conn, 8, "user:2", "invoice_sent", "invoice", 12, serde_json::json!({})).unwrap();

        let events = get_events_for_entity(&conn, 7, "invoice", "12").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "invoice_sent");

        assert_eq!(recent_events(&conn, 8, 10).unwrap().len(), 1);

        println!("✅ Audit trail test passed");
    }
}
