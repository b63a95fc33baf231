// 🔁 Reconciliation Sessions - working a statement down to a zero difference
//
// ending_book = starting_book + Σ cleared lines + Σ book-side adjustments
// difference  = (statement_balance + Σ bank-side adjustments) - ending_book
//
// Matched lines are not counted in the book balance until they are cleared.

use super::bank::{get_bank_account, get_statement, get_transaction, list_transactions, set_statement_status};
use super::rules::list_rules;
use super::{AdjustmentType, MatchStatus, SessionStatus, StatementStatus};
use crate::db::{atomically, record_event, Filter};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSession {
    pub id: i64,
    pub company_id: i64,
    pub bank_account_id: i64,
    pub statement_id: i64,
    pub session_name: String,
    pub status: SessionStatus,
    pub starting_book_balance: Decimal,
    pub ending_book_balance: Option<Decimal>,
    pub statement_balance: Decimal,
    pub difference: Decimal,
    pub transactions_matched: i64,
    pub transactions_unmatched: i64,
    pub adjustments_made: i64,
    pub reconciled_by: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub notes: String,
}

impl ReconciliationSession {
    pub fn is_balanced(&self) -> bool {
        self.difference.is_zero()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: i64,
    pub company_id: i64,
    pub session_id: i64,
    pub adjustment_type: AdjustmentType,
    pub description: String,
    pub amount: Decimal,
    pub affects_bank_balance: bool,
    pub affects_book_balance: bool,
    pub reference_transaction_id: Option<i64>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAdjustment {
    pub adjustment_type: AdjustmentType,
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub affects_bank_balance: bool,
    #[serde(default = "default_affects_book")]
    pub affects_book_balance: bool,
    pub reference_transaction_id: Option<i64>,
}

fn default_affects_book() -> bool {
    true
}

/// One line a rule scored at or above its threshold.
#[derive(Debug, Clone, Serialize)]
pub struct RuleHit {
    pub transaction_id: i64,
    pub rule_id: i64,
    pub rule_name: String,
    pub confidence: i64,
    /// False when the rule only reports hits.
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoMatchResult {
    pub matched_count: usize,
    pub hits: Vec<RuleHit>,
    pub session: ReconciliationSession,
}

const SESSION_COLUMNS: &str = "id, company_id, bank_account_id, statement_id, session_name, status,
     starting_book_balance, ending_book_balance, statement_balance, difference, transactions_matched,
     transactions_unmatched, adjustments_made, reconciled_by, start_date, end_date, notes";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<ReconciliationSession> {
    Ok(ReconciliationSession {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        bank_account_id: row.get("bank_account_id")?,
        statement_id: row.get("statement_id")?,
        session_name: row.get("session_name")?,
        status: row.get("status")?,
        starting_book_balance: money::get(row, "starting_book_balance")?,
        ending_book_balance: money::get_opt(row, "ending_book_balance")?,
        statement_balance: money::get(row, "statement_balance")?,
        difference: money::get(row, "difference")?,
        transactions_matched: row.get("transactions_matched")?,
        transactions_unmatched: row.get("transactions_unmatched")?,
        adjustments_made: row.get("adjustments_made")?,
        reconciled_by: row.get("reconciled_by")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        notes: row.get("notes")?,
    })
}

const ADJUSTMENT_COLUMNS: &str = "id, company_id, session_id, adjustment_type, description, amount,
     affects_bank_balance, affects_book_balance, reference_transaction_id, created_by, created_at";

fn row_to_adjustment(row: &Row<'_>) -> rusqlite::Result<Adjustment> {
    Ok(Adjustment {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        session_id: row.get("session_id")?,
        adjustment_type: row.get("adjustment_type")?,
        description: row.get("description")?,
        amount: money::get(row, "amount")?,
        affects_bank_balance: row.get("affects_bank_balance")?,
        affects_book_balance: row.get("affects_book_balance")?,
        reference_transaction_id: row.get("reference_transaction_id")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Open a session on an imported (or already processing) statement.
pub fn start_session(
    conn: &Connection,
    ctx: &TenantContext,
    bank_account_id: i64,
    statement_id: i64,
    notes: &str,
) -> Result<ReconciliationSession> {
    ctx.require_finance_role("starting a reconciliation")?;

    let id = atomically(conn, |conn| {
        let account = get_bank_account(conn, ctx.company_id, bank_account_id)?;
        let statement = get_statement(conn, ctx.company_id, statement_id)?;
        if statement.bank_account_id != account.id {
            return Err(LedgerError::validation(format!(
                "statement {} does not belong to bank account {}",
                statement_id, bank_account_id
            )));
        }
        if !matches!(statement.status, StatementStatus::Imported | StatementStatus::Processing) {
            return Err(LedgerError::transition("bank statement", statement.status, "reconcile"));
        }

        let session_name = format!("Reconciliation - {} - {}", account.name, statement.statement_date);
        conn.execute(
            "INSERT INTO reconciliation_sessions (company_id, bank_account_id, statement_id, session_name, status,
                                                  starting_book_balance, statement_balance, difference,
                                                  reconciled_by, start_date, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                ctx.company_id,
                account.id,
                statement.id,
                session_name,
                SessionStatus::InProgress,
                money::to_sql(&account.current_balance),
                money::to_sql(&statement.ending_balance),
                money::to_sql(&(statement.ending_balance - account.current_balance)),
                ctx.user_id,
                Utc::now(),
                notes,
            ],
        )?;
        let id = conn.last_insert_rowid();

        set_statement_status(conn, ctx.company_id, statement.id, StatementStatus::Processing)?;
        recompute_session(conn, ctx.company_id, id)?;
        record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_started", "reconciliation_session", id, serde_json::json!({
            "bank_account_id": account.id,
            "statement_id": statement.id,
        }))?;
        Ok(id)
    })?;

    tracing::info!(company_id = ctx.company_id, session_id = id, statement_id, "reconciliation started");
    get_session(conn, ctx.company_id, id)
}

pub fn get_session(conn: &Connection, company_id: i64, session_id: i64) -> Result<ReconciliationSession> {
    conn.query_row(
        &format!("SELECT {} FROM reconciliation_sessions WHERE company_id = ?1 AND id = ?2", SESSION_COLUMNS),
        params![company_id, session_id],
        row_to_session,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("reconciliation session", session_id))
}

/// Newest first, optionally for one bank account.
pub fn list_sessions(conn: &Connection, company_id: i64, bank_account_id: Option<i64>) -> Result<Vec<ReconciliationSession>> {
    let mut f = Filter::for_company("company_id", company_id);
    f.push_opt("bank_account_id = ?", bank_account_id);
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM reconciliation_sessions {} ORDER BY start_date DESC, id DESC",
        SESSION_COLUMNS,
        f.where_sql()
    ))?;
    let sessions = stmt
        .query_map(f.params(), row_to_session)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

fn require_in_progress(session: &ReconciliationSession, action: &'static str) -> Result<()> {
    if session.status == SessionStatus::InProgress {
        Ok(())
    } else {
        Err(LedgerError::transition("reconciliation session", session.status, action))
    }
}

fn set_session_status(
    conn: &Connection,
    ctx: &TenantContext,
    session: &ReconciliationSession,
    status: SessionStatus,
) -> Result<ReconciliationSession> {
    conn.execute(
        "UPDATE reconciliation_sessions SET status = ?1 WHERE company_id = ?2 AND id = ?3",
        params![status, ctx.company_id, session.id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_status_changed", "reconciliation_session", session.id, serde_json::json!({
        "from": session.status,
        "to": status,
    }))?;
    get_session(conn, ctx.company_id, session.id)
}

pub fn pause_session(conn: &Connection, ctx: &TenantContext, session_id: i64) -> Result<ReconciliationSession> {
    ctx.require_finance_role("pausing a reconciliation")?;
    let session = get_session(conn, ctx.company_id, session_id)?;
    require_in_progress(&session, "pause")?;
    set_session_status(conn, ctx, &session, SessionStatus::Paused)
}

pub fn resume_session(conn: &Connection, ctx: &TenantContext, session_id: i64) -> Result<ReconciliationSession> {
    ctx.require_finance_role("resuming a reconciliation")?;
    let session = get_session(conn, ctx.company_id, session_id)?;
    if session.status != SessionStatus::Paused {
        return Err(LedgerError::transition("reconciliation session", session.status, "resume"));
    }
    set_session_status(conn, ctx, &session, SessionStatus::InProgress)
}

/// Statement lines keep whatever status they reached.
pub fn cancel_session(conn: &Connection, ctx: &TenantContext, session_id: i64) -> Result<ReconciliationSession> {
    ctx.require_finance_role("cancelling a reconciliation")?;
    let session = get_session(conn, ctx.company_id, session_id)?;
    if !session.status.is_open() {
        return Err(LedgerError::transition("reconciliation session", session.status, "cancel"));
    }
    conn.execute(
        "UPDATE reconciliation_sessions SET end_date = ?1 WHERE company_id = ?2 AND id = ?3",
        params![Utc::now(), ctx.company_id, session.id],
    )?;
    set_session_status(conn, ctx, &session, SessionStatus::Cancelled)
}

/// Close the session. The statement becomes reconciled when the difference is
/// zero and a discrepancy otherwise; the bank account remembers the statement
/// date and balance either way.
pub fn complete_session(conn: &Connection, ctx: &TenantContext, session_id: i64) -> Result<ReconciliationSession> {
    ctx.require_finance_role("completing a reconciliation")?;

    let session = atomically(conn, |conn| {
        let session = get_session(conn, ctx.company_id, session_id)?;
        require_in_progress(&session, "complete")?;
        let session = recompute_session(conn, ctx.company_id, session.id)?;
        let statement = get_statement(conn, ctx.company_id, session.statement_id)?;

        conn.execute(
            "UPDATE reconciliation_sessions SET status = ?1, end_date = ?2 WHERE company_id = ?3 AND id = ?4",
            params![SessionStatus::Completed, Utc::now(), ctx.company_id, session.id],
        )?;
        let statement_status = if session.is_balanced() {
            StatementStatus::Reconciled
        } else {
            StatementStatus::Discrepancy
        };
        set_statement_status(conn, ctx.company_id, statement.id, statement_status)?;
        conn.execute(
            "UPDATE bank_accounts SET last_reconciled_date = ?1, last_reconciled_balance = ?2
             WHERE company_id = ?3 AND id = ?4",
            params![
                statement.statement_date,
                money::to_sql(&session.statement_balance),
                ctx.company_id,
                session.bank_account_id,
            ],
        )?;

        record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_completed", "reconciliation_session", session.id, serde_json::json!({
            "difference": session.difference,
            "statement_status": statement_status,
        }))?;
        get_session(conn, ctx.company_id, session.id)
    })?;

    tracing::info!(
        company_id = ctx.company_id,
        session_id,
        difference = %session.difference,
        balanced = session.is_balanced(),
        "reconciliation completed"
    );
    Ok(session)
}

// ============================================================================
// WORKING THE STATEMENT
// ============================================================================

fn set_line_status(
    conn: &Connection,
    ctx: &TenantContext,
    session_id: i64,
    transaction_ids: &[i64],
    status: MatchStatus,
    action: &'static str,
) -> Result<ReconciliationSession> {
    ctx.require_finance_role("reconciling statement lines")?;
    if transaction_ids.is_empty() {
        return Err(LedgerError::validation("no transactions selected"));
    }

    atomically(conn, |conn| {
        let session = get_session(conn, ctx.company_id, session_id)?;
        require_in_progress(&session, action)?;

        let now = Utc::now();
        for &id in transaction_ids {
            let line = get_transaction(conn, ctx.company_id, id)?;
            if line.statement_id != session.statement_id {
                return Err(LedgerError::validation(format!(
                    "transaction {} is not on this session's statement",
                    id
                )));
            }
            conn.execute(
                "UPDATE bank_transactions SET reconciliation_status = ?1, reconciled_at = ?2, reconciled_by = ?3
                 WHERE company_id = ?4 AND id = ?5",
                params![status, now, ctx.user_id, ctx.company_id, id],
            )?;
        }

        record_event(conn, ctx.company_id, &ctx.actor(), "statement_lines_marked", "reconciliation_session", session.id, serde_json::json!({
            "status": status,
            "transaction_ids": transaction_ids,
        }))?;
        recompute_session(conn, ctx.company_id, session.id)
    })
}

pub fn mark_cleared(conn: &Connection, ctx: &TenantContext, session_id: i64, transaction_ids: &[i64]) -> Result<ReconciliationSession> {
    set_line_status(conn, ctx, session_id, transaction_ids, MatchStatus::Cleared, "clear lines")
}

pub fn mark_disputed(conn: &Connection, ctx: &TenantContext, session_id: i64, transaction_ids: &[i64]) -> Result<ReconciliationSession> {
    set_line_status(conn, ctx, session_id, transaction_ids, MatchStatus::Disputed, "dispute lines")
}

/// Run the active rules over the unreconciled lines.
///
/// Lines are tried in date order and rules in name order. The first rule that
/// reaches its threshold wins the line; it is marked matched only when that
/// rule auto-matches.
pub fn auto_match(conn: &Connection, ctx: &TenantContext, session_id: i64) -> Result<AutoMatchResult> {
    ctx.require_finance_role("auto-matching statement lines")?;

    let (hits, session) = atomically(conn, |conn| {
        let session = get_session(conn, ctx.company_id, session_id)?;
        require_in_progress(&session, "auto-match")?;

        let rules = list_rules(conn, ctx.company_id, true)?;
        let lines = list_transactions(conn, ctx.company_id, session.statement_id, Some(MatchStatus::Unreconciled))?;
        let now = Utc::now();

        let mut hits = Vec::new();
        for line in &lines {
            let Some((rule, confidence)) = rules
                .iter()
                .map(|rule| (rule, rule.confidence(line)))
                .find(|(rule, confidence)| *confidence >= rule.confidence_threshold)
            else {
                continue;
            };

            if rule.auto_match {
                conn.execute(
                    "UPDATE bank_transactions SET reconciliation_status = ?1, reconciled_at = ?2, reconciled_by = ?3
                     WHERE company_id = ?4 AND id = ?5",
                    params![MatchStatus::Matched, now, ctx.user_id, ctx.company_id, line.id],
                )?;
            }
            hits.push(RuleHit {
                transaction_id: line.id,
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                confidence,
                matched: rule.auto_match,
            });
        }

        let matched = hits.iter().filter(|h| h.matched).count();
        record_event(conn, ctx.company_id, &ctx.actor(), "auto_match_run", "reconciliation_session", session.id, serde_json::json!({
            "candidates": lines.len(),
            "hits": hits.len(),
            "matched": matched,
        }))?;
        let session = recompute_session(conn, ctx.company_id, session.id)?;
        Ok((hits, session))
    })?;

    let matched_count = hits.iter().filter(|h| h.matched).count();
    tracing::info!(company_id = ctx.company_id, session_id, matched = matched_count, hits = hits.len(), "auto-match finished");
    Ok(AutoMatchResult { matched_count, hits, session })
}

pub fn add_adjustment(conn: &Connection, ctx: &TenantContext, session_id: i64, new: &NewAdjustment) -> Result<Adjustment> {
    ctx.require_finance_role("adjusting a reconciliation")?;
    if new.description.trim().is_empty() {
        return Err(LedgerError::validation("adjustment description is required"));
    }
    if new.amount.is_zero() {
        return Err(LedgerError::validation("adjustment amount cannot be zero"));
    }
    money::ensure_amount("adjustment amount", new.amount)?;
    if !new.affects_bank_balance && !new.affects_book_balance {
        return Err(LedgerError::validation("an adjustment must affect the bank or the book balance"));
    }

    let id = atomically(conn, |conn| {
        let session = get_session(conn, ctx.company_id, session_id)?;
        require_in_progress(&session, "adjust")?;
        if let Some(tx_id) = new.reference_transaction_id {
            let line = get_transaction(conn, ctx.company_id, tx_id)?;
            if line.statement_id != session.statement_id {
                return Err(LedgerError::validation(format!(
                    "transaction {} is not on this session's statement",
                    tx_id
                )));
            }
        }

        conn.execute(
            "INSERT INTO reconciliation_adjustments (company_id, session_id, adjustment_type, description, amount,
                                                     affects_bank_balance, affects_book_balance,
                                                     reference_transaction_id, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                ctx.company_id,
                session.id,
                new.adjustment_type,
                new.description.trim(),
                money::to_sql(&new.amount),
                new.affects_bank_balance,
                new.affects_book_balance,
                new.reference_transaction_id,
                ctx.user_id,
                Utc::now(),
            ],
        )?;
        let id = conn.last_insert_rowid();

        record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_adjusted", "reconciliation_session", session.id, serde_json::json!({
            "adjustment_id": id,
            "adjustment_type": new.adjustment_type,
            "amount": new.amount,
        }))?;
        recompute_session(conn, ctx.company_id, session.id)?;
        Ok(id)
    })?;

    get_adjustment(conn, ctx.company_id, id)
}

pub fn get_adjustment(conn: &Connection, company_id: i64, adjustment_id: i64) -> Result<Adjustment> {
    conn.query_row(
        &format!("SELECT {} FROM reconciliation_adjustments WHERE company_id = ?1 AND id = ?2", ADJUSTMENT_COLUMNS),
        params![company_id, adjustment_id],
        row_to_adjustment,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("adjustment", adjustment_id))
}

pub fn list_adjustments(conn: &Connection, company_id: i64, session_id: i64) -> Result<Vec<Adjustment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM reconciliation_adjustments WHERE company_id = ?1 AND session_id = ?2 ORDER BY id",
        ADJUSTMENT_COLUMNS
    ))?;
    let adjustments = stmt
        .query_map(params![company_id, session_id], row_to_adjustment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(adjustments)
}

/// Refresh the book balance, difference and counters from the statement lines
/// and adjustments.
pub fn recompute_session(conn: &Connection, company_id: i64, session_id: i64) -> Result<ReconciliationSession> {
    let session = get_session(conn, company_id, session_id)?;
    let lines = list_transactions(conn, company_id, session.statement_id, None)?;
    let adjustments = list_adjustments(conn, company_id, session.id)?;

    let cleared: Decimal = lines
        .iter()
        .filter(|l| l.reconciliation_status == MatchStatus::Cleared)
        .map(|l| l.amount)
        .sum();
    let book_adjustments: Decimal = adjustments.iter().filter(|a| a.affects_book_balance).map(|a| a.amount).sum();
    let bank_adjustments: Decimal = adjustments.iter().filter(|a| a.affects_bank_balance).map(|a| a.amount).sum();

    let ending_book = session.starting_book_balance + cleared + book_adjustments;
    let difference = session.statement_balance + bank_adjustments - ending_book;

    let matched = lines
        .iter()
        .filter(|l| matches!(l.reconciliation_status, MatchStatus::Matched | MatchStatus::Cleared))
        .count() as i64;
    let unmatched = lines
        .iter()
        .filter(|l| l.reconciliation_status == MatchStatus::Unreconciled)
        .count() as i64;

    conn.execute(
        "UPDATE reconciliation_sessions SET ending_book_balance = ?1, difference = ?2, transactions_matched = ?3,
                transactions_unmatched = ?4, adjustments_made = ?5
         WHERE company_id = ?6 AND id = ?7",
        params![
            money::to_sql(&ending_book),
            money::to_sql(&difference),
            matched,
            unmatched,
            adjustments.len() as i64,
            company_id,
            session.id,
        ],
    )?;
    get_session(conn, company_id, session.id)
}

// ============================================================================
// TESTS
// ============================================================================
