// 🏦 Bank Reconciliation - accounts, statements, rules and sessions
//
// Statement lines come in through CSV import, get matched by rules or cleared
// by hand inside a session, and the session tracks the difference between the
// statement balance and the book balance until it reaches zero.

pub mod bank;
pub mod engine;
pub mod rules;
pub mod session;

use crate::db::sql_enum;

sql_enum! {
    pub enum BankAccountType {
        Checking => "checking",
        Savings => "savings",
        MoneyMarket => "money_market",
        CreditCard => "credit_card",
        LineOfCredit => "line_of_credit",
        Other => "other",
    }
}

sql_enum! {
    pub enum StatementStatus {
        Imported => "imported",
        Processing => "processing",
        Reconciled => "reconciled",
        PartiallyReconciled => "partially_reconciled",
        Discrepancy => "discrepancy",
    }
}

sql_enum! {
    pub enum TransactionType {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
        Transfer => "transfer",
        Fee => "fee",
        Interest => "interest",
        Dividend => "dividend",
        Check => "check",
        DebitCard => "debit_card",
        Ach => "ach",
        Wire => "wire",
        Other => "other",
    }
}

sql_enum! {
    pub enum MatchStatus {
        Unreconciled => "unreconciled",
        Matched => "matched",
        Cleared => "cleared",
        Disputed => "disputed",
        Void => "void",
    }
}

sql_enum! {
    pub enum RuleType {
        DescriptionContains => "description_contains",
        DescriptionExact => "description_exact",
        AmountExact => "amount_exact",
        AmountRange => "amount_range",
        CheckNumber => "check_number",
        ReferenceNumber => "reference_number",
        Combined => "combined",
    }
}

sql_enum! {
    pub enum SessionStatus {
        InProgress => "in_progress",
        Completed => "completed",
        Paused => "paused",
        Cancelled => "cancelled",
        Error => "error",
    }
}

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::InProgress | SessionStatus::Paused)
    }
}

sql_enum! {
    pub enum AdjustmentType {
        BankError => "bank_error",
        BookError => "book_error",
        OutstandingCheck => "outstanding_check",
        DepositInTransit => "deposit_in_transit",
        BankFee => "bank_fee",
        InterestEarned => "interest_earned",
        NsfCheck => "nsf_check",
        Other => "other",
    }
}

pub use bank::{
    BankAccount, BankStatement, BankTransaction, ImportSummary, NewBankAccount, NewBankStatement,
    NewBankTransaction,
};
pub use engine::{
    Discrepancy, DiscrepancyCategory, ReconciliationEngine, ReconciliationReport, ReconciliationResult,
    StatementMetadata,
};
pub use rules::{NewReconciliationRule, ReconciliationRule};
pub use session::{Adjustment, AutoMatchResult, NewAdjustment, ReconciliationSession};
