// ⚖️ Balance Engine - does the statement add up?
//
// opening_balance + credits - debits - fees = closing_balance
//
// Credits are the positive lines, debits the negative non-fee lines and fees
// the fee lines. Void lines are left out.

use super::bank::{get_bank_account, get_statement, list_transactions, BankTransaction};
use super::{MatchStatus, TransactionType};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationResult {
    Balanced {
        opening_balance: Decimal,
        total_credits: Decimal,
        total_debits: Decimal,
        total_fees: Decimal,
        closing_balance: Decimal,
    },

    /// Off by less than the major threshold.
    MinorDiscrepancy {
        expected_balance: Decimal,
        actual_balance: Decimal,
        difference: Decimal,
        tolerance: Decimal,
    },

    MajorDiscrepancy {
        expected_balance: Decimal,
        actual_balance: Decimal,
        difference: Decimal,
        missing_transactions: Vec<String>,
    },
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn has_discrepancy(&self) -> bool {
        !self.is_balanced()
    }

    pub fn difference(&self) -> Decimal {
        match self {
            ReconciliationResult::Balanced { .. } => Decimal::ZERO,
            ReconciliationResult::MinorDiscrepancy { difference, .. } => *difference,
            ReconciliationResult::MajorDiscrepancy { difference, .. } => *difference,
        }
    }
}

// ============================================================================
// STATEMENT METADATA
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementMetadata {
    pub account_name: String,
    pub statement_period: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub statement_date: NaiveDate,
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub statement: StatementMetadata,
    pub result: ReconciliationResult,
    pub transaction_count: usize,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub total_fees: Decimal,
    pub calculated_balance: Decimal,
    pub discrepancies: Vec<Discrepancy>,
    pub summary: String,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_balanced(&self) -> bool {
        self.result.is_balanced()
    }

    fn describe(&self) -> String {
        format!(
            "Reconciliation for {} ({}): {} transactions, calculated {:.2}, expected {:.2}, difference {:.2}",
            self.statement.account_name,
            self.statement.statement_period,
            self.transaction_count,
            self.calculated_balance,
            self.statement.closing_balance,
            self.result.difference()
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub description: String,
    pub amount: Decimal,
    pub category: DiscrepancyCategory,
    pub transaction_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyCategory {
    MissingTransaction,
    DuplicateTransaction,
    AmountMismatch,
    DateMismatch,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Differences below this are rounding (default 0.01).
    pub tolerance: Decimal,

    /// Minor vs major discrepancy (default 10.00).
    pub major_discrepancy_threshold: Decimal,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            tolerance: Decimal::new(1, 2),
            major_discrepancy_threshold: Decimal::new(10, 0),
        }
    }

    pub fn with_thresholds(tolerance: Decimal, major_threshold: Decimal) -> Self {
        ReconciliationEngine {
            tolerance,
            major_discrepancy_threshold: major_threshold,
        }
    }

    pub fn reconcile(&self, transactions: &[BankTransaction], statement: &StatementMetadata) -> ReconciliationReport {
        let counted: Vec<&BankTransaction> = transactions
            .iter()
            .filter(|tx| tx.reconciliation_status != MatchStatus::Void)
            .collect();

        let total_credits = self.calculate_credits(&counted);
        let total_debits = self.calculate_debits(&counted);
        let total_fees = self.calculate_fees(&counted);

        let calculated_balance = statement.opening_balance + total_credits - total_debits - total_fees;
        let difference = (calculated_balance - statement.closing_balance).abs();

        let discrepancies = self.detect_discrepancies(&counted, statement, difference);

        let result = if difference < self.tolerance {
            ReconciliationResult::Balanced {
                opening_balance: statement.opening_balance,
                total_credits,
                total_debits,
                total_fees,
                closing_balance: statement.closing_balance,
            }
        } else if difference < self.major_discrepancy_threshold {
            ReconciliationResult::MinorDiscrepancy {
                expected_balance: statement.closing_balance,
                actual_balance: calculated_balance,
                difference,
                tolerance: self.tolerance,
            }
        } else {
            ReconciliationResult::MajorDiscrepancy {
                expected_balance: statement.closing_balance,
                actual_balance: calculated_balance,
                difference,
                missing_transactions: discrepancies
                    .iter()
                    .filter(|d| d.category == DiscrepancyCategory::MissingTransaction)
                    .map(|d| d.description.clone())
                    .collect(),
            }
        };

        let mut report = ReconciliationReport {
            statement: statement.clone(),
            result,
            transaction_count: counted.len(),
            total_credits,
            total_debits,
            total_fees,
            calculated_balance,
            discrepancies,
            summary: String::new(),
            reconciled_at: Utc::now(),
        };
        report.summary = report.describe();
        report
    }

    fn calculate_credits(&self, transactions: &[&BankTransaction]) -> Decimal {
        transactions
            .iter()
            .filter(|tx| tx.transaction_type != TransactionType::Fee && tx.is_credit())
            .map(|tx| tx.amount)
            .sum()
    }

    fn calculate_debits(&self, transactions: &[&BankTransaction]) -> Decimal {
        transactions
            .iter()
            .filter(|tx| tx.transaction_type != TransactionType::Fee && tx.is_debit())
            .map(|tx| tx.amount.abs())
            .sum()
    }

    fn calculate_fees(&self, transactions: &[&BankTransaction]) -> Decimal {
        transactions
            .iter()
            .filter(|tx| tx.transaction_type == TransactionType::Fee)
            .map(|tx| tx.amount.abs())
            .sum()
    }

    fn detect_discrepancies(
        &self,
        transactions: &[&BankTransaction],
        statement: &StatementMetadata,
        difference: Decimal,
    ) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();

        if difference >= self.tolerance {
            discrepancies.push(Discrepancy {
                description: format!("Balance mismatch: {:.2} difference", difference),
                amount: difference,
                category: DiscrepancyCategory::AmountMismatch,
                transaction_id: None,
            });
        }

        // Same date, amount and description more than once
        let mut seen: HashMap<(NaiveDate, Decimal, String), i64> = HashMap::new();
        for tx in transactions {
            let key = (tx.transaction_date, tx.amount.normalize(), tx.description.to_lowercase());
            if let Some(first_id) = seen.get(&key) {
                discrepancies.push(Discrepancy {
                    description: format!(
                        "Possible duplicate of transaction {}: {} {:.2} on {}",
                        first_id, tx.description, tx.amount, tx.transaction_date
                    ),
                    amount: tx.amount,
                    category: DiscrepancyCategory::DuplicateTransaction,
                    transaction_id: Some(tx.id),
                });
            } else {
                seen.insert(key, tx.id);
            }
        }

        for tx in transactions {
            if tx.transaction_date < statement.period_start || tx.transaction_date > statement.period_end {
                discrepancies.push(Discrepancy {
                    description: format!(
                        "{} on {} falls outside {} to {}",
                        tx.description, tx.transaction_date, statement.period_start, statement.period_end
                    ),
                    amount: tx.amount,
                    category: DiscrepancyCategory::DateMismatch,
                    transaction_id: Some(tx.id),
                });
            }
        }

        // A running balance that does not follow from the previous one means
        // lines are missing in between.
        let mut previous: Option<Decimal> = None;
        for tx in transactions {
            let Some(running) = tx.running_balance else {
                previous = None;
                continue;
            };
            if let Some(before) = previous {
                let gap = running - (before + tx.amount);
                if gap.abs() >= self.tolerance {
                    discrepancies.push(Discrepancy {
                        description: format!(
                            "Running balance jumps by {:.2} before {} on {}",
                            gap, tx.description, tx.transaction_date
                        ),
                        amount: gap,
                        category: DiscrepancyCategory::MissingTransaction,
                        transaction_id: Some(tx.id),
                    });
                }
            }
            previous = Some(running);
        }

        discrepancies
    }

    /// Quick check if the lines take `opening_balance` to `expected_balance`.
    pub fn quick_balance_check(
        &self,
        transactions: &[BankTransaction],
        expected_balance: Decimal,
        opening_balance: Decimal,
    ) -> bool {
        let counted: Vec<&BankTransaction> = transactions.iter().collect();
        let calculated = opening_balance + self.calculate_credits(&counted)
            - self.calculate_debits(&counted)
            - self.calculate_fees(&counted);
        (calculated - expected_balance).abs() < self.tolerance
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the balance engine over a stored statement.
pub fn check_statement(conn: &Connection, company_id: i64, statement_id: i64) -> Result<ReconciliationReport> {
    let statement = get_statement(conn, company_id, statement_id)?;
    let account = get_bank_account(conn, company_id, statement.bank_account_id)?;
    let lines = list_transactions(conn, company_id, statement_id, None)?;

    let metadata = StatementMetadata {
        account_name: format!("{} {}", account.name, account.masked_account_number()),
        statement_period: format!("{} to {}", statement.period_start, statement.period_end),
        period_start: statement.period_start,
        period_end: statement.period_end,
        opening_balance: statement.beginning_balance,
        closing_balance: statement.ending_balance,
        statement_date: statement.statement_date,
    };

    let report = ReconciliationEngine::new().reconcile(&lines, &metadata);
    tracing::info!(
        company_id,
        statement_id,
        balanced = report.is_balanced(),
        difference = %report.result.difference(),
        "statement balance checked"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::bank::test_support::{account_and_statement, date, dec, MARCH_CSV};
    use crate::reconciliation::bank::import_statement_csv;

    fn line(id: i64, day: u32, amount: &str, kind: TransactionType) -> BankTransaction {
        BankTransaction {
            id,
            company_id: 1,
            statement_id: 1,
            transaction_date: date(2025, 1, day),
            description: format!("Test transaction {}", id),
            transaction_type: kind,
            amount: dec(amount),
            running_balance: None,
            check_number: String::new(),
            reference_number: String::new(),
            reconciliation_status: MatchStatus::Unreconciled,
            reconciled_at: None,
            reconciled_by: None,
            notes: String::new(),
            created_at: Utc::now(),
        }
    }

    fn january(opening: &str, closing: &str) -> StatementMetadata {
        StatementMetadata {
            account_name: "Test Account".to_string(),
            statement_period: "January 2025".to_string(),
            period_start: date(2025, 1, 1),
            period_end: date(2025, 1, 31),
            opening_balance: dec(opening),
            closing_balance: dec(closing),
            statement_date: date(2025, 1, 31),
        }
    }

    #[test]
    fn test_reconciliation_balanced() {
        let engine = ReconciliationEngine::new();

        let transactions = vec![
            line(1, 1, "2000.00", TransactionType::Deposit),
            line(2, 2, "-500.00", TransactionType::DebitCard),
            line(3, 3, "-300.00", TransactionType::Check),
            line(4, 4, "-15.00", TransactionType::Fee),
        ];

        // 1000 + 2000 - 800 - 15 = 2185
        let report = engine.reconcile(&transactions, &january("1000.00", "2185.00"));

        assert_eq!(report.transaction_count, 4);
        assert_eq!(report.total_credits, dec("2000.00"));
        assert_eq!(report.total_debits, dec("800.00"));
        assert_eq!(report.total_fees, dec("15.00"));
        assert_eq!(report.calculated_balance, dec("2185.00"));
        assert!(report.is_balanced());
        assert!(report.discrepancies.is_empty());

        println!("✅ Test passed: {}", report.summary);
    }

    #[test]
    fn test_reconciliation_minor_discrepancy() {
        let engine = ReconciliationEngine::new();

        let transactions = vec![
            line(1, 1, "2000.00", TransactionType::Deposit),
            line(2, 2, "-500.00", TransactionType::Withdrawal),
        ];

        let report = engine.reconcile(&transactions, &january("1000.00", "2495.00"));

        assert!(report.result.has_discrepancy());
        assert!(matches!(report.result, ReconciliationResult::MinorDiscrepancy { .. }));
        assert_eq!(report.result.difference(), dec("5.00"));
        assert_eq!(report.discrepancies.len(), 1);
        assert_eq!(report.discrepancies[0].category, DiscrepancyCategory::AmountMismatch);

        println!("✅ Test passed: {}", report.summary);
    }

    #[test]
    fn test_reconciliation_major_discrepancy_names_gaps() {
        let engine = ReconciliationEngine::new();

        let mut first = line(1, 1, "2000.00", TransactionType::Deposit);
        first.running_balance = Some(dec("3000.00"));
        let mut second = line(2, 5, "-100.00", TransactionType::Withdrawal);
        // 3000 - 100 should be 2900; a 400.00 withdrawal is missing
        second.running_balance = Some(dec("2500.00"));

        let report = engine.reconcile(&[first, second], &january("1000.00", "2500.00"));

        match &report.result {
            ReconciliationResult::MajorDiscrepancy { difference, missing_transactions, .. } => {
                assert_eq!(*difference, dec("400.00"));
                assert_eq!(missing_transactions.len(), 1);
            }
            other => panic!("expected a major discrepancy, got {:?}", other),
        }

        println!("✅ Test passed: {}", report.summary);
    }

    #[test]
    fn test_duplicates_and_out_of_period_lines() {
        let engine = ReconciliationEngine::new();

        let mut twin = line(2, 3, "-42.00", TransactionType::DebitCard);
        twin.description = "Test transaction 1".into();
        let mut void = line(4, 9, "-999.00", TransactionType::Withdrawal);
        void.reconciliation_status = MatchStatus::Void;
        let mut late = line(3, 3, "42.00", TransactionType::Deposit);
        late.transaction_date = date(2025, 2, 2);

        let transactions = vec![line(1, 3, "-42.00", TransactionType::DebitCard), twin, late, void];
        let report = engine.reconcile(&transactions, &january("100.00", "58.00"));

        assert!(report.is_balanced());
        assert_eq!(report.transaction_count, 3);
        let categories: Vec<_> = report.discrepancies.iter().map(|d| d.category.clone()).collect();
        assert!(categories.contains(&DiscrepancyCategory::DuplicateTransaction));
        assert!(categories.contains(&DiscrepancyCategory::DateMismatch));

        println!("✅ Duplicate/date discrepancy test passed");
    }

    #[test]
    fn test_quick_balance_check() {
        let engine = ReconciliationEngine::new();

        let transactions = vec![
            line(1, 1, "2000.00", TransactionType::Deposit),
            line(2, 2, "-500.00", TransactionType::Withdrawal),
        ];

        assert!(engine.quick_balance_check(&transactions, dec("2500.00"), dec("1000.00")));
        assert!(!engine.quick_balance_check(&transactions, dec("2000.00"), dec("1000.00")));

        println!("✅ Quick balance check test passed");
    }

    #[test]
    fn test_check_stored_statement() {
        let conn = crate::db::open_in_memory().unwrap();
        let ctx = crate::tenancy::fixtures::admin_context(&conn);
        let (_, statement) = account_and_statement(&conn, &ctx);
        import_statement_csv(&conn, &ctx, statement.id, MARCH_CSV.as_bytes()).unwrap();

        // 1000 + 500 - 250 - 50 = 1200
        let report = check_statement(&conn, ctx.company_id, statement.id).unwrap();
        assert!(report.is_balanced());
        assert!(report.summary.contains("******5678"));

        println!("✅ Stored statement check passed: {}", report.summary);
    }
}
