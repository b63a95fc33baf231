// 🏷️ Matching Rules - rules as data
//
// A rule scores a statement line 0-100. Auto-match marks the line matched
// when the score reaches the rule's threshold.

use super::bank::BankTransaction;
use super::RuleType;
use crate::db::{record_event, Filter};
use crate::error::{LedgerError, Result};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE_THRESHOLD: i64 = 80;

// ============================================================================
// RULE DEFINITION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationRule {
    pub id: i64,
    pub company_id: i64,
    pub name: String,
    pub rule_type: RuleType,

    /// Supports `*` wildcards; otherwise a case-insensitive substring.
    pub description_pattern: String,

    pub amount_min: Option<Decimal>,
    pub amount_max: Option<Decimal>,
    pub check_number_pattern: String,
    pub reference_pattern: String,

    /// Mark lines matched automatically, or only report the hit.
    pub auto_match: bool,

    /// 1-100
    pub confidence_threshold: i64,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Unicode lowercase, shared by every text comparison a rule makes.
fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Check if `pattern` matches `text`, case-insensitively.
///
/// With `*` the first part must start the text, the last part must end it and
/// the parts in between must appear in order. Without `*` it is a substring
/// test.
pub fn pattern_matches(pattern: &str, text: &str) -> bool {
    let pattern_lower = fold_case(pattern.trim());
    let text_lower = fold_case(text);

    if pattern_lower.is_empty() {
        return false;
    }

    if !pattern_lower.contains('*') {
        return text_lower.contains(&pattern_lower);
    }

    let parts: Vec<&str> = pattern_lower.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];

    if !first.is_empty() && !text_lower.starts_with(first) {
        return false;
    }
    if !last.is_empty() && !text_lower.ends_with(last) {
        return false;
    }
    // the prefix and suffix must not overlap
    if first.len() + last.len() > text_lower.len() {
        return false;
    }

    let end = text_lower.len() - last.len();
    let mut current_pos = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text_lower[current_pos..end].find(part) {
            Some(pos) => current_pos += pos + part.len(),
            None => return false,
        }
    }

    true
}

impl ReconciliationRule {
    fn description_matches(&self, tx: &BankTransaction) -> bool {
        pattern_matches(&self.description_pattern, &tx.description)
    }

    fn description_equals(&self, tx: &BankTransaction) -> bool {
        let pattern = self.description_pattern.trim();
        !pattern.is_empty() && fold_case(tx.description.trim()) == fold_case(pattern)
    }

    /// Both bounds: inclusive range. One bound alone: equality.
    fn amount_equals(&self, amount: Decimal) -> bool {
        match (self.amount_min, self.amount_max) {
            (Some(min), Some(max)) => min <= amount && amount <= max,
            (Some(bound), None) | (None, Some(bound)) => amount == bound,
            (None, None) => false,
        }
    }

    /// One bound alone leaves the other side open.
    fn amount_in_range(&self, amount: Decimal) -> bool {
        match (self.amount_min, self.amount_max) {
            (None, None) => false,
            (min, max) => min.map_or(true, |m| amount >= m) && max.map_or(true, |m| amount <= m),
        }
    }

    fn field_matches(pattern: &str, value: &str) -> bool {
        !value.trim().is_empty() && pattern_matches(pattern, value)
    }

    /// Every configured criterion must hold, and at least one must be configured.
    fn all_criteria_match(&self, tx: &BankTransaction) -> bool {
        let mut checks = Vec::new();
        if !self.description_pattern.trim().is_empty() {
            checks.push(self.description_matches(tx));
        }
        if self.amount_min.is_some() || self.amount_max.is_some() {
            checks.push(self.amount_in_range(tx.amount));
        }
        if !self.check_number_pattern.trim().is_empty() {
            checks.push(Self::field_matches(&self.check_number_pattern, &tx.check_number));
        }
        if !self.reference_pattern.trim().is_empty() {
            checks.push(Self::field_matches(&self.reference_pattern, &tx.reference_number));
        }
        !checks.is_empty() && checks.into_iter().all(|ok| ok)
    }

    /// Match confidence 0-100 for one statement line.
    pub fn confidence(&self, tx: &BankTransaction) -> i64 {
        let (hit, score) = match self.rule_type {
            RuleType::DescriptionContains => (self.description_matches(tx), 90),
            RuleType::DescriptionExact => (self.description_equals(tx), 100),
            RuleType::AmountExact => (self.amount_equals(tx.amount), 95),
            RuleType::AmountRange => (self.amount_in_range(tx.amount), 85),
            RuleType::CheckNumber => (Self::field_matches(&self.check_number_pattern, &tx.check_number), 95),
            RuleType::ReferenceNumber => (Self::field_matches(&self.reference_pattern, &tx.reference_number), 95),
            RuleType::Combined => (self.all_criteria_match(tx), 98),
        };
        if hit {
            score
        } else {
            0
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NewReconciliationRule {
    pub name: String,
    pub rule_type: RuleType,
    #[serde(default)]
    pub description_pattern: String,
    pub amount_min: Option<Decimal>,
    pub amount_max: Option<Decimal>,
    #[serde(default)]
    pub check_number_pattern: String,
    #[serde(default)]
    pub reference_pattern: String,
    #[serde(default)]
    pub auto_match: bool,
    pub confidence_threshold: Option<i64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewReconciliationRule {
    fn validate(&self) -> Result<i64> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::validation("rule name is required"));
        }
        let threshold = self.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        if !(1..=100).contains(&threshold) {
            return Err(LedgerError::validation("confidence threshold must be between 1 and 100"));
        }
        for bound in self.amount_min.iter().chain(self.amount_max.iter()) {
            money::ensure_amount("rule amount", *bound)?;
        }
        if let (Some(min), Some(max)) = (self.amount_min, self.amount_max) {
            if min > max {
                return Err(LedgerError::validation("amount_min must not exceed amount_max"));
            }
        }

        let has_amount = self.amount_min.is_some() || self.amount_max.is_some();
        let missing = match self.rule_type {
            RuleType::DescriptionContains | RuleType::DescriptionExact => {
                self.description_pattern.trim().is_empty().then_some("description_pattern")
            }
            RuleType::AmountExact | RuleType::AmountRange => (!has_amount).then_some("amount_min or amount_max"),
            RuleType::CheckNumber => self.check_number_pattern.trim().is_empty().then_some("check_number_pattern"),
            RuleType::ReferenceNumber => self.reference_pattern.trim().is_empty().then_some("reference_pattern"),
            RuleType::Combined => {
                let nothing = self.description_pattern.trim().is_empty()
                    && !has_amount
                    && self.check_number_pattern.trim().is_empty()
                    && self.reference_pattern.trim().is_empty();
                nothing.then_some("at least one criterion")
            }
        };
        if let Some(field) = missing {
            return Err(LedgerError::validation(format!("{} rules need {}", self.rule_type, field)));
        }
        Ok(threshold)
    }
}

const RULE_COLUMNS: &str = "id, company_id, name, rule_type, description_pattern, amount_min, amount_max,
     check_number_pattern, reference_pattern, auto_match, confidence_threshold, is_active, created_at";

fn row_to_rule(row: &Row<'_>) -> rusqlite::Result<ReconciliationRule> {
    Ok(ReconciliationRule {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        name: row.get("name")?,
        rule_type: row.get("rule_type")?,
        description_pattern: row.get("description_pattern")?,
        amount_min: money::get_opt(row, "amount_min")?,
        amount_max: money::get_opt(row, "amount_max")?,
        check_number_pattern: row.get("check_number_pattern")?,
        reference_pattern: row.get("reference_pattern")?,
        auto_match: row.get("auto_match")?,
        confidence_threshold: row.get("confidence_threshold")?,
        is_active: row.get("is_active")?,
        created_at: row.get("created_at")?,
    })
}

pub fn create_rule(conn: &Connection, ctx: &TenantContext, new: &NewReconciliationRule) -> Result<ReconciliationRule> {
    ctx.require_finance_role("creating a reconciliation rule")?;
    let threshold = new.validate()?;

    conn.execute(
        "INSERT INTO reconciliation_rules (company_id, name, rule_type, description_pattern, amount_min, amount_max,
                                           check_number_pattern, reference_pattern, auto_match,
                                           confidence_threshold, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            ctx.company_id,
            new.name.trim(),
            new.rule_type,
            new.description_pattern.trim(),
            money::opt_to_sql(&new.amount_min),
            money::opt_to_sql(&new.amount_max),
            new.check_number_pattern.trim(),
            new.reference_pattern.trim(),
            new.auto_match,
            threshold,
            new.is_active,
            Utc::now(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_rule_created", "reconciliation_rule", id, serde_json::json!({
        "name": new.name.trim(),
        "rule_type": new.rule_type,
    }))?;
    get_rule(conn, ctx.company_id, id)
}

pub fn get_rule(conn: &Connection, company_id: i64, rule_id: i64) -> Result<ReconciliationRule> {
    conn.query_row(
        &format!("SELECT {} FROM reconciliation_rules WHERE company_id = ?1 AND id = ?2", RULE_COLUMNS),
        params![company_id, rule_id],
        row_to_rule,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("reconciliation rule", rule_id))
}

/// Rules in name order, the order auto-match tries them in.
pub fn list_rules(conn: &Connection, company_id: i64, active_only: bool) -> Result<Vec<ReconciliationRule>> {
    let mut f = Filter::for_company("company_id", company_id);
    if active_only {
        f.push("is_active = ?", true);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM reconciliation_rules {} ORDER BY name, id",
        RULE_COLUMNS,
        f.where_sql()
    ))?;
    let rules = stmt
        .query_map(f.params(), row_to_rule)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub fn update_rule(
    conn: &Connection,
    ctx: &TenantContext,
    rule_id: i64,
    update: &NewReconciliationRule,
) -> Result<ReconciliationRule> {
    ctx.require_finance_role("editing a reconciliation rule")?;
    get_rule(conn, ctx.company_id, rule_id)?;
    let threshold = update.validate()?;

    conn.execute(
        "UPDATE reconciliation_rules SET name = ?1, rule_type = ?2, description_pattern = ?3, amount_min = ?4,
                amount_max = ?5, check_number_pattern = ?6, reference_pattern = ?7, auto_match = ?8,
                confidence_threshold = ?9, is_active = ?10
         WHERE company_id = ?11 AND id = ?12",
        params![
            update.name.trim(),
            update.rule_type,
            update.description_pattern.trim(),
            money::opt_to_sql(&update.amount_min),
            money::opt_to_sql(&update.amount_max),
            update.check_number_pattern.trim(),
            update.reference_pattern.trim(),
            update.auto_match,
            threshold,
            update.is_active,
            ctx.company_id,
            rule_id,
        ],
    )?;

    record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_rule_updated", "reconciliation_rule", rule_id, serde_json::json!({}))?;
    get_rule(conn, ctx.company_id, rule_id)
}

pub fn delete_rule(conn: &Connection, ctx: &TenantContext, rule_id: i64) -> Result<()> {
    ctx.require_finance_role("deleting a reconciliation rule")?;
    get_rule(conn, ctx.company_id, rule_id)?;
    conn.execute(
        "DELETE FROM reconciliation_rules WHERE company_id = ?1 AND id = ?2",
        params![ctx.company_id, rule_id],
    )?;
    record_event(conn, ctx.company_id, &ctx.actor(), "reconciliation_rule_deleted", "reconciliation_rule", rule_id, serde_json::json!({}))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn rule(name: &str, rule_type: RuleType) -> NewReconciliationRule {
        NewReconciliationRule {
            name: name.into(),
            rule_type,
            description_pattern: String::new(),
            amount_min: None,
            amount_max: None,
            check_number_pattern: String::new(),
            reference_pattern: String::new(),
            auto_match: true,
            confidence_threshold: None,
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::rule;
    use super::*;
    use crate::db::open_in_memory;
    use crate::reconciliation::bank::test_support::{date, dec};
    use crate::reconciliation::{MatchStatus, TransactionType};
    use crate::tenancy::fixtures::admin_context;

    fn stored(new: NewReconciliationRule) -> ReconciliationRule {
        ReconciliationRule {
            id: 1,
            company_id: 1,
            name: new.name,
            rule_type: new.rule_type,
            description_pattern: new.description_pattern,
            amount_min: new.amount_min,
            amount_max: new.amount_max,
            check_number_pattern: new.check_number_pattern,
            reference_pattern: new.reference_pattern,
            auto_match: new.auto_match,
            confidence_threshold: new.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            is_active: new.is_active,
            created_at: Utc::now(),
        }
    }

    fn line(description: &str, amount: &str) -> BankTransaction {
        BankTransaction {
            id: 1,
            company_id: 1,
            statement_id: 1,
            transaction_date: date(2025, 3, 3),
            description: description.into(),
            transaction_type: TransactionType::Other,
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

    #[test]
    fn test_exact_pattern_match() {
        assert!(pattern_matches("STARBUCKS", "Starbucks Coffee #123"));
        assert!(pattern_matches("starbucks", "STARBUCKS"));
        assert!(!pattern_matches("STARBUCKS", "Peet's Coffee"));
        assert!(!pattern_matches("", "anything"));
        println!("✅ Substring pattern test passed");
    }

    #[test]
    fn test_wildcard_pattern_match() {
        assert!(pattern_matches("STRIPE*", "Stripe, Des:transfer"));
        assert!(pattern_matches("*TRANSFER", "Stripe transfer"));
        assert!(pattern_matches("POS*MART*ACCRA", "POS PURCHASE MAXMART EAST ACCRA"));
        assert!(!pattern_matches("POS*MART*ACCRA", "POS PURCHASE ACCRA MART"));
        assert!(!pattern_matches("ab*ba", "aba"));
        println!("✅ Wildcard pattern test passed");
    }

    #[test]
    fn test_confidence_per_rule_type() {
        let mut contains = rule("Rent", RuleType::DescriptionContains);
        contains.description_pattern = "rent".into();
        assert_eq!(stored(contains).confidence(&line("Office RENT March", "-250.00")), 90);

        let mut exact = rule("Fee", RuleType::DescriptionExact);
        exact.description_pattern = "monthly service fee".into();
        let exact = stored(exact);
        assert_eq!(exact.confidence(&line("Monthly Service Fee", "-50.00")), 100);
        assert_eq!(exact.confidence(&line("Monthly Service Fee refund", "50.00")), 0);

        let mut accented = rule("Café", RuleType::DescriptionExact);
        accented.description_pattern = "café ÉCLAIR".into();
        let accented = stored(accented);
        assert_eq!(accented.confidence(&line("CAFÉ éclair", "-8.50")), 100);
        assert!(pattern_matches("CAFÉ*", "café éclair"));

        let mut amount = rule("Payroll", RuleType::AmountExact);
        amount.amount_min = Some(dec("-1500.00"));
        let amount = stored(amount);
        assert_eq!(amount.confidence(&line("Anything", "-1500.00")), 95);
        assert_eq!(amount.confidence(&line("Anything", "-1499.99")), 0);

        let mut range = rule("Small card", RuleType::AmountRange);
        range.amount_min = Some(dec("-100.00"));
        range.amount_max = Some(dec("0"));
        assert_eq!(stored(range).confidence(&line("Card", "-42.00")), 85);

        let mut check = rule("Checks", RuleType::CheckNumber);
        check.check_number_pattern = "10*".into();
        let check = stored(check);
        let mut cheque = line("Check", "-250.00");
        cheque.check_number = "1042".into();
        assert_eq!(check.confidence(&cheque), 95);
        assert_eq!(check.confidence(&line("Check", "-250.00")), 0);

        let mut combined = rule("Stripe payouts", RuleType::Combined);
        combined.description_pattern = "stripe*".into();
        combined.amount_min = Some(dec("0.01"));
        let combined = stored(combined);
        assert_eq!(combined.confidence(&line("Stripe payout", "120.00")), 98);
        assert_eq!(combined.confidence(&line("Stripe refund", "-120.00")), 0);

        println!("✅ Rule confidence test passed");
    }

    #[test]
    fn test_rule_validation_and_order() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);

        let blank = create_rule(&conn, &ctx, &rule("No pattern", RuleType::DescriptionContains));
        assert!(matches!(blank, Err(LedgerError::Validation(_))));

        let mut too_high = rule("Too high", RuleType::AmountRange);
        too_high.amount_max = Some(dec("10"));
        too_high.confidence_threshold = Some(101);
        assert!(create_rule(&conn, &ctx, &too_high).is_err());

        let mut zebra = rule("Zebra", RuleType::ReferenceNumber);
        zebra.reference_pattern = "INV-*".into();
        create_rule(&conn, &ctx, &zebra).unwrap();
        let mut alpha = rule("Alpha", RuleType::DescriptionContains);
        alpha.description_pattern = "fee".into();
        alpha.is_active = false;
        let alpha = create_rule(&conn, &ctx, &alpha).unwrap();
        assert_eq!(alpha.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);

        let names: Vec<String> = list_rules(&conn, ctx.company_id, false).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Alpha", "Zebra"]);
        assert_eq!(list_rules(&conn, ctx.company_id, true).unwrap().len(), 1);

        delete_rule(&conn, &ctx, alpha.id).unwrap();
        assert!(get_rule(&conn, ctx.company_id, alpha.id).is_err());

        println!("✅ Rule store test passed");
    }
}
