// 💰 Money - Decimal helpers and the SQLite text codec
//
// Amounts are `rust_decimal::Decimal` everywhere. SQLite has no decimal type,
// so amounts are stored as TEXT and summed here instead of with SQL SUM().

use crate::error::{LedgerError, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Params, Row, RowIndex};
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Largest absolute amount accepted from callers: one trillion.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Largest quantity on a single line: one million units.
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Reject amounts outside `±MAX_AMOUNT`. Products and sums of bounded values
/// then stay far inside `Decimal`'s range.
pub fn ensure_amount(label: &str, amount: Decimal) -> Result<Decimal> {
    if amount.abs() > MAX_AMOUNT {
        return Err(LedgerError::validation(format!("{} exceeds the maximum of {}", label, MAX_AMOUNT)));
    }
    Ok(amount)
}

pub fn ensure_quantity(label: &str, quantity: Decimal) -> Result<Decimal> {
    if quantity.abs() > MAX_QUANTITY {
        return Err(LedgerError::validation(format!("{} exceeds the maximum of {}", label, MAX_QUANTITY)));
    }
    Ok(quantity)
}

/// `a + b`, with overflow reported as a validation error.
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::validation("amount is out of range"))
}

/// `a × b`, with overflow reported as a validation error.
pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::validation("amount is out of range"))
}

/// Round to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `base × rate / 100`, rounded to cents.
pub fn percent_of(base: Decimal, rate_percent: Decimal) -> Decimal {
    round_money(base * rate_percent / Decimal::ONE_HUNDRED)
}

/// Percentage change from `old` to `new`.
///
/// A zero baseline reports 100 when anything appeared and 0 otherwise.
pub fn percentage_change(old: Decimal, new: Decimal) -> Decimal {
    if old.is_zero() {
        return if new > Decimal::ZERO { Decimal::ONE_HUNDRED } else { Decimal::ZERO };
    }
    round_money((new - old) / old.abs() * Decimal::ONE_HUNDRED)
}

/// Parse an amount as it appears in bank exports.
///
/// Accepts `1234.50`, `1,234.50`, `$12`, `-7.10` and accounting negatives `(45.00)`.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    let (negative, body) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();

    if cleaned.is_empty() {
        return Err(LedgerError::validation(format!("empty amount '{}'", raw)));
    }

    let value = Decimal::from_str(&cleaned)
        .map_err(|_| LedgerError::validation(format!("invalid amount '{}'", raw)))?;

    Ok(if negative { -value.abs() } else { value })
}

// ============================================================================
// SQLITE CODEC
// ============================================================================

/// Text form written to SQLite.
pub fn to_sql(amount: &Decimal) -> String {
    amount.to_string()
}

pub fn opt_to_sql(amount: &Option<Decimal>) -> Option<String> {
    amount.as_ref().map(to_sql)
}

fn decode(text: &str) -> rusqlite::Result<Decimal> {
    Decimal::from_str(text.trim())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))
}

/// Read a non-null decimal column.
pub fn get<I: RowIndex>(row: &Row<'_>, idx: I) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    decode(&text)
}

/// Read a nullable decimal column.
pub fn get_opt<I: RowIndex>(row: &Row<'_>, idx: I) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.as_deref().map(decode).transpose()
}

/// Sum the first column of every row returned by `sql`.
pub fn sum<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Decimal> {
    let mut stmt = conn.prepare(sql)?;
    let amounts = stmt
        .query_map(params, |row| get_opt(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    total(amounts.into_iter().flatten())
}

/// Add up amounts, failing instead of overflowing.
pub fn total<I: IntoIterator<Item = Decimal>>(amounts: I) -> Result<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, checked_add)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(dec("2.345")), dec("2.35"));
        assert_eq!(round_money(dec("-2.345")), dec("-2.35"));
        assert_eq!(round_money(dec("10")), dec("10"));
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec("200"), dec("12.5")), dec("25.00"));
        assert_eq!(percent_of(dec("19.99"), dec("15")), dec("3.00"));
    }

    #[test]
    fn test_percentage_change() {
        assert_eq!(percentage_change(dec("100"), dec("150")), dec("50"));
        assert_eq!(percentage_change(dec("200"), dec("100")), dec("-50"));
        assert_eq!(percentage_change(Decimal::ZERO, dec("5")), Decimal::ONE_HUNDRED);
        assert_eq!(percentage_change(Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("1,234.50").unwrap(), dec("1234.50"));
        assert_eq!(parse_amount(" $12 ").unwrap(), dec("12"));
        assert_eq!(parse_amount("-7.10").unwrap(), dec("-7.10"));
        assert_eq!(parse_amount("(45.00)").unwrap(), dec("-45.00"));
        assert!(parse_amount("").is_err());
        assert!(parse_amount("twelve").is_err());

        println!("✅ Amount parsing test passed");
    }

    #[test]
    fn test_amount_bounds_and_checked_math() {
        assert_eq!(MAX_AMOUNT, dec("1000000000000"));
        assert_eq!(MAX_QUANTITY, dec("1000000"));
        assert!(ensure_amount("amount", dec("999999999999.99")).is_ok());
        assert!(ensure_amount("amount", dec("-1000000000000.01")).is_err());
        assert!(ensure_quantity("quantity", dec("1000001")).is_err());

        assert!(matches!(checked_mul(Decimal::MAX, dec("2")), Err(LedgerError::Validation(_))));
        assert!(matches!(checked_add(Decimal::MAX, Decimal::ONE), Err(LedgerError::Validation(_))));
        assert_eq!(checked_mul(dec("2.5"), dec("4")).unwrap(), dec("10.0"));

        println!("✅ Amount bounds test passed");
    }

    #[test]
    fn test_sum_reads_text_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (amount TEXT);
             INSERT INTO t VALUES ('0.1'), ('0.2'), (NULL), ('-0.05');",
        )
        .unwrap();

        let total = sum(&conn, "SELECT amount FROM t", []).unwrap();
        assert_eq!(total, dec("0.25"));
    }
}
