// 🔢 Invoice numbering - INV-00001, INV-00002, ... per company
//
// The next number is derived from the highest number already issued. Two
// writers can still race to the same number (another process on the same
// database file), so allocation runs in a short retry loop: a unique-constraint
// or busy failure backs off and recomputes.

use crate::db::{atomically, is_busy, is_constraint_violation};
use crate::error::Result;
use rusqlite::{params, Connection};
use std::time::Duration;

pub const INVOICE_PREFIX: &str = "INV-";
pub const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_STEP: Duration = Duration::from_millis(100);

/// Sequence number of `INV-NNNNN` or the legacy `INV-NNNNN-SSS` form.
pub fn parse_invoice_sequence(number: &str) -> Option<u64> {
    let rest = number.strip_prefix(INVOICE_PREFIX)?;
    let mut parts = rest.split('-');

    let sequence = parts.next()?;
    let suffix = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(sequence) || !suffix.map_or(true, all_digits) {
        return None;
    }
    sequence.parse().ok()
}

pub fn format_invoice_number(sequence: u64) -> String {
    format!("{}{:05}", INVOICE_PREFIX, sequence)
}

/// Highest issued sequence + 1. Numbers that do not follow the pattern are ignored.
pub fn next_invoice_number(conn: &Connection, company_id: i64) -> Result<String> {
    let mut stmt = conn.prepare("SELECT invoice_number FROM invoices WHERE company_id = ?1 AND invoice_number LIKE 'INV-%'")?;
    let highest = stmt
        .query_map(params![company_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .iter()
        .filter_map(|number| parse_invoice_sequence(number))
        .max()
        .unwrap_or(0);

    Ok(format_invoice_number(highest + 1))
}

/// Run `insert` with a freshly allocated number until it sticks.
///
/// Each attempt is its own atomic unit: the number is computed and used under
/// the same write lock. Non-retryable errors are returned immediately; after
/// `MAX_ATTEMPTS` the last error is returned.
pub fn allocate_with_retry<T, F>(conn: &Connection, company_id: i64, mut insert: F) -> Result<T>
where
    F: FnMut(&Connection, &str) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        let result = atomically(conn, |conn| {
            let number = next_invoice_number(conn, company_id)?;
            insert(conn, &number)
        });

        match result {
            Err(e) if (is_constraint_violation(&e) || is_busy(&e)) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                tracing::warn!(company_id, attempt, error = %e, "invoice number collision, retrying");
                std::thread::sleep(BACKOFF_STEP * attempt);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use std::cell::Cell;

    #[test]
    fn test_parse_invoice_sequence() {
        assert_eq!(parse_invoice_sequence("INV-00042"), Some(42));
        assert_eq!(parse_invoice_sequence("INV-00007-513"), Some(7));
        assert_eq!(parse_invoice_sequence("INV-12"), Some(12));
        assert_eq!(parse_invoice_sequence("INV-"), None);
        assert_eq!(parse_invoice_sequence("INV-12-ab"), None);
        assert_eq!(parse_invoice_sequence("INV-1-2-3"), None);
        assert_eq!(parse_invoice_sequence("2024-001"), None);

        assert_eq!(format_invoice_number(42), "INV-00042");
        assert_eq!(format_invoice_number(123456), "INV-123456");
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let conn = crate::db::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE taken (n TEXT UNIQUE); INSERT INTO taken VALUES ('x');")
            .unwrap();

        let calls = Cell::new(0);
        let result: Result<()> = allocate_with_retry(&conn, 1, |conn, _number| {
            calls.set(calls.get() + 1);
            conn.execute("INSERT INTO taken VALUES ('x')", [])?;
            Ok(())
        });

        assert!(matches!(result, Err(LedgerError::Database(_))));
        assert_eq!(calls.get(), MAX_ATTEMPTS);
    }

    #[test]
    fn test_retry_stops_on_non_retryable_error() {
        let conn = crate::db::open_in_memory().unwrap();
        let calls = Cell::new(0);
        let result: Result<()> = allocate_with_retry(&conn, 1, |_, _| {
            calls.set(calls.get() + 1);
            Err(LedgerError::validation("no items"))
        });

        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(calls.get(), 1);
    }
}
