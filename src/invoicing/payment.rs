// 💵 Payments - money received against an invoice
//
// Recording a payment raises `amount_paid`, settles the invoice once it is
// covered, and posts Dr <cash account> / Cr Sales Revenue.

use super::invoice::get_invoice;
use super::{InvoiceStatus, PaymentMethod};
use crate::db::{atomically, record_event};
use crate::error::{LedgerError, Result};
use crate::ledger::{self, AccountCategory, Posting};
use crate::money;
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const REVENUE_ACCOUNT: &str = "Sales Revenue";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub company_id: i64,
    pub invoice_id: i64,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub payment_date: NaiveDate,
    pub reference_number: String,
    pub notes: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayment {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    /// Defaults to today.
    pub payment_date: Option<NaiveDate>,
    #[serde(default)]
    pub reference_number: String,
    #[serde(default)]
    pub notes: String,
}

const PAYMENT_COLUMNS: &str = "id, company_id, invoice_id, amount, payment_method, payment_date,
     reference_number, notes, created_by, created_at";

fn row_to_payment(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        invoice_id: row.get("invoice_id")?,
        amount: money::get(row, "amount")?,
        payment_method: row.get("payment_method")?,
        payment_date: row.get("payment_date")?,
        reference_number: row.get("reference_number")?,
        notes: row.get("notes")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

/// Record a payment and post it to the ledger.
pub fn record_payment(
    conn: &Connection,
    ctx: &TenantContext,
    invoice_id: i64,
    new: &NewPayment,
    today: NaiveDate,
) -> Result<Payment> {
    if new.amount <= Decimal::ZERO {
        return Err(LedgerError::validation("payment amount must be positive"));
    }
    let amount = money::round_money(money::ensure_amount("payment amount", new.amount)?);
    let payment_date = new.payment_date.unwrap_or(today);

    // The invoice is read under the write lock taken by BEGIN IMMEDIATE.
    let payment_id = atomically(conn, |conn| {
        let invoice = get_invoice(conn, ctx.company_id, invoice_id)?;
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(LedgerError::transition("invoice", invoice.status, "record a payment on"));
        }

        conn.execute(
            "INSERT INTO payments (company_id, invoice_id, amount, payment_method, payment_date,
                                   reference_number, notes, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ctx.company_id,
                invoice.id,
                money::to_sql(&amount),
                new.payment_method,
                payment_date,
                new.reference_number,
                new.notes,
                ctx.user_id,
                Utc::now(),
            ],
        )?;
        let payment_id = conn.last_insert_rowid();

        let amount_paid = money::checked_add(invoice.amount_paid, amount)?;
        let settled = amount_paid >= invoice.total_amount;
        let status = if settled { InvoiceStatus::Paid } else { invoice.status };

        conn.execute(
            "UPDATE invoices SET amount_paid = ?1, status = ?2, date_paid = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                money::to_sql(&amount_paid),
                status,
                if settled { Some(payment_date) } else { invoice.date_paid },
                Utc::now(),
                invoice.id,
            ],
        )?;

        ledger::post_simple(
            conn,
            ctx,
            &Posting {
                reference_type: "payment",
                reference_id: payment_id,
                date: payment_date,
                description: format!("Payment for {}", invoice.invoice_number),
                debit_account: (new.payment_method.ledger_account(), AccountCategory::Asset),
                credit_account: (REVENUE_ACCOUNT, AccountCategory::Revenue),
                amount,
            },
        )?;

        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "payment_recorded",
            "invoice",
            invoice.id,
            serde_json::json!({
                "payment_id": payment_id,
                "amount": amount,
                "method": new.payment_method,
                "status": status,
            }),
        )?;
        Ok(payment_id)
    })?;

    tracing::info!(
        company_id = ctx.company_id,
        invoice_id,
        amount = %amount,
        "payment recorded"
    );
    get_payment(conn, ctx.company_id, payment_id)
}

pub fn get_payment(conn: &Connection, company_id: i64, payment_id: i64) -> Result<Payment> {
    conn.query_row(
        &format!("SELECT {} FROM payments WHERE company_id = ?1 AND id = ?2", PAYMENT_COLUMNS),
        params![company_id, payment_id],
        row_to_payment,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("payment", payment_id))
}

/// Remove a payment, reopen the invoice if it drops below its total, and
/// delete the journal entry.
pub fn delete_payment(conn: &Connection, ctx: &TenantContext, payment_id: i64, today: NaiveDate) -> Result<()> {
    ctx.require_finance_role("deleting a payment")?;

    let invoice_id = atomically(conn, |conn| {
        let payment = get_payment(conn, ctx.company_id, payment_id)?;
        let invoice = get_invoice(conn, ctx.company_id, payment.invoice_id)?;

        let amount_paid = (invoice.amount_paid - payment.amount).max(Decimal::ZERO);
        let reopened = invoice.status == InvoiceStatus::Paid && amount_paid < invoice.total_amount;
        let status = if !reopened {
            invoice.status
        } else if invoice.date_due < today {
            InvoiceStatus::Overdue
        } else {
            InvoiceStatus::Sent
        };

        ledger::delete_entries_for_reference(conn, ctx, "payment", payment.id)?;
        conn.execute("DELETE FROM payments WHERE id = ?1", params![payment.id])?;
        conn.execute(
            "UPDATE invoices SET amount_paid = ?1, status = ?2, date_paid = ?3, updated_at = ?4 WHERE id = ?5",
            params![
                money::to_sql(&amount_paid),
                status,
                if reopened { None } else { invoice.date_paid },
                Utc::now(),
                invoice.id,
            ],
        )?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "payment_deleted",
            "invoice",
            invoice.id,
            serde_json::json!({ "payment_id": payment.id, "amount": payment.amount, "status": status }),
        )?;
        Ok(invoice.id)
    })?;

    tracing::info!(company_id = ctx.company_id, invoice_id, payment_id, "payment deleted");
    Ok(())
}

/// Payments on one invoice, oldest first.
pub fn list_payments(conn: &Connection, company_id: i64, invoice_id: i64) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payments WHERE company_id = ?1 AND invoice_id = ?2 ORDER BY payment_date, id",
        PAYMENT_COLUMNS
    ))?;
    let payments = stmt
        .query_map(params![company_id, invoice_id], row_to_payment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(payments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_database, open_in_memory};
    use crate::invoicing::invoice::test_support::*;
    use crate::invoicing::invoice::{delete_invoice, send_invoice};
    use crate::ledger::{find_entry_for_reference, trial_balance};
    use crate::tenancy::fixtures::{admin_context, member_context};
    use crate::tenancy::Role;

    fn pay(amount: &str, method: PaymentMethod) -> NewPayment {
        NewPayment {
            amount: dec(amount),
            payment_method: method,
            payment_date: Some(date(2025, 1, 20)),
            reference_number: String::new(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_partial_then_full_payment() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let invoice = draft_invoice(&conn, &ctx);
        send_invoice(&conn, &ctx, invoice.id).unwrap();

        let first = record_payment(&conn, &ctx, invoice.id, &pay("100.00", PaymentMethod::Cash), date(2025, 1, 20)).unwrap();
        let partly = get_invoice(&conn, ctx.company_id, invoice.id).unwrap();
        assert_eq!(partly.status, InvoiceStatus::Sent);
        assert_eq!(partly.balance_due, dec("130.00"));

        record_payment(&conn, &ctx, invoice.id, &pay("130.00", PaymentMethod::BankTransfer), date(2025, 1, 20)).unwrap();
        let paid = get_invoice(&conn, ctx.company_id, invoice.id).unwrap();
        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.date_paid, Some(date(2025, 1, 20)));
        assert_eq!(paid.balance_due, Decimal::ZERO);

        assert!(find_entry_for_reference(&conn, ctx.company_id, "payment", first.id).unwrap().is_some());
        let tb = trial_balance(&conn, ctx.company_id, None).unwrap();
        assert!(tb.is_balanced());
        assert_eq!(tb.total_debits, dec("230.00"));
        let revenue = tb.rows.iter().find(|r| r.name == REVENUE_ACCOUNT).unwrap();
        assert_eq!(revenue.credit_total, dec("230.00"));

        println!("✅ Payment settlement test passed");
    }

    #[test]
    fn test_payment_validation() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let invoice = draft_invoice(&conn, &ctx);

        assert!(matches!(
            record_payment(&conn, &ctx, invoice.id, &pay("0", PaymentMethod::Cash), date(2025, 1, 20)),
            Err(LedgerError::Validation(_))
        ));

        crate::invoicing::invoice::cancel_invoice(&conn, &ctx, invoice.id).unwrap();
        assert!(matches!(
            record_payment(&conn, &ctx, invoice.id, &pay("10", PaymentMethod::Cash), date(2025, 1, 20)),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_out_of_range_payment_is_rejected() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let invoice = draft_invoice(&conn, &ctx);

        let huge = pay("79228162514264337593543950335", PaymentMethod::Cash);
        assert!(matches!(
            record_payment(&conn, &ctx, invoice.id, &huge, date(2025, 1, 20)),
            Err(LedgerError::Validation(_))
        ));

        let untouched = get_invoice(&conn, ctx.company_id, invoice.id).unwrap();
        assert_eq!(untouched.amount_paid, Decimal::ZERO);
        assert!(list_payments(&conn, ctx.company_id, invoice.id).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_payments_from_two_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.db");
        let conn = open_database(&path).unwrap();
        let ctx = admin_context(&conn);
        let invoice = draft_invoice(&conn, &ctx);
        send_invoice(&conn, &ctx, invoice.id).unwrap();

        let writers = vec![open_database(&path).unwrap(), open_database(&path).unwrap()];
        std::thread::scope(|scope| {
            for writer in writers {
                scope.spawn(move || {
                    for _ in 0..10 {
                        record_payment(&writer, &ctx, invoice.id, &pay("1.00", PaymentMethod::Cash), date(2025, 1, 20))
                            .unwrap();
                    }
                });
            }
        });

        let settled = get_invoice(&conn, ctx.company_id, invoice.id).unwrap();
        assert_eq!(settled.amount_paid, dec("20.00"));
        assert_eq!(list_payments(&conn, ctx.company_id, invoice.id).unwrap().len(), 20);
        let tb = trial_balance(&conn, ctx.company_id, None).unwrap();
        assert_eq!(tb.total_debits, settled.amount_paid);

        println!("✅ Concurrent payments: {} recorded", settled.amount_paid);
    }

    #[test]
    fn test_delete_payment_reopens_invoice() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let invoice = draft_invoice(&conn, &ctx);
        send_invoice(&conn, &ctx, invoice.id).unwrap();

        let payment = record_payment(&conn, &ctx, invoice.id, &pay("230.00", PaymentMethod::Paypal), date(2025, 1, 20)).unwrap();
        assert_eq!(get_invoice(&conn, ctx.company_id, invoice.id).unwrap().status, InvoiceStatus::Paid);

        let clerk = member_context(&conn, &ctx, "clerk", Role::Employee);
        assert!(matches!(delete_payment(&conn, &clerk, payment.id, date(2025, 3, 1)), Err(LedgerError::Forbidden(_))));

        delete_payment(&conn, &ctx, payment.id, date(2025, 3, 1)).unwrap();
        let reopened = get_invoice(&conn, ctx.company_id, invoice.id).unwrap();
        assert_eq!(reopened.status, InvoiceStatus::Overdue);
        assert_eq!(reopened.amount_paid, Decimal::ZERO);
        assert!(reopened.date_paid.is_none());
        assert!(find_entry_for_reference(&conn, ctx.company_id, "payment", payment.id).unwrap().is_none());
        assert!(list_payments(&conn, ctx.company_id, invoice.id).unwrap().is_empty());
    }

    #[test]
    fn test_delete_invoice_removes_payment_entries() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let invoice = draft_invoice(&conn, &ctx);
        let payment = record_payment(&conn, &ctx, invoice.id, &pay("50.00", PaymentMethod::Stripe), date(2025, 1, 20)).unwrap();

        delete_invoice(&conn, &ctx, invoice.id).unwrap();
        assert!(find_entry_for_reference(&conn, ctx.company_id, "payment", payment.id).unwrap().is_none());
        assert!(matches!(get_payment(&conn, ctx.company_id, payment.id), Err(LedgerError::NotFound(_))));
    }
}
