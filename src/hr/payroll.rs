// 💰 Payroll - pay periods and one record per employee per period
//
// gross = regular + overtime + bonus + commission
// net   = gross - (health + dental + retirement) - taxes - garnishments

use super::employee::get_employee;
use super::PayFrequency;
use crate::db::{atomically, conflict_on_duplicate, record_event};
use crate::error::{LedgerError, Result};
use crate::money::{self, round_money};
use crate::tenancy::TenantContext;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Overtime is paid at time and a half of the hourly rate.
const OVERTIME_MULTIPLIER: Decimal = Decimal::from_parts(15, 0, 0, false, 1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollPeriod {
    pub id: i64,
    pub company_id: i64,
    pub frequency: PayFrequency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pay_date: NaiveDate,
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPayrollPeriod {
    pub frequency: PayFrequency,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pay_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollRecord {
    pub id: i64,
    pub company_id: i64,
    pub period_id: i64,
    pub employee_id: i64,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
    pub regular_pay: Decimal,
    pub overtime_pay: Decimal,
    pub bonus: Decimal,
    pub commission: Decimal,
    pub health_insurance: Decimal,
    pub dental_insurance: Decimal,
    pub retirement_contribution: Decimal,
    pub federal_tax: Decimal,
    pub state_tax: Decimal,
    pub social_security: Decimal,
    pub medicare: Decimal,
    pub garnishments: Decimal,
    pub gross_pay: Decimal,
    pub net_pay: Decimal,
    pub is_processed: bool,
    pub is_paid: bool,
    pub created_at: DateTime<Utc>,
}

impl PayrollRecord {
    pub fn pre_tax_deductions(&self) -> Decimal {
        self.health_insurance + self.dental_insurance + self.retirement_contribution
    }

    pub fn taxes(&self) -> Decimal {
        self.federal_tax + self.state_tax + self.social_security + self.medicare
    }

    /// Recompute gross and net pay from the components.
    pub fn calculate_totals(&mut self) {
        self.gross_pay = round_money(self.regular_pay + self.overtime_pay + self.bonus + self.commission);
        self.net_pay = round_money(self.gross_pay - self.pre_tax_deductions() - self.taxes() - self.garnishments);
    }
}

/// Pay components for one employee. When `regular_pay`/`overtime_pay` are
/// omitted they are derived from the employee's hourly rate, or from the
/// annual salary spread over the period frequency.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewPayrollRecord {
    pub employee_id: i64,
    pub regular_hours: Decimal,
    pub overtime_hours: Decimal,
    pub regular_pay: Option<Decimal>,
    pub overtime_pay: Option<Decimal>,
    pub bonus: Decimal,
    pub commission: Decimal,
    pub health_insurance: Decimal,
    pub dental_insurance: Decimal,
    pub retirement_contribution: Decimal,
    pub federal_tax: Decimal,
    pub state_tax: Decimal,
    pub social_security: Decimal,
    pub medicare: Decimal,
    pub garnishments: Decimal,
}

const PERIOD_COLUMNS: &str = "id, company_id, frequency, start_date, end_date, pay_date, is_processed, processed_at, created_at";

const RECORD_COLUMNS: &str = "id, company_id, period_id, employee_id, regular_hours, overtime_hours, regular_pay,
     overtime_pay, bonus, commission, health_insurance, dental_insurance, retirement_contribution,
     federal_tax, state_tax, social_security, medicare, garnishments, gross_pay, net_pay,
     is_processed, is_paid, created_at";

fn row_to_period(row: &Row<'_>) -> rusqlite::Result<PayrollPeriod> {
    Ok(PayrollPeriod {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        frequency: row.get("frequency")?,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        pay_date: row.get("pay_date")?,
        is_processed: row.get("is_processed")?,
        processed_at: row.get("processed_at")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<PayrollRecord> {
    Ok(PayrollRecord {
        id: row.get("id")?,
        company_id: row.get("company_id")?,
        period_id: row.get("period_id")?,
        employee_id: row.get("employee_id")?,
        regular_hours: money::get(row, "regular_hours")?,
        overtime_hours: money::get(row, "overtime_hours")?,
        regular_pay: money::get(row, "regular_pay")?,
        overtime_pay: money::get(row, "overtime_pay")?,
        bonus: money::get(row, "bonus")?,
        commission: money::get(row, "commission")?,
        health_insurance: money::get(row, "health_insurance")?,
        dental_insurance: money::get(row, "dental_insurance")?,
        retirement_contribution: money::get(row, "retirement_contribution")?,
        federal_tax: money::get(row, "federal_tax")?,
        state_tax: money::get(row, "state_tax")?,
        social_security: money::get(row, "social_security")?,
        medicare: money::get(row, "medicare")?,
        garnishments: money::get(row, "garnishments")?,
        gross_pay: money::get(row, "gross_pay")?,
        net_pay: money::get(row, "net_pay")?,
        is_processed: row.get("is_processed")?,
        is_paid: row.get("is_paid")?,
        created_at: row.get("created_at")?,
    })
}

// ============================================================================
// PERIODS
// ============================================================================

pub fn create_period(conn: &Connection, ctx: &TenantContext, new: &NewPayrollPeriod) -> Result<PayrollPeriod> {
    ctx.require_finance_role("opening a payroll period")?;
    if new.start_date > new.end_date {
        return Err(LedgerError::validation("payroll period start must not be after its end"));
    }
    if new.pay_date < new.start_date {
        return Err(LedgerError::validation("pay date cannot be before the period starts"));
    }

    conn.execute(
        "INSERT INTO payroll_periods (company_id, frequency, start_date, end_date, pay_date, is_processed, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![ctx.company_id, new.frequency, new.start_date, new.end_date, new.pay_date, Utc::now()],
    )?;
    let id = conn.last_insert_rowid();

    record_event(conn, ctx.company_id, &ctx.actor(), "payroll_period_created", "payroll_period", id, serde_json::json!({ "frequency": new.frequency }))?;
    get_period(conn, ctx.company_id, id)
}

pub fn get_period(conn: &Connection, company_id: i64, period_id: i64) -> Result<PayrollPeriod> {
    conn.query_row(
        &format!("SELECT {} FROM payroll_periods WHERE company_id = ?1 AND id = ?2", PERIOD_COLUMNS),
        params![company_id, period_id],
        row_to_period,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("payroll period", period_id))
}

/// Most recent first.
pub fn list_periods(conn: &Connection, company_id: i64) -> Result<Vec<PayrollPeriod>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payroll_periods WHERE company_id = ?1 ORDER BY start_date DESC, id DESC",
        PERIOD_COLUMNS
    ))?;
    let periods = stmt
        .query_map(params![company_id], row_to_period)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(periods)
}

/// Lock the period and every record in it.
pub fn process_period(conn: &Connection, ctx: &TenantContext, period_id: i64) -> Result<PayrollPeriod> {
    ctx.require_finance_role("processing payroll")?;
    let period = get_period(conn, ctx.company_id, period_id)?;
    if period.is_processed {
        return Err(LedgerError::Conflict(format!("payroll period {} is already processed", period.id)));
    }

    let records = list_records(conn, ctx.company_id, period.id)?;
    if records.is_empty() {
        return Err(LedgerError::validation("payroll period has no records"));
    }
    let total_net: Decimal = records.iter().map(|r| r.net_pay).sum();

    atomically(conn, |conn| {
        conn.execute(
            "UPDATE payroll_periods SET is_processed = 1, processed_at = ?1 WHERE id = ?2",
            params![Utc::now(), period.id],
        )?;
        conn.execute("UPDATE payroll_records SET is_processed = 1 WHERE period_id = ?1", params![period.id])?;
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "payroll_processed",
            "payroll_period",
            period.id,
            serde_json::json!({ "records": records.len(), "total_net_pay": total_net }),
        )
    })?;

    tracing::info!(company_id = ctx.company_id, period_id, records = records.len(), "payroll processed");
    get_period(conn, ctx.company_id, period_id)
}

// ============================================================================
// RECORDS
// ============================================================================

pub fn add_record(conn: &Connection, ctx: &TenantContext, period_id: i64, new: &NewPayrollRecord) -> Result<PayrollRecord> {
    ctx.require_finance_role("adding a payroll record")?;
    let period = get_period(conn, ctx.company_id, period_id)?;
    if period.is_processed {
        return Err(LedgerError::Conflict(format!("payroll period {} is already processed", period.id)));
    }
    let employee = get_employee(conn, ctx.company_id, new.employee_id)?;

    let amounts = [
        new.regular_hours,
        new.overtime_hours,
        new.bonus,
        new.commission,
        new.health_insurance,
        new.dental_insurance,
        new.retirement_contribution,
        new.federal_tax,
        new.state_tax,
        new.social_security,
        new.medicare,
        new.garnishments,
    ];
    if amounts.iter().chain(new.regular_pay.iter()).chain(new.overtime_pay.iter()).any(|a| *a < Decimal::ZERO) {
        return Err(LedgerError::validation("payroll amounts cannot be negative"));
    }
    money::ensure_quantity("regular hours", new.regular_hours)?;
    money::ensure_quantity("overtime hours", new.overtime_hours)?;
    for amount in amounts[2..].iter().chain(new.regular_pay.iter()).chain(new.overtime_pay.iter()) {
        money::ensure_amount("payroll amount", *amount)?;
    }

    let (regular_pay, overtime_pay) = match employee.hourly_rate {
        Some(rate) => (
            new.regular_pay.unwrap_or_else(|| round_money(new.regular_hours * rate)),
            new.overtime_pay.unwrap_or_else(|| round_money(new.overtime_hours * rate * OVERTIME_MULTIPLIER)),
        ),
        None => (
            new.regular_pay.unwrap_or_else(|| {
                round_money(employee.base_salary / Decimal::from(period.frequency.periods_per_year()))
            }),
            new.overtime_pay.unwrap_or(Decimal::ZERO),
        ),
    };

    let mut record = PayrollRecord {
        id: 0,
        company_id: ctx.company_id,
        period_id: period.id,
        employee_id: employee.id,
        regular_hours: new.regular_hours,
        overtime_hours: new.overtime_hours,
        regular_pay,
        overtime_pay,
        bonus: new.bonus,
        commission: new.commission,
        health_insurance: new.health_insurance,
        dental_insurance: new.dental_insurance,
        retirement_contribution: new.retirement_contribution,
        federal_tax: new.federal_tax,
        state_tax: new.state_tax,
        social_security: new.social_security,
        medicare: new.medicare,
        garnishments: new.garnishments,
        gross_pay: Decimal::ZERO,
        net_pay: Decimal::ZERO,
        is_processed: false,
        is_paid: false,
        created_at: Utc::now(),
    };
    record.calculate_totals();

    let id = atomically(conn, |conn| {
        conn.execute(
            "INSERT INTO payroll_records (company_id, period_id, employee_id, regular_hours, overtime_hours,
                                          regular_pay, overtime_pay, bonus, commission, health_insurance,
                                          dental_insurance, retirement_contribution, federal_tax, state_tax,
                                          social_security, medicare, garnishments, gross_pay, net_pay,
                                          is_processed, is_paid, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, 0, 0, ?20)",
            params![
                record.company_id,
                record.period_id,
                record.employee_id,
                money::to_sql(&record.regular_hours),
                money::to_sql(&record.overtime_hours),
                money::to_sql(&record.regular_pay),
                money::to_sql(&record.overtime_pay),
                money::to_sql(&record.bonus),
                money::to_sql(&record.commission),
                money::to_sql(&record.health_insurance),
                money::to_sql(&record.dental_insurance),
                money::to_sql(&record.retirement_contribution),
                money::to_sql(&record.federal_tax),
                money::to_sql(&record.state_tax),
                money::to_sql(&record.social_security),
                money::to_sql(&record.medicare),
                money::to_sql(&record.garnishments),
                money::to_sql(&record.gross_pay),
                money::to_sql(&record.net_pay),
                record.created_at,
            ],
        )
        .map_err(|e| {
            conflict_on_duplicate(e, format!("employee {} already has a record in this period", employee.id))
        })?;
        let id = conn.last_insert_rowid();
        record_event(
            conn,
            ctx.company_id,
            &ctx.actor(),
            "payroll_record_added",
            "payroll_period",
            period.id,
            serde_json::json!({ "employee_id": employee.id, "gross_pay": record.gross_pay, "net_pay": record.net_pay }),
        )?;
        Ok(id)
    })?;

    get_record(conn, ctx.company_id, id)
}

pub fn get_record(conn: &Connection, company_id: i64, record_id: i64) -> Result<PayrollRecord> {
    conn.query_row(
        &format!("SELECT {} FROM payroll_records WHERE company_id = ?1 AND id = ?2", RECORD_COLUMNS),
        params![company_id, record_id],
        row_to_record,
    )
    .optional()?
    .ok_or_else(|| LedgerError::not_found("payroll record", record_id))
}

pub fn list_records(conn: &Connection, company_id: i64, period_id: i64) -> Result<Vec<PayrollRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM payroll_records WHERE company_id = ?1 AND period_id = ?2 ORDER BY employee_id",
        RECORD_COLUMNS
    ))?;
    let records = stmt
        .query_map(params![company_id, period_id], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Only processed records can be paid.
pub fn mark_record_paid(conn: &Connection, ctx: &TenantContext, record_id: i64) -> Result<PayrollRecord> {
    ctx.require_finance_role("paying a payroll record")?;
    let record = get_record(conn, ctx.company_id, record_id)?;
    if !record.is_processed {
        return Err(LedgerError::validation("payroll record must be processed before it is paid"));
    }
    if record.is_paid {
        return Err(LedgerError::Conflict(format!("payroll record {} is already paid", record.id)));
    }

    conn.execute("UPDATE payroll_records SET is_paid = 1 WHERE id = ?1", params![record.id])?;
    record_event(
        conn,
        ctx.company_id,
        &ctx.actor(),
        "payroll_record_paid",
        "payroll_record",
        record.id,
        serde_json::json!({ "net_pay": record.net_pay }),
    )?;
    get_record(conn, ctx.company_id, record_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::hr::employee::{create_employee, sample_employee};
    use crate::tenancy::fixtures::admin_context;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn june() -> NewPayrollPeriod {
        NewPayrollPeriod {
            frequency: PayFrequency::Monthly,
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            pay_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        }
    }

    #[test]
    fn test_calculate_totals() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let employee = create_employee(&conn, &ctx, &sample_employee("E-001", "Finance", 60000)).unwrap();
        let period = create_period(&conn, &ctx, &june()).unwrap();

        let record = add_record(
            &conn,
            &ctx,
            period.id,
            &NewPayrollRecord {
                employee_id: employee.id,
                bonus: dec("500.00"),
                health_insurance: dec("100.00"),
                retirement_contribution: dec("250.00"),
                federal_tax: dec("600.00"),
                social_security: dec("310.00"),
                medicare: dec("72.50"),
                garnishments: dec("50.00"),
                ..Default::default()
            },
        )
        .unwrap();

        // 60000 / 12 = 5000 salaried
        assert_eq!(record.regular_pay, dec("5000.00"));
        assert_eq!(record.gross_pay, dec("5500.00"));
        assert_eq!(record.net_pay, dec("4117.50"));

        println!("✅ Payroll totals test passed: gross {} net {}", record.gross_pay, record.net_pay);
    }

    #[test]
    fn test_hourly_pay_and_overtime() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let mut hourly = sample_employee("H-001", "Warehouse", 0);
        hourly.hourly_rate = Some(dec("20.00"));
        let employee = create_employee(&conn, &ctx, &hourly).unwrap();
        let period = create_period(&conn, &ctx, &june()).unwrap();

        let record = add_record(
            &conn,
            &ctx,
            period.id,
            &NewPayrollRecord {
                employee_id: employee.id,
                regular_hours: dec("160"),
                overtime_hours: dec("10"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(record.regular_pay, dec("3200.00"));
        assert_eq!(record.overtime_pay, dec("300.00"));
        assert_eq!(record.gross_pay, dec("3500.00"));

        let endless = add_record(
            &conn,
            &ctx,
            period.id,
            &NewPayrollRecord { employee_id: employee.id, regular_hours: dec("79228162514264337593543950335"), ..Default::default() },
        );
        assert!(matches!(endless, Err(LedgerError::Validation(_))));
        let windfall = add_record(
            &conn,
            &ctx,
            period.id,
            &NewPayrollRecord { employee_id: employee.id, bonus: dec("79228162514264337593543950335"), ..Default::default() },
        );
        assert!(matches!(windfall, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_process_locks_period() {
        let conn = open_in_memory().unwrap();
        let ctx = admin_context(&conn);
        let first = create_employee(&conn, &ctx, &sample_employee("E-001", "Finance", 24000)).unwrap();
        let second = create_employee(&conn, &ctx, &sample_employee("E-002", "Finance", 24000)).unwrap();
        let period = create_period(&conn, &ctx, &june()).unwrap();

        assert!(process_period(&conn, &ctx, period.id).is_err());

        let record = add_record(&conn, &ctx, period.id, &NewPayrollRecord { employee_id: first.id, ..Default::default() }).unwrap();
        assert!(matches!(
            add_record(&conn, &ctx, period.id, &NewPayrollRecord { employee_id: first.id, ..Default::default() }),
            Err(LedgerError::Conflict(_))
        ));
        assert!(mark_record_paid(&conn, &ctx, record.id).is_err());

        let processed = process_period(&conn, &ctx, period.id).unwrap();
        assert!(processed.is_processed);
        assert!(get_record(&conn, ctx.company_id, record.id).unwrap().is_processed);
        assert!(matches!(
            add_record(&conn, &ctx, period.id, &NewPayrollRecord { employee_id: second.id, ..Default::default() }),
            Err(LedgerError::Conflict(_))
        ));

        let paid = mark_record_paid(&conn, &ctx, record.id).unwrap();
        assert!(paid.is_paid);
        assert_eq!(list_periods(&conn, ctx.company_id).unwrap().len(), 1);
    }
}
