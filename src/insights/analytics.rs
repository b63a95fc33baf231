// 📈 Analytics - cash flow, expense anomalies and customer risk
//
// Everything here is computed from the books; nothing is written.
// Months are calendar months.

use super::{Priority, RiskLevel};
use crate::error::Result;
use crate::money;
use crate::tenancy::get_company;
use chrono::{Datelike, Duration, Months, NaiveDate};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const HISTORY_MONTHS: u32 = 12;
const FORECAST_MONTHS: u32 = 3;
const RECENT_DAYS: i64 = 30;
const HISTORICAL_DAYS: i64 = 90;

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_label(date: NaiveDate) -> String {
    date.format("%b %Y").to_string()
}

fn pct(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        (part / whole * Decimal::ONE_HUNDRED).round_dp(1)
    }
}

// ============================================================================
// CASH FLOW
// ============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthlyCashFlow {
    pub month: String,
    pub month_start: NaiveDate,
    pub income: Decimal,
    pub expenses: Decimal,
    pub net_cash_flow: Decimal,
}

/// Revenue credits and expense debits in `[from, to)`, one row per line.
fn revenue_and_expense_lines(
    conn: &Connection,
    company_id: i64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<(NaiveDate, String, Decimal, Decimal)>> {
    let mut stmt = conn.prepare(
        "SELECT e.entry_date, a.category, l.debit, l.credit
         FROM journal_lines l
         JOIN journal_entries e ON e.id = l.entry_id
         JOIN ledger_accounts a ON a.id = l.account_id
         WHERE e.company_id = ?1 AND e.entry_date >= ?2 AND e.entry_date < ?3
           AND a.category IN ('revenue', 'expense')",
    )?;
    let rows = stmt
        .query_map(params![company_id, from, to], |row| {
            Ok((row.get(0)?, row.get(1)?, money::get(row, 2)?, money::get(row, 3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Income and expenses for the last twelve calendar months, oldest first,
/// ending with the month of `today`.
pub fn monthly_cash_flow(conn: &Connection, company_id: i64, today: NaiveDate) -> Result<Vec<MonthlyCashFlow>> {
    let current = month_start(today);
    let first = current - Months::new(HISTORY_MONTHS - 1);
    let end = current + Months::new(1);

    let mut months: Vec<MonthlyCashFlow> = (0..HISTORY_MONTHS)
        .map(|i| {
            let start = first + Months::new(i);
            MonthlyCashFlow {
                month: month_label(start),
                month_start: start,
                income: Decimal::ZERO,
                expenses: Decimal::ZERO,
                net_cash_flow: Decimal::ZERO,
            }
        })
        .collect();

    for (date, category, debit, credit) in revenue_and_expense_lines(conn, company_id, first, end)? {
        let index = (date.year() - first.year()) * 12 + date.month() as i32 - first.month() as i32;
        let Some(month) = months.get_mut(index as usize) else {
            continue;
        };
        if category == "revenue" {
            month.income += credit;
        } else {
            month.expenses += debit;
        }
    }

    for month in &mut months {
        month.net_cash_flow = month.income - month.expenses;
    }
    Ok(months)
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashFlowPrediction {
    pub month: String,
    pub predicted_income: Decimal,
    pub predicted_expenses: Decimal,
    pub predicted_net: Decimal,
    pub confidence: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashFlowWarning {
    pub severity: Priority,
    pub title: String,
    pub description: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashFlowForecast {
    pub history: Vec<MonthlyCashFlow>,
    pub predictions: Vec<CashFlowPrediction>,
    pub trend: Trend,
    pub warnings: Vec<CashFlowWarning>,
    pub current_cash_position: Decimal,
}

/// Mean over a window; an empty window averages to zero.
fn average<'a>(values: impl Iterator<Item = &'a Decimal>, window: usize) -> Decimal {
    if window == 0 {
        return Decimal::ZERO;
    }
    values.sum::<Decimal>() / Decimal::from(window as u64)
}

/// Project the next three months from the three most recent ones.
///
/// Income grows 2 % and expenses 1 % per month ahead; confidence starts at 80
/// and drops 5 per month. The trend compares the last three months' average
/// net with the three before.
pub fn predict_cash_flow(history: &[MonthlyCashFlow], today: NaiveDate) -> CashFlowForecast {
    let recent = &history[history.len().saturating_sub(3)..];
    let older_end = history.len().saturating_sub(3);
    let older = &history[older_end.saturating_sub(3)..older_end];

    let avg_income = average(recent.iter().map(|m| &m.income), recent.len());
    let avg_expenses = average(recent.iter().map(|m| &m.expenses), recent.len());

    let current = month_start(today);
    let predictions: Vec<CashFlowPrediction> = (1..=FORECAST_MONTHS)
        .map(|i| {
            let step = Decimal::from(i);
            let income = money::round_money(avg_income * (Decimal::ONE + step * Decimal::new(2, 2)));
            let expenses = money::round_money(avg_expenses * (Decimal::ONE + step * Decimal::new(1, 2)));
            CashFlowPrediction {
                month: month_label(current + Months::new(i)),
                predicted_income: income,
                predicted_expenses: expenses,
                predicted_net: income - expenses,
                confidence: 85 - 5 * i as i64,
            }
        })
        .collect();

    let recent_net = average(recent.iter().map(|m| &m.net_cash_flow), recent.len());
    let older_net = average(older.iter().map(|m| &m.net_cash_flow), older.len());
    let trend = if recent_net > older_net { Trend::Improving } else { Trend::Declining };

    let mut warnings = Vec::new();
    if trend == Trend::Declining {
        warnings.push(CashFlowWarning {
            severity: Priority::High,
            title: "Declining Cash Flow Trend".into(),
            description: "Your cash flow has been declining over the past 3 months.".into(),
            recommendation: "Consider reducing expenses or increasing revenue streams.".into(),
        });
    }
    for prediction in &predictions {
        if prediction.predicted_net < Decimal::ZERO {
            warnings.push(CashFlowWarning {
                severity: Priority::Critical,
                title: format!("Negative Cash Flow Predicted for {}", prediction.month),
                description: format!("Projected shortfall of {:.2}", prediction.predicted_net.abs()),
                recommendation: "Prepare a cash reserve or arrange for short-term financing.".into(),
            });
        }
    }

    CashFlowForecast {
        current_cash_position: history.last().map(|m| m.net_cash_flow).unwrap_or_default(),
        history: history.to_vec(),
        predictions,
        trend,
        warnings,
    }
}

// ============================================================================
// EXPENSES
// ============================================================================

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBreakdown {
    pub category: String,
    pub amount: Decimal,
    pub count: usize,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseAnomaly {
    pub category: String,
    pub current: Decimal,
    pub historical: Decimal,
    pub increase_pct: Decimal,
    pub severity: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopExpense {
    pub id: i64,
    pub description: String,
    pub category: String,
    pub amount: Decimal,
    pub expense_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseAnalysis {
    pub total_recent: Decimal,
    pub total_historical: Decimal,
    pub breakdown: Vec<CategoryBreakdown>,
    pub anomalies: Vec<ExpenseAnomaly>,
    pub top_expenses: Vec<TopExpense>,
    pub daily_average: Decimal,
}

struct ExpenseRow {
    id: i64,
    description: String,
    category: String,
    amount: Decimal,
    date: NaiveDate,
}

/// Compare the last 30 days against days 30-90 per category.
///
/// A category up more than 50 % is an anomaly, high severity above 100 %.
/// Rejected expenses are ignored.
pub fn expense_analysis(conn: &Connection, company_id: i64, today: NaiveDate) -> Result<ExpenseAnalysis> {
    let recent_from = today - Duration::days(RECENT_DAYS);
    let historical_from = today - Duration::days(HISTORICAL_DAYS);

    let mut stmt = conn.prepare(
        "SELECT e.id, e.description, c.name AS category, e.amount, e.expense_date
         FROM expenses e
         LEFT JOIN expense_categories c ON c.id = e.category_id
         WHERE e.company_id = ?1 AND e.status != 'rejected' AND e.expense_date >= ?2 AND e.expense_date <= ?3",
    )?;
    let rows = stmt
        .query_map(params![company_id, historical_from, today], |row| {
            Ok(ExpenseRow {
                id: row.get("id")?,
                description: row.get("description")?,
                category: row
                    .get::<_, Option<String>>("category")?
                    .unwrap_or_else(|| UNCATEGORIZED.to_string()),
                amount: money::get(row, "amount")?,
                date: row.get("expense_date")?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let (recent, historical): (Vec<ExpenseRow>, Vec<ExpenseRow>) = rows.into_iter().partition(|r| r.date >= recent_from);

    let mut by_category: BTreeMap<String, (Decimal, usize)> = BTreeMap::new();
    for row in &recent {
        let entry = by_category.entry(row.category.clone()).or_default();
        entry.0 += row.amount;
        entry.1 += 1;
    }
    let mut historical_by_category: HashMap<&str, Decimal> = HashMap::new();
    for row in &historical {
        *historical_by_category.entry(row.category.as_str()).or_default() += row.amount;
    }

    let total_recent: Decimal = recent.iter().map(|r| r.amount).sum();
    let total_historical: Decimal = historical.iter().map(|r| r.amount).sum();

    let mut breakdown: Vec<CategoryBreakdown> = by_category
        .iter()
        .map(|(category, (amount, count))| CategoryBreakdown {
            category: category.clone(),
            amount: *amount,
            count: *count,
            percentage: pct(*amount, total_recent),
        })
        .collect();
    breakdown.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.category.cmp(&b.category)));

    let fifty = Decimal::new(50, 0);
    let anomalies = breakdown
        .iter()
        .filter_map(|cat| {
            let previous = *historical_by_category.get(cat.category.as_str())?;
            if previous <= Decimal::ZERO {
                return None;
            }
            let increase_pct = pct(cat.amount - previous, previous);
            (increase_pct > fifty).then(|| ExpenseAnomaly {
                category: cat.category.clone(),
                current: cat.amount,
                historical: previous,
                increase_pct,
                severity: if increase_pct > Decimal::ONE_HUNDRED { Priority::High } else { Priority::Medium },
            })
        })
        .collect();

    let mut top: Vec<&ExpenseRow> = recent.iter().collect();
    top.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| b.date.cmp(&a.date)));
    let top_expenses = top
        .into_iter()
        .take(10)
        .map(|r| TopExpense {
            id: r.id,
            description: r.description.clone(),
            category: r.category.clone(),
            amount: r.amount,
            expense_date: r.date,
        })
        .collect();

    Ok(ExpenseAnalysis {
        daily_average: money::round_money(total_recent / Decimal::from(RECENT_DAYS)),
        total_recent,
        total_historical,
        breakdown,
        anomalies,
        top_expenses,
    })
}

// ============================================================================
// CUSTOMERS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct CustomerRisk {
    pub customer_id: i64,
    pub customer_name: String,
    pub total_invoices: i64,
    pub total_revenue: Decimal,
    pub paid_invoices: i64,
    pub overdue_invoices: i64,
    pub payment_rate: Decimal,
    pub risk_level: RiskLevel,
}

/// High when more than two invoices are overdue or under half are paid;
/// medium when anything is overdue or under 80 % are paid.
pub fn classify_risk(overdue: i64, payment_rate: Decimal) -> RiskLevel {
    if overdue > 2 || payment_rate < Decimal::new(50, 0) {
        RiskLevel::High
    } else if overdue > 0 || payment_rate < Decimal::new(80, 0) {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Payment behaviour per invoiced customer, highest revenue first.
///
/// Cancelled invoices are ignored. An open invoice past its due date counts
/// as overdue even before the overdue sweep has flagged it.
pub fn customer_risk(conn: &Connection, company_id: i64, today: NaiveDate) -> Result<Vec<CustomerRisk>> {
    let mut stmt = conn.prepare(
        "SELECT i.customer_id, c.name, i.status, i.total_amount, i.date_due
         FROM invoices i
         JOIN customers c ON c.id = i.customer_id
         WHERE i.company_id = ?1 AND i.status != 'cancelled'",
    )?;
    let rows = stmt
        .query_map(params![company_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, crate::invoicing::InvoiceStatus>(2)?,
                money::get(row, 3)?,
                row.get::<_, NaiveDate>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut customers: BTreeMap<i64, CustomerRisk> = BTreeMap::new();
    for (customer_id, name, status, total, due) in rows {
        let entry = customers.entry(customer_id).or_insert_with(|| CustomerRisk {
            customer_id,
            customer_name: name,
            total_invoices: 0,
            total_revenue: Decimal::ZERO,
            paid_invoices: 0,
            overdue_invoices: 0,
            payment_rate: Decimal::ZERO,
            risk_level: RiskLevel::Low,
        });
        entry.total_invoices += 1;
        entry.total_revenue += total;
        if status == crate::invoicing::InvoiceStatus::Paid {
            entry.paid_invoices += 1;
        }
        if status == crate::invoicing::InvoiceStatus::Overdue || (status.is_open() && due < today) {
            entry.overdue_invoices += 1;
        }
    }

    let mut analysis: Vec<CustomerRisk> = customers
        .into_values()
        .map(|mut c| {
            c.payment_rate = pct(Decimal::from(c.paid_invoices), Decimal::from(c.total_invoices));
            c.risk_level = classify_risk(c.overdue_invoices, c.payment_rate);
            c
        })
        .collect();
    analysis.sort_by(|a, b| b.total_revenue.cmp(&a.total_revenue).then_with(|| a.customer_id.cmp(&b.customer_id)));
    Ok(analysis)
}

// ============================================================================
// FINANCIAL SUMMARY
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FinancialSummary {
    pub company_name: String,
    pub currency: String,
    pub as_of: NaiveDate,
    pub income_30d: Decimal,
    pub expenses_30d: Decimal,
    pub net_cash_flow_30d: Decimal,
    pub outstanding_receivables: Decimal,
    pub overdue_invoices: i64,
    pub customer_count: usize,
    pub high_risk_customers: usize,
    pub expense_categories: BTreeMap<String, Decimal>,
    pub expense_anomalies: usize,
    pub monthly: Vec<MonthlyCashFlow>,
    pub trend: Trend,
}

impl FinancialSummary {
    /// Short plain-text block for the prompt.
    pub fn to_prompt_context(&self) -> String {
        let mut lines = vec![
            format!("Company: {}", self.company_name),
            format!("Total Income (30 days): {} {:.2}", self.currency, self.income_30d),
            format!("Total Expenses (30 days): {} {:.2}", self.currency, self.expenses_30d),
            format!("Net Cash Flow (30 days): {} {:.2}", self.currency, self.net_cash_flow_30d),
            format!("Outstanding Receivables: {} {:.2}", self.currency, self.outstanding_receivables),
            format!("Overdue Invoices: {}", self.overdue_invoices),
            format!("Total Customers: {} ({} high risk)", self.customer_count, self.high_risk_customers),
        ];
        if !self.monthly.is_empty() {
            lines.push(format!("Historical Data: {} months, trend {:?}", self.monthly.len(), self.trend));
        }
        if !self.expense_categories.is_empty() {
            let names: Vec<&str> = self.expense_categories.keys().map(String::as_str).collect();
            lines.push(format!("Expense Categories: {}", names.join(", ")));
        }
        lines.join("\n")
    }
}

/// Everything the insight prompt needs, gathered in one pass.
pub fn financial_summary(conn: &Connection, company_id: i64, today: NaiveDate) -> Result<FinancialSummary> {
    let company = get_company(conn, company_id)?;

    let since = today - Duration::days(RECENT_DAYS);
    let mut income_30d = Decimal::ZERO;
    let mut expenses_30d = Decimal::ZERO;
    for (_, category, debit, credit) in revenue_and_expense_lines(conn, company_id, since, today + Duration::days(1))? {
        if category == "revenue" {
            income_30d += credit;
        } else {
            expenses_30d += debit;
        }
    }

    let outstanding_receivables = money::sum(
        conn,
        "SELECT total_amount FROM invoices WHERE company_id = ?1 AND status IN ('sent', 'viewed', 'overdue')",
        params![company_id],
    )? - money::sum(
        conn,
        "SELECT amount_paid FROM invoices WHERE company_id = ?1 AND status IN ('sent', 'viewed', 'overdue')",
        params![company_id],
    )?;

    let customers = customer_risk(conn, company_id, today)?;
    let expenses = expense_analysis(conn, company_id, today)?;
    let monthly = monthly_cash_flow(conn, company_id, today)?;
    let trend = predict_cash_flow(&monthly, today).trend;

    Ok(FinancialSummary {
        company_name: company.name,
        currency: company.currency,
        as_of: today,
        income_30d,
        expenses_30d,
        net_cash_flow_30d: income_30d - expenses_30d,
        outstanding_receivables,
        overdue_invoices: customers.iter().map(|c| c.overdue_invoices).sum(),
        customer_count: customers.len(),
        high_risk_customers: customers.iter().filter(|c| c.risk_level == RiskLevel::High).count(),
        expense_categories: expenses.breakdown.iter().map(|b| (b.category.clone(), b.amount)).collect(),
        expense_anomalies: expenses.anomalies.len(),
        monthly,
        trend,
    })
}

// ============================================================================
// TESTS
// ============================================================================
