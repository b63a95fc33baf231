// 🧾 LedgerDesk CLI - setup, statement import, reconciliation and AI insights

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use ledgerdesk::insights::llm::generate_insights;
use ledgerdesk::invoicing::invoice::refresh_overdue;
use ledgerdesk::logging::init_logging;
use ledgerdesk::reconciliation::bank::import_statement_csv;
use ledgerdesk::reconciliation::engine::check_statement;
use ledgerdesk::reconciliation::session::auto_match;
use ledgerdesk::tenancy::{self, NewCompany, NewUser};
use ledgerdesk::{ledger, open_database, Config, OpenAiClient, TenantContext};
use rusqlite::Connection;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Parser)]
#[command(name = "ledgerdesk")]
#[command(about = "Multi-tenant accounting for small businesses")]
#[command(version)]
struct Cli {
    /// SQLite database path (defaults to LEDGER_DATABASE or ledgerdesk.db)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Register a user
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "")]
        full_name: String,
    },
    /// Create a company owned (as admin) by an existing user
    CreateCompany {
        user_id: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        currency: Option<String>,
    },
    /// Import bank statement lines from a CSV file
    ImportStatement {
        company_id: i64,
        statement_id: i64,
        csv: PathBuf,
        /// Acting user (defaults to the company creator)
        #[arg(long)]
        user: Option<i64>,
    },
    /// Check a statement's balance equation
    CheckStatement { company_id: i64, statement_id: i64 },
    /// Run the active matching rules over a reconciliation session
    AutoMatch {
        company_id: i64,
        session_id: i64,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Mark past-due open invoices as overdue
    RefreshOverdue {
        company_id: i64,
        #[arg(long)]
        user: Option<i64>,
    },
    /// Generate AI insights for a company (needs OPENAI_API_KEY)
    Insights { company_id: i64, user_id: i64 },
    /// Print the trial balance
    TrialBalance {
        company_id: i64,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Print revenue, expenses and net income for a period
    IncomeStatement {
        company_id: i64,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Print assets, liabilities and equity at a date (defaults to today)
    BalanceSheet {
        company_id: i64,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }
    init_logging(config.log_json);

    let conn = open_database(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database ready at {}", config.database_path.display());
        }
        Commands::CreateUser { username, email, full_name } => {
            let user = tenancy::create_user(&conn, &NewUser { username, email, full_name })?;
            println!("✓ Created user {} (id {})", user.username, user.id);
        }
        Commands::CreateCompany { user_id, name, email, currency } => {
            let new = NewCompany { name, email, currency, ..Default::default() };
            let company = tenancy::create_company(&conn, user_id, &new)?;
            println!("✓ Created company {} (id {}, {})", company.name, company.id, company.currency);
        }
        Commands::ImportStatement { company_id, statement_id, csv, user } => {
            let ctx = acting_context(&conn, company_id, user)?;
            let file = File::open(&csv).with_context(|| format!("opening {}", csv.display()))?;
            let summary = import_statement_csv(&conn, &ctx, statement_id, file)?;
            println!("📂 {}", summary.summary());
            for error in &summary.errors {
                println!("   ⚠️  line {}: {}", error.line, error.message);
            }
        }
        Commands::CheckStatement { company_id, statement_id } => {
            let report = check_statement(&conn, company_id, statement_id)?;
            let mark = if report.result.is_balanced() { "✅" } else { "❌" };
            println!("{} {}", mark, report.summary);
            for discrepancy in &report.discrepancies {
                println!("   • {} ({})", discrepancy.description, discrepancy.amount);
            }
        }
        Commands::AutoMatch { company_id, session_id, user } => {
            let ctx = acting_context(&conn, company_id, user)?;
            let result = auto_match(&conn, &ctx, session_id)?;
            println!("🔗 {} lines matched in {}", result.matched_count, result.session.session_name);
            for hit in result.hits.iter().filter(|hit| !hit.matched) {
                println!("   rule '{}' flagged line {}", hit.rule_name, hit.transaction_id);
            }
        }
        Commands::RefreshOverdue { company_id, user } => {
            let ctx = acting_context(&conn, company_id, user)?;
            let changed = refresh_overdue(&conn, &ctx, Utc::now().date_naive())?;
            println!("✓ {} invoices marked overdue", changed);
        }
        Commands::Insights { company_id, user_id } => {
            let ctx = tenancy::resolve_context(&conn, company_id, user_id)?;
            let client = OpenAiClient::new(&config.openai)?;
            let db = Mutex::new(conn);
            let runtime = tokio::runtime::Runtime::new()?;
            let insights = runtime.block_on(generate_insights(&client, &db, &ctx, Utc::now().date_naive()))?;
            println!("🤖 {} insights generated", insights.len());
            for insight in &insights {
                println!("   [{}] {}", insight.priority.as_str(), insight.title);
            }
        }
        Commands::TrialBalance { company_id, as_of } => {
            let balance = ledger::trial_balance(&conn, company_id, as_of)?;
            println!("{:<8} {:<32} {:>14} {:>14}", "Account", "Name", "Debits", "Credits");
            for row in &balance.rows {
                println!(
                    "{:<8} {:<32} {:>14} {:>14}",
                    row.account_number, row.name, row.debit_total, row.credit_total
                );
            }
            println!("{:<41} {:>14} {:>14}", "Total", balance.total_debits, balance.total_credits);
            if !balance.is_balanced() {
                println!("❌ Trial balance does not balance");
            }
        }
        Commands::IncomeStatement { company_id, from, to } => {
            let statement = ledger::income_statement(&conn, company_id, from, to)?;
            println!("📈 Income statement {} to {}", statement.from, statement.to);
            print_section("Revenue", &statement.revenue);
            print_section("Expenses", &statement.expenses);
            println!("{:<41} {:>14}", "Net income", statement.net_income);
        }
        Commands::BalanceSheet { company_id, as_of } => {
            let sheet = ledger::balance_sheet(&conn, company_id, as_of.unwrap_or_else(|| Utc::now().date_naive()))?;
            println!("🏦 Balance sheet as of {}", sheet.as_of);
            print_section("Assets", &sheet.assets);
            print_section("Liabilities", &sheet.liabilities);
            print_section("Equity", &sheet.equity);
            println!("{:<41} {:>14}", "Retained earnings", sheet.retained_earnings);
            println!("{:<41} {:>14}", "Liabilities and equity", sheet.total_liabilities_and_equity);
            if !sheet.is_balanced() {
                println!("❌ Balance sheet does not balance");
            }
        }
    }

    Ok(())
}

fn print_section(title: &str, section: &ledger::StatementSection) {
    println!("{}", title);
    for line in &section.lines {
        println!("  {:<6} {:<32} {:>14}", line.account_number, line.name, line.amount);
    }
    println!("{:<41} {:>14}", format!("Total {}", title.to_lowercase()), section.total);
}

/// Resolve the tenant context for a CLI action; the company creator acts by default.
fn acting_context(conn: &Connection, company_id: i64, user: Option<i64>) -> Result<TenantContext> {
    let user_id = match user {
        Some(id) => id,
        None => tenancy::get_company(conn, company_id)?.created_by,
    };
    Ok(tenancy::resolve_context(conn, company_id, user_id)?)
}
