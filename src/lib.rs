// 📒 LedgerDesk - Core Library
// Tenancy, books, invoicing, expenses, HR, reconciliation and insights shared by the CLI, the API server and the tests

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod money;
pub mod tenancy;        // Companies, users, memberships
pub mod ledger;         // Double-entry journal
pub mod invoicing;      // Customers, products, invoices, payments
pub mod expenses;       // Expenses, categories, vendors, reports, mileage
pub mod hr;             // Employees, payroll, leave
pub mod reconciliation; // Bank accounts, statements, rules, sessions
pub mod insights;       // Analytics, LLM insights, models, tasks
pub mod reports;        // Dashboard

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use db::{open_database, open_in_memory, setup_database, Page, PageRequest};
pub use error::{LedgerError, Result};
pub use tenancy::{Company, Role, TenantContext, User};
pub use ledger::{AccountCategory, JournalEntry, TrialBalance};
pub use reconciliation::{
    ReconciliationEngine, ReconciliationReport, ReconciliationResult,
    StatementMetadata, Discrepancy, DiscrepancyCategory,
};
pub use insights::{CompletionClient, OpenAiClient};
pub use reports::{dashboard_summary, DashboardSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
