// 🧮 Expenses - Categories, vendors, expenses, expense reports and mileage

pub mod category;
pub mod expense;
pub mod mileage;
pub mod report;
pub mod vendor;

use crate::db::sql_enum;
use crate::ledger::AccountCategory;

sql_enum! {
    pub enum ExpenseStatus {
        Draft => "draft",
        Pending => "pending",
        Approved => "approved",
        Paid => "paid",
        Rejected => "rejected",
    }
}

impl ExpenseStatus {
    /// Approved and paid expenses have a journal entry behind them.
    pub fn is_posted(&self) -> bool {
        matches!(self, ExpenseStatus::Approved | ExpenseStatus::Paid)
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, ExpenseStatus::Draft | ExpenseStatus::Pending | ExpenseStatus::Rejected)
    }
}

sql_enum! {
    pub enum ExpensePaymentMethod {
        Cash => "cash",
        CreditCard => "credit_card",
        DebitCard => "debit_card",
        Check => "check",
        BankTransfer => "bank_transfer",
        PettyCash => "petty_cash",
        Other => "other",
    }
}

impl ExpensePaymentMethod {
    /// Account credited when an expense paid this way is posted.
    pub fn ledger_account(&self) -> (&'static str, AccountCategory) {
        match self {
            ExpensePaymentMethod::Cash | ExpensePaymentMethod::Other => ("Cash", AccountCategory::Asset),
            ExpensePaymentMethod::PettyCash => ("Petty Cash", AccountCategory::Asset),
            ExpensePaymentMethod::DebitCard | ExpensePaymentMethod::BankTransfer | ExpensePaymentMethod::Check => {
                ("Checking Account", AccountCategory::Asset)
            }
            ExpensePaymentMethod::CreditCard => ("Credit Card", AccountCategory::Liability),
        }
    }
}

sql_enum! {
    pub enum ReportStatus {
        Draft => "draft",
        Submitted => "submitted",
        Approved => "approved",
        Paid => "paid",
        Rejected => "rejected",
    }
}

sql_enum! {
    pub enum MileagePurpose {
        Business => "business",
        Medical => "medical",
        Charity => "charity",
        Moving => "moving",
    }
}

pub use category::{ExpenseCategory, NewExpenseCategory};
pub use expense::{Expense, ExpenseFilter, NewExpense};
pub use mileage::{MileageLog, NewMileageLog};
pub use report::{ExpenseReport, ExpenseReportDetail, NewExpenseReport};
pub use vendor::{NewVendor, Vendor};
