// 🧾 Invoicing - Customers, products, invoices and payments

pub mod customer;
pub mod invoice;
pub mod numbering;
pub mod payment;
pub mod product;

use crate::db::sql_enum;

sql_enum! {
    pub enum InvoiceStatus {
        Draft => "draft",
        Sent => "sent",
        Viewed => "viewed",
        Paid => "paid",
        Overdue => "overdue",
        Cancelled => "cancelled",
    }
}

impl InvoiceStatus {
    /// Statuses in which the customer still owes money.
    pub fn is_open(&self) -> bool {
        matches!(self, InvoiceStatus::Sent | InvoiceStatus::Viewed | InvoiceStatus::Overdue)
    }

    /// Paid and cancelled invoices are frozen.
    pub fn is_final(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }
}

sql_enum! {
    pub enum PaymentMethod {
        Cash => "cash",
        Check => "check",
        CreditCard => "credit_card",
        BankTransfer => "bank_transfer",
        Paypal => "paypal",
        Stripe => "stripe",
        Other => "other",
    }
}

impl PaymentMethod {
    /// Asset account that receives money paid this way.
    pub fn ledger_account(&self) -> &'static str {
        match self {
            PaymentMethod::Cash | PaymentMethod::Other => "Cash",
            PaymentMethod::Check | PaymentMethod::BankTransfer => "Checking Account",
            PaymentMethod::CreditCard => "Credit Card Payments",
            PaymentMethod::Paypal => "PayPal Account",
            PaymentMethod::Stripe => "Stripe Account",
        }
    }
}

sql_enum! {
    pub enum ProductType {
        Product => "product",
        Service => "service",
        Subscription => "subscription",
    }
}

pub use customer::{Customer, CustomerFilter, NewCustomer};
pub use invoice::{
    Invoice, InvoiceDetail, InvoiceFilter, InvoiceItem, InvoiceSummary, InvoiceTotals, InvoiceUpdate, NewInvoice,
    NewInvoiceItem,
};
pub use payment::{NewPayment, Payment};
pub use product::{NewProduct, Product};
