// 🧾 Customer, product, invoice and payment routes

use super::{ok, today, ApiResult, AppState, Tenant};
use crate::db::{Page, PageRequest};
use crate::invoicing::customer::{self, Customer, CustomerFilter, NewCustomer};
use crate::invoicing::invoice::{self, Invoice, InvoiceDetail, InvoiceFilter, InvoiceSummary, InvoiceUpdate, NewInvoice};
use crate::invoicing::payment::{self, NewPayment, Payment};
use crate::invoicing::product::{self, NewProduct, Product};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/customers", get(list_customers).post(create_customer))
        .route("/customers/:id", get(get_customer).put(update_customer).delete(deactivate_customer))
        .route("/products", get(list_products).post(create_product))
        .route("/products/:id", get(get_product).put(update_product))
        .route("/invoices", get(list_invoices).post(create_invoice))
        .route("/invoices/summary", get(invoice_summary))
        .route("/invoices/refresh-overdue", post(refresh_overdue))
        .route("/invoices/:id", get(get_invoice).put(update_invoice).delete(delete_invoice))
        .route("/invoices/:id/send", post(send_invoice))
        .route("/invoices/:id/view", post(view_invoice))
        .route("/invoices/:id/cancel", post(cancel_invoice))
        .route("/invoices/:id/payments", get(list_payments).post(record_payment))
        .route("/payments/:id", get(get_payment).delete(delete_payment))
}

// ============================================================================
// Customers
// ============================================================================

async fn list_customers(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(filter): Query<CustomerFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<Customer>> {
    let conn = state.conn()?;
    ok(customer::list_customers(&conn, ctx.company_id, &filter, page)?)
}

async fn create_customer(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewCustomer>) -> ApiResult<Customer> {
    let conn = state.conn()?;
    ok(customer::create_customer(&conn, &ctx, &new)?)
}

async fn get_customer(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Customer> {
    let conn = state.conn()?;
    ok(customer::get_customer(&conn, ctx.company_id, id)?)
}

async fn update_customer(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<NewCustomer>,
) -> ApiResult<Customer> {
    let conn = state.conn()?;
    ok(customer::update_customer(&conn, &ctx, id, &update)?)
}

/// DELETE /api/customers/:id - customers are deactivated, never removed
async fn deactivate_customer(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Customer> {
    let conn = state.conn()?;
    ok(customer::deactivate_customer(&conn, &ctx, id)?)
}

// ============================================================================
// Products
// ============================================================================

#[derive(Deserialize)]
struct ProductQuery {
    #[serde(default)]
    low_stock: bool,
}

async fn list_products(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<ProductQuery>,
) -> ApiResult<Vec<Product>> {
    let conn = state.conn()?;
    ok(product::list_products(&conn, ctx.company_id, query.low_stock)?)
}

async fn create_product(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewProduct>) -> ApiResult<Product> {
    let conn = state.conn()?;
    ok(product::create_product(&conn, &ctx, &new)?)
}

async fn get_product(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Product> {
    let conn = state.conn()?;
    ok(product::get_product(&conn, ctx.company_id, id)?)
}

async fn update_product(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<NewProduct>,
) -> ApiResult<Product> {
    let conn = state.conn()?;
    ok(product::update_product(&conn, &ctx, id, &update)?)
}

// ============================================================================
// Invoices
// ============================================================================

async fn list_invoices(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(filter): Query<InvoiceFilter>,
    Query(page): Query<PageRequest>,
) -> ApiResult<Page<Invoice>> {
    let conn = state.conn()?;
    ok(invoice::list_invoices(&conn, ctx.company_id, &filter, page)?)
}

async fn invoice_summary(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(filter): Query<InvoiceFilter>,
) -> ApiResult<InvoiceSummary> {
    let conn = state.conn()?;
    ok(invoice::invoice_summary(&conn, ctx.company_id, &filter, today())?)
}

async fn create_invoice(State(state): State<AppState>, Tenant(ctx): Tenant, Json(new): Json<NewInvoice>) -> ApiResult<Invoice> {
    let conn = state.conn()?;
    ok(invoice::create_invoice(&conn, &ctx, &new, today())?)
}

async fn get_invoice(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<InvoiceDetail> {
    let conn = state.conn()?;
    ok(invoice::get_invoice_detail(&conn, ctx.company_id, id)?)
}

async fn update_invoice(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(update): Json<InvoiceUpdate>,
) -> ApiResult<Invoice> {
    let conn = state.conn()?;
    ok(invoice::update_invoice(&conn, &ctx, id, &update)?)
}

async fn delete_invoice(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<()> {
    let conn = state.conn()?;
    invoice::delete_invoice(&conn, &ctx, id)?;
    ok(())
}

async fn send_invoice(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Invoice> {
    let conn = state.conn()?;
    ok(invoice::send_invoice(&conn, &ctx, id)?)
}

async fn view_invoice(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Invoice> {
    let conn = state.conn()?;
    ok(invoice::mark_viewed(&conn, &ctx, id)?)
}

async fn cancel_invoice(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Invoice> {
    let conn = state.conn()?;
    ok(invoice::cancel_invoice(&conn, &ctx, id)?)
}

#[derive(Serialize)]
struct OverdueRefresh {
    flagged: usize,
}

/// POST /api/invoices/refresh-overdue
async fn refresh_overdue(State(state): State<AppState>, Tenant(ctx): Tenant) -> ApiResult<OverdueRefresh> {
    let conn = state.conn()?;
    ok(OverdueRefresh {
        flagged: invoice::refresh_overdue(&conn, &ctx, today())?,
    })
}

// ============================================================================
// Payments
// ============================================================================

async fn list_payments(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Vec<Payment>> {
    let conn = state.conn()?;
    ok(payment::list_payments(&conn, ctx.company_id, id)?)
}

async fn record_payment(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(id): Path<i64>,
    Json(new): Json<NewPayment>,
) -> ApiResult<Payment> {
    let conn = state.conn()?;
    ok(payment::record_payment(&conn, &ctx, id, &new, today())?)
}

async fn get_payment(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<Payment> {
    let conn = state.conn()?;
    ok(payment::get_payment(&conn, ctx.company_id, id)?)
}

async fn delete_payment(State(state): State<AppState>, Tenant(ctx): Tenant, Path(id): Path<i64>) -> ApiResult<()> {
    let conn = state.conn()?;
    payment::delete_payment(&conn, &ctx, id, today())?;
    ok(())
}
