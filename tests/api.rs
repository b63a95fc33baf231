// 🌐 HTTP API tests - the full router driven in-process with `oneshot`

#![cfg(feature = "server")]

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use ledgerdesk::open_in_memory;
use ledgerdesk::server::{router, AppState, COMPANY_HEADER, USER_HEADER};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use tower::ServiceExt;

fn app() -> Router {
    router(AppState::new(open_in_memory().unwrap(), None))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    tenant: Option<(i64, i64)>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((company_id, user_id)) = tenant {
        builder = builder
            .header(COMPANY_HEADER, company_id.to_string())
            .header(USER_HEADER, user_id.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

fn dec(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

/// Create a user and a company they administer; returns (company_id, user_id).
async fn bootstrap(app: &Router) -> (i64, i64) {
    let (status, user) = call(
        app,
        Method::POST,
        "/api/users",
        None,
        Some(json!({"username": "ama", "email": "ama@acme.test", "full_name": "Ama Owusu"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let user_id = user["data"]["id"].as_i64().unwrap();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/companies")
        .header(USER_HEADER, user_id.to_string())
        .header("content-type", "application/json")
        .body(Body::from(json!({"name": "Acme Ltd", "email": "books@acme.test", "currency": "GHS"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let company: Value = serde_json::from_slice(&bytes).unwrap();
    (company["data"]["id"].as_i64().unwrap(), user_id)
}

#[tokio::test]
async fn test_health_check() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/api/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"], json!("OK"));

    println!("✅ Health check test passed");
}

#[tokio::test]
async fn test_tenant_headers_are_enforced() {
    let app = app();
    let (company_id, user_id) = bootstrap(&app).await;

    let (status, body) = call(&app, Method::GET, "/api/customers", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("x-company-id"));

    let (status, _) = call(&app, Method::GET, "/api/customers", Some((company_id, user_id + 100)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, Method::GET, "/api/customers", Some((company_id + 100, user_id)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, Method::GET, "/api/company", Some((company_id, user_id)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], json!("Acme Ltd"));

    println!("✅ Tenant header enforcement test passed");
}

#[tokio::test]
async fn test_invoice_payment_flow() {
    let app = app();
    let (company_id, user_id) = bootstrap(&app).await;
    let tenant = Some((company_id, user_id));

    let (status, customer) = call(
        &app,
        Method::POST,
        "/api/customers",
        tenant,
        Some(json!({"name": "Kwame Boateng", "email": "kwame@example.test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let customer_id = customer["data"]["id"].as_i64().unwrap();

    let (status, invoice) = call(
        &app,
        Method::POST,
        "/api/invoices",
        tenant,
        Some(json!({
            "customer_id": customer_id,
            "date_due": "2030-01-31",
            "items": [{"description": "Consulting", "quantity": "2", "unit_price": "100.00", "tax_rate": "15"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let invoice_id = invoice["data"]["id"].as_i64().unwrap();
    assert_eq!(invoice["data"]["status"], json!("draft"));
    assert_eq!(dec(&invoice["data"]["total_amount"]), Decimal::new(23000, 2));

    let payment = json!({"amount": "230.00", "payment_method": "bank_transfer"});
    let uri = format!("/api/invoices/{}/payments", invoice_id);

    // Non-positive amounts are rejected
    let (status, body) = call(&app, Method::POST, &uri, tenant, Some(json!({"amount": "0", "payment_method": "cash"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, sent) = call(&app, Method::POST, &format!("/api/invoices/{}/send", invoice_id), tenant, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["data"]["status"], json!("sent"));

    let (status, _) = call(&app, Method::POST, &uri, tenant, Some(payment)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, detail) = call(&app, Method::GET, &format!("/api/invoices/{}", invoice_id), tenant, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["data"]["invoice"]["status"], json!("paid"));
    assert_eq!(dec(&detail["data"]["invoice"]["balance_due"]), Decimal::ZERO);

    let (status, balance) = call(&app, Method::GET, "/api/ledger/trial-balance", tenant, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&balance["data"]["total_debits"]), dec(&balance["data"]["total_credits"]));

    // Paid invoices cannot be cancelled
    let (status, body) = call(&app, Method::POST, &format!("/api/invoices/{}/cancel", invoice_id), tenant, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));

    println!("✅ Invoice payment flow test passed");
}

#[tokio::test]
async fn test_error_envelope() {
    let app = app();
    let (company_id, user_id) = bootstrap(&app).await;
    let tenant = Some((company_id, user_id));

    let (status, body) = call(&app, Method::GET, "/api/invoices/9999", tenant, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert!(body["data"].is_null());
    assert!(body["error"].is_string());

    // No API key configured
    let (status, body) = call(&app, Method::POST, "/api/insights/generate", tenant, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], json!(false));

    println!("✅ Error envelope test passed");
}

#[tokio::test]
async fn test_dashboard_for_empty_company() {
    let app = app();
    let (company_id, user_id) = bootstrap(&app).await;

    let (status, body) = call(&app, Method::GET, "/api/dashboard", Some((company_id, user_id)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&body["data"]["outstanding_receivables"]), Decimal::ZERO);
    assert_eq!(body["data"]["active_employees"], json!(0));

    println!("✅ Empty dashboard test passed");
}

#[tokio::test]
async fn test_oversized_amounts_do_not_break_the_server() {
    let app = app();
    let (company_id, user_id) = bootstrap(&app).await;
    let tenant = Some((company_id, user_id));

    let (_, customer) = call(
        &app,
        Method::POST,
        "/api/customers",
        tenant,
        Some(json!({"name": "Kwame Boateng", "email": "kwame@example.test"})),
    )
    .await;
    let customer_id = customer["data"]["id"].as_i64().unwrap();

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/invoices",
        tenant,
        Some(json!({
            "customer_id": customer_id,
            "date_due": "2030-01-31",
            "items": [{"description": "Huge", "quantity": "79228162514264337593543950335", "unit_price": "2"}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/expenses",
        tenant,
        Some(json!({
            "description": "Yacht",
            "amount": "79228162514264337593543950335",
            "tax_amount": "79228162514264337593543950335",
            "payment_method": "credit_card"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));

    // The shared connection is still usable
    let (status, body) = call(&app, Method::GET, "/api/customers", tenant, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    println!("✅ Oversized amount test passed");
}

#[tokio::test]
async fn test_financial_statements() {
    let app = app();
    let (company_id, user_id) = bootstrap(&app).await;
    let tenant = Some((company_id, user_id));

    let (_, customer) = call(
        &app,
        Method::POST,
        "/api/customers",
        tenant,
        Some(json!({"name": "Kwame Boateng", "email": "kwame@example.test"})),
    )
    .await;
    let (_, invoice) = call(
        &app,
        Method::POST,
        "/api/invoices",
        tenant,
        Some(json!({
            "customer_id": customer["data"]["id"],
            "date_created": "2025-03-01",
            "date_due": "2025-03-31",
            "items": [{"description": "Consulting", "quantity": "1", "unit_price": "400.00"}]
        })),
    )
    .await;
    let uri = format!("/api/invoices/{}/payments", invoice["data"]["id"]);
    let (status, _) = call(
        &app,
        Method::POST,
        &uri,
        tenant,
        Some(json!({"amount": "400.00", "payment_method": "cash", "payment_date": "2025-03-15"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, income) = call(
        &app,
        Method::GET,
        "/api/ledger/income-statement?from=2025-03-01&to=2025-03-31",
        tenant,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&income["data"]["revenue"]["total"]), Decimal::new(40000, 2));
    assert_eq!(dec(&income["data"]["net_income"]), Decimal::new(40000, 2));

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/ledger/income-statement?from=2025-04-01&to=2025-03-01",
        tenant,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, sheet) = call(&app, Method::GET, "/api/ledger/balance-sheet?as_of=2025-03-31", tenant, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dec(&sheet["data"]["assets"]["total"]), Decimal::new(40000, 2));
    assert_eq!(dec(&sheet["data"]["retained_earnings"]), Decimal::new(40000, 2));
    assert_eq!(
        dec(&sheet["data"]["assets"]["total"]),
        dec(&sheet["data"]["total_liabilities_and_equity"])
    );

    println!("✅ Financial statements API test passed");
}
