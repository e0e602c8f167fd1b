// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration tests for the REST API server.
//!
//! These tests drive the wallet API over HTTP: the owner token flow, the
//! response envelope, error statuses and concurrent deposits.

use axum::{
    Json, Router,
    extract::{FromRequestParts, State},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use wallet_ledger_rs::{
    ErrorKind, InitializeWalletRequest, MemoryStore, OwnerId, SettlementConfig, SettlementHandle,
    TransactionRequest, WalletError, WalletService,
};

// === Router (duplicated from the server demo for test isolation) ===

#[derive(Debug, Deserialize)]
struct InitRequest {
    customer_xid: String,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    status: &'static str,
    data: T,
}

fn success(data: Value) -> Json<Envelope<Value>> {
    Json(Envelope {
        status: "success",
        data,
    })
}

#[derive(Clone)]
struct AppState {
    wallets: Arc<WalletService<MemoryStore>>,
}

enum AppError {
    Unauthorized,
    Wallet(WalletError),
}

impl From<WalletError> for AppError {
    fn from(err: WalletError) -> Self {
        AppError::Wallet(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            AppError::Wallet(err) => {
                let status = match err.kind() {
                    ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::Conflict => StatusCode::CONFLICT,
                    ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                    ErrorKind::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, err.to_string())
            }
        };
        let body = Envelope {
            status: "fail",
            data: json!({ "error": error }),
        };
        (status, Json(body)).into_response()
    }
}

struct Owner(OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Token "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Owner(OwnerId::from(token)))
            .ok_or(AppError::Unauthorized)
    }
}

type Reply = Result<(StatusCode, Json<Envelope<Value>>), AppError>;

async fn init_wallet(State(state): State<AppState>, Json(request): Json<InitRequest>) -> Reply {
    let wallet = state
        .wallets
        .initialize_wallet(&InitializeWalletRequest::new(request.customer_xid))?;
    Ok((StatusCode::CREATED, success(json!({ "token": wallet.owner_id }))))
}

async fn enable_wallet(State(state): State<AppState>, Owner(owner): Owner) -> Reply {
    let wallet = state.wallets.enable_wallet(&owner)?;
    Ok((StatusCode::CREATED, success(json!({ "wallet": wallet }))))
}

async fn get_balance(State(state): State<AppState>, Owner(owner): Owner) -> Reply {
    let wallet = state.wallets.get_balance(&owner)?;
    Ok((StatusCode::OK, success(json!({ "wallet": wallet }))))
}

async fn disable_wallet(State(state): State<AppState>, Owner(owner): Owner) -> Reply {
    let wallet = state.wallets.disable_wallet(&owner)?;
    Ok((StatusCode::OK, success(json!({ "wallet": wallet }))))
}

async fn list_transactions(State(state): State<AppState>, Owner(owner): Owner) -> Reply {
    let transactions: Vec<_> = state
        .wallets
        .list_transactions(&owner)?
        .iter()
        .map(|tx| tx.receipt())
        .collect();
    Ok((StatusCode::OK, success(json!({ "transactions": transactions }))))
}

async fn deposit(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<TransactionRequest>,
) -> Reply {
    let tx = state.wallets.deposit(&owner, &request)?;
    Ok((StatusCode::CREATED, success(json!({ "deposit": tx.receipt() }))))
}

async fn withdraw(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<TransactionRequest>,
) -> Reply {
    let tx = state.wallets.withdraw(&owner, &request)?;
    Ok((StatusCode::CREATED, success(json!({ "withdrawal": tx.receipt() }))))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/init", post(init_wallet))
        .route(
            "/api/v1/wallet",
            get(get_balance).post(enable_wallet).patch(disable_wallet),
        )
        .route("/api/v1/wallet/transactions", get(list_transactions))
        .route("/api/v1/wallet/deposits", post(deposit))
        .route("/api/v1/wallet/withdrawals", post(withdraw))
        .with_state(state)
}

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    settlement: SettlementHandle<MemoryStore>,
    client: Client,
}

impl TestServer {
    async fn new() -> Self {
        let (wallets, settlement) =
            WalletService::start(Arc::new(MemoryStore::new()), SettlementConfig::immediate());
        let app = create_router(AppState {
            wallets: Arc::new(wallets),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready by polling with retries
        let client = Client::new();
        let health_url = format!("{}/api/v1/wallet", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer {
            base_url,
            settlement,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = self.client.request(method, self.url(path));
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    /// Initializes and enables a wallet, returning its token.
    async fn open_wallet(&self, customer: &str) -> String {
        let (status, body) = self
            .call(
                reqwest::Method::POST,
                "/api/v1/init",
                None,
                Some(json!({ "customer_xid": customer })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let (status, _) = self
            .call(reqwest::Method::POST, "/api/v1/wallet", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::CREATED);
        token
    }
}

// === Tests ===

#[tokio::test]
async fn wallet_flow_over_http() {
    let server = TestServer::new().await;
    let token = server.open_wallet("ea0212d3-abd6-406f-8c67-868e814a2436").await;

    let (status, body) = server
        .call(
            reqwest::Method::POST,
            "/api/v1/wallet/deposits",
            Some(&token),
            Some(json!({ "amount": 100000, "reference_id": "ref-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["deposit"]["status"], "pending");
    assert_eq!(body["data"]["deposit"]["type"], "deposit");
    assert_eq!(body["data"]["deposit"]["amount"], 100000);

    server.settlement.wait_idle().await;

    let (status, body) = server
        .call(reqwest::Method::GET, "/api/v1/wallet", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["wallet"]["balance"], 100000);
    assert_eq!(body["data"]["wallet"]["status"], "enabled");
    assert_eq!(
        body["data"]["wallet"]["owned_by"],
        "ea0212d3-abd6-406f-8c67-868e814a2436"
    );

    let (status, body) = server
        .call(
            reqwest::Method::POST,
            "/api/v1/wallet/withdrawals",
            Some(&token),
            Some(json!({ "amount": 60000, "reference_id": "ref-2" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["withdrawal"]["type"], "withdrawal");
    server.settlement.wait_idle().await;

    let (status, body) = server
        .call(
            reqwest::Method::GET,
            "/api/v1/wallet/transactions",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let transactions = body["data"]["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert!(transactions.iter().all(|tx| tx["status"] == "success"));

    let (status, body) = server
        .call(reqwest::Method::PATCH, "/api/v1/wallet", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["wallet"]["status"], "disabled");
    assert_eq!(body["data"]["wallet"]["balance"], 40000);
}

#[tokio::test]
async fn errors_use_the_fail_envelope() {
    let server = TestServer::new().await;

    // No token
    let (status, body) = server
        .call(reqwest::Method::GET, "/api/v1/wallet", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "fail");

    // Unknown owner
    let (status, _) = server
        .call(reqwest::Method::GET, "/api/v1/wallet", Some("ghost"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let token = server.open_wallet("cust-1").await;

    // Enabled twice
    let (status, _) = server
        .call(reqwest::Method::POST, "/api/v1/wallet", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Overdraw
    let (status, body) = server
        .call(
            reqwest::Method::POST,
            "/api/v1/wallet/withdrawals",
            Some(&token),
            Some(json!({ "amount": 1, "reference_id": "ref-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["data"]["error"].as_str().unwrap().contains("insufficient"));

    // Invalid amount
    let (status, _) = server
        .call(
            reqwest::Method::POST,
            "/api/v1/wallet/deposits",
            Some(&token),
            Some(json!({ "amount": 0, "reference_id": "ref-2" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Disabled wallet hides history
    server
        .call(reqwest::Method::PATCH, "/api/v1/wallet", Some(&token), None)
        .await;
    let (status, _) = server
        .call(
            reqwest::Method::GET,
            "/api/v1/wallet/transactions",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// === Load Tests ===
// These tests are ignored in CI due to connection issues on some platforms.
// Run manually with: cargo test --test server_test -- --ignored

/// Concurrent deposits to different wallets, each settled in turn.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_deposits_to_multiple_wallets() {
    let server = TestServer::new().await;

    const NUM_WALLETS: usize = 50;
    const DEPOSITS_PER_WALLET: usize = 20;
    const AMOUNT_PER_DEPOSIT: i64 = 10;

    let mut tokens = Vec::with_capacity(NUM_WALLETS);
    for n in 0..NUM_WALLETS {
        tokens.push(server.open_wallet(&format!("cust-{n}")).await);
    }

    let start = Instant::now();
    let mut successful = 0usize;

    // One deposit per wallet per round, so every round settles on a fresh balance
    for round in 0..DEPOSITS_PER_WALLET {
        let mut handles = Vec::with_capacity(NUM_WALLETS);
        for token in &tokens {
            let client = server.client.clone();
            let url = server.url("/api/v1/wallet/deposits");
            let token = token.clone();

            handles.push(tokio::spawn(async move {
                let response = client
                    .post(&url)
                    .header(AUTHORIZATION, format!("Token {token}"))
                    .json(&json!({ "amount": AMOUNT_PER_DEPOSIT, "reference_id": format!("ref-{round}") }))
                    .send()
                    .await
                    .unwrap();
                response.status()
            }));
        }

        let results: Vec<_> = futures::future::join_all(handles).await;
        successful += results
            .iter()
            .filter(|r| r.as_ref().unwrap().is_success())
            .count();
        server.settlement.wait_idle().await;
    }

    let elapsed = start.elapsed();
    let total_requests = NUM_WALLETS * DEPOSITS_PER_WALLET;
    println!(
        "Processed {} requests in {:?} ({:.0} req/s)",
        total_requests,
        elapsed,
        total_requests as f64 / elapsed.as_secs_f64()
    );
    assert_eq!(successful, total_requests, "All deposits should be accepted");

    let expected_balance = AMOUNT_PER_DEPOSIT * DEPOSITS_PER_WALLET as i64;
    for token in &tokens {
        let (_, body) = server
            .call(reqwest::Method::GET, "/api/v1/wallet", Some(token), None)
            .await;
        assert_eq!(
            body["data"]["wallet"]["balance"], expected_balance,
            "Wallet {} should hold {}",
            token, expected_balance
        );
    }
}

/// Concurrent deposits to a single wallet: at most one settlement per
/// snapshot applies, and the balance equals the sum of successful deposits.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_deposits_single_wallet() {
    let server = TestServer::new().await;
    let token = server.open_wallet("cust-1").await;

    const NUM_DEPOSITS: usize = 500;

    let mut handles = Vec::with_capacity(NUM_DEPOSITS);
    for i in 0..NUM_DEPOSITS {
        let client = server.client.clone();
        let url = server.url("/api/v1/wallet/deposits");
        let token = token.clone();

        handles.push(tokio::spawn(async move {
            let response = client
                .post(&url)
                .header(AUTHORIZATION, format!("Token {token}"))
                .json(&json!({ "amount": 1, "reference_id": format!("ref-{i}") }))
                .send()
                .await
                .unwrap();
            response.status()
        }));
    }

    let results: Vec<_> = futures::future::join_all(handles).await;
    assert!(results.iter().all(|r| r.as_ref().unwrap().is_success()));
    server.settlement.wait_idle().await;

    let (_, body) = server
        .call(
            reqwest::Method::GET,
            "/api/v1/wallet/transactions",
            Some(&token),
            None,
        )
        .await;
    let transactions = body["data"]["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), NUM_DEPOSITS);
    assert!(transactions.iter().all(|tx| tx["status"] != "pending"));
    let settled = transactions
        .iter()
        .filter(|tx| tx["status"] == "success")
        .count();

    let (_, body) = server
        .call(reqwest::Method::GET, "/api/v1/wallet", Some(&token), None)
        .await;
    assert_eq!(body["data"]["wallet"]["balance"], settled as i64);
}
