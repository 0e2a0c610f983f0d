//! # REST + JSON-RPC + WebSocket API
//!
//! Builds the axum router that exposes the custodian over HTTP. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                     | Description                          |
//! |--------|--------------------------|--------------------------------------|
//! | GET    | `/health`                | Liveness probe                       |
//! | GET    | `/status`                | Ledger parameters, aggregates, audit |
//! | GET    | `/accounts/:address`     | Ledger and wallet balance            |
//! | POST   | `/deposit`               | Deposit from the caller's wallet     |
//! | POST   | `/withdraw`              | Withdraw to the caller's wallet      |
//! | POST   | `/wallets/:address/fund` | Faucet: mint external wallet value   |
//! | POST   | `/rpc`                   | JSON-RPC 2.0 gateway                 |
//! | GET    | `/ws`                    | WebSocket push of ledger events      |
//!
//! ## Error Mapping
//!
//! Custodian rejections return HTTP 422 (REST) or a JSON-RPC error in the
//! `-32010..=-32017` range. Both carry a machine-readable `code` and, where
//! the rejection has operands, a `data` object holding them. Malformed input
//! returns HTTP 400 or JSON-RPC `-32602`.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use custody_contracts::{Custodian, CustodyError, LedgerError, LedgerEvent, LedgerSnapshot};
use custody_protocol::config::EVENT_CHANNEL_CAPACITY;
use custody_protocol::Address;

use crate::metrics::{Operation, SharedMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone; everything heavy sits behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// The ledger and its external wallets.
    pub custodian: Arc<Custodian>,
    /// Committed ledger events, fanned out to WebSocket subscribers.
    pub event_tx: broadcast::Sender<LedgerEvent>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// Whether `/wallets/:address/fund` is served.
    pub faucet_enabled: bool,
    /// When the node started serving.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Wires `custodian` to a fresh event channel and seeds the gauges.
    pub fn new(
        version: String,
        custodian: Arc<Custodian>,
        metrics: SharedMetrics,
        faucet_enabled: bool,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let forward = event_tx.clone();
        custodian.subscribe(move |event: &LedgerEvent| {
            // Err only means nobody is listening right now.
            let _ = forward.send(event.clone());
        });
        metrics.observe_snapshot(&custodian.snapshot());

        Self {
            version,
            custodian,
            event_tx,
            metrics,
            faucet_enabled,
            started_at: chrono::Utc::now(),
        }
    }

    /// Runs one state-changing operation and records its outcome.
    fn execute(
        &self,
        operation: Operation,
        account: &Address,
        amount: u64,
    ) -> Result<OperationReceipt, CustodyError> {
        let started = Instant::now();
        let result = match operation {
            Operation::Deposit => self.custodian.deposit(account, amount),
            Operation::Withdraw => self.custodian.withdraw(account, amount),
        };
        let elapsed = started.elapsed();

        let settlement = match result {
            Ok(settlement) => settlement,
            Err(err) => {
                self.metrics
                    .record_rejection(operation, error_reason(&err), elapsed);
                tracing::debug!(
                    operation = operation.as_str(),
                    account = %account,
                    amount,
                    error = %err,
                    "operation rejected"
                );
                return Err(err);
            }
        };
        self.metrics.record_success(operation, elapsed);
        self.metrics.observe_snapshot(&settlement.snapshot);

        Ok(OperationReceipt {
            operation,
            account: *account,
            amount,
            balance: settlement.balance,
            total_deposited: settlement.snapshot.total_deposited,
        })
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/deposit", post(deposit_handler))
        .route("/withdraw", post(withdraw_handler))
        .route("/wallets/:address/fund", post(fund_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    /// The method to invoke.
    pub method: String,
    /// Positional method parameters.
    pub params: Option<Value>,
    /// Request identifier. Echoed back in the response.
    pub id: Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version. Always "2.0".
    pub jsonrpc: String,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Request identifier, echoed from the request.
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Short human-readable error description.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: format!("Invalid params: {}", message.into()),
            data: None,
        }
    }
}

impl From<&CustodyError> for JsonRpcError {
    fn from(err: &CustodyError) -> Self {
        Self {
            code: error_code(err),
            message: err.to_string(),
            data: Some(error_data(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /deposit` and `POST /withdraw`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationRequest {
    pub account: Address,
    pub amount: u64,
}

/// Body of `POST /wallets/:address/fund`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FundRequest {
    pub amount: u64,
}

/// Result of a successful deposit or withdrawal.
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub operation: Operation,
    pub account: Address,
    pub amount: u64,
    /// The account's ledger balance after the operation.
    pub balance: u64,
    /// Ledger total after the operation.
    pub total_deposited: u64,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Node software version.
    pub version: String,
    /// Parameters and aggregates.
    pub ledger: LedgerSnapshot,
    /// Value physically held by the custodian.
    pub custody: u64,
    /// Whether every ledger and custody invariant holds.
    pub healthy: bool,
    pub faucet_enabled: bool,
    pub uptime_seconds: i64,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /accounts/:address`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountResponse {
    pub address: Address,
    /// Balance held in the ledger.
    pub balance: u64,
    /// Spendable value outside the ledger.
    pub wallet_balance: u64,
}

/// Error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description.
    pub error: String,
    /// Stable snake_case identifier, e.g. `bank_cap_exceeded`.
    pub code: String,
    /// Operands of the rejection, when it has any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn error_response(status: StatusCode, code: &str, error: impl Into<String>) -> Response {
    let body = ErrorResponse {
        error: error.into(),
        code: code.to_string(),
        data: None,
    };
    (status, Json(body)).into_response()
}

fn custody_error_response(err: &CustodyError) -> Response {
    let body = ErrorResponse {
        error: err.to_string(),
        code: error_reason(err).to_string(),
        data: Some(error_data(err)),
    };
    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// Stable identifier for a rejection, used in REST bodies and metric labels.
pub fn error_reason(err: &CustodyError) -> &'static str {
    match err {
        CustodyError::Ledger(LedgerError::InvalidAmount) => "invalid_amount",
        CustodyError::Ledger(LedgerError::BankCapExceeded { .. }) => "bank_cap_exceeded",
        CustodyError::Ledger(LedgerError::InsufficientBalance { .. }) => "insufficient_balance",
        CustodyError::Ledger(LedgerError::WithdrawalOverLimit { .. }) => "withdrawal_over_limit",
        CustodyError::Ledger(LedgerError::TransferFailed(_)) => "transfer_failed",
        CustodyError::Ledger(LedgerError::ArithmeticOverflow) => "arithmetic_overflow",
        CustodyError::FundsNotReceived(_) => "funds_not_received",
        CustodyError::Wallet(_) => "wallet_error",
    }
}

/// JSON-RPC error code for a rejection.
pub fn error_code(err: &CustodyError) -> i32 {
    match err {
        CustodyError::Ledger(LedgerError::InvalidAmount) => -32010,
        CustodyError::Ledger(LedgerError::BankCapExceeded { .. }) => -32011,
        CustodyError::Ledger(LedgerError::InsufficientBalance { .. }) => -32012,
        CustodyError::Ledger(LedgerError::WithdrawalOverLimit { .. }) => -32013,
        CustodyError::Ledger(LedgerError::TransferFailed(_)) => -32014,
        CustodyError::Ledger(LedgerError::ArithmeticOverflow) => -32015,
        CustodyError::FundsNotReceived(_) => -32016,
        CustodyError::Wallet(_) => -32017,
    }
}

/// Structured operands of a rejection.
fn error_data(err: &CustodyError) -> Value {
    let operands = match err {
        CustodyError::Ledger(LedgerError::BankCapExceeded { attempted, cap }) => {
            json!({ "attempted": attempted, "cap": cap })
        }
        CustodyError::Ledger(LedgerError::InsufficientBalance {
            requested,
            available,
        }) => json!({ "requested": requested, "available": available }),
        CustodyError::Ledger(LedgerError::WithdrawalOverLimit { attempted, limit }) => {
            json!({ "attempted": attempted, "limit": limit })
        }
        CustodyError::Ledger(LedgerError::TransferFailed(cause))
        | CustodyError::FundsNotReceived(cause)
        | CustodyError::Wallet(cause) => json!({ "cause": cause.to_string() }),
        CustodyError::Ledger(LedgerError::InvalidAmount)
        | CustodyError::Ledger(LedgerError::ArithmeticOverflow) => json!({}),
    };
    json!({ "reason": error_reason(err), "operands": operands })
}

// ---------------------------------------------------------------------------
// REST Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: Returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /status`: Ledger parameters, aggregates and a fresh audit.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let audit = state.custodian.audit();

    Json(StatusResponse {
        version: state.version.clone(),
        ledger: state.custodian.snapshot(),
        custody: audit.custody,
        healthy: audit.is_healthy(),
        faucet_enabled: state.faucet_enabled,
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now.to_rfc3339(),
    })
}

/// `GET /accounts/:address`: Ledger and wallet balance. Unknown accounts
/// report zero for both.
async fn account_handler(Path(address): Path<String>, State(state): State<AppState>) -> Response {
    let address: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_address", e.to_string())
        }
    };

    Json(AccountResponse {
        address,
        balance: state.custodian.balance_of(&address),
        wallet_balance: state.custodian.wallet_balance(&address),
    })
    .into_response()
}

/// `POST /deposit`: Moves value from the caller's wallet into the ledger.
async fn deposit_handler(
    State(state): State<AppState>,
    payload: Result<Json<OperationRequest>, JsonRejection>,
) -> Response {
    apply_operation(&state, Operation::Deposit, payload)
}

/// `POST /withdraw`: Pays ledger value back out to the caller's wallet.
async fn withdraw_handler(
    State(state): State<AppState>,
    payload: Result<Json<OperationRequest>, JsonRejection>,
) -> Response {
    apply_operation(&state, Operation::Withdraw, payload)
}

fn apply_operation(
    state: &AppState,
    operation: Operation,
    payload: Result<Json<OperationRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    };

    match state.execute(operation, &req.account, req.amount) {
        Ok(receipt) => (StatusCode::OK, Json(receipt)).into_response(),
        Err(err) => custody_error_response(&err),
    }
}

/// `POST /wallets/:address/fund`: Credits external value to a wallet.
///
/// Returns 403 when the node runs with `--no-faucet`.
async fn fund_handler(
    Path(address): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<FundRequest>, JsonRejection>,
) -> Response {
    if !state.faucet_enabled {
        return error_response(StatusCode::FORBIDDEN, "faucet_disabled", "faucet is disabled");
    }
    let address: Address = match address.parse() {
        Ok(a) => a,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_address", e.to_string())
        }
    };
    let Json(req) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
        }
    };

    match state.custodian.fund_wallet(&address, req.amount) {
        Ok(wallet_balance) => {
            tracing::info!(account = %address, amount = req.amount, "wallet funded");
            Json(json!({ "address": address, "wallet_balance": wallet_balance })).into_response()
        }
        Err(err) => custody_error_response(&err),
    }
}

// ---------------------------------------------------------------------------
// JSON-RPC
// ---------------------------------------------------------------------------

/// `POST /rpc`: JSON-RPC 2.0 gateway.
///
/// Unknown methods return -32601. Custodian rejections carry their own
/// codes; see the module docs.
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError {
                code: -32600,
                message: "Invalid Request: jsonrpc must be \"2.0\"".into(),
                data: None,
            }),
            id: req.id,
        });
    }

    let (result, error) = match dispatch(&state, &req.method, req.params.as_ref()) {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err)),
    };

    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

fn dispatch(state: &AppState, method: &str, params: Option<&Value>) -> Result<Value, JsonRpcError> {
    match method {
        "ledger_deposit" | "ledger_withdraw" => {
            let operation = if method == "ledger_deposit" {
                Operation::Deposit
            } else {
                Operation::Withdraw
            };
            let account = param_address(params, 0)?;
            let amount = param_amount(params, 1)?;
            let receipt = state
                .execute(operation, &account, amount)
                .map_err(|e| JsonRpcError::from(&e))?;
            serde_json::to_value(receipt).map_err(|e| JsonRpcError {
                code: -32603,
                message: format!("Internal error: {}", e),
                data: None,
            })
        }
        "ledger_balanceOf" => {
            let account = param_address(params, 0)?;
            Ok(json!(state.custodian.balance_of(&account)))
        }
        "ledger_totalDeposited" => Ok(json!(state.custodian.snapshot().total_deposited)),
        "ledger_depositCount" => Ok(json!(state.custodian.snapshot().deposit_count)),
        "ledger_withdrawalCount" => Ok(json!(state.custodian.snapshot().withdrawal_count)),
        "ledger_withdrawalLimit" => Ok(json!(state.custodian.snapshot().withdrawal_limit)),
        "ledger_capacity" => Ok(json!(state.custodian.snapshot().capacity)),
        _ => Err(JsonRpcError {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }),
    }
}

fn positional(params: Option<&Value>, index: usize) -> Option<&Value> {
    params.and_then(|p| p.as_array()).and_then(|arr| arr.get(index))
}

fn param_address(params: Option<&Value>, index: usize) -> Result<Address, JsonRpcError> {
    let raw = positional(params, index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            JsonRpcError::invalid_params(format!("expected address at position {}", index))
        })?;
    raw.parse()
        .map_err(|e| JsonRpcError::invalid_params(format!("{}", e)))
}

fn param_amount(params: Option<&Value>, index: usize) -> Result<u64, JsonRpcError> {
    positional(params, index)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            JsonRpcError::invalid_params(format!("expected amount at position {}", index))
        })
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// `GET /ws`: WebSocket upgrade for live ledger events.
///
/// Clients receive one JSON-encoded [`LedgerEvent`] per committed deposit
/// or withdrawal. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Forwards broadcast events until the client disconnects or the channel
/// closes.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.event_tx.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
