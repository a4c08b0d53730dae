//! Demo REST adapter for the kiosk ledger.
//!
//! Run with: `cargo run --example server`
//!
//! Seeds five demo users with QR codes `QR_USER_001` through `QR_USER_005`
//! and a starting balance, then serves the kiosk HTTP surface. The wire
//! encoding and status-code mapping live here; the library only exposes
//! typed operations and typed error kinds.
//!
//! ## Endpoints
//!
//! - `POST /auth/scan` - QR login, returns a bearer token
//! - `POST /auth/logout` - Revoke the current session
//! - `GET  /user/dashboard` - Balance and allowed quantities
//! - `GET  /user/wallet` - Balance only
//! - `POST /dispense/start` - Open a dispense request
//! - `POST /dispense/complete` - Report the hardware outcome
//! - `GET  /dispense/allowed?quantity=N` - Tier membership check
//! - `GET  /config/quantities` - Configured tiers
//! - `GET  /health` - Liveness
//!
//! ## Example Usage
//!
//! ```bash
//! # Login
//! curl -X POST http://localhost:3000/auth/scan \
//!   -H "Content-Type: application/json" \
//!   -d '{"qr_code": "QR_USER_001"}'
//!
//! # Start a dispense (take the token from the login response)
//! curl -X POST http://localhost:3000/dispense/start \
//!   -H "Authorization: Bearer <token>" \
//!   -H "Content-Type: application/json" \
//!   -d '{"quantity": 500}'
//!
//! # Report the outcome
//! curl -X POST http://localhost:3000/dispense/complete \
//!   -H "Authorization: Bearer <token>" \
//!   -H "Content-Type: application/json" \
//!   -d '{"dispense_id": "<id>", "status": "COMPLETED"}'
//! ```

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use kiosk_ledger_rs::{
    DispenseCoordinator, DispenseError, DispenseRegistry, DispenseStatus, KioskConfig,
    LedgerStore, RequestId, SessionError, SessionProvider, UserDirectory, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub qr_code: String,
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub wallet_balance: i64,
    pub allowed_quantities: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub success: bool,
    pub dispense_id: RequestId,
    pub quantity_ml: u32,
    pub cost: i64,
    pub message: String,
    pub hardware_instruction: kiosk_ledger_rs::HardwareInstruction,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub dispense_id: RequestId,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct CompleteResponse {
    pub success: bool,
    pub dispense_id: RequestId,
    pub status: DispenseStatus,
    pub wallet_balance: i64,
    pub amount_deducted: i64,
    pub already_finalized: bool,
}

#[derive(Debug, Deserialize)]
pub struct AllowedQuery {
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct AllowedResponse {
    pub success: bool,
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
pub struct QuantitiesResponse {
    pub success: bool,
    pub quantities: Vec<u32>,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state wiring the kiosk components together.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<DispenseCoordinator>,
    pub sessions: Arc<SessionProvider>,
    pub ledger: Arc<LedgerStore>,
}

// === Error Handling ===

/// Wrapper for converting library errors into HTTP responses.
pub enum AppError {
    Dispense(DispenseError),
    Session(SessionError),
}

impl From<DispenseError> for AppError {
    fn from(err: DispenseError) -> Self {
        AppError::Dispense(err)
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Session(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Dispense(err) => {
                let (status, code) = match err {
                    DispenseError::InvalidQuantity => (StatusCode::BAD_REQUEST, "INVALID_QUANTITY"),
                    DispenseError::InsufficientFunds => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
                    }
                    DispenseError::WalletNotFound => (StatusCode::NOT_FOUND, "WALLET_NOT_FOUND"),
                    DispenseError::RequestNotFound => (StatusCode::NOT_FOUND, "REQUEST_NOT_FOUND"),
                    DispenseError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                    DispenseError::InvalidStatus => (StatusCode::BAD_REQUEST, "INVALID_STATUS"),
                    DispenseError::InvalidTransition => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
                    DispenseError::StorageTimeout => {
                        (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_TIMEOUT")
                    }
                    DispenseError::StorageUnavailable => {
                        (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE")
                    }
                    DispenseError::WalletUnavailable => {
                        (StatusCode::SERVICE_UNAVAILABLE, "WALLET_UNAVAILABLE")
                    }
                };
                (status, code, err.to_string())
            }
            AppError::Session(err) => {
                let code = match err {
                    SessionError::InvalidQrCode => "INVALID_QR_CODE",
                    SessionError::Unauthenticated => "UNAUTHENTICATED",
                };
                (StatusCode::UNAUTHORIZED, code, err.to_string())
            }
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Auth ===

/// Pulls the bearer token out of the Authorization header.
fn bearer(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Session(SessionError::Unauthenticated))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, AppError> {
    let token = bearer(headers)?;
    Ok(state.sessions.resolve(token)?)
}

// === Handlers ===

/// POST /auth/scan - QR login.
async fn scan_login(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    let grant = state.sessions.scan_login(&request.qr_code)?;
    Ok(Json(ScanResponse {
        success: true,
        token: grant.token,
        user: UserResponse {
            id: grant.user.id,
            name: grant.user.name,
            phone: grant.user.phone,
        },
    }))
}

/// POST /auth/logout - Revoke the current session.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, AppError> {
    let token = bearer(&headers)?;
    if state.sessions.logout(token) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::Session(SessionError::Unauthenticated))
    }
}

/// GET /user/dashboard - Balance plus allowed quantities.
async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<DashboardResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let balance = state.ledger.balance(&user_id)?;
    Ok(Json(DashboardResponse {
        wallet_balance: balance,
        allowed_quantities: state.coordinator.pricing().allowed_quantities(),
    }))
}

/// GET /user/wallet - Balance only.
async fn wallet(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<WalletResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let balance = state.ledger.balance(&user_id)?;
    Ok(Json(WalletResponse { balance }))
}

/// POST /dispense/start - Open a dispense request.
async fn start_dispense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let ticket = state.coordinator.start_dispense(user_id, request.quantity)?;
    Ok(Json(StartResponse {
        success: true,
        dispense_id: ticket.request_id,
        quantity_ml: ticket.quantity_ml,
        cost: ticket.cost,
        message: "Dispense request created. Please proceed with hardware dispensing.".to_string(),
        hardware_instruction: ticket.instruction,
    }))
}

/// POST /dispense/complete - Report the hardware outcome.
async fn complete_dispense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, AppError> {
    let user_id = authenticate(&state, &headers)?;
    let completion =
        state
            .coordinator
            .complete_dispense(user_id, request.dispense_id, &request.status)?;
    Ok(Json(CompleteResponse {
        success: true,
        dispense_id: request.dispense_id,
        status: completion.status(),
        wallet_balance: completion.wallet_balance(),
        amount_deducted: completion.amount_deducted(),
        already_finalized: completion.is_already_finalized(),
    }))
}

/// GET /dispense/allowed - Tier membership check.
async fn is_allowed(
    State(state): State<AppState>,
    Query(query): Query<AllowedQuery>,
) -> Json<AllowedResponse> {
    Json(AllowedResponse {
        success: true,
        allowed: state.coordinator.is_allowed_to_dispense(query.quantity),
    })
}

/// GET /config/quantities - Configured tiers.
async fn quantities(State(state): State<AppState>) -> Json<QuantitiesResponse> {
    Json(QuantitiesResponse {
        success: true,
        quantities: state.coordinator.pricing().allowed_quantities(),
    })
}

/// GET /health - Liveness.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/scan", post(scan_login))
        .route("/auth/logout", post(logout))
        .route("/user/dashboard", get(dashboard))
        .route("/user/wallet", get(wallet))
        .route("/dispense/start", post(start_dispense))
        .route("/dispense/complete", post(complete_dispense))
        .route("/dispense/allowed", get(is_allowed))
        .route("/config/quantities", get(quantities))
        .with_state(state)
}

// === Seeding ===

/// Demo users in the style of the kiosk's production seed.
fn seed_users(directory: &UserDirectory, ledger: &LedgerStore) {
    let users = [
        ("QR_USER_001", "John Doe", Some("+1234567890"), 500),
        ("QR_USER_002", "Jane Smith", Some("+1234567891"), 350),
        ("QR_USER_003", "Bob Johnson", Some("+1234567892"), 800),
        ("QR_USER_004", "Alice Williams", None, 120),
        ("QR_USER_005", "Charlie Brown", Some("+1234567894"), 1000),
    ];

    for (qr_code, name, phone, balance) in users {
        let user = directory.register(qr_code, name, phone);
        ledger
            .ensure_wallet(user.id)
            .and_then(|()| ledger.credit(&user.id, balance, "Seed balance"))
            .expect("seeding a fresh store cannot fail");
        println!("Seeded user: {name} (QR: {qr_code}, balance: {balance})");
    }
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = KioskConfig::from_env().expect("invalid kiosk configuration");

    let directory = Arc::new(UserDirectory::new());
    let ledger = Arc::new(LedgerStore::with_lock_timeout(config.store_timeout));
    let registry = Arc::new(DispenseRegistry::new());
    let sessions = Arc::new(SessionProvider::with_ttl(
        Arc::clone(&directory),
        Arc::clone(&ledger),
        config.session_ttl(),
    ));
    let coordinator = Arc::new(DispenseCoordinator::with_retry(
        config.pricing(),
        Arc::clone(&ledger),
        Arc::clone(&registry),
        config.retry,
    ));

    seed_users(&directory, &ledger);

    let app = create_router(AppState {
        coordinator,
        sessions,
        ledger,
    });

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Kiosk API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /auth/scan          - QR login");
    println!("  POST /auth/logout        - Revoke session");
    println!("  GET  /user/dashboard     - Balance and tiers");
    println!("  GET  /user/wallet        - Balance");
    println!("  POST /dispense/start     - Open a dispense");
    println!("  POST /dispense/complete  - Report an outcome");
    println!("  GET  /dispense/allowed   - Tier check");
    println!("  GET  /config/quantities  - Configured tiers");

    axum::serve(listener, app).await.unwrap();
}
