// Scout Core - Web Server
// REST surface over the reconciliation, health, and gap engines

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

use scout::{
    account_lookup, aggregate_gaps, compute_health, preview_changes, ChangeRecord,
    CollisionPolicy, HealthSnapshot, ImportRecord, MatchSummary, ReconcileOutcome, Reconciler,
    SqliteStore, TamAccount,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<SqliteStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Deserialize)]
struct PreviewRequest {
    records: Vec<ImportRecord>,
}

#[derive(Serialize)]
struct PreviewResponse {
    summary: MatchSummary,
    changes: Vec<ChangeRecord>,
    timestamp: String,
}

#[derive(Deserialize)]
struct ApplyRequest {
    changes: Vec<ChangeRecord>,
}

#[derive(Serialize)]
struct ApplyResponse {
    success: bool,
    results: ReconcileOutcome,
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    exists: bool,
    #[serde(flatten)]
    snapshot: Option<HealthSnapshot>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Liveness check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/accounts - All TAM accounts
async fn get_accounts(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match store.list_accounts() {
        Ok(accounts) => {
            (StatusCode::OK, Json(ApiResponse::ok(accounts))).into_response()
        }
        Err(e) => {
            eprintln!("Error listing accounts: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Vec<TamAccount>>::err(
                    "Failed to list accounts".to_string(),
                )),
            )
                .into_response()
        }
    }
}

/// POST /api/import/preview - Classify import rows against the database
async fn import_preview(
    State(state): State<AppState>,
    Json(request): Json<PreviewRequest>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    let snapshot = match store.list_accounts() {
        Ok(accounts) => account_lookup(accounts),
        Err(e) => {
            eprintln!("Error reading snapshot: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<PreviewResponse>::err(
                    "Failed to fetch existing accounts".to_string(),
                )),
            )
                .into_response();
        }
    };

    match preview_changes(&request.records, &snapshot, CollisionPolicy::default()) {
        Ok(outcome) => {
            let response = PreviewResponse {
                summary: outcome.summary,
                changes: outcome.changes,
                timestamp: Utc::now().to_rfc3339(),
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        // Malformed rows are the caller's problem, not ours.
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<PreviewResponse>::err(e.to_string())),
        )
            .into_response(),
    }
}

/// POST /api/import/apply - Apply an approved change set
async fn import_apply(
    State(state): State<AppState>,
    Json(request): Json<ApplyRequest>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match Reconciler::new().reconcile(&*store, &request.changes) {
        Ok(results) => {
            let response = ApplyResponse {
                success: results.is_success(),
                message: results.summary(),
                results,
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        // Only a snapshot-read failure gets here; nothing was written.
        Err(e) => {
            eprintln!("Apply error: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<ApplyResponse>::err(
                    "Failed to apply changes".to_string(),
                )),
            )
                .into_response()
        }
    }
}

/// POST /api/accounts/:id/health - Compute and store a health score
async fn compute_account_health(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();
    let now = Utc::now();

    let facts = match store.fetch_health_facts(&account_id, now) {
        Ok(facts) => facts,
        Err(e) => {
            eprintln!("Error gathering health inputs: {:#}", e);
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<HealthSnapshot>::err(
                    "Failed to calculate health score".to_string(),
                )),
            )
                .into_response();
        }
    };

    let snapshot = compute_health(
        &account_id,
        &facts.inputs(now),
        facts.signal_summary(now),
        now,
    );

    if let Err(e) = store.upsert_health_snapshot(&snapshot) {
        eprintln!("Error saving health score: {:#}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::<HealthSnapshot>::err(
                "Failed to save health score".to_string(),
            )),
        )
            .into_response();
    }

    (StatusCode::OK, Json(ApiResponse::ok(snapshot))).into_response()
}

/// GET /api/accounts/:id/health - Stored health score
async fn get_account_health(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    match store.get_health_snapshot(&account_id) {
        Ok(snapshot) => {
            let response = HealthResponse {
                exists: snapshot.is_some(),
                snapshot,
            };
            (StatusCode::OK, Json(ApiResponse::ok(response))).into_response()
        }
        Err(e) => {
            eprintln!("Error fetching health score: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<HealthResponse>::err(
                    "Failed to fetch health score".to_string(),
                )),
            )
                .into_response()
        }
    }
}

/// GET /api/gaps - Goal gap analysis against the TAM pool
async fn get_gaps(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.db.lock().unwrap();

    let analysis = store
        .list_goals()
        .and_then(|goals| Ok((goals, store.tam_pool()?)))
        .map(|(goals, pool)| aggregate_gaps(&goals, &pool));

    match analysis {
        Ok(analysis) => (StatusCode::OK, Json(ApiResponse::ok(analysis))).into_response(),
        Err(e) => {
            eprintln!("Error computing gaps: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<scout::GapAnalysis>::err(
                    "Failed to compute gap analysis".to_string(),
                )),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    println!("🌐 Scout Core - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("SCOUT_DB").unwrap_or_else(|_| "scout.db".to_string());
    let store = SqliteStore::open(std::path::Path::new(&db_path)).expect("Failed to open database");
    println!("✓ Database opened: {}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(store)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/accounts", get(get_accounts))
        .route("/accounts/:id/health", get(get_account_health).post(compute_account_health))
        .route("/import/preview", post(import_preview))
        .route("/import/apply", post(import_apply))
        .route("/gaps", get(get_gaps))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:{}", port);
    println!("   API: http://localhost:{}/api/accounts", port);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
