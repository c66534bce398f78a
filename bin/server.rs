// LTC Analytics - REST API
// Thin dispatch: every handler parses parameters and calls one service operation

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use ltc_analytics::{
    init_logging, AnalyticsError, AnalyticsService, ClaimsQuery, PoliciesQuery, Settings,
    SqliteWarehouse, TtlCache, Warehouse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared application state
struct AppState<W: Warehouse> {
    service: AnalyticsService<W>,
    settings: Arc<Settings>,
}

impl<W: Warehouse> Clone for AppState<W> {
    fn clone(&self) -> Self {
        AppState {
            service: self.service.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
    message: String,
    request_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    error: String,
    message: String,
}

impl ApiError {
    fn not_found(what: &str, id: &str) -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            error: "ResourceNotFoundError".to_string(),
            message: format!("{} {} not found", what, id),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        let status = match &err {
            AnalyticsError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            AnalyticsError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AnalyticsError::Aggregation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.error,
            message: self.message,
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
        };
        if self.status.is_server_error() {
            error!(request_id = %body.request_id, status = %self.status, message = %body.message, "request failed");
        } else {
            warn!(request_id = %body.request_id, status = %self.status, message = %body.message, "request rejected");
        }
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ClaimsScope {
    carrier_name: Option<String>,
    report_end_dt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyScope {
    carrier_name: Option<String>,
    snapshot_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardScope {
    carrier_name: Option<String>,
    snapshot_date: Option<String>,
    report_end_dt: Option<String>,
}

#[derive(Serialize)]
struct CountResponse {
    count: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    database_connected: bool,
    cache_enabled: bool,
    version: String,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /health - Health check (degraded when the warehouse does not answer)
async fn health_check<W: Warehouse + 'static>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let connected = match state.service.ping() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "warehouse health check failed");
            false
        }
    };
    Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" },
        timestamp: Utc::now(),
        database_connected: connected,
        cache_enabled: state.service.cache().is_enabled(),
        version: state.settings.version.clone(),
    })
}

/// GET / - Service banner
async fn root<W: Warehouse + 'static>(State(state): State<AppState<W>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "service": state.settings.project_name,
        "version": state.settings.version,
        "status": "running",
        "health": "/health",
    }))
}

/// GET /claims - Filtered, ordered, windowed claims
async fn list_claims<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(query): Query<ClaimsQuery>,
) -> ApiResult<Vec<serde_json::Map<String, serde_json::Value>>> {
    let spec = state.service.claims_spec(&query)?;
    Ok(ApiResponse::ok(state.service.get_filtered_claims(&spec)?))
}

/// GET /claims/:claim_id
async fn get_claim<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Path(claim_id): Path<String>,
) -> ApiResult<serde_json::Map<String, serde_json::Value>> {
    // Decode URL-encoded id
    let claim_id = urlencoding::decode(&claim_id)
        .map(|c| c.into_owned())
        .unwrap_or(claim_id);

    match state.service.get_claim_by_id(&claim_id)? {
        Some(claim) => Ok(ApiResponse::ok(claim)),
        None => Err(ApiError::not_found("Claim", &claim_id)),
    }
}

/// GET /claims/summary/statistics
async fn claims_summary<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(scope): Query<ClaimsScope>,
) -> ApiResult<ltc_analytics::ClaimsSummary> {
    let summary = state
        .service
        .get_claims_summary(scope.carrier_name.as_deref(), scope.report_end_dt.as_deref())?;
    Ok(ApiResponse::ok(summary))
}

/// GET /claims/insights/detailed
async fn claims_insights<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(scope): Query<ClaimsScope>,
) -> ApiResult<ltc_analytics::ClaimsInsights> {
    let insights = state
        .service
        .get_claims_insights(scope.carrier_name.as_deref(), scope.report_end_dt.as_deref())?;
    Ok(ApiResponse::ok(insights))
}

/// GET /claims/count/total - Same filters as the listing, no window
async fn count_claims<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(query): Query<ClaimsQuery>,
) -> ApiResult<CountResponse> {
    let spec = state.service.claims_spec(&query)?;
    Ok(ApiResponse::ok(CountResponse {
        count: state.service.count_claims(&spec)?,
    }))
}

/// GET /policies
async fn list_policies<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(query): Query<PoliciesQuery>,
) -> ApiResult<Vec<serde_json::Map<String, serde_json::Value>>> {
    let filter = state.service.policy_filter(&query)?;
    Ok(ApiResponse::ok(state.service.list_policies(&filter)?))
}

/// GET /policies/:policy_id
async fn get_policy<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Path(policy_id): Path<String>,
) -> ApiResult<serde_json::Map<String, serde_json::Value>> {
    let id: i64 = policy_id.parse().map_err(|_| {
        ApiError::from(AnalyticsError::invalid_filter(format!(
            "policy id must be an integer, got '{}'",
            policy_id
        )))
    })?;

    match state.service.get_policy_by_id(id)? {
        Some(policy) => Ok(ApiResponse::ok(policy)),
        None => Err(ApiError::not_found("Policy", &policy_id)),
    }
}

/// GET /policies/count/total
async fn count_policies<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(query): Query<PoliciesQuery>,
) -> ApiResult<CountResponse> {
    let filter = state.service.policy_filter(&query)?;
    Ok(ApiResponse::ok(CountResponse {
        count: state.service.count_policies(&filter)?,
    }))
}

/// GET /policies/metrics/summary and /analytics/policy-metrics
async fn policy_metrics<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(scope): Query<PolicyScope>,
) -> ApiResult<ltc_analytics::PolicyMetrics> {
    let metrics = state
        .service
        .get_policy_metrics(scope.carrier_name.as_deref(), scope.snapshot_date.as_deref())?;
    Ok(ApiResponse::ok(metrics))
}

/// GET /analytics/policy-insights
async fn policy_insights<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(scope): Query<PolicyScope>,
) -> ApiResult<ltc_analytics::PolicyInsights> {
    let insights = state
        .service
        .get_policy_insights(scope.carrier_name.as_deref(), scope.snapshot_date.as_deref())?;
    Ok(ApiResponse::ok(insights))
}

/// GET /analytics/combined-dashboard
async fn combined_dashboard<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
    Query(scope): Query<DashboardScope>,
) -> ApiResult<ltc_analytics::CombinedDashboard> {
    let dashboard = state.service.get_combined_dashboard(
        scope.carrier_name.as_deref(),
        scope.snapshot_date.as_deref(),
        scope.report_end_dt.as_deref(),
    )?;
    Ok(ApiResponse::ok(dashboard))
}

// ============================================================================
// Router
// ============================================================================

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring malformed CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

fn build_router<W: Warehouse + 'static>(state: AppState<W>) -> Router {
    // Build API routes
    let api_routes = Router::new()
        .route("/claims", get(list_claims::<W>))
        .route("/claims/:claim_id", get(get_claim::<W>))
        .route("/claims/summary/statistics", get(claims_summary::<W>))
        .route("/claims/insights/detailed", get(claims_insights::<W>))
        .route("/claims/count/total", get(count_claims::<W>))
        .route("/policies", get(list_policies::<W>))
        .route("/policies/:policy_id", get(get_policy::<W>))
        .route("/policies/count/total", get(count_policies::<W>))
        .route("/policies/metrics/summary", get(policy_metrics::<W>))
        .route("/analytics/policy-metrics", get(policy_metrics::<W>))
        .route("/analytics/policy-insights", get(policy_insights::<W>))
        .route("/analytics/combined-dashboard", get(combined_dashboard::<W>))
        .with_state(state.clone());

    // Build main router
    Router::new()
        .route("/", get(root::<W>))
        .route("/health", get(health_check::<W>))
        .with_state(state.clone())
        .nest(&state.settings.api_prefix, api_routes)
        .layer(cors_layer(&state.settings.cors_origins))
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_logging(&settings);

    info!("🌐 {} v{}", settings.project_name, settings.version);

    if !settings.database_path.exists() {
        error!(path = %settings.database_path.display(), "warehouse not found");
        anyhow::bail!(
            "Warehouse not found at {}. Run: ltc-analytics import <claims.csv> <policies.csv>",
            settings.database_path.display()
        );
    }

    let warehouse = SqliteWarehouse::open(&settings.database_path)?;
    info!(path = %settings.database_path.display(), "warehouse opened");

    let cache = Arc::new(TtlCache::new(settings.cache_enabled, settings.cache_ttl()));
    let state = AppState {
        service: AnalyticsService::new(Arc::new(warehouse), cache, settings.page_limits()),
        settings: Arc::new(settings.clone()),
    };
    let app = build_router(state);

    // Start server
    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("🚀 Server running on http://{}", addr);
    info!("   API: http://{}{}/claims", addr, settings.api_prefix);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
