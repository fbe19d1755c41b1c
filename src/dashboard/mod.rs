//! Read-only status API
//!
//! Serves the latest engine snapshot over HTTP. Only compiled when the
//! `dashboard` feature is enabled. Handlers never touch engine state
//! directly; they read whatever the control loop last published, so a
//! response may be one tick stale.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::alerts::AlertManager;
use crate::engine::StatusSnapshot;
use crate::types::OptionSide;

#[derive(Clone)]
struct ApiState {
    status: watch::Receiver<StatusSnapshot>,
    alerts: Arc<AlertManager>,
}

/// Standard API response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(
    status: watch::Receiver<StatusSnapshot>,
    alerts: Arc<AlertManager>,
) -> Router {
    Router::new()
        .route("/api/portfolio", get(get_portfolio))
        .route("/api/stats/:side", get(get_side_stats))
        .route("/api/positions", get(get_positions))
        .route("/api/alerts", get(get_alerts))
        .with_state(ApiState { status, alerts })
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// GET /api/portfolio - margin, P&L, and both side summaries
async fn get_portfolio(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.status.borrow().clone();
    Json(ApiResponse::success(snapshot))
}

/// GET /api/stats/{side} - one side's statistics
async fn get_side_stats(
    State(state): State<ApiState>,
    Path(side): Path<String>,
) -> impl IntoResponse {
    let Some(side) = OptionSide::from_str(&side) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<crate::engine::SideStatus>::error(format!(
                "Unknown side {side:?}"
            ))),
        )
            .into_response();
    };
    let snapshot = state.status.borrow().clone();
    let side_status = match side {
        OptionSide::Ce => snapshot.ce,
        OptionSide::Pe => snapshot.pe,
    };
    Json(ApiResponse::success(side_status)).into_response()
}

/// GET /api/positions - open positions on both legs
async fn get_positions(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.status.borrow().clone();
    let positions: Vec<_> = [&snapshot.ce, &snapshot.pe]
        .into_iter()
        .filter_map(|s| {
            s.position.as_ref().map(|p| {
                serde_json::json!({
                    "instrument_code": s.instrument_code,
                    "instrument_name": s.instrument_name,
                    "entry_price": p.entry_price,
                    "quantity": p.quantity,
                    "opened_at": p.opened_at,
                    "unrealized_pnl": s.stats.unrealized_pnl,
                })
            })
        })
        .collect();
    Json(ApiResponse::success(positions))
}

/// GET /api/alerts - newest alerts first
async fn get_alerts(State(state): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.alerts.recent(50)))
}

/// Start the status API server
pub async fn start_server(
    status: watch::Receiver<StatusSnapshot>,
    alerts: Arc<AlertManager>,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(status, alerts);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("Status API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
