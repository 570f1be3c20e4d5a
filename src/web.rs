//! ==============================================================================
//! web.rs - read-only http view of the hub state
//! ==============================================================================
//!
//! routes:
//!     GET /data        full history, latest values and hazard status
//!     GET /api/status  row counts, last update time and hazard status
//!
//! handlers only take the read lock and serialize; they never compute.
//!
//! ==============================================================================

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::hazard::HazardVerdict;
use crate::state::{HubState, SharedState};

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/data", get(data_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: SharedState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http port {addr}"))?;
    tracing::info!(%addr, "dashboard data served at /data");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

/// dashboard poll endpoint
async fn data_handler(State(state): State<SharedState>) -> Json<HubState> {
    let state = state.read().await;
    Json(state.clone())
}

#[derive(Debug, Serialize)]
struct Status {
    /// rows absorbed since startup, not capped by history retention
    rows: usize,
    history_len: usize,
    last_update_ms: u64,
    hazard_status: HazardVerdict,
}

async fn status_handler(State(state): State<SharedState>) -> Json<Status> {
    let state = state.read().await;
    Json(Status {
        rows: state.rows_ingested,
        history_len: state.history.len(),
        last_update_ms: state.last_update_ms,
        hazard_status: state.hazard_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Metric, Reading};
    use crate::state::Retention;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::NaiveDate;
    use tower::ServiceExt;

    async fn get_json(state: &SharedState, uri: &str) -> serde_json::Value {
        let response = router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seeded() -> SharedState {
        let state = HubState::shared();
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let reading = Reading::new(ts)
            .with(Metric::Rain, 39_999.0)
            .with(Metric::WaterLevel, 199.0)
            .with(Metric::Soil, 39_999.0);
        state.write().await.absorb(&[reading], Retention::Unbounded);
        state
    }

    #[tokio::test]
    async fn test_empty_state_document() {
        let doc = get_json(&HubState::shared(), "/data").await;
        assert_eq!(doc["MQ7"], serde_json::json!([]));
        assert_eq!(doc["Timestamp"], serde_json::json!([]));
        assert_eq!(
            doc["hazard_status"],
            serde_json::json!({"Flood": false, "Fire": false, "Air Quality": false})
        );
    }

    #[tokio::test]
    async fn test_data_reflects_state() {
        let state = seeded().await;
        let doc = get_json(&state, "/data").await;
        assert_eq!(doc["Water_Level"], serde_json::json!([199.0]));
        assert_eq!(doc["Timestamp"], serde_json::json!(["2024-05-01 08:30:00"]));
        assert_eq!(doc["hazard_status"]["Flood"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let state = seeded().await;
        let first = get_json(&state, "/data").await;
        let second = get_json(&state, "/data").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = seeded().await;
        let status = get_json(&state, "/api/status").await;
        assert_eq!(status["rows"], serde_json::json!(1));
        assert_eq!(status["history_len"], serde_json::json!(1));
        assert_eq!(status["hazard_status"]["Flood"], serde_json::json!(true));
    }
}
