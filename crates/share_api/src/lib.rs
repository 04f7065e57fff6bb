//! HTTP API for clients and peers.
//!
//! Endpoints:
//! - POST   /sessions        create a session hosted here
//! - GET    /sessions        active sessions across the LAN
//! - GET    /sessions/local  sessions hosted here (the peer wire endpoint)
//! - DELETE /sessions/:id    delete a session hosted here
//! - GET    /devices         currently discovered devices
//! - GET    /status          device id and counters

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use share_mesh::{
    federate_sessions, filter_active, DeviceRegistry, PeerAddr, PeerClient, PEER_FETCH_TIMEOUT,
};
use share_store::{Session, SessionStore, StoreError};

/// Shared application state for all handlers.
pub struct AppState {
    pub device_id: String,
    pub store: SessionStore,
    pub registry: Arc<RwLock<DeviceRegistry>>,
    pub peer_client: Arc<dyn PeerClient>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", post(handle_create_session).get(handle_list_sessions))
        .route("/sessions/local", get(handle_list_local_sessions))
        .route("/sessions/:id", delete(handle_delete_session))
        .route("/devices", get(handle_list_devices))
        .route("/status", get(handle_status))
        .with_state(state)
}

// ---------- Data types ----------

#[derive(Deserialize)]
struct CreateSessionRequest {
    name: String,
}

#[derive(Serialize, Deserialize)]
struct MessageResponse {
    message: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceResponse {
    device_id: String,
    address: String,
    port: u16,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    device_id: String,
    status: String,
    session_count: usize,
    device_count: usize,
}

// ---------- Handlers ----------

async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<Session>, StatusCode> {
    let session = state
        .store
        .create(&body.name, &state.device_id)
        .map_err(|e| {
            warn!("session create failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(session))
}

/// Active sessions: local store merged with every live peer's listing, then
/// trimmed to sessions whose host is currently reachable.
async fn handle_list_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Session>>, StatusCode> {
    let local = state
        .store
        .list()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let (peers, live) = {
        let reg = state.registry.read().await;
        let peers: Vec<PeerAddr> = reg.snapshot().iter().map(PeerAddr::from).collect();
        (peers, reg.live_ids())
    };

    let merged = federate_sessions(local, &peers, &state.peer_client, PEER_FETCH_TIMEOUT).await;
    let active = filter_active(merged, &live, &state.device_id);
    Ok(Json(active))
}

/// The peer-to-peer wire endpoint: only sessions this device hosts.
async fn handle_list_local_sessions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Session>>, StatusCode> {
    let sessions = state
        .store
        .list()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(sessions))
}

async fn handle_delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<MessageResponse>, StatusCode> {
    match state.store.delete(&session_id, &state.device_id) {
        Ok(()) => Ok(Json(MessageResponse {
            message: "Session closed".into(),
        })),
        Err(StoreError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(StoreError::Forbidden(_)) => Err(StatusCode::FORBIDDEN),
        Err(e) => {
            warn!("session delete failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn handle_list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceResponse>> {
    let devices = state
        .registry
        .read()
        .await
        .snapshot()
        .into_iter()
        .map(|d| DeviceResponse {
            device_id: d.device_id,
            address: d.address,
            port: d.port,
        })
        .collect();
    Json(devices)
}

async fn handle_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let session_count = state
        .store
        .list()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .len();
    let device_count = state.registry.read().await.snapshot().len();

    Ok(Json(StatusResponse {
        device_id: state.device_id.clone(),
        status: "running".into(),
        session_count,
        device_count,
    }))
}
