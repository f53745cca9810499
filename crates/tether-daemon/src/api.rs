//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tether_core::{DurableId, Pose, StableId, TrackableKind};
use tether_provider::ProviderError;
use tether_sync::PersistenceError;
use thiserror::Error;
use tracing::info;

use crate::state::{AppState, Session};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid {what}: {value}")]
    BadParameter { what: &'static str, value: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Failed to serialize response: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            RequestError::BadParameter { .. } => StatusCode::BAD_REQUEST,
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RequestError::Persistence(e) => match e {
                PersistenceError::Disabled => StatusCode::CONFLICT,
                PersistenceError::NotLive(_) | PersistenceError::Unknown(_) => StatusCode::NOT_FOUND,
                PersistenceError::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            },
            RequestError::Provider(ProviderError::TrackingDisabled(_))
            | RequestError::Provider(ProviderError::PersistenceDisabled) => StatusCode::CONFLICT,
            RequestError::Provider(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RequestError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ApiError::new(self.to_string()))).into_response()
    }
}

fn parse<T: FromStr>(what: &'static str, value: &str) -> Result<T, RequestError> {
    value.parse().map_err(|_| RequestError::BadParameter {
        what,
        value: value.to_string(),
    })
}

/// Session overview
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status().await)
}

/// Current configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}

/// List live trackables of one kind
pub async fn list_trackables(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<Value>, RequestError> {
    let kind: TrackableKind = parse("trackable kind", &kind)?;
    let session = state.session.read().await;
    Ok(Json(kind_entries(&session, kind)?))
}

/// Get one live trackable
pub async fn get_trackable(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Value>, RequestError> {
    let kind: TrackableKind = parse("trackable kind", &kind)?;
    let id: StableId = parse("stable id", &id)?;
    let session = state.session.read().await;
    kind_entry(&session, kind, id)?
        .map(Json)
        .ok_or_else(|| RequestError::NotFound(format!("{} {}", kind, id)))
}

fn kind_entries(session: &Session, kind: TrackableKind) -> serde_json::Result<Value> {
    match kind {
        TrackableKind::Plane => serde_json::to_value(session.planes().all()),
        TrackableKind::Anchor => serde_json::to_value(session.anchors().registry().all()),
        TrackableKind::Object => serde_json::to_value(session.objects().all()),
        TrackableKind::Marker => serde_json::to_value(session.markers().all()),
        TrackableKind::Image => serde_json::to_value(session.images().all()),
    }
}

fn kind_entry(session: &Session, kind: TrackableKind, id: StableId) -> serde_json::Result<Option<Value>> {
    match kind {
        TrackableKind::Plane => session.planes().entry(id).map(serde_json::to_value).transpose(),
        TrackableKind::Anchor => session
            .anchors()
            .registry()
            .entry(id)
            .map(serde_json::to_value)
            .transpose(),
        TrackableKind::Object => session.objects().entry(id).map(serde_json::to_value).transpose(),
        TrackableKind::Marker => session.markers().entry(id).map(serde_json::to_value).transpose(),
        TrackableKind::Image => session.images().entry(id).map(serde_json::to_value).transpose(),
    }
}

/// Anchor creation request body
#[derive(Deserialize)]
pub struct CreateAnchorRequest {
    position: [f32; 3],
    #[serde(default)]
    orientation: Option<[f32; 4]>,
}

/// Request a new anchor. It shows up in the anchor list after the next cycle.
pub async fn create_anchor(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAnchorRequest>,
) -> Result<impl IntoResponse, RequestError> {
    let pose = Pose {
        position: req.position,
        orientation: req.orientation.unwrap_or(Pose::IDENTITY.orientation),
    };
    let id = state.session.write().await.create_anchor(pose)?;
    info!(id = %id, "Anchor created via API");
    Ok((StatusCode::ACCEPTED, Json(json!({ "id": id }))))
}

/// Destroy a live anchor
pub async fn destroy_anchor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RequestError> {
    let id: StableId = parse("stable id", &id)?;
    if state.session.write().await.destroy_anchor(id) {
        Ok(Json(json!({ "status": "destroying", "id": id })))
    } else {
        Err(RequestError::NotFound(format!("anchor {}", id)))
    }
}

/// Begin persisting a live anchor
pub async fn persist_anchor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, RequestError> {
    let id: StableId = parse("stable id", &id)?;
    let durable_id = state.session.write().await.persist(id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "durable_id": durable_id })),
    ))
}

/// Persistence state of a live anchor
pub async fn anchor_persist_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RequestError> {
    let id: StableId = parse("stable id", &id)?;
    let mut session = state.session.write().await;
    let persist_state = session.persist_state(id)?;
    Ok(Json(json!({
        "id": id,
        "durable_id": session.persistent_id(id),
        "state": persist_state,
    })))
}

/// Remove a live anchor's durable copy
pub async fn unpersist_anchor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RequestError> {
    let id: StableId = parse("stable id", &id)?;
    state.session.write().await.unpersist(id)?;
    Ok(Json(json!({ "status": "unpersisted", "id": id })))
}

/// Every durable id in storage
pub async fn list_durable(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ids = state.session.write().await.enumerate_durable_ids();
    Json(ids)
}

/// Persistence state by durable id
pub async fn durable_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RequestError> {
    let id: DurableId = parse("durable id", &id)?;
    let mut session = state.session.write().await;
    let persist_state = session.persist_state(id)?;
    Ok(Json(json!({
        "durable_id": id,
        "id": session.stable_id(id),
        "state": persist_state,
    })))
}

/// Remove a durable anchor, live or not
pub async fn unpersist_durable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, RequestError> {
    let id: DurableId = parse("durable id", &id)?;
    state.session.write().await.unpersist(id)?;
    Ok(Json(json!({ "status": "unpersisted", "durable_id": id })))
}

/// Ask for a stored anchor to be materialized in this session
pub async fn load_durable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, RequestError> {
    let id: DurableId = parse("durable id", &id)?;
    let loaded = state.session.write().await.load(id)?;
    Ok(match loaded {
        Some(stable) => Json(json!({ "status": "live", "durable_id": id, "id": stable })).into_response(),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "loading", "durable_id": id })),
        )
            .into_response(),
    })
}

/// Snapshot of persistence records
pub async fn list_records(State(state): State<Arc<AppState>>) -> Result<Json<Value>, RequestError> {
    let session = state.session.read().await;
    Ok(Json(serde_json::to_value(session.anchors().persistence().records())?))
}

/// Persistence toggle request body
#[derive(Deserialize)]
pub struct PersistenceToggle {
    enabled: bool,
}

/// Enable or disable anchor persistence
pub async fn set_persistence(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PersistenceToggle>,
) -> impl IntoResponse {
    let accepted = state.session.write().await.set_persistence_enabled(req.enabled);
    if accepted {
        info!(enabled = req.enabled, "Persistence toggled via API");
        (StatusCode::OK, Json(json!({ "enabled": req.enabled }))).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(ApiError::new("Provider refused to change persistence")),
        )
            .into_response()
    }
}
