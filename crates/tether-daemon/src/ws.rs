//! WebSocket handler for real-time session events

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tether_core::{StableId, TrackableKind};
use tether_sync::SessionEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::{AppState, Session, SessionStatus};

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "status")]
    Status(SessionStatus),
    #[serde(rename = "live")]
    Live { kind: TrackableKind, ids: Vec<StableId> },
    #[serde(rename = "event")]
    Event(SessionEvent),
    #[serde(rename = "lagged")]
    Lagged { skipped: u64 },
    #[serde(rename = "pong")]
    Pong,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn live_ids(session: &Session, kind: TrackableKind) -> Vec<StableId> {
    let mut ids = match kind {
        TrackableKind::Plane => session.planes().ids(),
        TrackableKind::Anchor => session.anchors().registry().ids(),
        TrackableKind::Object => session.objects().ids(),
        TrackableKind::Marker => session.markers().ids(),
        TrackableKind::Image => session.images().ids(),
    };
    ids.sort();
    ids
}

/// Status followed by the live id set of every kind
async fn snapshot(state: &AppState) -> Vec<WsMessage> {
    let mut messages = vec![WsMessage::Status(state.status().await)];
    let session = state.session.read().await;
    for kind in TrackableKind::ALL {
        let ids = live_ids(&session, kind);
        if !ids.is_empty() {
            messages.push(WsMessage::Live { kind, ids });
        }
    }
    messages
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before the snapshot so no cycle falls between the two
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    for msg in snapshot(&state).await {
        if let Ok(json) = serde_json::to_string(&msg) {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let msg = match event {
                    Ok(event) => WsMessage::Event(event),
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Session event channel lagged");
                        WsMessage::Lagged { skipped: n }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Session event channel closed");
                        break;
                    }
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" {
                            if let Ok(pong) = serde_json::to_string(&WsMessage::Pong) {
                                if sender.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
