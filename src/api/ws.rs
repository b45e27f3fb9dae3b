//! Live-tracking websocket endpoint.
//!
//! One connection per driver. The handshake carries a token in the query
//! string; it is verified before any message is accepted, and a missing or
//! invalid token closes the connection with a policy-violation code.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::AppState;
use crate::models::{DeliveryTask, GeoLocation, GeofenceEvent, GeofenceEventType};
use crate::services::tracking::SessionHandle;

/// Outbound queue depth per connection
const OUTBOUND_CAPACITY: usize = 32;

/// Message sent by a driver client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    /// GPS position update
    Location { payload: GeoLocation },
    /// Client-asserted zone transition
    Geofence { payload: GeofenceAssertion },
}

#[derive(Debug, Deserialize)]
struct GeofenceAssertion {
    zone_id: String,
    event_type: GeofenceEventType,
}

/// Message sent to a driver client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ServerMessage {
    /// Initial connection acknowledgment
    Connected { payload: ConnectedPayload },
    /// Tasks available near the driver's reported position
    Task { payload: TaskPayload },
    /// A zone boundary crossing, from any driver
    Geofence { payload: GeofenceEvent },
    /// In-band error for unrecognized request shapes
    Error { payload: ErrorPayload },
}

#[derive(Debug, Serialize)]
struct ConnectedPayload {
    driver_id: String,
}

#[derive(Debug, Serialize)]
struct TaskPayload {
    nearby_tasks: Vec<DeliveryTask>,
}

#[derive(Debug, Serialize)]
struct ErrorPayload {
    message: String,
}

/// How an inbound text frame was classified
enum Inbound {
    Message(ClientMessage),
    /// Well-formed envelope with a type this server does not know
    UnknownType(String),
    /// Not a recognizable message at all
    Malformed(String),
}

/// Classify an inbound text frame. Unknown types are logged and ignored
/// upstream; anything else unparsable gets an in-band error reply.
fn parse_inbound(text: &str) -> Inbound {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => Inbound::Message(message),
        Err(e) => {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(kind) = value.get("type").and_then(|t| t.as_str()) {
                    if kind != "location" && kind != "geofence" {
                        return Inbound::UnknownType(kind.to_string());
                    }
                }
            }
            Inbound::Malformed(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackingQuery {
    token: Option<String>,
}

/// WebSocket endpoint for driver live tracking
pub async fn ws_tracking(
    ws: WebSocketUpgrade,
    Query(query): Query<TrackingQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sender, receiver) = socket.split();

    // Authenticate before anything else; failure is fatal for the
    // connection and no session is created.
    let Some(token) = token else {
        close_policy_violation(&mut sender, "Missing authentication token").await;
        return;
    };
    let identity = match state.tracking.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "websocket authentication rejected");
            close_policy_violation(&mut sender, "Authentication failed").await;
            return;
        }
    };

    let mut session = state.tracking.register_session(&identity.driver_id);

    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);
    let events_rx = state.tracking.subscribe_events();

    let _ = out_tx
        .send(ServerMessage::Connected {
            payload: ConnectedPayload {
                driver_id: identity.driver_id.clone(),
            },
        })
        .await;

    // Forward task: the per-connection outbound queue plus the geofence
    // broadcast, serialized onto the socket from a single writer.
    let forward_task = tokio::spawn(forward_messages(sender, out_rx, events_rx));

    receive_loop(receiver, &state, &mut session, &out_tx).await;

    state.tracking.remove_session(&session);
    forward_task.abort();
}

async fn forward_messages(
    mut sender: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMessage>,
    mut events_rx: broadcast::Receiver<GeofenceEvent>,
) {
    loop {
        let message = tokio::select! {
            queued = out_rx.recv() => match queued {
                Some(message) => message,
                None => break,
            },
            event = events_rx.recv() => match event {
                Ok(event) => ServerMessage::Geofence { payload: event },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "geofence event stream lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let Ok(json) = serde_json::to_string(&message) else {
            continue;
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

async fn receive_loop(
    mut receiver: SplitStream<WebSocket>,
    state: &AppState,
    session: &mut SessionHandle,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    loop {
        let message = tokio::select! {
            message = receiver.next() => match message {
                Some(message) => message,
                None => break,
            },
            // Resolves when a newer connection replaces this session
            _ = session.shutdown.recv() => break,
        };

        match message {
            Ok(Message::Text(text)) => {
                handle_text(&text, state, &session.driver_id, out_tx).await;
            }
            Ok(Message::Ping(_)) => {
                // Axum answers pongs automatically
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

async fn handle_text(
    text: &str,
    state: &AppState,
    driver_id: &str,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    match parse_inbound(text) {
        Inbound::Message(ClientMessage::Location { payload }) => {
            let nearby = state.tracking.handle_location(driver_id, payload).await;
            if !nearby.is_empty() {
                let _ = out_tx
                    .send(ServerMessage::Task {
                        payload: TaskPayload {
                            nearby_tasks: nearby,
                        },
                    })
                    .await;
            }
        }
        Inbound::Message(ClientMessage::Geofence { payload }) => {
            state
                .tracking
                .assert_geofence(driver_id, payload.zone_id, payload.event_type);
        }
        Inbound::UnknownType(kind) => {
            warn!(driver_id, kind, "ignoring unknown message type");
        }
        Inbound::Malformed(reason) => {
            debug!(driver_id, reason, "malformed websocket message");
            let _ = out_tx
                .send(ServerMessage::Error {
                    payload: ErrorPayload {
                        message: "Error processing message".to_string(),
                    },
                })
                .await;
        }
    }
}

async fn close_policy_violation(sender: &mut SplitSink<WebSocket, Message>, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}
