// libs/signaling-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    response::Response,
    Json,
};
use axum_extra::TypedHeader;
use futures::{Sink, SinkExt, StreamExt};
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};
use uuid::Uuid;

use consultation_cell::handlers::map_consultation_error;
use consultation_cell::services::ConsultationService;
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CloseReason, ServerMessage, SignalingError};
use crate::services::{ConnectionContext, ConnectionFlow, Outbound, SignalingRelay};

#[derive(Clone)]
pub struct SignalingCellState {
    pub config: Arc<AppConfig>,
    pub relay: Arc<SignalingRelay>,
    pub consultations: Arc<ConsultationService>,
}

#[derive(Debug, Deserialize)]
pub struct SignalingConnectQuery {
    pub room_id: Uuid,
    pub token: Option<String>,
}

pub fn map_signaling_error(e: SignalingError) -> AppError {
    match e {
        SignalingError::RoomNotFound => AppError::NotFound("Room not found".to_string()),
        SignalingError::Forbidden => AppError::Forbidden(e.to_string()),
        SignalingError::InvalidCredential(msg) => AppError::Auth(msg),
        SignalingError::RoomFull => AppError::Conflict(e.to_string()),
        SignalingError::Consultation(inner) => map_consultation_error(inner),
        SignalingError::NotJoined(_)
        | SignalingError::UnknownMessage(_)
        | SignalingError::MalformedMessage(_) => AppError::BadRequest(e.to_string()),
    }
}

// ==============================================================================
// WEBSOCKET
// ==============================================================================

/// `GET /signaling/ws?room_id=..&token=..`. The token may also come as a
/// bearer header. Handshake failures are reported after the upgrade as a
/// close frame carrying the reason code.
#[axum::debug_handler]
pub async fn signaling_ws(
    State(state): State<Arc<SignalingCellState>>,
    Query(query): Query<SignalingConnectQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_string()))
        .unwrap_or_default();

    let relay = state.relay.clone();
    let authorized = relay.authorize(query.room_id, &token).await;

    ws.on_upgrade(move |socket| async move {
        match authorized {
            Ok(context) => run_connection(relay, context, socket).await,
            Err(e) => reject_connection(socket, e).await,
        }
    })
}

fn close_frame(reason: CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Utf8Bytes::from_static(reason.reason()),
    }))
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to serialize signaling message: {}", e);
            None
        }
    }
}

async fn reject_connection(mut socket: WebSocket, e: SignalingError) {
    let reason = e.close_reason().unwrap_or(CloseReason::Internal);
    debug!("Refusing signaling connection: {} ({})", e, reason.code());

    if let Some(frame) = encode(&ServerMessage::error(&e)) {
        let _ = socket.send(frame).await;
    }
    let _ = socket.send(close_frame(reason)).await;
}

/// Forward queued messages until a close is queued or the queue ends. A
/// stall preempts the queue: the pending frames are dropped and the socket
/// is closed with 1008.
async fn write_outbound<S>(mut sink: S, mut outbound: mpsc::Receiver<Outbound>, stall: Arc<Notify>)
where
    S: Sink<Message> + Unpin,
{
    let closing = tokio::select! {
        biased;
        _ = stall.notified() => Some(CloseReason::Stalled),
        closing = drain_outbound(&mut sink, &mut outbound) => closing,
    };

    if let Some(reason) = closing {
        let _ = sink.send(close_frame(reason)).await;
    }
    let _ = sink.close().await;
}

async fn drain_outbound<S>(sink: &mut S, outbound: &mut mpsc::Receiver<Outbound>) -> Option<CloseReason>
where
    S: Sink<Message> + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(message) => {
                let Some(frame) = encode(&message) else {
                    continue;
                };
                if sink.send(frame).await.is_err() {
                    debug!("Signaling socket send failed");
                    return None;
                }
            }
            Outbound::Close(reason) => return Some(reason),
        }
    }
    None
}

async fn run_connection(relay: Arc<SignalingRelay>, context: ConnectionContext, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let (mut connection, outbound) = relay.open(context).await;
    let eviction = connection.eviction_signal();

    let mut writer = tokio::spawn(write_outbound(sink, outbound, connection.stall_signal()));

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let ConnectionFlow::Close(reason) = relay.handle_text(&mut connection, text.as_str()).await {
                        connection.close(reason);
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let err = SignalingError::MalformedMessage("binary frames are not supported".to_string());
                    relay.reply(&connection, ServerMessage::error(&err)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Signaling socket receive error: {}", e);
                    break;
                }
            },
            _ = eviction.notified() => {
                debug!("Connection {} evicted", connection.context().connection_id);
                break;
            }
        }
    }

    relay.release(&connection).await;
    drop(connection);

    if tokio::time::timeout(relay.settings().send_timeout, &mut writer).await.is_err() {
        warn!("Signaling writer did not drain in time, aborting");
        writer.abort();
    }
}

// ==============================================================================
// ROOM HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_standalone_room(
    State(state): State<Arc<SignalingCellState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let room = state.relay.registry().create_standalone();
    debug!("User {} created standalone room {}", user.id, room.id);

    Ok(Json(json!({
        "success": true,
        "room": room
    })))
}

/// Find or create the room of a consultation. Only its owners may do this.
#[axum::debug_handler]
pub async fn ensure_consultation_room(
    State(state): State<Arc<SignalingCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    state
        .consultations
        .authorize_participant(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    let room = state
        .relay
        .registry()
        .find_or_create_for_consultation(consultation_id);

    Ok(Json(json!({
        "success": true,
        "room": room
    })))
}

#[axum::debug_handler]
pub async fn get_consultation_room(
    State(state): State<Arc<SignalingCellState>>,
    Path(consultation_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    state
        .consultations
        .authorize_participant(consultation_id, &user)
        .await
        .map_err(map_consultation_error)?;

    let registry = state.relay.registry();
    let room = registry
        .find_by_consultation(consultation_id)
        .and_then(|room_id| registry.get(room_id))
        .ok_or_else(|| map_signaling_error(SignalingError::RoomNotFound))?;

    Ok(Json(json!(room)))
}

/// Consultation rooms are visible to the consultation's owners only.
#[axum::debug_handler]
pub async fn get_room(
    State(state): State<Arc<SignalingCellState>>,
    Path(room_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let room = state
        .relay
        .registry()
        .get(room_id)
        .ok_or_else(|| map_signaling_error(SignalingError::RoomNotFound))?;

    if let Some(consultation_id) = room.consultation_id {
        state
            .consultations
            .authorize_participant(consultation_id, &user)
            .await
            .map_err(map_consultation_error)?;
    }

    Ok(Json(json!(room)))
}

pub async fn signaling_health_check(State(state): State<Arc<SignalingCellState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "signaling-cell",
        "rooms": state.relay.registry().len(),
        "connections": state.relay.active_connections().await
    }))
}
