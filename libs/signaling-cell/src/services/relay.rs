// libs/signaling-cell/src/services/relay.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use consultation_cell::models::ConsultationError;
use consultation_cell::services::{ConsultationService, SessionTeardown};
use shared_config::AppConfig;
use shared_models::auth::User;

use crate::models::{
    ClientMessage, CloseReason, Participant, ParticipantRole, ServerMessage, SignalingError,
};
use crate::services::auth::CredentialVerifier;
use crate::services::registry::RoomRegistry;

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    /// How long a send may wait on a full peer queue before the peer is
    /// considered stalled.
    pub send_timeout: Duration,
    pub outbound_buffer: usize,
}

impl RelaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            send_timeout: config.signaling_send_timeout(),
            outbound_buffer: config.signaling_outbound_buffer.max(1),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_millis(2000),
            outbound_buffer: 64,
        }
    }
}

/// Item on a connection's outbound queue, drained by its writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Close(CloseReason),
}

/// What the relay decided after handling a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFlow {
    Continue,
    Close(CloseReason),
}

/// Authenticated and authorized handshake, before the connection is opened.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub room_id: Uuid,
    pub consultation_id: Option<Uuid>,
    pub user: User,
    /// Side of the bound consultation the user owns.
    pub standing: Option<ParticipantRole>,
}

/// Per-connection state held by the connection's own task.
pub struct Connection {
    context: ConnectionContext,
    joined: bool,
    sender: mpsc::Sender<Outbound>,
    evict: Arc<Notify>,
    stall: Arc<Notify>,
}

impl Connection {
    pub fn context(&self) -> &ConnectionContext {
        &self.context
    }

    pub fn user_id(&self) -> &str {
        &self.context.user.id
    }

    pub fn room_id(&self) -> Uuid {
        self.context.room_id
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Resolves once the relay has evicted this connection.
    pub async fn evicted(&self) {
        self.evict.notified().await
    }

    pub fn eviction_signal(&self) -> Arc<Notify> {
        self.evict.clone()
    }

    /// Fires when the relay gives up on this connection's full outbound
    /// queue. The writer then skips what is queued and closes with 1008.
    pub fn stall_signal(&self) -> Arc<Notify> {
        self.stall.clone()
    }

    /// Queue the close frame. Best effort: a full queue means the writer is
    /// stuck and will be torn down anyway.
    pub fn close(&self, reason: CloseReason) {
        if self.sender.try_send(Outbound::Close(reason)).is_err() {
            debug!(
                "Could not queue close {} for connection {}",
                reason.code(),
                self.context.connection_id
            );
        }
    }
}

struct PeerHandle {
    user_id: String,
    joined: bool,
    stalled: bool,
    sender: mpsc::Sender<Outbound>,
    evict: Arc<Notify>,
    stall: Arc<Notify>,
}

#[derive(Clone, Copy)]
enum Recipients<'a> {
    All,
    Others(&'a str),
}

/// Routes signaling messages between the participants of a room.
///
/// Live connections are tracked per room in `peers`. Sends never happen
/// while that lock is held: recipients are snapshotted first and each send
/// is bounded by `send_timeout`.
pub struct SignalingRelay {
    registry: Arc<RoomRegistry>,
    consultations: Arc<ConsultationService>,
    verifier: Arc<dyn CredentialVerifier>,
    peers: RwLock<HashMap<Uuid, HashMap<Uuid, PeerHandle>>>,
    settings: RelaySettings,
}

impl SignalingRelay {
    pub fn new(
        registry: Arc<RoomRegistry>,
        consultations: Arc<ConsultationService>,
        verifier: Arc<dyn CredentialVerifier>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            registry,
            consultations,
            verifier,
            peers: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> RelaySettings {
        self.settings
    }

    pub async fn active_connections(&self) -> usize {
        self.peers.read().await.values().map(HashMap::len).sum()
    }

    // ==========================================================================
    // HANDSHAKE
    // ==========================================================================

    /// Verify the credential, find the room and, for a consultation-bound
    /// room, require that the user owns one side of the consultation.
    pub async fn authorize(&self, room_id: Uuid, token: &str) -> Result<ConnectionContext, SignalingError> {
        let user = self.verifier.verify(token).await?;
        let room = self.registry.get(room_id).ok_or(SignalingError::RoomNotFound)?;

        let standing = match room.consultation_id {
            Some(consultation_id) => {
                match self.consultations.authorize_participant(consultation_id, &user).await {
                    Ok(role) => Some(ParticipantRole::from(role)),
                    Err(ConsultationError::NotAuthorized | ConsultationError::NotFound) => {
                        warn!(
                            "User {} has no standing in consultation {} (room {})",
                            user.id, consultation_id, room_id
                        );
                        return Err(SignalingError::Forbidden);
                    }
                    Err(e) => return Err(SignalingError::Consultation(e)),
                }
            }
            None => None,
        };

        Ok(ConnectionContext {
            connection_id: Uuid::new_v4(),
            room_id,
            consultation_id: room.consultation_id,
            user,
            standing,
        })
    }

    /// Register the connection with the room. The user is not a participant
    /// until it sends `join`.
    pub async fn open(&self, context: ConnectionContext) -> (Connection, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(self.settings.outbound_buffer);
        let evict = Arc::new(Notify::new());
        let stall = Arc::new(Notify::new());

        self.peers
            .write()
            .await
            .entry(context.room_id)
            .or_default()
            .insert(
                context.connection_id,
                PeerHandle {
                    user_id: context.user.id.clone(),
                    joined: false,
                    stalled: false,
                    sender: sender.clone(),
                    evict: evict.clone(),
                    stall: stall.clone(),
                },
            );

        debug!(
            "Connection {} opened by user {} in room {}",
            context.connection_id, context.user.id, context.room_id
        );

        let connection = Connection {
            context,
            joined: false,
            sender,
            evict,
            stall,
        };
        (connection, receiver)
    }

    // ==========================================================================
    // MESSAGES
    // ==========================================================================

    pub async fn handle_text(&self, connection: &mut Connection, text: &str) -> ConnectionFlow {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Rejected frame from {}: {}", connection.user_id(), e);
                self.reply(connection, ServerMessage::error(&e)).await;
                return ConnectionFlow::Continue;
            }
        };

        self.handle_message(connection, message).await
    }

    pub async fn handle_message(&self, connection: &mut Connection, message: ClientMessage) -> ConnectionFlow {
        match message {
            ClientMessage::Join { role } => self.join(connection, role).await,
            ClientMessage::Leave => self.leave(connection).await,
            other if !connection.joined => {
                let err = SignalingError::NotJoined(other.kind().to_string());
                self.reply(connection, ServerMessage::error(&err)).await;
                ConnectionFlow::Continue
            }
            ClientMessage::End => self.end(connection).await,
            relayed => {
                if let Some(forward) = ServerMessage::relayed(relayed, connection.user_id()) {
                    self.broadcast(connection.room_id(), forward, Recipients::Others(connection.user_id()))
                        .await;
                }
                ConnectionFlow::Continue
            }
        }
    }

    async fn join(&self, connection: &mut Connection, declared: Option<ParticipantRole>) -> ConnectionFlow {
        let room_id = connection.room_id();
        let user_id = connection.user_id().to_string();
        let role = connection.context.standing.or(declared);

        let (participants, replaced) = match self
            .admit(connection, Participant::new(user_id.clone(), role))
            .await
        {
            Ok(admitted) => admitted,
            Err(e) => {
                self.reply(connection, ServerMessage::error(&e)).await;
                return ConnectionFlow::Close(e.close_reason().unwrap_or(CloseReason::Internal));
            }
        };

        for handle in replaced {
            info!(
                "User {} reconnected to room {}, evicting older connection",
                handle.user_id, room_id
            );
            Self::terminate(&handle, CloseReason::Replaced);
        }
        connection.joined = true;
        info!("User {} joined room {} ({} present)", user_id, room_id, participants.len());

        self.reply(
            connection,
            ServerMessage::Joined {
                room_id,
                user_id: user_id.clone(),
                participants: participants.clone(),
            },
        )
        .await;

        self.broadcast(
            room_id,
            ServerMessage::PeerJoined { user_id: user_id.clone(), role },
            Recipients::Others(&user_id),
        )
        .await;

        if participants.len() == 2 {
            debug!("Room {} is ready", room_id);
            self.broadcast(room_id, ServerMessage::Ready { room_id, participants }, Recipients::All)
                .await;
        }

        ConnectionFlow::Continue
    }

    /// Add the participant to the registry and mark this connection joined
    /// under one `peers` write guard, so whichever of two concurrent joins
    /// lands second sees the first as a broadcast recipient. Older joined
    /// connections of the same user are detached and returned for eviction.
    async fn admit(
        &self,
        connection: &Connection,
        participant: Participant,
    ) -> Result<(Vec<Participant>, Vec<PeerHandle>), SignalingError> {
        let mut peers = self.peers.write().await;
        let participants = self.registry.add_participant(connection.room_id(), participant)?;

        let Some(room) = peers.get_mut(&connection.room_id()) else {
            return Ok((participants, Vec::new()));
        };

        let stale: Vec<Uuid> = room
            .iter()
            .filter(|(id, handle)| {
                **id != connection.context.connection_id
                    && handle.joined
                    && handle.user_id == connection.user_id()
            })
            .map(|(id, _)| *id)
            .collect();

        if let Some(own) = room.get_mut(&connection.context.connection_id) {
            own.joined = true;
        }

        let replaced = stale.iter().filter_map(|id| room.remove(id)).collect();
        Ok((participants, replaced))
    }

    async fn leave(&self, connection: &mut Connection) -> ConnectionFlow {
        let room_id = connection.room_id();
        let current = self.detach(connection).await;

        if current
            && connection.joined
            && self.registry.remove_participant(room_id, connection.user_id()).is_some()
        {
            info!("User {} left room {}", connection.user_id(), room_id);
            self.broadcast(
                room_id,
                ServerMessage::PeerLeft { user_id: connection.user_id().to_string() },
                Recipients::Others(connection.user_id()),
            )
            .await;
        }

        connection.joined = false;
        ConnectionFlow::Close(CloseReason::Leave)
    }

    async fn end(&self, connection: &mut Connection) -> ConnectionFlow {
        let room_id = connection.room_id();
        let notice = ServerMessage::End {
            room_id,
            by: connection.user_id().to_string(),
        };

        self.broadcast(room_id, notice, Recipients::All).await;
        self.registry.end(room_id);
        self.close_room(room_id, Some(connection.context.connection_id)).await;
        info!("Room {} ended by user {}", room_id, connection.user_id());

        if let Some(consultation_id) = connection.context.consultation_id {
            match self.consultations.finish(consultation_id, &connection.context.user).await {
                Ok(consultation) => debug!(
                    "Consultation {} is now {} after room {} ended",
                    consultation_id, consultation.status, room_id
                ),
                Err(e) => warn!(
                    "Failed to finish consultation {} after room {} ended: {}",
                    consultation_id, room_id, e
                ),
            }
        }

        connection.joined = false;
        ConnectionFlow::Close(CloseReason::Ended)
    }

    // ==========================================================================
    // TEARDOWN
    // ==========================================================================

    /// Called once the connection's task is done with the socket. If this
    /// connection still holds its slot the user leaves abnormally: the
    /// participant is removed and the remaining peer told.
    pub async fn release(&self, connection: &Connection) {
        let room_id = connection.room_id();
        let current = self.detach(connection).await;

        if !current || !connection.joined {
            debug!("Connection {} released", connection.context.connection_id);
            return;
        }

        if self.registry.remove_participant(room_id, connection.user_id()).is_some() {
            info!("User {} dropped from room {}", connection.user_id(), room_id);
            self.broadcast(
                room_id,
                ServerMessage::PeerLeft { user_id: connection.user_id().to_string() },
                Recipients::Others(connection.user_id()),
            )
            .await;
        }
    }

    /// Remove this connection's handle. Returns `false` if it was already
    /// gone (replaced, or its room ended).
    async fn detach(&self, connection: &Connection) -> bool {
        let mut peers = self.peers.write().await;
        let Some(room) = peers.get_mut(&connection.room_id()) else {
            return false;
        };
        let removed = room.remove(&connection.context.connection_id).is_some();
        if room.is_empty() {
            peers.remove(&connection.room_id());
        }
        removed
    }

    /// Drop every connection of the room, except `keep`, with close 4010.
    async fn close_room(&self, room_id: Uuid, keep: Option<Uuid>) {
        let handles = self.peers.write().await.remove(&room_id).unwrap_or_default();
        for (connection_id, handle) in handles {
            if Some(connection_id) != keep {
                Self::terminate(&handle, CloseReason::Ended);
            }
        }
    }

    fn terminate(handle: &PeerHandle, reason: CloseReason) {
        let _ = handle.sender.try_send(Outbound::Close(reason));
        handle.evict.notify_one();
    }

    // ==========================================================================
    // DELIVERY
    // ==========================================================================

    pub async fn reply(&self, connection: &Connection, message: ServerMessage) {
        if let Err(e) = connection
            .sender
            .send_timeout(Outbound::Message(message), self.settings.send_timeout)
            .await
        {
            warn!(
                "Could not reply on connection {}: {}",
                connection.context.connection_id, e
            );
        }
    }

    async fn broadcast(&self, room_id: Uuid, message: ServerMessage, recipients: Recipients<'_>) {
        let targets: Vec<(Uuid, mpsc::Sender<Outbound>)> = {
            let peers = self.peers.read().await;
            let Some(room) = peers.get(&room_id) else {
                return;
            };
            room.iter()
                .filter(|(_, handle)| handle.joined && !handle.stalled)
                .filter(|(_, handle)| match recipients {
                    Recipients::All => true,
                    Recipients::Others(sender) => handle.user_id != sender,
                })
                .map(|(id, handle)| (*id, handle.sender.clone()))
                .collect()
        };

        for (connection_id, sender) in targets {
            match sender
                .send_timeout(Outbound::Message(message.clone()), self.settings.send_timeout)
                .await
            {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => self.evict_stalled(room_id, connection_id).await,
                Err(SendTimeoutError::Closed(_)) => {
                    debug!("Connection {} already closed", connection_id);
                }
            }
        }
    }

    /// The handle stays registered so the stalled connection's own task runs
    /// the abnormal-leave path when it wakes up.
    async fn evict_stalled(&self, room_id: Uuid, connection_id: Uuid) {
        let mut peers = self.peers.write().await;
        if let Some(handle) = peers.get_mut(&room_id).and_then(|room| room.get_mut(&connection_id)) {
            warn!(
                "Evicting stalled connection {} of user {} in room {}",
                connection_id, handle.user_id, room_id
            );
            handle.stalled = true;
            handle.stall.notify_one();
            handle.evict.notify_one();
        }
    }
}

#[async_trait]
impl SessionTeardown for SignalingRelay {
    async fn close_sessions_for(&self, consultation_id: Uuid) {
        let Some(room_id) = self.registry.find_by_consultation(consultation_id) else {
            return;
        };

        self.broadcast(
            room_id,
            ServerMessage::End { room_id, by: "system".to_string() },
            Recipients::All,
        )
        .await;
        self.registry.end(room_id);
        self.close_room(room_id, None).await;
        info!("Closed room {} of consultation {}", room_id, consultation_id);
    }
}
