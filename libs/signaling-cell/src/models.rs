// libs/signaling-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use consultation_cell::models::{ConsultationError, ConsultationRole};

// ==============================================================================
// ROOM MODELS
// ==============================================================================

/// Ephemeral two-party room. Owned by the registry; everything else refers
/// to it by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub consultation_id: Option<Uuid>,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(consultation_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            consultation_id,
            participants: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= crate::services::registry::MAX_PARTICIPANTS
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub role: Option<ParticipantRole>,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>, role: Option<ParticipantRole>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            joined_at: Utc::now(),
        }
    }
}

/// Participants are the same participant when their user ids match.
impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id
    }
}

impl Eq for Participant {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[serde(alias = "doctor")]
    Clinician,
    Patient,
}

impl From<ConsultationRole> for ParticipantRole {
    fn from(role: ConsultationRole) -> Self {
        match role {
            ConsultationRole::Clinician => ParticipantRole::Clinician,
            ConsultationRole::Patient => ParticipantRole::Patient,
        }
    }
}

// ==============================================================================
// WIRE MESSAGES
// ==============================================================================

/// Messages a client may send. Frames are JSON text with a `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Join {
        #[serde(default)]
        role: Option<ParticipantRole>,
    },
    Offer {
        #[serde(default)]
        payload: Value,
    },
    Answer {
        #[serde(default)]
        payload: Value,
    },
    IceCandidate {
        #[serde(default)]
        payload: Value,
    },
    Chat {
        #[serde(default)]
        payload: Value,
    },
    Leave,
    End,
}

impl ClientMessage {
    pub const KINDS: [&'static str; 7] =
        ["join", "offer", "answer", "ice-candidate", "chat", "leave", "end"];

    /// Parse a text frame, telling an unknown `type` apart from a frame that
    /// is not a valid message at all.
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SignalingError::MalformedMessage(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SignalingError::MalformedMessage("missing message type".to_string()))?;

        if !Self::KINDS.contains(&kind) {
            return Err(SignalingError::UnknownMessage(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| SignalingError::MalformedMessage(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join { .. } => "join",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::Chat { .. } => "chat",
            ClientMessage::Leave => "leave",
            ClientMessage::End => "end",
        }
    }
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Joined {
        room_id: Uuid,
        user_id: String,
        participants: Vec<Participant>,
    },
    PeerJoined {
        user_id: String,
        role: Option<ParticipantRole>,
    },
    Ready {
        room_id: Uuid,
        participants: Vec<Participant>,
    },
    Offer {
        from: String,
        payload: Value,
    },
    Answer {
        from: String,
        payload: Value,
    },
    IceCandidate {
        from: String,
        payload: Value,
    },
    Chat {
        from: String,
        payload: Value,
    },
    PeerLeft {
        user_id: String,
    },
    End {
        room_id: Uuid,
        by: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(err: &SignalingError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    /// Wrap a relayed payload from `from`. `None` for kinds that are not
    /// relayed.
    pub fn relayed(message: ClientMessage, from: &str) -> Option<Self> {
        let from = from.to_string();
        match message {
            ClientMessage::Offer { payload } => Some(ServerMessage::Offer { from, payload }),
            ClientMessage::Answer { payload } => Some(ServerMessage::Answer { from, payload }),
            ClientMessage::IceCandidate { payload } => {
                Some(ServerMessage::IceCandidate { from, payload })
            }
            ClientMessage::Chat { payload } => Some(ServerMessage::Chat { from, payload }),
            ClientMessage::Join { .. } | ClientMessage::Leave | ClientMessage::End => None,
        }
    }
}

// ==============================================================================
// CONNECTION CLOSE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Leave,
    /// A newer connection of the same user took over the slot.
    Replaced,
    /// The peer stopped draining its outbound queue.
    Stalled,
    InvalidCredential,
    Forbidden,
    RoomNotFound,
    RoomFull,
    Ended,
    Internal,
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Leave => 1000,
            CloseReason::Stalled => 1008,
            CloseReason::Internal => 1011,
            CloseReason::Replaced => 4000,
            CloseReason::InvalidCredential => 4001,
            CloseReason::Forbidden => 4003,
            CloseReason::RoomNotFound => 4004,
            CloseReason::RoomFull => 4009,
            CloseReason::Ended => 4010,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseReason::Leave => "leave",
            CloseReason::Replaced => "replaced",
            CloseReason::Stalled => "stalled",
            CloseReason::InvalidCredential => "invalid_credential",
            CloseReason::Forbidden => "forbidden",
            CloseReason::RoomNotFound => "room_not_found",
            CloseReason::RoomFull => "room_full",
            CloseReason::Ended => "ended",
            CloseReason::Internal => "internal_error",
        }
    }
}

// ==============================================================================
// ERROR HANDLING
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalingError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Room not found")]
    RoomNotFound,

    #[error("No standing in this consultation")]
    Forbidden,

    #[error("Room is full")]
    RoomFull,

    #[error("Join the room before sending '{0}'")]
    NotJoined(String),

    #[error("Unknown message type '{0}'")]
    UnknownMessage(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error(transparent)]
    Consultation(#[from] ConsultationError),
}

impl SignalingError {
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::InvalidCredential(_) => "invalid_credential",
            SignalingError::RoomNotFound => "not_found",
            SignalingError::Forbidden => "forbidden",
            SignalingError::RoomFull => "room_full",
            SignalingError::NotJoined(_) => "not_joined",
            SignalingError::UnknownMessage(_) => "unknown_message",
            SignalingError::MalformedMessage(_) => "malformed_message",
            SignalingError::Consultation(e) => e.code(),
        }
    }

    /// Close code for failures that end the connection.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            SignalingError::InvalidCredential(_) => Some(CloseReason::InvalidCredential),
            SignalingError::RoomNotFound => Some(CloseReason::RoomNotFound),
            SignalingError::Forbidden => Some(CloseReason::Forbidden),
            SignalingError::RoomFull => Some(CloseReason::RoomFull),
            SignalingError::Consultation(
                ConsultationError::NotAuthorized | ConsultationError::NotFound,
            ) => Some(CloseReason::Forbidden),
            SignalingError::Consultation(_) => Some(CloseReason::Internal),
            SignalingError::NotJoined(_)
            | SignalingError::UnknownMessage(_)
            | SignalingError::MalformedMessage(_) => None,
        }
    }
}
