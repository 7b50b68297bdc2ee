// libs/signaling-cell/src/lib.rs
//! # Signaling Cell
//!
//! Ephemeral two-party rooms and the websocket relay a clinician and a
//! patient use to negotiate a direct peer session. Media never passes
//! through here; only offers, answers, ICE candidates and chat.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                  Signaling Cell                     |
//! +-----------------------------------------------------+
//! |  handlers.rs    |  Websocket + room HTTP handlers   |
//! |  router.rs      |  Route definitions                |
//! |  models.rs      |  Rooms, wire messages, errors     |
//! |  services/      |                                   |
//! |    registry.rs  |  In-memory room table             |
//! |    relay.rs     |  Connection routing & teardown    |
//! |    auth.rs      |  Handshake credential check       |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Protocol
//!
//! Connect with `GET /signaling/ws?room_id=<uuid>&token=<jwt>`, then send
//! JSON text frames tagged by `type`: `join`, `offer`, `answer`,
//! `ice-candidate`, `chat`, `leave`, `end`. The relay answers with
//! `joined`, `peer-joined`, `ready`, the relayed kinds (tagged with `from`),
//! `peer-left`, `end` and `error`.
//!
//! | Close code | Meaning |
//! |---|---|
//! | 1000 | leave |
//! | 1008 | outbound queue stalled |
//! | 1011 | internal error |
//! | 4000 | replaced by a newer connection |
//! | 4001 | invalid credential |
//! | 4003 | forbidden |
//! | 4004 | room not found |
//! | 4009 | room full |
//! | 4010 | session ended |
//!
//! ## API Endpoints
//!
//! - `GET /signaling/ws` - Signaling websocket
//! - `POST /signaling/rooms` - Create a standalone room
//! - `GET /signaling/rooms/{room_id}` - Room details
//! - `POST /signaling/rooms/consultations/{id}` - Find or create a consultation room
//! - `GET /signaling/rooms/consultations/{id}` - Room of a consultation
//! - `GET /signaling/health` - Health check

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{
    ClientMessage, CloseReason, Participant, ParticipantRole, Room, ServerMessage, SignalingError,
};

pub use services::{
    CredentialVerifier, JwtCredentialVerifier, RelaySettings, RoomRegistry, SignalingRelay,
};

pub use handlers::SignalingCellState;
pub use router::signaling_routes;
