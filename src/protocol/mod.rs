//! # Protocol Module
//!
//! Wire format and per-connection state machine for the translation socket.
//!
//! ## Components:
//! - **messages**: inbound validation and outbound message shapes
//! - **engine**: [`ProtocolEngine`], driven by the WebSocket actor

pub mod engine;
pub mod messages;

pub use engine::{
    Completion, ConnectionState, Connected, DrainReason, HandshakeRejection, JobTicket,
    ProtocolEngine, Step, TranslationFinished, TranslationJob,
};
pub use messages::{ErrorCode, OutboundBody, OutboundMessage};
