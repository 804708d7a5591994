//! # Session Module
//!
//! Per-session state shared between connection tasks and housekeeping.

pub mod registry;

pub use registry::{
    EvictionReason, EvictionSignal, RegistryError, SessionLease, SessionMetadata, SessionRegistry,
    SessionSnapshot,
};
