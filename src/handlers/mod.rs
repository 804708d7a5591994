//! # REST API Handlers
//!
//! Read-only introspection of live sessions and the language table.

pub mod languages;
pub mod sessions;

pub use languages::*;
pub use sessions::*;
