//! # Session Registry
//!
//! The authoritative in-memory table of live translation sessions. Every
//! connection task and the housekeeping sweep go through this one object;
//! nobody keeps a private copy of session state.
//!
//! ## Concurrency:
//! A single `Mutex<HashMap<..>>` guards the table. Every operation is one
//! short critical section (insert, update one record, remove) and the lock is
//! never held across an `.await`. Lookups and updates are O(1); only the idle
//! scan walks the whole table.
//!
//! ## Eviction:
//! [`SessionRegistry::open`] hands the connection an [`EvictionSignal`].
//! When the housekeeping sweep evicts a session, the record is removed and the
//! signal fires so the owning connection can drain and close.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session {0} is already active")]
    DuplicateSession(Uuid),

    #[error("maximum concurrent sessions ({0}) reached")]
    CapacityReached(usize),

    #[error("session {0} is not registered")]
    SessionNotFound(Uuid),
}

/// Why a session was removed from outside its own connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    IdleTimeout,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionReason::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Receiving half of a session's eviction notice.
#[derive(Debug)]
pub struct EvictionSignal(oneshot::Receiver<EvictionReason>);

impl EvictionSignal {
    /// Resolves when the session is evicted; `None` once the session closed
    /// normally and the sender was dropped.
    pub async fn wait(self) -> Option<EvictionReason> {
        self.0.await.ok()
    }

    /// Non-blocking check, used by tests and the protocol engine.
    pub fn try_fired(&mut self) -> Option<EvictionReason> {
        self.0.try_recv().ok()
    }
}

/// Connection details captured at handshake time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionMetadata {
    /// Raw `x-language-pair` handshake header, if the client sent one.
    pub language_pair: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Registry-owned record for one live session.
struct SessionRecord {
    connection_id: u64,
    metadata: SessionMetadata,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    last_activity: Instant,
    messages_received: u64,
    chunks_processed: u64,
    last_acknowledged_seq: u64,
    evict_tx: Option<oneshot::Sender<EvictionReason>>,
}

impl SessionRecord {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    fn notify_evicted(mut self, id: Uuid, reason: EvictionReason) -> SessionSnapshot {
        if let Some(tx) = self.evict_tx.take() {
            // The connection may already be gone; nothing to notify then.
            let _ = tx.send(reason);
        }
        self.snapshot(id)
    }

    fn snapshot(&self, id: Uuid) -> SessionSnapshot {
        SessionSnapshot {
            session_id: id,
            language_pair: self.metadata.language_pair.clone(),
            client_ip: self.metadata.client_ip.clone(),
            user_agent: self.metadata.user_agent.clone(),
            connected_at: self.created_at,
            last_activity: self.last_activity_at,
            idle_ms: self.last_activity.elapsed().as_millis() as u64,
            messages_received: self.messages_received,
            chunks_processed: self.chunks_processed,
            last_acknowledged_seq: self.last_acknowledged_seq,
        }
    }
}

/// Read-only copy of a session record, for logging and reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub language_pair: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub idle_ms: u64,
    pub messages_received: u64,
    pub chunks_processed: u64,
    pub last_acknowledged_seq: u64,
}

impl SessionSnapshot {
    pub fn duration_secs(&self) -> f64 {
        (Utc::now() - self.connected_at).num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// What a connection gets back from a successful [`SessionRegistry::open`].
#[derive(Debug)]
pub struct SessionLease {
    pub session: SessionSnapshot,
    /// Distinguishes this connection from a later one reusing the same id.
    pub connection_id: u64,
    pub eviction: EvictionSignal,
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
    max_sessions: usize,
    next_connection_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_sessions,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Register a new session. Fails if the id is already live or the table is full.
    pub fn open(&self, id: Uuid, metadata: SessionMetadata) -> Result<SessionLease, RegistryError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateSession(id));
        }
        if sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityReached(self.max_sessions));
        }

        let (evict_tx, evict_rx) = oneshot::channel();
        let now = Utc::now();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let record = SessionRecord {
            connection_id,
            metadata,
            created_at: now,
            last_activity_at: now,
            last_activity: Instant::now(),
            messages_received: 0,
            chunks_processed: 0,
            last_acknowledged_seq: 0,
            evict_tx: Some(evict_tx),
        };
        let session = record.snapshot(id);
        sessions.insert(id, record);

        Ok(SessionLease {
            session,
            connection_id,
            eviction: EvictionSignal(evict_rx),
        })
    }

    /// Refresh last-activity.
    pub fn touch(&self, id: Uuid) -> Result<(), RegistryError> {
        self.with_record(id, |record| record.touch())
    }

    /// Refresh last-activity and count one inbound message.
    pub fn record_message(&self, id: Uuid) -> Result<(), RegistryError> {
        self.with_record(id, |record| {
            record.touch();
            record.messages_received += 1;
        })
    }

    pub fn record_chunk(&self, id: Uuid) -> Result<u64, RegistryError> {
        self.with_record(id, |record| {
            record.chunks_processed += 1;
            record.chunks_processed
        })
    }

    /// Advance the last-acknowledged sequence number.
    ///
    /// A sequence number below the current one is accepted and ignored, so the
    /// stored value never moves backwards. Returns the value after the update.
    pub fn acknowledge(&self, id: Uuid, seq: u64) -> Result<u64, RegistryError> {
        self.with_record(id, |record| {
            record.last_acknowledged_seq = record.last_acknowledged_seq.max(seq);
            record.last_acknowledged_seq
        })
    }

    /// Remove a session and return its final state, but only if the record
    /// still belongs to `connection_id`. An evicted connection must not tear
    /// down a newer session that reused its id.
    pub fn release(&self, id: Uuid, connection_id: u64) -> Option<SessionSnapshot> {
        let mut sessions = self.sessions();
        match sessions.get(&id) {
            Some(record) if record.connection_id == connection_id => {
                sessions.remove(&id).map(|record| record.snapshot(id))
            }
            _ => None,
        }
    }

    /// Sessions whose last activity is older than `threshold`.
    pub fn list_idle_since(&self, threshold: Duration) -> Vec<SessionSnapshot> {
        let now = Instant::now();
        self.sessions()
            .iter()
            .filter(|(_, record)| now.saturating_duration_since(record.last_activity) > threshold)
            .map(|(id, record)| record.snapshot(*id))
            .collect()
    }

    /// Forcibly remove a session and notify its connection.
    #[cfg(test)]
    pub fn evict(&self, id: Uuid, reason: EvictionReason) -> Option<SessionSnapshot> {
        let record = self.sessions().remove(&id)?;
        Some(record.notify_evicted(id, reason))
    }

    /// Evict only if the session is still idle for longer than `threshold`.
    ///
    /// The idle check and the removal happen under one lock, so a message
    /// recorded after an idle scan keeps the session alive.
    pub fn evict_if_idle(
        &self,
        id: Uuid,
        threshold: Duration,
        reason: EvictionReason,
    ) -> Option<SessionSnapshot> {
        let record = {
            let mut sessions = self.sessions();
            let idle = sessions.get(&id)?.last_activity.elapsed() > threshold;
            if !idle {
                return None;
            }
            sessions.remove(&id)?
        };
        Some(record.notify_evicted(id, reason))
    }

    pub fn get(&self, id: Uuid) -> Option<SessionSnapshot> {
        self.sessions().get(&id).map(|record| record.snapshot(id))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions().contains_key(&id)
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self
            .sessions()
            .iter()
            .map(|(id, record)| record.snapshot(*id))
            .collect();
        all.sort_by_key(|s| s.connected_at);
        all
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    fn with_record<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut SessionRecord) -> T,
    ) -> Result<T, RegistryError> {
        let mut sessions = self.sessions();
        let record = sessions.get_mut(&id).ok_or(RegistryError::SessionNotFound(id))?;
        Ok(f(record))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, SessionRecord>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
