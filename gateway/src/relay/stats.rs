//! Process-wide relay counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::session::Leg;

/// Counters shared by all sessions. Holds no per-client state.
#[derive(Debug)]
pub struct RelayStats {
    started_at: DateTime<Utc>,
    active: AtomicUsize,
    opened: AtomicU64,
    upstream_failures: AtomicU64,
    to_backend: AtomicU64,
    to_client: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub active_sessions: usize,
    pub sessions_opened: u64,
    pub upstream_failures: u64,
    pub frames_to_backend: u64,
    pub frames_to_client: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            active: AtomicUsize::new(0),
            opened: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            to_backend: AtomicU64::new(0),
            to_client: AtomicU64::new(0),
        }
    }

    /// Mark a session as active until the returned guard is dropped.
    pub fn session_opened(self: &Arc<Self>) -> ActiveSession {
        self.opened.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveSession {
            stats: Arc::clone(self),
        }
    }

    pub fn upstream_failed(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame read from `from` was handed to the opposite leg.
    pub fn frame_forwarded(&self, from: Leg) {
        match from {
            Leg::Client => self.to_backend.fetch_add(1, Ordering::Relaxed),
            Leg::Backend => self.to_client.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            active_sessions: self.active.load(Ordering::Relaxed),
            sessions_opened: self.opened.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            frames_to_backend: self.to_backend.load(Ordering::Relaxed),
            frames_to_client: self.to_client.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active session count on drop.
#[derive(Debug)]
pub struct ActiveSession {
    stats: Arc<RelayStats>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::Relaxed);
    }
}
