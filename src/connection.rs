//! Lazily established, resettable connection ownership.
//!
//! [`ConnectionManager`] is the single authority over an adapter's live
//! session. It never opens anything on its own: the adapter passes an opener
//! to [`ConnectionManager::ensure_connected`], built from its current
//! configuration, and the manager runs it only when no session is live.
//!
//! The manager holds no lock of its own. It lives inside the adapter's
//! locked state, so connect, reset and every device call made through the
//! session are serialized by the same guard.
//!
//! # Lifecycle
//!
//! ```text
//!            ensure_connected (opener runs)
//!   Idle ───────────────────────────────────▶ Live(generation n)
//!    ▲                                           │
//!    └────────────── reset / shutdown ◀──────────┘
//! ```
//!
//! Each successful open increments the generation, so callers (and tests)
//! can observe that a session was rebuilt from fresh configuration.

use std::future::Future;
use tracing::{debug, info};

use crate::error::{AdapterError, AdapterResult};

/// Owner of at most one live session of type `S`.
#[derive(Debug)]
pub struct ConnectionManager<S> {
    label: &'static str,
    live: Option<S>,
    generation: u64,
}

impl<S> ConnectionManager<S> {
    /// Create a manager with no live session.
    ///
    /// `label` names the adapter in connection lifecycle logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            live: None,
            generation: 0,
        }
    }

    /// Return the live session, opening one first if none exists.
    ///
    /// The opener is awaited at most once per call and its failure is
    /// returned as-is; there is no retry. A failed open leaves the manager
    /// idle, so the next call tries again from scratch.
    pub async fn ensure_connected<F, Fut>(&mut self, open: F) -> AdapterResult<&S>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AdapterResult<S>>,
    {
        if self.live.is_none() {
            debug!(adapter = self.label, "opening connection");
            let session = open().await?;
            self.generation += 1;
            info!(
                adapter = self.label,
                generation = self.generation,
                "connection established"
            );
            return Ok(self.live.insert(session));
        }

        self.live
            .as_ref()
            .ok_or_else(|| AdapterError::Connection(format!("{} has no live session", self.label)))
    }

    /// Drop the live session, if any, without contacting hardware.
    ///
    /// Returns whether a session was actually torn down. Resetting an idle
    /// manager is not an error.
    pub fn reset(&mut self) -> bool {
        let had_session = self.live.take().is_some();
        if had_session {
            info!(adapter = self.label, "connection reset");
        }
        had_session
    }

    /// Whether a session is live.
    pub fn is_connected(&self) -> bool {
        self.live.is_some()
    }

    /// The live session, without connecting.
    pub fn session(&self) -> Option<&S> {
        self.live.as_ref()
    }

    /// Number of sessions opened so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
