//! In-memory sessions, one pipeline each, keyed by caller-chosen id.
//!
//! Sessions expire after a fixed idle time. Callers pass `now` explicitly so
//! expiry is deterministic under test.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::{Duration, Instant};

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::error::GraphError;
use crate::io::config::PlannerConfig;
use crate::io::generator::Generator;
use crate::pipeline::{Phase, PhaseOrderError, PhaseReport, Pipeline};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session {0}")]
    UnknownSession(String),

    #[error("session {0} expired")]
    Expired(String),

    #[error(transparent)]
    PhaseOutOfOrder(#[from] PhaseOrderError),

    #[error("invalid objective: {0}")]
    InvalidObjective(#[from] GraphError),
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    pipeline: Pipeline,
    last_active: Instant,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn completed(&self) -> Phase {
        self.pipeline.completed()
    }

    /// Run the next phase. Anything but the direct successor of the last
    /// completed phase fails with [`SessionError::PhaseOutOfOrder`].
    pub fn run_phase<G: Generator>(&mut self, phase: Phase, generator: &G) -> Result<PhaseReport> {
        self.pipeline
            .run_phase(phase, generator)
            .map_err(|err| match err.downcast::<PhaseOrderError>() {
                Ok(order) => SessionError::from(order).into(),
                Err(err) => err,
            })
    }
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: HashMap::new(),
        }
    }

    /// Start a session for `objective`, replacing any session with the same id.
    pub fn create(
        &mut self,
        id: impl Into<String>,
        objective: &str,
        expected_output: &str,
        config: PlannerConfig,
        now: Instant,
    ) -> Result<&mut Session, SessionError> {
        let id = id.into();
        let pipeline = Pipeline::new(objective, expected_output, config)?;
        let session = Session {
            id: id.clone(),
            pipeline,
            last_active: now,
        };
        match self.sessions.entry(id) {
            Entry::Occupied(mut entry) => {
                debug!(session = %entry.key(), "replacing existing session");
                entry.insert(session);
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => Ok(entry.insert(session)),
        }
    }

    pub fn get(&self, id: &str, now: Instant) -> Result<&Session, SessionError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        if self.is_stale(session, now) {
            return Err(SessionError::Expired(id.to_string()));
        }
        Ok(session)
    }

    /// Like [`SessionStore::get`], and marks the session active at `now`.
    pub fn get_mut(&mut self, id: &str, now: Instant) -> Result<&mut Session, SessionError> {
        let ttl = self.ttl;
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownSession(id.to_string()))?;
        if now.saturating_duration_since(session.last_active) > ttl {
            return Err(SessionError::Expired(id.to_string()));
        }
        session.last_active = now;
        Ok(session)
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Drop every session idle for longer than the ttl. Returns how many went.
    pub fn expire_stale(&mut self, now: Instant) -> usize {
        let before = self.sessions.len();
        let ttl = self.ttl;
        self.sessions
            .retain(|_, session| now.saturating_duration_since(session.last_active) <= ttl);
        let expired = before - self.sessions.len();
        if expired > 0 {
            info!(expired, "expired stale sessions");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn is_stale(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.last_active) > self.ttl
    }
}
