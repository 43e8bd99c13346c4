// Upload session: Idle -> Processing -> Ready | Failed, with an explicit reset.
use crate::error::SessionError;
use crate::reports::analyze;
use crate::types::{MetricRecord, Outcome, RawFrame};
use once_cell::sync::Lazy;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Processing,
    Ready(Box<MetricRecord>),
    Failed(String),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Processing => "processing",
            SessionState::Ready(_) => "ready",
            SessionState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn record(&self) -> Option<&MetricRecord> {
        match &self.state {
            SessionState::Ready(r) => Some(r),
            _ => None,
        }
    }

    /// Enter Processing. A new upload replaces a finished one; a second
    /// upload during Processing is rejected.
    pub fn begin(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Processing {
            return Err(SessionError::Busy);
        }
        self.state = SessionState::Processing;
        Ok(())
    }

    pub fn complete(&mut self, outcome: Outcome) -> Result<(), SessionError> {
        if self.state != SessionState::Processing {
            return Err(SessionError::InvalidTransition {
                action: "complete",
                state: self.state.name(),
            });
        }
        self.state = match outcome {
            Outcome::Ready(record) => SessionState::Ready(record),
            Outcome::Failed { error } => SessionState::Failed(error),
        };
        info!("session is {}", self.state.name());
        Ok(())
    }

    /// Run the pipeline on `frame` and land in Ready or Failed.
    pub fn process(&mut self, frame: &RawFrame) -> Result<&SessionState, SessionError> {
        self.begin()?;
        self.complete(analyze(frame))?;
        Ok(&self.state)
    }

    pub fn reset(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Ready(_) | SessionState::Failed(_) => {
                self.state = SessionState::Idle;
                Ok(())
            }
            SessionState::Idle => Ok(()),
            SessionState::Processing => Err(SessionError::InvalidTransition {
                action: "reset",
                state: self.state.name(),
            }),
        }
    }
}

// One session per process for the interactive CLI.
static SESSION: Lazy<Mutex<Session>> = Lazy::new(|| Mutex::new(Session::new()));

/// Lock the process-wide session, recovering from a poisoned lock.
pub fn global() -> MutexGuard<'static, Session> {
    SESSION.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
