//! Error taxonomy for the engine.
//!
//! Only install failures and invalid control input reach a caller. Network
//! and storage problems inside a strategy are absorbed into a fallback result.

use thiserror::Error;

use crate::lifecycle::LifecycleState;

#[derive(Debug, Error)]
pub enum EngineError {
  /// The durable store could not be opened or written.
  #[error("storage unavailable: {message}")]
  StorageUnavailable { message: String },

  /// Timeout, DNS, connection refused and similar transport problems.
  #[error("network failure: {0}")]
  NetworkFailure(#[from] NetworkError),

  /// The server rejected a queued mutation on replay.
  #[error("replay of {id} rejected with status {status}")]
  ReplayFailure { id: uuid::Uuid, status: u16 },

  /// Pre-warming the static partition did not complete.
  #[error("install of generation {generation} failed: {reason}")]
  InstallFailed { generation: u64, reason: String },

  /// A lifecycle operation was requested in a state that does not allow it.
  #[error("cannot {operation} while {state}")]
  InvalidState {
    operation: &'static str,
    state: LifecycleState,
  },

  #[error("invalid request: {message}")]
  InvalidRequest { message: String },
}

impl EngineError {
  pub fn storage(err: impl std::fmt::Display) -> Self {
    EngineError::StorageUnavailable {
      message: err.to_string(),
    }
  }
}

impl From<rusqlite::Error> for EngineError {
  fn from(err: rusqlite::Error) -> Self {
    EngineError::storage(err)
  }
}

/// Transport-level failure of a single network attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
  #[error("timed out after {millis}ms")]
  Timeout { millis: u64 },

  #[error("connection failed: {0}")]
  Connect(String),

  #[error("{0}")]
  Other(String),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
