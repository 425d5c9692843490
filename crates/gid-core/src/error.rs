//! Error types for `gid-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The digit position rolled past 9. Requires administrative intervention.
  #[error("G_ID sequence exhausted: no identifier left after G999ZZ99")]
  SequenceExhausted,

  /// The persisted counter kept changing underneath us.
  #[error("sequence allocation conflicted {attempts} times; giving up")]
  AllocationConflict { attempts: u32 },

  #[error("malformed G_ID: {0:?}")]
  InvalidGlobalId(String),

  #[error("invalid sequence state: {0}")]
  InvalidSequenceState(String),

  #[error("sequence reset requires explicit confirmation")]
  ResetNotConfirmed,

  #[error("unknown origin: {0:?}")]
  UnknownOrigin(String),

  #[error("unknown status: {0:?}")]
  UnknownStatus(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
