//! Error type for `gid-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] gid_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A column held a value the schema's CHECK constraints should have ruled
  /// out.
  #[error("corrupt row in {table}: {detail}")]
  CorruptRow { table: &'static str, detail: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
