//! Audit entries and the sink that receives them.
//!
//! Every mutation the core performs produces exactly one [`AuditEntry`].
//! Entries are append-only. Delivery is fire-and-forget from the core's
//! perspective: a failing sink is logged and never aborts a pass.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
  Create,
  Update,
  Delete,
}

impl AuditAction {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
  pub entry_id:    Uuid,
  pub table:       String,
  pub record_id:   String,
  pub action:      AuditAction,
  pub old_value:   Option<serde_json::Value>,
  pub new_value:   Option<serde_json::Value>,
  pub reason:      String,
  pub changed_by:  String,
  pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
  pub fn new(
    table: impl Into<String>,
    record_id: impl Into<String>,
    action: AuditAction,
    reason: impl Into<String>,
  ) -> Self {
    Self {
      entry_id:    Uuid::new_v4(),
      table:       table.into(),
      record_id:   record_id.into(),
      action,
      old_value:   None,
      new_value:   None,
      reason:      reason.into(),
      changed_by:  "reconciler".to_owned(),
      recorded_at: Utc::now(),
    }
  }

  pub fn with_old(mut self, value: serde_json::Value) -> Self {
    self.old_value = Some(value);
    self
  }

  pub fn with_new(mut self, value: serde_json::Value) -> Self {
    self.new_value = Some(value);
    self
  }

  pub fn by(mut self, actor: impl Into<String>) -> Self {
    self.changed_by = actor.into();
    self
  }
}

/// Append-only destination for audit entries.
pub trait AuditSink: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Append `entries` in order.
  fn append(
    &self,
    entries: Vec<AuditEntry>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
