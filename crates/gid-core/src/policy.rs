//! The validation policy applied to candidates before reconciliation.
//!
//! All knobs live in one versioned struct that callers load from
//! configuration and hand to the [`Reconciler`](crate::reconcile::Reconciler).

use serde::{Deserialize, Serialize};

use crate::identity::Candidate;

/// What to do when two rows of one snapshot resolve to the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
  /// The later row joins the identity the earlier row resolved to.
  #[default]
  Merge,
  /// The later row is reported as a per-record error.
  Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
  pub version:              u32,
  /// At least one well-formed national id or passport id must be present.
  pub require_identifier:   bool,
  pub validate_national_id: bool,
  pub validate_passport:    bool,
  pub name_min_len:         usize,
  pub name_max_len:         usize,
  pub duplicates:           DuplicatePolicy,
}

impl Default for ValidationPolicy {
  fn default() -> Self {
    Self {
      version:              1,
      require_identifier:   true,
      validate_national_id: true,
      validate_passport:    true,
      name_min_len:         2,
      name_max_len:         255,
      duplicates:           DuplicatePolicy::Merge,
    }
  }
}

impl ValidationPolicy {
  /// Accept every record that has a name. Storage constraints still apply.
  pub fn permissive() -> Self {
    Self {
      require_identifier: false,
      validate_national_id: false,
      validate_passport: false,
      name_min_len: 0,
      name_max_len: usize::MAX,
      ..Self::default()
    }
  }

  /// Check a normalized candidate. Returns every violation found.
  pub fn validate(&self, candidate: &Candidate) -> Result<(), Vec<String>> {
    let f = &candidate.fields;
    let mut issues = Vec::new();

    let name_len = f.name.chars().count();
    if name_len < self.name_min_len.max(1) {
      issues.push(format!(
        "name must be at least {} characters",
        self.name_min_len.max(1)
      ));
    } else if name_len > self.name_max_len {
      issues.push(format!("name exceeds {} characters", self.name_max_len));
    }

    let nid_issue = f
      .national_id
      .as_deref()
      .and_then(|nid| national_id_issue(nid, candidate.national_id_override));
    let passport_issue = f.passport_id.as_deref().and_then(passport_issue);

    if self.validate_national_id
      && let Some(issue) = &nid_issue
    {
      issues.push(issue.clone());
    }
    if self.validate_passport
      && let Some(issue) = &passport_issue
    {
      issues.push(issue.clone());
    }

    if self.require_identifier {
      let nid_ok = f.national_id.is_some() && nid_issue.is_none();
      let passport_ok = f.passport_id.is_some() && passport_issue.is_none();
      if !nid_ok && !passport_ok {
        issues.push(
          "at least one valid identifier (national id or passport id) is required"
            .to_owned(),
        );
      }
    }

    if issues.is_empty() { Ok(()) } else { Err(issues) }
  }
}

/// Digits only; exactly 16 unless the record carries an override.
fn national_id_issue(nid: &str, allow_irregular: bool) -> Option<String> {
  if !nid.chars().all(|c| c.is_ascii_digit()) {
    return Some(format!("national id {nid:?} must be numeric"));
  }
  let len = nid.len();
  if len != 16 && !allow_irregular {
    return Some(format!(
      "national id {nid:?} has {len} digits (expected 16) and no override"
    ));
  }
  None
}

/// 8–9 alphanumerics, letter first, fewer letters than digits.
fn passport_issue(passport: &str) -> Option<String> {
  let len = passport.chars().count();
  if !(8..=9).contains(&len) {
    return Some(format!(
      "passport id {passport:?} must be 8 or 9 characters, found {len}"
    ));
  }
  if !passport.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
    return Some(format!("passport id {passport:?} must start with a letter"));
  }
  if !passport.chars().all(|c| c.is_ascii_alphanumeric()) {
    return Some(format!("passport id {passport:?} must be alphanumeric"));
  }
  let letters = passport.chars().filter(char::is_ascii_alphabetic).count();
  let digits = len - letters;
  if digits == 0 {
    return Some(format!("passport id {passport:?} must contain a digit"));
  }
  if letters >= digits {
    return Some(format!(
      "passport id {passport:?} must have fewer letters ({letters}) than digits ({digits})"
    ));
  }
  None
}
