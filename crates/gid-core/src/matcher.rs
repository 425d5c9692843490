//! Identity matching: find the existing identity a candidate belongs to.
//!
//! Strategies are tried in strict precedence and the first hit wins:
//!
//! | Tier | Key |
//! |------|-----|
//! | 1 | name + national id + birth date |
//! | 2 | name + national id |
//! | 3 | national id |
//! | 4 | name + passport id (only when the candidate has no national id) |
//!
//! Several hits in one tier resolve to the smallest key, so the result does
//! not depend on row order.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::identity::IdentityFields;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
  NameNationalIdBirthDate,
  NameNationalId,
  NationalId,
  NamePassport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match<K> {
  pub key:  K,
  pub tier: MatchTier,
}

/// Per-tier lookup tables over a set of identity fields.
///
/// `K` is whatever the caller wants back: a `GlobalId` for stored records, a
/// slot index for identities minted earlier in the same pass.
#[derive(Debug, Clone)]
pub struct MatchIndex<K> {
  exact:         HashMap<(String, String, NaiveDate), K>,
  name_nid:      HashMap<(String, String), K>,
  nid:           HashMap<String, K>,
  name_passport: HashMap<(String, String), K>,
}

impl<K> Default for MatchIndex<K> {
  fn default() -> Self {
    Self {
      exact:         HashMap::new(),
      name_nid:      HashMap::new(),
      nid:           HashMap::new(),
      name_passport: HashMap::new(),
    }
  }
}

impl<K: Ord + Clone> MatchIndex<K> {
  pub fn new() -> Self { Self::default() }

  pub fn build<'a, I>(entries: I) -> Self
  where
    I: IntoIterator<Item = (&'a IdentityFields, K)>,
  {
    let mut index = Self::new();
    for (fields, key) in entries {
      index.insert(fields, key);
    }
    index
  }

  /// Register `fields` under `key`. Fields must already be normalized.
  pub fn insert(&mut self, fields: &IdentityFields, key: K) {
    if let Some(nid) = &fields.national_id {
      if let Some(bd) = fields.birth_date {
        keep_min(
          &mut self.exact,
          (fields.name.clone(), nid.clone(), bd),
          key.clone(),
        );
      }
      keep_min(&mut self.name_nid, (fields.name.clone(), nid.clone()), key.clone());
      keep_min(&mut self.nid, nid.clone(), key.clone());
    }
    if let Some(passport) = &fields.passport_id {
      keep_min(
        &mut self.name_passport,
        (fields.name.clone(), passport.clone()),
        key,
      );
    }
  }

  /// Find the best match for normalized candidate fields.
  pub fn find(&self, fields: &IdentityFields) -> Option<Match<K>> {
    let hit = |key: &K, tier| Some(Match { key: key.clone(), tier });

    if let Some(nid) = &fields.national_id {
      if let Some(bd) = fields.birth_date
        && let Some(key) =
          self.exact.get(&(fields.name.clone(), nid.clone(), bd))
      {
        return hit(key, MatchTier::NameNationalIdBirthDate);
      }
      if let Some(key) = self.name_nid.get(&(fields.name.clone(), nid.clone())) {
        return hit(key, MatchTier::NameNationalId);
      }
      if let Some(key) = self.nid.get(nid) {
        return hit(key, MatchTier::NationalId);
      }
      return None;
    }

    if let Some(passport) = &fields.passport_id
      && let Some(key) =
        self.name_passport.get(&(fields.name.clone(), passport.clone()))
    {
      return hit(key, MatchTier::NamePassport);
    }
    None
  }
}

fn keep_min<Q: std::hash::Hash + Eq, K: Ord>(
  map: &mut HashMap<Q, K>,
  q: Q,
  key: K,
) {
  match map.get_mut(&q) {
    Some(existing) if key < *existing => *existing = key,
    Some(_) => {}
    None => {
      map.insert(q, key);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fields(
    name: &str,
    nid: Option<&str>,
    passport: Option<&str>,
    bd: Option<(i32, u32, u32)>,
  ) -> IdentityFields {
    IdentityFields {
      name:            name.into(),
      personal_number: None,
      national_id:     nid.map(Into::into),
      passport_id:     passport.map(Into::into),
      birth_date:      bd.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
    }
  }

  #[test]
  fn exact_match_beats_national_id_only() {
    let exact = fields("Ayu", Some("111"), None, Some((1990, 5, 1)));
    let loose = fields("Someone Else", Some("111"), None, None);
    // The looser record has the smaller key; precedence must still win.
    let index = MatchIndex::build([(&loose, "G025AA00"), (&exact, "G025AA01")]);

    let found = index.find(&exact).unwrap();
    assert_eq!(found.key, "G025AA01");
    assert_eq!(found.tier, MatchTier::NameNationalIdBirthDate);
  }

  #[test]
  fn birth_date_difference_falls_back_to_name_and_national_id() {
    let stored = fields("Ayu", Some("111"), None, Some((1990, 5, 1)));
    let index = MatchIndex::build([(&stored, 7)]);

    let query = fields("Ayu", Some("111"), None, Some((1991, 5, 1)));
    assert_eq!(index.find(&query).unwrap().tier, MatchTier::NameNationalId);
  }

  #[test]
  fn national_id_alone_matches_renamed_person() {
    let stored = fields("Ayu Lestari", Some("111"), None, None);
    let index = MatchIndex::build([(&stored, 7)]);

    let query = fields("Ayu L.", Some("111"), None, None);
    assert_eq!(index.find(&query).unwrap().tier, MatchTier::NationalId);
  }

  #[test]
  fn passport_only_used_without_national_id() {
    let stored = fields("Ayu", None, Some("A1234567"), None);
    let index = MatchIndex::build([(&stored, 7)]);

    let query = fields("Ayu", None, Some("A1234567"), None);
    assert_eq!(index.find(&query).unwrap().tier, MatchTier::NamePassport);

    let with_nid = fields("Ayu", Some("999"), Some("A1234567"), None);
    assert!(index.find(&with_nid).is_none());
  }

  #[test]
  fn ties_resolve_to_smallest_key() {
    let a = fields("Ayu", Some("111"), None, None);
    let b = fields("Ayu", Some("111"), None, None);
    let index = MatchIndex::build([(&a, "G025AA09"), (&b, "G025AA03")]);
    assert_eq!(index.find(&a).unwrap().key, "G025AA03");
  }

  #[test]
  fn no_identifiers_never_match() {
    let stored = fields("Ayu", None, None, None);
    let index = MatchIndex::build([(&stored, 1)]);
    assert!(index.find(&stored).is_none());
  }
}
