//! The G_ID itself and the rollover counter that mints it.
//!
//! A G_ID is `G{digit}{yy}{alpha1}{alpha2}{nn}`: eight characters, e.g.
//! `G025AB07`. Identifiers are minted from a [`SequenceState`] by formatting
//! the current value and then stepping it with [`SequenceState::successor`].

use std::{fmt, str::FromStr};

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── GlobalId ────────────────────────────────────────────────────────────────

/// A validated G_ID. Ordering is lexicographic, which matches issue order:
/// a year-wrap also bumps the more significant digit position.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct GlobalId(String);

impl GlobalId {
  pub const LEN: usize = 8;

  /// Check `s` against `^G[0-9]{3}[A-Z]{2}[0-9]{2}$`.
  pub fn is_well_formed(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == Self::LEN
      && b[0] == b'G'
      && b[1..4].iter().all(u8::is_ascii_digit)
      && b[4..6].iter().all(u8::is_ascii_uppercase)
      && b[6..8].iter().all(u8::is_ascii_digit)
  }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl FromStr for GlobalId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    if Self::is_well_formed(s) {
      Ok(Self(s.to_owned()))
    } else {
      Err(Error::InvalidGlobalId(s.to_owned()))
    }
  }
}

impl TryFrom<String> for GlobalId {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> {
    if Self::is_well_formed(&s) {
      Ok(Self(s))
    } else {
      Err(Error::InvalidGlobalId(s))
    }
  }
}

impl From<GlobalId> for String {
  fn from(id: GlobalId) -> Self { id.0 }
}

impl fmt::Display for GlobalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

// ─── SequenceState ───────────────────────────────────────────────────────────

/// The persisted counter. The value it holds is the *next* id to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceState {
  pub digit:  u8,
  pub year:   u8,
  pub alpha1: char,
  pub alpha2: char,
  pub number: u8,
}

impl SequenceState {
  /// `{digit, year, 'A', 'A', 0}`: the value a reset rewinds to.
  pub fn starting_at(year: u8, digit: u8) -> Result<Self> {
    let state = Self { digit, year, alpha1: 'A', alpha2: 'A', number: 0 };
    state.validate()?;
    Ok(state)
  }

  /// The state lazily created on first use: digit 0, current year.
  pub fn initial() -> Self {
    Self {
      digit:  0,
      year:   current_two_digit_year(),
      alpha1: 'A',
      alpha2: 'A',
      number: 0,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.digit > 9 {
      return Err(Error::InvalidSequenceState(format!(
        "digit {} out of range 0-9",
        self.digit
      )));
    }
    if self.year > 99 {
      return Err(Error::InvalidSequenceState(format!(
        "year {} out of range 0-99",
        self.year
      )));
    }
    if !self.alpha1.is_ascii_uppercase() || !self.alpha2.is_ascii_uppercase() {
      return Err(Error::InvalidSequenceState(format!(
        "letters {}{} out of range A-Z",
        self.alpha1, self.alpha2
      )));
    }
    if self.number > 99 {
      return Err(Error::InvalidSequenceState(format!(
        "number {} out of range 0-99",
        self.number
      )));
    }
    Ok(())
  }

  /// Format the current value. Does not advance.
  pub fn to_id(&self) -> GlobalId {
    GlobalId(format!(
      "G{}{:02}{}{}{:02}",
      self.digit, self.year, self.alpha1, self.alpha2, self.number
    ))
  }

  /// The state one step after `self`.
  ///
  /// `current_year` is only consulted when the year position wraps from 99;
  /// the year then restarts at the current calendar year rather than 00.
  pub fn successor(&self, current_year: u8) -> Result<Self> {
    let mut next = *self;

    if next.number < 99 {
      next.number += 1;
      return Ok(next);
    }
    next.number = 0;

    if next.alpha2 < 'Z' {
      next.alpha2 = step_letter(next.alpha2);
      return Ok(next);
    }
    next.alpha2 = 'A';

    if next.alpha1 < 'Z' {
      next.alpha1 = step_letter(next.alpha1);
      return Ok(next);
    }
    next.alpha1 = 'A';

    if next.year < 99 {
      next.year += 1;
      return Ok(next);
    }

    if next.digit >= 9 {
      return Err(Error::SequenceExhausted);
    }
    next.year = current_year;
    next.digit += 1;
    Ok(next)
  }

  /// Issue `count` consecutive ids starting at `self`.
  ///
  /// Returns the ids in issue order and the state to persist afterwards.
  /// Fails without issuing anything if the run would exhaust the sequence.
  pub fn take(
    &self,
    count: usize,
    current_year: u8,
  ) -> Result<(Vec<GlobalId>, SequenceState)> {
    let mut ids = Vec::with_capacity(count);
    let mut state = *self;
    for _ in 0..count {
      ids.push(state.to_id());
      state = state.successor(current_year)?;
    }
    Ok((ids, state))
  }
}

impl fmt::Display for SequenceState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.to_id())
  }
}

fn step_letter(c: char) -> char { (c as u8 + 1) as char }

/// Last two digits of the current UTC calendar year.
pub fn current_two_digit_year() -> u8 { Utc::now().year().rem_euclid(100) as u8 }

#[cfg(test)]
mod tests {
  use std::collections::HashSet;

  use super::*;

  fn state(digit: u8, year: u8, a1: char, a2: char, number: u8) -> SequenceState {
    SequenceState { digit, year, alpha1: a1, alpha2: a2, number }
  }

  #[test]
  fn formats_fixed_width() {
    assert_eq!(state(0, 25, 'A', 'A', 0).to_id().as_str(), "G025AA00");
    assert_eq!(state(3, 7, 'Q', 'Z', 5).to_id().as_str(), "G307QZ05");
  }

  #[test]
  fn number_increments_first() {
    let next = state(0, 25, 'A', 'A', 41).successor(25).unwrap();
    assert_eq!(next.to_id().as_str(), "G025AA42");
  }

  #[test]
  fn number_wrap_steps_second_letter() {
    let next = state(0, 25, 'A', 'A', 99).successor(25).unwrap();
    assert_eq!(next.to_id().as_str(), "G025AB00");
  }

  #[test]
  fn second_letter_wrap_steps_first_letter() {
    let (ids, after) = state(0, 25, 'A', 'Z', 99).take(1, 25).unwrap();
    assert_eq!(ids[0].as_str(), "G025AZ99");
    assert_eq!(after.to_id().as_str(), "G025BA00");
  }

  #[test]
  fn letter_pair_wrap_steps_year() {
    let (ids, after) = state(0, 25, 'Z', 'Z', 99).take(1, 25).unwrap();
    assert_eq!(ids[0].as_str(), "G025ZZ99");
    assert_eq!(after.to_id().as_str(), "G026AA00");
  }

  #[test]
  fn year_wrap_restarts_at_current_year_and_steps_digit() {
    let next = state(0, 99, 'Z', 'Z', 99).successor(31).unwrap();
    assert_eq!(next, state(1, 31, 'A', 'A', 0));
  }

  #[test]
  fn digit_past_nine_is_exhaustion() {
    let err = state(9, 99, 'Z', 'Z', 99).successor(25).unwrap_err();
    assert!(matches!(err, Error::SequenceExhausted));
  }

  #[test]
  fn take_fails_whole_run_on_exhaustion() {
    let start = state(9, 99, 'Z', 'Z', 97);
    assert!(start.take(2, 25).is_ok());
    assert!(matches!(start.take(3, 25), Err(Error::SequenceExhausted)));
  }

  #[test]
  fn take_matches_repeated_successor() {
    let start = state(0, 25, 'A', 'Y', 90);
    let (batch, end) = start.take(250, 25).unwrap();

    let mut single = Vec::new();
    let mut s = start;
    for _ in 0..250 {
      single.push(s.to_id());
      s = s.successor(25).unwrap();
    }
    assert_eq!(batch, single);
    assert_eq!(end, s);
  }

  #[test]
  fn take_is_distinct_and_well_formed() {
    let (ids, _) = state(0, 25, 'A', 'A', 0).take(5_000, 25).unwrap();
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(ids.iter().all(|id| GlobalId::is_well_formed(id.as_str())));
  }

  #[test]
  fn take_zero_is_identity() {
    let start = state(0, 25, 'C', 'D', 12);
    let (ids, end) = start.take(0, 25).unwrap();
    assert!(ids.is_empty());
    assert_eq!(end, start);
  }

  #[test]
  fn parse_rejects_malformed() {
    for bad in ["", "G025AA0", "X025AA00", "G025aa00", "G0A5AA00", "G025AA000"] {
      assert!(bad.parse::<GlobalId>().is_err(), "{bad:?} accepted");
    }
    assert!("G025AA00".parse::<GlobalId>().is_ok());
  }

  #[test]
  fn starting_at_validates_ranges() {
    assert!(SequenceState::starting_at(25, 0).is_ok());
    assert!(SequenceState::starting_at(100, 0).is_err());
    assert!(SequenceState::starting_at(25, 10).is_err());
  }
}
