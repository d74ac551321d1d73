// SPDX-License-Identifier: MIT
//! Project identifier derivation.
//!
//! A [`ProjectId`] is derived exactly once per run, before the first
//! control-plane call, and never regenerated afterwards — every subsequent
//! step and the final report refer to the same id. Derivation: lowercase the
//! display name, collapse whitespace runs to `-`, then either truncate to
//! the 30-char cap (long names) or append a `-<unix_millis>` uniqueness
//! suffix and truncate the result (short names).

use std::fmt;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control-plane cap on project identifiers.
pub const MAX_PROJECT_ID_LEN: usize = 30;
/// Cap on requested display names (same bound, enforced before derivation).
pub const MAX_DISPLAY_NAME_LEN: usize = 30;

/// Letters, digits, space, hyphen, apostrophe — the charset the resource
/// API accepts for display names.
static VALID_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9 '\-]+$").expect("regex: display name"));

static WHITESPACE_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("regex: whitespace run"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("display name must not be empty")]
    Empty,
    #[error("display name exceeds {MAX_DISPLAY_NAME_LEN} characters")]
    TooLong,
    #[error("display name may only contain letters, digits, spaces, hyphens and apostrophes")]
    InvalidChars,
}

/// Validate a requested display name against the control-plane constraints.
pub fn validate_display_name(name: &str) -> Result<(), NameError> {
    if name.trim().is_empty() {
        return Err(NameError::Empty);
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if !VALID_NAME_RE.is_match(name) {
        return Err(NameError::InvalidChars);
    }
    Ok(())
}

/// Slug identifier for a cloud project; non-empty and at most 30 chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Derive from a display name and a fixed millisecond timestamp.
    ///
    /// Deterministic for a fixed `(name, unix_millis)` pair, which is what
    /// makes the id reusable across every step of a run.
    pub fn derive(display_name: &str, unix_millis: i64) -> Result<Self, NameError> {
        validate_display_name(display_name)?;

        let lowered = display_name.trim().to_lowercase();
        let base = WHITESPACE_RUN_RE.replace_all(&lowered, "-").into_owned();

        let id = if base.len() >= MAX_PROJECT_ID_LEN {
            // Long names truncate cleanly; no suffix would fit anyway.
            truncate(&base, MAX_PROJECT_ID_LEN)
        } else {
            truncate(&format!("{base}-{unix_millis}"), MAX_PROJECT_ID_LEN)
        };

        Ok(ProjectId(id))
    }

    /// Derive with the current wall clock.
    pub fn now(display_name: &str) -> Result<Self, NameError> {
        Self::derive(display_name, Utc::now().timestamp_millis())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// The validated charset is ASCII, so byte truncation cannot split a char;
// take() keeps this safe even if the charset ever widens.
fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
