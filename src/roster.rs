//! Matching extracted names against a class roster.
//!
//! Extracted names come back in whatever shape the gradesheet printed them
//! (`"DELA CRUZ, JUAN MIGUEL"`, `"Dela Cruz Juan M."`), so matching is loose:
//! both sides are uppercased and stripped to letters, then the roster's last
//! name and the first word of its first name must each appear somewhere in
//! the extracted name.

use crate::pipeline::merge::dedup_key;
use serde::{Deserialize, Serialize};

/// One student on a class roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub last_name: String,
    pub first_name: String,
}

impl RosterEntry {
    pub fn new(last_name: impl Into<String>, first_name: impl Into<String>) -> Self {
        Self {
            last_name: last_name.into(),
            first_name: first_name.into(),
        }
    }
}

/// Whether `extracted_name` refers to `entry`.
pub fn matches(extracted_name: &str, entry: &RosterEntry) -> bool {
    let haystack = dedup_key(extracted_name);
    let last = dedup_key(&entry.last_name);
    let first = entry
        .first_name
        .split_whitespace()
        .next()
        .map(dedup_key)
        .unwrap_or_default();

    if last.is_empty() || first.is_empty() {
        return false;
    }
    haystack.contains(&last) && haystack.contains(&first)
}

/// First roster entry that matches `extracted_name`.
pub fn find_match<'a>(extracted_name: &str, roster: &'a [RosterEntry]) -> Option<&'a RosterEntry> {
    roster.iter().find(|entry| matches(extracted_name, entry))
}
