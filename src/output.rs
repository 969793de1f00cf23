//! Result types returned by the extraction pipeline.
//!
//! Everything here is plain data with serde derives so callers can persist a
//! run verbatim (`--json` in the CLI) or hand it to the roster-matching step.
//! Field names serialise in camelCase to match the shape the surrounding
//! application stores: `{ meta: { headers, gradeLevel }, records }`.

use crate::error::{ChunkError, PageError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gender section a row belongs to. Gradesheets list boys first, so rows seen
/// before any divider are `Male`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

impl Gender {
    /// Lenient parse of whatever the backend wrote in the `gender` field.
    ///
    /// Anything that reads as female (`F`, `Female`, `GIRL`, `girls`) maps to
    /// [`Gender::Female`]; everything else, including an empty string, is
    /// [`Gender::Male`].
    pub fn from_loose(s: &str) -> Self {
        let s = s.trim().to_ascii_uppercase();
        if s == "F" || s.starts_with("FEMALE") || s.starts_with("GIRL") {
            Gender::Female
        } else {
            Gender::Male
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student row as structured by the extraction backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedStudentRecord {
    /// Student name as printed, leading row numbering removed.
    pub name: String,

    #[serde(default)]
    pub gender: Gender,

    /// Subject label → raw score string, in header order.
    #[serde(default)]
    pub grades: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average: Option<f64>,
}

/// Where the subject headers in [`OutputMeta`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderSource {
    /// Inferred from the page-1 layout.
    Detected,
    /// Layout signal too weak; the configured default list was used.
    Default,
}

/// Document-level metadata of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMeta {
    /// Ordered subject labels; grade keys of every record are drawn from this.
    pub headers: Vec<String>,
    /// e.g. `"GRADE 7"`; empty when neither configured nor detected.
    pub grade_level: String,
    pub header_source: HeaderSource,
    pub page_count: usize,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStats {
    pub total_pages: usize,
    /// Pages routed through the OCR branch.
    pub ocr_pages: usize,
    /// Tagged rows that survived filtering, across all pages.
    pub total_lines: usize,
    pub total_chunks: usize,
    pub sent_chunks: usize,
    /// Chunks below the minimum length, never sent.
    pub skipped_chunks: usize,
    pub failed_chunks: usize,
    /// Records parsed from all chunks before deduplication.
    pub raw_records: usize,
    pub merged_records: usize,
    pub scan_duration_ms: u64,
    pub backend_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Complete output of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradesheetOutput {
    pub meta: OutputMeta,
    pub records: Vec<ExtractedStudentRecord>,
    pub stats: ExtractionStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunk_errors: Vec<ChunkError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub page_errors: Vec<PageError>,
}

/// Outcome of sending one chunk to the extraction backend.
///
/// Always produced, whether or not the backend succeeded: `records` is empty
/// and `error` is set when every attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    pub index: usize,
    pub records: Vec<ExtractedStudentRecord>,
    /// Attempts made, 1-based.
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ChunkError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_loose_parse() {
        assert_eq!(Gender::from_loose("F"), Gender::Female);
        assert_eq!(Gender::from_loose("female"), Gender::Female);
        assert_eq!(Gender::from_loose(" Girls "), Gender::Female);
        assert_eq!(Gender::from_loose("MALE"), Gender::Male);
        assert_eq!(Gender::from_loose("m"), Gender::Male);
        assert_eq!(Gender::from_loose(""), Gender::Male);
    }

    #[test]
    fn record_defaults_when_fields_missing() {
        let r: ExtractedStudentRecord = serde_json::from_str(r#"{"name":"REYES, ANA"}"#).unwrap();
        assert_eq!(r.gender, Gender::Male);
        assert!(r.grades.is_empty());
        assert_eq!(r.average, None);
    }

    #[test]
    fn output_meta_uses_camel_case() {
        let meta = OutputMeta {
            headers: vec!["MATH".into()],
            grade_level: "GRADE 8".into(),
            header_source: HeaderSource::Detected,
            page_count: 2,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["gradeLevel"], "GRADE 8");
        assert_eq!(json["headerSource"], "detected");
    }

    #[test]
    fn gender_serialises_uppercase() {
        let json = serde_json::to_string(&Gender::Female).unwrap();
        assert_eq!(json, "\"FEMALE\"");
    }
}
