//! Post-processing: turn raw backend text into normalised student records.
//!
//! Models are asked for a bare JSON array but regularly wrap it in
//! ```` ```json ```` fences, prefix it with a sentence of prose, or add a
//! trailing remark. The rules below tolerate all of that:
//!
//! 1. Normalise line endings and strip invisible Unicode
//! 2. Remove code-fence markers
//! 3. Keep only the span from the first `[` to the last `]`
//! 4. Parse that span as an array of loosely typed records
//! 5. Normalise each record against the known headers
//!
//! Any failure in steps 3–4 is a [`BackendError::Parse`], which the worker
//! retries exactly like a transport failure.

use crate::error::BackendError;
use crate::output::{ExtractedStudentRecord, Gender};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Record as the backend wrote it, before normalisation.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(default)]
    grades: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    average: Option<Value>,
}

/// Parse a backend response into records keyed by `headers`.
pub fn parse_records(
    response: &str,
    headers: &[String],
    fill_missing_average: bool,
) -> Result<Vec<ExtractedStudentRecord>, BackendError> {
    let cleaned = sanitize_response(response);
    let span = json_array_span(&cleaned)
        .ok_or_else(|| BackendError::Parse("no JSON array in response".into()))?;
    let raw: Vec<RawRecord> =
        serde_json::from_str(span).map_err(|e| BackendError::Parse(e.to_string()))?;

    Ok(raw
        .into_iter()
        .map(|r| normalise_record(r, headers, fill_missing_average))
        .collect())
}

// ── Rules 1–2: sanitise ──────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").unwrap());

/// Strip fences, carriage returns and invisible characters.
pub fn sanitize_response(input: &str) -> String {
    let s = input.replace("\r\n", "\n").replace('\r', "\n");
    let s = remove_invisible_chars(&s);
    RE_FENCE.replace_all(&s, "").trim().to_string()
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| {
            !matches!(
                c,
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
            )
        })
        .collect()
}

// ── Rule 3: locate the array ─────────────────────────────────────────────────

/// Substring from the first `[` to the last `]`, inclusive.
pub fn json_array_span(input: &str) -> Option<&str> {
    let start = input.find('[')?;
    let end = input.rfind(']')?;
    (end > start).then(|| &input[start..=end])
}

// ── Rule 5: normalise ────────────────────────────────────────────────────────

static RE_LEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\[(?:MALE|FEMALE)\]\s*").unwrap());
static RE_LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[.):\-]?\s+").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Trim, drop an echoed gender tag and leading row numbering, collapse spaces.
pub fn clean_name(name: &str) -> String {
    let s = RE_LEADING_TAG.replace(name, "");
    let s = RE_LEADING_NUMBER.replace(&s, "");
    RE_SPACES.replace_all(s.trim(), " ").to_string()
}

fn normalise_record(
    raw: RawRecord,
    headers: &[String],
    fill_missing_average: bool,
) -> ExtractedStudentRecord {
    let grades = raw
        .grades
        .map(|g| align_grades(&g, headers))
        .unwrap_or_default();

    let average = raw.average.as_ref().and_then(value_as_f64).or_else(|| {
        if fill_missing_average {
            mean_grade(&grades)
        } else {
            None
        }
    });

    ExtractedStudentRecord {
        name: raw.name.as_deref().map(clean_name).unwrap_or_default(),
        gender: raw
            .gender
            .as_deref()
            .map(Gender::from_loose)
            .unwrap_or_default(),
        grades,
        average,
    }
}

/// Re-key grades onto `headers` in header order. Keys match case-insensitively
/// ignoring spaces and punctuation, so `"Araling Panlipunan"` finds
/// `ARALINGPANLIPUNAN`.
/// Keys matching no header and empty values are dropped.
fn align_grades(
    grades: &serde_json::Map<String, Value>,
    headers: &[String],
) -> IndexMap<String, String> {
    let mut aligned = IndexMap::new();
    for header in headers {
        let wanted = letters_upper(header);
        let value = grades
            .iter()
            .find(|(key, _)| letters_upper(key) == wanted)
            .and_then(|(_, v)| value_as_score(v));
        if let Some(score) = value {
            aligned.insert(header.clone(), score);
        }
    }
    aligned
}

fn letters_upper(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

fn value_as_score(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Mean of the numeric grades, two decimals. `None` when nothing is numeric.
pub fn mean_grade(grades: &IndexMap<String, String>) -> Option<f64> {
    let values: Vec<f64> = grades.values().filter_map(|g| g.parse().ok()).collect();
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean * 100.0).round() / 100.0)
}
