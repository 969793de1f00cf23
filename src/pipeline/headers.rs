//! Header location: infer subject-column labels from the page-1 layout.
//!
//! Grade cells are the strongest signal on a gradesheet: short numbers in
//! the 60–100 band stacked in vertical columns. Once those columns are
//! known, the subject label is the first meaningful text directly above the
//! topmost grade row.
//!
//! All functions here are pure over `(x, y, text)` triples. Detection fails
//! closed (`None`) whenever the signal is weak; the caller then falls back
//! to the configured default headers without surfacing an error.

use crate::config::HeaderConfig;
use crate::pipeline::load::TextItem;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// A vertical grade column found on page 1.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCandidate {
    /// Bucketed x coordinate of the column.
    pub x: f32,
    /// Grade values seen in this bucket.
    pub count: usize,
    /// Label found above the column, if any.
    pub label: Option<String>,
}

/// Infer ordered, unique subject labels from page-1 text items.
///
/// Returns `None` when page 1 is too sparse, has too few grade values, or
/// yields fewer than `config.min_headers` unique labels.
pub fn locate_headers(items: &[TextItem], config: &HeaderConfig) -> Option<Vec<String>> {
    if items.len() < config.min_page_items {
        debug!("Header detection: only {} items on page 1", items.len());
        return None;
    }

    let grades: Vec<&TextItem> = items
        .iter()
        .filter(|item| grade_value(&item.text, config).is_some())
        .collect();
    if grades.len() < config.min_candidates {
        debug!("Header detection: only {} grade values", grades.len());
        return None;
    }

    let max_grade_y = grades
        .iter()
        .map(|item| item.y)
        .fold(f32::NEG_INFINITY, f32::max);

    let mut columns = grade_columns(&grades, config);
    for column in &mut columns {
        column.label = label_above(items, column.x, max_grade_y, config);
    }

    let mut headers: Vec<String> = Vec::with_capacity(columns.len());
    for label in columns.into_iter().filter_map(|c| c.label) {
        if !headers.contains(&label) {
            headers.push(label);
        }
    }

    if headers.len() < config.min_headers {
        debug!("Header detection: {} unique labels, need {}", headers.len(), config.min_headers);
        return None;
    }
    debug!("Header detection: {:?}", headers);
    Some(headers)
}

/// Parse `text` as a plausible grade value.
pub fn grade_value(text: &str, config: &HeaderConfig) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > config.max_grade_len {
        return None;
    }
    let value: f64 = text.parse().ok()?;
    (config.grade_min..=config.grade_max)
        .contains(&value)
        .then_some(value)
}

/// Bucket grade items by x and keep buckets dense enough to be columns,
/// sorted left to right.
pub fn grade_columns(grades: &[&TextItem], config: &HeaderConfig) -> Vec<HeaderCandidate> {
    let mut buckets: BTreeMap<i64, usize> = BTreeMap::new();
    for item in grades {
        let key = (item.x / config.column_bucket).round() as i64;
        *buckets.entry(key).or_default() += 1;
    }

    buckets
        .into_iter()
        .filter(|&(_, count)| count > config.min_column_hits)
        .map(|(key, count)| HeaderCandidate {
            x: key as f32 * config.column_bucket,
            count,
            label: None,
        })
        .collect()
}

/// First acceptable label within the search window above a column.
fn label_above(
    items: &[TextItem],
    column_x: f32,
    max_grade_y: f32,
    config: &HeaderConfig,
) -> Option<String> {
    let mut above: Vec<&TextItem> = items
        .iter()
        .filter(|item| {
            item.y > max_grade_y
                && item.y <= max_grade_y + config.search_height
                && (item.x - column_x).abs() <= config.x_tolerance
        })
        .collect();
    above.sort_by(|a, b| a.y.total_cmp(&b.y));

    let chosen = above.into_iter().find(|item| {
        let text = item.text.trim();
        text.chars().count() > 2 && !is_excluded(text, &config.excluded_terms)
    })?;

    let label: String = chosen.text.chars().filter(|c| c.is_alphabetic()).collect();
    (label.chars().count() > 1).then_some(label)
}

fn is_excluded(text: &str, terms: &[String]) -> bool {
    let upper = text.to_uppercase();
    upper
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .any(|word| terms.iter().any(|t| t.eq_ignore_ascii_case(word)))
}

static RE_GRADE_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bGRADE\s*(?:LEVEL)?\s*[:\-]?\s*(\d{1,2})\b").unwrap()
});

/// Best-effort grade level (`"GRADE 7"`) from page-1 text.
pub fn detect_grade_level(items: &[TextItem]) -> Option<String> {
    let joined = items
        .iter()
        .map(|item| item.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    RE_GRADE_LEVEL
        .captures(&joined)
        .map(|caps| format!("GRADE {}", &caps[1]))
}
