//! Line extraction: turn a page's text items (or OCR lines) into tagged rows.
//!
//! Gradesheets list students in two sections, boys then girls, separated by
//! a short divider row (`MALE`, `GIRLS`, …). [`LineExtractor`] carries the
//! current section across pages and tags every data row with it; divider
//! rows themselves are consumed, never emitted.

use crate::config::ExtractionConfig;
use crate::output::Gender;
use crate::pipeline::load::TextItem;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator placed between the cells of a reconstructed row.
pub const CELL_SEPARATOR: &str = " | ";

/// A surviving data row with its gender section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedLine {
    pub text: String,
    pub gender: Gender,
    /// 1-based page the row came from.
    pub page: usize,
}

impl TaggedLine {
    /// Form sent to the backend: `[FEMALE] 3. REYES, ANA | 91 | 89`.
    pub fn to_prompt_line(&self) -> String {
        format!("[{}] {}", self.gender, self.text)
    }
}

/// What a row turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    /// Switches the gender section; not emitted.
    Divider(Gender),
    /// Boilerplate such as signature or adviser lines.
    Excluded,
    TooShort,
    Data,
}

/// Group items into rows by rounded y, top of the page first, each row's
/// cells ordered left to right and joined with [`CELL_SEPARATOR`].
pub fn reconstruct_rows(items: &[TextItem], bucket: f32) -> Vec<String> {
    let mut rows: BTreeMap<i64, Vec<&TextItem>> = BTreeMap::new();
    for item in items {
        if item.text.trim().is_empty() {
            continue;
        }
        let key = (item.y / bucket).round() as i64;
        rows.entry(key).or_default().push(item);
    }

    rows.into_values()
        .rev()
        .map(|mut cells| {
            cells.sort_by(|a, b| a.x.total_cmp(&b.x));
            cells
                .iter()
                .map(|c| c.text.trim())
                .collect::<Vec<_>>()
                .join(CELL_SEPARATOR)
        })
        .collect()
}

static RE_FEMALE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(GIRLS?|FEMALES?)\b").unwrap());
static RE_MALE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(BOYS?|MALES?)\b").unwrap());

/// Divider test. A row naming both sexes (a `MALE / FEMALE` legend, a totals
/// line) is not a divider, and neither is anything longer than
/// `max_len` characters. A row holding digits or more than one non-empty cell
/// is a student row with a sex column, never a divider.
pub fn divider_gender(row: &str, max_len: usize) -> Option<Gender> {
    if row.chars().count() > max_len || row.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let cells = row
        .split(CELL_SEPARATOR)
        .filter(|cell| !cell.trim().is_empty())
        .count();
    if cells > 1 {
        return None;
    }
    match (RE_FEMALE.is_match(row), RE_MALE.is_match(row)) {
        (true, false) => Some(Gender::Female),
        (false, true) => Some(Gender::Male),
        _ => None,
    }
}

/// Classify one row against the divider pattern, exclusion list and length floor.
pub fn classify_row(row: &str, config: &ExtractionConfig) -> RowKind {
    if let Some(gender) = divider_gender(row, config.max_divider_len) {
        return RowKind::Divider(gender);
    }
    let upper = row.to_uppercase();
    if config
        .excluded_row_terms
        .iter()
        .any(|term| upper.contains(&term.to_uppercase()))
    {
        return RowKind::Excluded;
    }
    if row.chars().count() < config.min_row_len {
        return RowKind::TooShort;
    }
    RowKind::Data
}

/// Accumulates tagged rows across all pages of one document.
#[derive(Debug, Default)]
pub struct LineExtractor {
    gender: Gender,
    lines: Vec<TaggedLine>,
}

impl LineExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current gender section.
    pub fn gender(&self) -> Gender {
        self.gender
    }

    /// Feed one page's rows in top-to-bottom order. Returns how many rows
    /// were kept.
    pub fn push_rows<I, S>(&mut self, page: usize, rows: I, config: &ExtractionConfig) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.lines.len();
        for row in rows {
            let row = row.as_ref().trim();
            match classify_row(row, config) {
                RowKind::Divider(gender) => self.gender = gender,
                RowKind::Excluded | RowKind::TooShort => {}
                RowKind::Data => self.lines.push(TaggedLine {
                    text: row.to_string(),
                    gender: self.gender,
                    page,
                }),
            }
        }
        self.lines.len() - before
    }

    pub fn lines(&self) -> &[TaggedLine] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<TaggedLine> {
        self.lines
    }
}
