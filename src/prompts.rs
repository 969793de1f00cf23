//! Prompts for the extraction backend.
//!
//! Kept in one place so prompt changes never touch retry or parsing code,
//! and so tests can inspect the exact text the backend receives. Callers can
//! replace the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the per-chunk user
//! prompt is always built by [`extraction_prompt`].

/// Default system prompt: the output contract for every chunk.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You convert rows copied from a school gradesheet into structured JSON.

Each input line is one student row. It starts with a gender tag in square brackets ([MALE] or [FEMALE]), followed by the row text. Cells may be separated by " | ".

For every student row:
1. name: the student's full name exactly as written, WITHOUT any leading row number ("1.", "12)", "3").
2. gender: copy the bracketed tag, "MALE" or "FEMALE".
3. grades: take the numeric tokens after the name in order and assign them to the subject headers positionally (first number → first header, second → second, …). Use the header names exactly as given as keys and keep every value as a string. Skip headers with no value. Ignore row numbers and learner reference numbers (LRN).
4. average: the general average if the row has a number after the last subject, otherwise null.

Ignore lines that are not student rows (titles, totals, legends).

Output ONLY a JSON array of objects with the keys "name", "gender", "grades", "average".
Do NOT wrap the array in code fences. Do NOT add commentary. If there are no students, output []."#;

/// Build the user prompt for one chunk.
pub fn extraction_prompt(headers: &[String], chunk_text: &str) -> String {
    format!(
        "Subject headers, in column order: {}\n\nRows:\n{}",
        serde_json::to_string(headers).unwrap_or_else(|_| headers.join(", ")),
        chunk_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_headers_in_order() {
        let headers = vec!["MATH".to_string(), "SCIENCE".to_string()];
        let prompt = extraction_prompt(&headers, "[MALE] 1. CRUZ, JUAN | 90 | 85");
        assert!(prompt.contains(r#"["MATH","SCIENCE"]"#));
        assert!(prompt.ends_with("[MALE] 1. CRUZ, JUAN | 90 | 85"));
    }

    #[test]
    fn system_prompt_demands_bare_array() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("ONLY a JSON array"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"average\""));
    }
}
