//! Record merging: deduplicate students across all chunk results.
//!
//! The same student can be extracted twice when a row is repeated on a
//! continuation page or straddles a chunk boundary. Records are keyed by
//! [`dedup_key`] and combined according to the configured [`MergePolicy`];
//! output keeps the order in which keys were first seen.

use crate::config::MergePolicy;
use crate::output::ExtractedStudentRecord;
use crate::pipeline::postprocess::mean_grade;
use indexmap::map::Entry;
use indexmap::IndexMap;
use tracing::debug;

/// Names this short (after trimming) are noise, not students.
const MIN_NAME_CHARS: usize = 4;

/// Name uppercased with every non-letter removed:
/// `"Dela Cruz, Juan Jr."` → `"DELACRUZJUANJR"`.
pub fn dedup_key(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Merge records from every chunk, in processing order.
pub fn merge_records<I>(batches: I, policy: MergePolicy) -> Vec<ExtractedStudentRecord>
where
    I: IntoIterator<Item = Vec<ExtractedStudentRecord>>,
{
    let mut merged: IndexMap<String, ExtractedStudentRecord> = IndexMap::new();
    let mut dropped = 0usize;

    for record in batches.into_iter().flatten() {
        if record.name.trim().chars().count() < MIN_NAME_CHARS {
            dropped += 1;
            continue;
        }
        let key = dedup_key(&record.name);
        if key.is_empty() {
            dropped += 1;
            continue;
        }

        match merged.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => {
                debug!("Duplicate student '{}'", record.name);
                if policy == MergePolicy::UnionGrades {
                    union_into(slot.get_mut(), record);
                }
            }
        }
    }

    if dropped > 0 {
        debug!("Dropped {} records without a usable name", dropped);
    }
    merged.into_values().collect()
}

/// Fill grades only the later duplicate carries. Existing values win.
fn union_into(first: &mut ExtractedStudentRecord, later: ExtractedStudentRecord) {
    let before = first.grades.len();
    for (subject, score) in later.grades {
        first.grades.entry(subject).or_insert(score);
    }
    let gained = first.grades.len() > before;

    if first.average.is_none() {
        first.average = later.average;
    }
    // A filled-in mean computed from a partial row is stale once grades are added.
    if gained && later.average.is_none() {
        if let Some(mean) = mean_grade(&first.grades) {
            first.average = Some(mean);
        }
    }
}
