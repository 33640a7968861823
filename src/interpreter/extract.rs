//! JSON candidate extraction from free-form model output
//!
//! The model is told to answer with one JSON object but often wraps it in
//! prose or markdown fences. This module only finds candidate substrings;
//! deciding whether a candidate parses is the interpreter's job.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionPolicy {
    /// First `{` to the last `}` in the whole text.
    #[default]
    Greedy,
    /// Brace-balanced objects, ignoring braces inside string literals.
    Balanced,
}

/// Candidate object substrings, in the order they should be tried.
pub fn candidates(text: &str, policy: ExtractionPolicy) -> Vec<&str> {
    match policy {
        ExtractionPolicy::Greedy => greedy(text).into_iter().collect(),
        ExtractionPolicy::Balanced => balanced(text),
    }
}

fn greedy(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// One pass with a stack of open braces. Quotes only count inside an open
/// object, so stray quotes in surrounding prose do not flip string state.
fn balanced(text: &str) -> Vec<&str> {
    let mut open = Vec::new();
    let mut closed = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    closed.push((start, i));
                }
            }
            _ => {}
        }
    }

    // Closed spans are nested or disjoint; keep the outermost ones.
    closed.sort_unstable_by_key(|&(start, _)| start);
    let mut found = Vec::new();
    let mut outer_end = None;
    for (start, end) in closed {
        if outer_end.map_or(false, |outer| end < outer) {
            continue;
        }
        outer_end = Some(end);
        found.push(&text[start..=end]);
    }

    found
}
