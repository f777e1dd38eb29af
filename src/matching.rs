use serde_json::Value;
use tracing::trace;

use crate::errors::{AppError, AppResult};
use crate::place_info::{canonical_type, RawCandidate};
use crate::sanitize::sanitize_place;

/// Similarity in `[0, 1]` computed as `2 * M / T`, where `M` is the number of
/// characters in the matching blocks found by recursively taking the longest
/// common substring (Ratcliff/Obershelp) and `T` the combined length.
pub fn similarity_ratio(first: &str, other: &str) -> f64 {
    let a: Vec<char> = first.chars().collect();
    let b: Vec<char> = other.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = matching_characters(&a, &b);
    2.0 * matches as f64 / total as f64
}

fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut pending = vec![(0, a.len(), 0, b.len())];
    let mut matched = 0;
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    matched
}

// Longest common block inside a[alo..ahi] x b[blo..bhi]; ties resolve to the
// earliest start in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut best = (alo, blo, 0);
    let width = bhi - blo + 1;
    let mut previous = vec![0_usize; width];
    let mut current = vec![0_usize; width];
    for i in alo..ahi {
        for j in blo..bhi {
            let slot = j - blo + 1;
            current[slot] = if a[i] == b[j] { previous[slot - 1] + 1 } else { 0 };
            let size = current[slot];
            if size > best.2 {
                best = (i + 1 - size, j + 1 - size, size);
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }
    best
}

/// Self-describing name of a raw candidate: the component keyed by its type
/// tag, or by the tag's canonical alias when the tag itself is not a key.
pub fn candidate_name(candidate: &RawCandidate) -> Option<&str> {
    let tag = candidate.components.get("_type").and_then(Value::as_str)?;
    let key = if candidate.components.contains_key(tag) {
        tag
    } else {
        canonical_type(tag)
    };
    candidate.components.get(key).and_then(Value::as_str)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub ratio: f64,
    pub examined: usize,
}

pub fn rank_candidates(query: &str, candidates: &[RawCandidate]) -> Option<Selection> {
    let wanted = sanitize_place(query);
    let mut selection: Option<Selection> = None;
    let mut max_ratio = 0.0;
    let mut examined = 0;

    for (index, candidate) in candidates.iter().enumerate() {
        examined += 1;
        let Some(name) = candidate_name(candidate) else {
            trace!(index, "candidate has no self-describing name");
            continue;
        };
        let ratio = similarity_ratio(&wanted, &sanitize_place(name));
        if ratio > max_ratio {
            max_ratio = ratio;
            selection = Some(Selection {
                index,
                ratio,
                examined,
            });
        }
        if max_ratio >= 1.0 {
            break;
        }
    }

    selection.map(|found| Selection {
        examined,
        ..found
    })
}

pub fn select_best<'a>(
    query: &str,
    candidates: &'a [RawCandidate],
) -> AppResult<&'a RawCandidate> {
    let selection = rank_candidates(query, candidates)
        .ok_or_else(|| AppError::PlaceNotMatched(query.to_string()))?;
    trace!(
        query,
        index = selection.index,
        ratio = selection.ratio,
        "selected geocoder candidate"
    );
    Ok(&candidates[selection.index])
}
