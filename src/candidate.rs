//! Candidate tactics and the deduplication protocol shared by every backend.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Score reported by backends that expose no confidence signal.
pub const NO_CONFIDENCE: f64 = 1.0;

/// One proposed tactic with the backend's confidence in it.
///
/// Scores are only comparable within one backend: see the per-backend notes
/// in `backend` for what the number means.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub text: String,
    pub score: f64,
}

impl Candidate {
    pub fn new(text: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// Merge candidates by exact text, keeping the highest score for each.
///
/// The result is sorted by score, highest first. The sort is stable, so
/// candidates with equal scores keep the order in which their text was first
/// seen. NaN scores lose against any number and sort last.
pub fn dedup<I>(candidates: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut unique: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        match index.get(&candidate.text) {
            Some(&i) => {
                let kept = &mut unique[i];
                if score_order(candidate.score, kept.score) == Ordering::Less {
                    kept.score = candidate.score;
                }
            }
            None => {
                index.insert(candidate.text.clone(), unique.len());
                unique.push(candidate);
            }
        }
    }

    unique.sort_by(|a, b| score_order(a.score, b.score));
    unique
}

/// Descending order on scores with NaN after every number.
fn score_order(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Length-normalized likelihood of a token sequence: `exp(mean(logprobs))`.
///
/// This is the geometric mean of the per-token probabilities. Returns `None`
/// when no log-probabilities were reported.
pub fn mean_token_likelihood(logprobs: &[f64]) -> Option<f64> {
    if logprobs.is_empty() {
        return None;
    }
    let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
    Some(mean.exp())
}
