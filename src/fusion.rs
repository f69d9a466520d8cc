//! Reciprocal Rank Fusion of the semantic and keyword candidate lists.
//!
//! A candidate at 0-based rank `r` of a list contributes
//! `weight / (K_RRF + r + 1)`, with weight `rrf_beta` for the semantic list
//! and `1 - rrf_beta` for the keyword list. Contributions are summed per
//! record id.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// Smoothing constant of the fusion formula.
pub const K_RRF: f64 = 60.0;

/// Default semantic weight.
pub const DEFAULT_RRF_BETA: f64 = 0.7;

/// A record id with its accumulated fusion score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: String,
    pub rrf_score: f64,
}

/// Contribution of a candidate at 0-based `rank` in a list with `weight`.
pub fn rrf_contribution(weight: f64, rank: usize) -> f64 {
    weight / (K_RRF + rank as f64 + 1.0)
}

/// Reject a semantic weight outside `[0, 1]`, including NaN.
pub fn validate_beta(rrf_beta: f64) -> Result<()> {
    if (0.0..=1.0).contains(&rrf_beta) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "rrf_beta must be within [0, 1], got {rrf_beta}"
        )))
    }
}

/// Fuse two ranked id lists into at most `k` candidates.
///
/// When `allowed` is set, ids outside it are skipped; the survivors keep
/// the rank they had in the unfiltered list. The result is ordered by
/// score descending, then id ascending.
pub fn fuse(
    semantic: &[&str],
    keyword: &[&str],
    rrf_beta: f64,
    allowed: Option<&HashSet<String>>,
    k: usize,
) -> Result<Vec<FusedCandidate>> {
    validate_beta(rrf_beta)?;

    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (list, weight) in [(semantic, rrf_beta), (keyword, 1.0 - rrf_beta)] {
        for (rank, id) in list.iter().enumerate() {
            if allowed.is_some_and(|set| !set.contains(*id)) {
                continue;
            }
            *scores.entry(*id).or_default() += rrf_contribution(weight, rank);
        }
    }

    let mut fused: Vec<FusedCandidate> = scores
        .into_iter()
        .map(|(id, rrf_score)| FusedCandidate {
            id: id.to_string(),
            rrf_score,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.rrf_score
            .total_cmp(&a.rrf_score)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(k);
    Ok(fused)
}
