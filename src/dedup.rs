//! Near-duplicate suppression for candidate alerts.
//!
//! Best-effort noise reduction, not correctness-critical: a candidate is
//! dropped when an existing *active* alert of the same type carries a
//! sufficiently similar message. Resolved, dismissed and accepted alerts
//! never suppress new candidates, so a previously acted-upon concern can
//! be re-flagged.

use std::collections::HashSet;

use crate::models::{Alert, AlertStatus, CandidateAlert};

/// Symmetric string-similarity strategy in [0, 1].
/// Swappable so the threshold policy can be unit-tested in isolation.
pub trait MessageSimilarity: Send + Sync {
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Token-set (Jaccard) similarity over lowercased words.
pub struct TokenSetSimilarity;

impl TokenSetSimilarity {
    fn tokens(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

impl MessageSimilarity for TokenSetSimilarity {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        let set_a = Self::tokens(a);
        let set_b = Self::tokens(b);

        if set_a.is_empty() && set_b.is_empty() {
            return 1.0;
        }
        if set_a.is_empty() || set_b.is_empty() {
            return 0.0;
        }

        let intersection = set_a.intersection(&set_b).count() as f64;
        let union = set_a.union(&set_b).count() as f64;
        intersection / union
    }
}

pub struct Deduplicator {
    similarity: Box<dyn MessageSimilarity>,
    threshold: f64,
}

impl Deduplicator {
    pub fn new(similarity: Box<dyn MessageSimilarity>, threshold: f64) -> Self {
        Self {
            similarity,
            threshold,
        }
    }

    /// Default policy: token-set Jaccard at the given threshold.
    pub fn token_set(threshold: f64) -> Self {
        Self::new(Box::new(TokenSetSimilarity), threshold)
    }

    /// True when an active alert of the same type is too similar.
    pub fn is_duplicate(&self, candidate: &CandidateAlert, existing: &[Alert]) -> bool {
        existing
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .filter(|a| a.alert_type == candidate.alert_type)
            .any(|a| self.similarity.similarity(&candidate.message, &a.message) >= self.threshold)
    }

    /// Drop candidates duplicating existing active alerts, and near-copies
    /// within the batch itself (first occurrence wins).
    pub fn filter_candidates(
        &self,
        candidates: Vec<CandidateAlert>,
        existing: &[Alert],
    ) -> Vec<CandidateAlert> {
        let mut kept: Vec<CandidateAlert> = Vec::new();

        for candidate in candidates {
            if self.is_duplicate(&candidate, existing) {
                tracing::debug!(
                    alert_type = candidate.alert_type.as_str(),
                    title = %candidate.title,
                    "Candidate suppressed: duplicates an active alert"
                );
                continue;
            }
            let intra_dup = kept.iter().any(|k| {
                k.alert_type == candidate.alert_type
                    && self.similarity.similarity(&candidate.message, &k.message)
                        >= self.threshold
            });
            if intra_dup {
                tracing::debug!(
                    alert_type = candidate.alert_type.as_str(),
                    "Candidate suppressed: duplicates another candidate in this batch"
                );
                continue;
            }
            kept.push(candidate);
        }

        kept
    }
}
