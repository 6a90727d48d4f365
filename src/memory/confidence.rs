//! Confidence scoring (§4.2): seven weighted factors folded into a
//! `[0, 1]` score and bucketed into a level.
//!
//! Recomputed lazily on read; any write to the memory invalidates the
//! cached [`ConfidenceSnapshot`](crate::types::ConfidenceSnapshot) by
//! simply not being consulted again until the next `score()` call.
use crate::config::ConfidenceWeights;
use crate::types::{Category, ConfidenceLevel, ConfidenceSnapshot};

/// Inputs to the confidence score for a single memory at the moment of
/// scoring. Each factor is already normalized to `[0, 1]`; how a
/// factor is derived (duplicate clustering, verification events,
/// applied-task outcomes) lives in the Memory Store, not here.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceFactors {
    pub freshness: f64,
    pub source: f64,
    pub verification: f64,
    pub consensus: f64,
    pub no_contradiction: f64,
    pub success_rate: f64,
    pub context_relevance: f64,
}

impl ConfidenceFactors {
    /// Freshness factor from age and a category-specific half-life:
    /// `0.5 ^ (age_days / half_life_days)`.
    pub fn freshness_from_age(age_days: f64, category: Category) -> f64 {
        let half_life = category.freshness_half_life_days();
        0.5_f64.powf(age_days / half_life).clamp(0.0, 1.0)
    }
}

/// Fold `factors` through `weights` into a bucketed score, stamping
/// `computed_at` with the provided wall-clock millis.
pub fn score(factors: &ConfidenceFactors, weights: &ConfidenceWeights, now_ms: i64) -> ConfidenceSnapshot {
    let raw = factors.freshness * weights.freshness
        + factors.source * weights.source
        + factors.verification * weights.verification
        + factors.consensus * weights.consensus
        + factors.no_contradiction * weights.no_contradiction
        + factors.success_rate * weights.success_rate
        + factors.context_relevance * weights.context_relevance;

    let clamped = raw.clamp(0.0, 1.0);
    ConfidenceSnapshot {
        score: clamped,
        level: ConfidenceLevel::from_score(clamped),
        computed_at: now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_factors_at_one_yields_max_score() {
        let factors = ConfidenceFactors {
            freshness: 1.0,
            source: 1.0,
            verification: 1.0,
            consensus: 1.0,
            no_contradiction: 1.0,
            success_rate: 1.0,
            context_relevance: 1.0,
        };
        let snapshot = score(&factors, &ConfidenceWeights::default(), 0);
        assert!((snapshot.score - 1.0).abs() < 1e-9);
        assert_eq!(snapshot.level, ConfidenceLevel::VeryHigh);
    }

    #[test]
    fn all_factors_at_zero_yields_very_low() {
        let factors = ConfidenceFactors::default();
        let snapshot = score(&factors, &ConfidenceWeights::default(), 0);
        assert_eq!(snapshot.score, 0.0);
        assert_eq!(snapshot.level, ConfidenceLevel::VeryLow);
    }

    #[test]
    fn freshness_decays_by_half_at_the_half_life() {
        let f = ConfidenceFactors::freshness_from_age(14.0, Category::Incidents);
        assert!((f - 0.5).abs() < 1e-9);
    }

    #[test]
    fn freshness_is_higher_for_longer_half_life_categories_at_same_age() {
        let incidents = ConfidenceFactors::freshness_from_age(30.0, Category::Incidents);
        let runbooks = ConfidenceFactors::freshness_from_age(30.0, Category::Runbooks);
        assert!(runbooks > incidents);
    }

    #[test]
    fn custom_weights_shift_the_score_toward_weighted_factors() {
        let mut factors = ConfidenceFactors::default();
        factors.verification = 1.0;
        let mut weights = ConfidenceWeights::default();
        weights.verification = 1.0;
        weights.freshness = 0.0;
        weights.source = 0.0;
        weights.consensus = 0.0;
        weights.no_contradiction = 0.0;
        weights.success_rate = 0.0;
        weights.context_relevance = 0.0;

        let snapshot = score(&factors, &weights, 0);
        assert!((snapshot.score - 1.0).abs() < 1e-9);
    }
}
