//! Candidate search for one funder against its sector bucket. Pure: no I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{BUNDLE_PREFILTER_RATIO, MATCH_THRESHOLD};
use crate::matcher::combinations::Combinations;
use crate::scorer::bundle_analyzer::{
    bundle_description, bundle_name, bundling_rationale, compute_metrics, primary_sector,
};
use crate::scorer::{score, CompatibilityScore};
use crate::types::{Bundle, BundleStatus, ConfidenceLevel, Funder, MatchType, Opportunity};

/// A scored set of opportunities that cleared the match threshold.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub match_type: MatchType,
    pub opportunities: Vec<Opportunity>,
    pub result: CompatibilityScore,
}

impl Candidate {
    pub fn confidence(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.result.score)
    }

    /// Materialise the persisted record. `reference` fixes the timestamp
    /// part of the id so a redelivered request produces the same id.
    pub fn into_bundle(self, funder: &Funder, reference: DateTime<Utc>) -> Bundle {
        let metrics = compute_metrics(&self.opportunities);
        let opportunity_ids: Vec<String> = self.opportunities.iter().map(|o| o.reference().to_string()).collect();
        let confidence_level = self.confidence();

        Bundle {
            bundle_id: bundle_id(reference, funder.reference(), &opportunity_ids),
            match_type: self.match_type,
            name: bundle_name(&metrics),
            description: bundle_description(&metrics),
            funder_id: funder.reference().to_string(),
            opportunity_ids,
            primary_sector: primary_sector(&metrics),
            compatibility_score: self.result.score,
            confidence_level,
            rationale: bundling_rationale(&metrics, &self.result.criteria_met),
            metrics,
            criteria_met: self.result.criteria_met,
            warnings: self.result.warnings,
            status: BundleStatus::Proposed,
            created_at: Utc::now(),
        }
    }
}

/// `bundle-{YYYYmmddHHMMSS}-{n}opp-{fingerprint}`. The fingerprint hashes the
/// funder and the sorted opportunity references, so two different sets of the
/// same size in the same second never collide.
pub fn bundle_id(reference: DateTime<Utc>, funder_ref: &str, opportunity_refs: &[String]) -> String {
    let mut refs: Vec<&str> = opportunity_refs.iter().map(String::as_str).collect();
    refs.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(funder_ref.as_bytes());
    for r in &refs {
        hasher.update([0u8]);
        hasher.update(r.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());

    format!(
        "bundle-{}-{}opp-{}",
        reference.format("%Y%m%d%H%M%S"),
        refs.len(),
        &digest[..8]
    )
}

/// Every single opportunity in the bucket scored on its own; those at or
/// above the match threshold become simple candidates.
pub fn score_singles(funder: &Funder, bucket: &[Opportunity]) -> Vec<Candidate> {
    let mut out = Vec::new();
    for opp in bucket {
        let opportunities = vec![opp.clone()];
        let result = score(funder, &opportunities);
        if result.score >= MATCH_THRESHOLD {
            out.push(Candidate {
                match_type: MatchType::Simple,
                opportunities,
                result,
            });
        } else {
            debug!(
                funder = %funder.reference(),
                opportunity = %opp.reference(),
                score = result.score,
                "Discarded low-confidence single"
            );
        }
    }
    out
}

#[derive(Debug, Default)]
pub struct BundleSearch {
    /// Best qualifying combination for each size that had one, smallest size first.
    pub best: Vec<Candidate>,
    /// Combinations scored per size (after pruning).
    pub evaluated: BTreeMap<usize, usize>,
    /// Combinations skipped because their total fell below the pre-filter.
    pub pruned: usize,
}

/// Searches bundles of size 2..=min(bucket, max_bundle_size). Only runs for a
/// funder with a positive minimum and a bucket of at least two. Totals under
/// 80% of the minimum are pruned before scoring. Per size, the strictly
/// highest score wins, so the first combination in order keeps a tie.
pub fn search_bundles(funder: &Funder, bucket: &[Opportunity], max_bundle_size: usize) -> BundleSearch {
    let mut out = BundleSearch::default();
    let minimum = funder.minimum_required();
    if minimum <= 0.0 || bucket.len() < 2 {
        return out;
    }
    let floor = minimum * BUNDLE_PREFILTER_RATIO;
    let largest = bucket.len().min(max_bundle_size);

    for size in 2..=largest {
        let mut best: Option<Candidate> = None;
        for combo in Combinations::new(bucket.len(), size) {
            let total: f64 = combo.iter().map(|&i| bucket[i].amount()).sum();
            if total < floor {
                out.pruned += 1;
                continue;
            }
            *out.evaluated.entry(size).or_default() += 1;

            let opportunities: Vec<Opportunity> = combo.iter().map(|&i| bucket[i].clone()).collect();
            let result = score(funder, &opportunities);
            if result.score < MATCH_THRESHOLD {
                continue;
            }
            if best.as_ref().map_or(true, |b| result.score > b.result.score) {
                best = Some(Candidate {
                    match_type: MatchType::Bundled,
                    opportunities,
                    result,
                });
            }
        }
        if let Some(candidate) = best {
            debug!(
                funder = %funder.reference(),
                size,
                score = candidate.result.score,
                "Best bundle for size"
            );
            out.best.push(candidate);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{funder, opportunity};
    use chrono::TimeZone;

    fn solar_funder() -> Funder {
        funder("fund-1", "solar_energy", 1_000_000.0, 10.0)
    }

    #[test]
    fn pair_meeting_minimum_becomes_bundle_and_small_single_does_not() {
        let bucket = vec![
            opportunity("opp-1", "solar_energy", 500_000.0, 18.0, "2026-03-01"),
            opportunity("opp-2", "solar_energy", 600_000.0, 17.0, "2026-07-15"),
        ];
        let f = solar_funder();

        assert!(score_singles(&f, &bucket).is_empty());

        let search = search_bundles(&f, &bucket, 5);
        assert_eq!(search.best.len(), 1);
        let bundle = &search.best[0];
        assert_eq!(bundle.match_type, MatchType::Bundled);
        assert_eq!(bundle.confidence(), ConfidenceLevel::High);
        let metrics = compute_metrics(&bundle.opportunities);
        assert_eq!(metrics.total_investment, 1_100_000.0);
        assert!((metrics.blended_roi - 17.45).abs() < 0.01);
    }

    #[test]
    fn max_bundle_size_bounds_the_search() {
        let bucket: Vec<_> = (0..8)
            .map(|i| opportunity(&format!("opp-{i}"), "solar_energy", 400_000.0, 15.0, "2026-01-01"))
            .collect();
        let search = search_bundles(&solar_funder(), &bucket, 5);

        assert!(search.evaluated.keys().all(|&size| (2..=5).contains(&size)));
        // Pairs total 800k, exactly the pre-filter floor; nothing is pruned.
        assert_eq!(search.pruned, 0);
        assert_eq!(search.evaluated.get(&2), Some(&28));
        assert_eq!(search.evaluated.get(&5), Some(&56));
        assert!(search.best.iter().all(|c| c.opportunities.len() <= 5));
        assert_eq!(search.best.len(), 4);
    }

    #[test]
    fn combinations_below_floor_are_pruned_before_scoring() {
        let bucket = vec![
            opportunity("a", "solar_energy", 100_000.0, 15.0, "2026-01-01"),
            opportunity("b", "solar_energy", 100_000.0, 15.0, "2026-01-01"),
            opportunity("c", "solar_energy", 900_000.0, 15.0, "2026-01-01"),
        ];
        let search = search_bundles(&solar_funder(), &bucket, 5);
        // {a,b} is pruned; {a,c}, {b,c} and {a,b,c} are scored.
        assert_eq!(search.pruned, 1);
        assert_eq!(search.evaluated.get(&2), Some(&2));
        assert_eq!(search.evaluated.get(&3), Some(&1));
    }

    #[test]
    fn ties_keep_the_first_combination() {
        let bucket = vec![
            opportunity("a", "solar_energy", 600_000.0, 15.0, "2026-01-01"),
            opportunity("b", "solar_energy", 600_000.0, 15.0, "2026-01-01"),
            opportunity("c", "solar_energy", 600_000.0, 15.0, "2026-01-01"),
        ];
        let search = search_bundles(&solar_funder(), &bucket, 2);
        let ids: Vec<_> = search.best[0].opportunities.iter().map(|o| o.reference()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn no_minimum_means_no_bundles() {
        let bucket = vec![
            opportunity("a", "solar_energy", 1.0, 15.0, "2026-01-01"),
            opportunity("b", "solar_energy", 1.0, 15.0, "2026-01-01"),
        ];
        let f = funder("fund-1", "solar_energy", 0.0, 10.0);
        let search = search_bundles(&f, &bucket, 5);
        assert!(search.best.is_empty());
        assert!(search.evaluated.is_empty());
        assert_eq!(score_singles(&f, &bucket).len(), 2);
    }

    #[test]
    fn bundle_id_is_stable_for_the_same_participants() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let a = bundle_id(at, "fund-1", &["opp-2".to_string(), "opp-1".to_string()]);
        let b = bundle_id(at, "fund-1", &["opp-1".to_string(), "opp-2".to_string()]);
        let other = bundle_id(at, "fund-1", &["opp-1".to_string(), "opp-3".to_string()]);
        assert_eq!(a, b);
        assert_ne!(a, other);
        assert!(a.starts_with("bundle-20260105100000-2opp-"));
        assert_eq!(a.len(), "bundle-20260105100000-2opp-".len() + 8);
    }

    #[test]
    fn into_bundle_fills_presentation_fields() {
        let bucket = vec![
            opportunity("opp-1", "solar_energy", 500_000.0, 18.0, "2026-03-01"),
            opportunity("opp-2", "solar_energy", 600_000.0, 17.0, "2026-07-15"),
        ];
        let f = solar_funder();
        let candidate = search_bundles(&f, &bucket, 5).best.remove(0);
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let bundle = candidate.into_bundle(&f, at);

        assert_eq!(bundle.funder_id, "fund-1");
        assert_eq!(bundle.opportunity_ids, vec!["opp-1", "opp-2"]);
        assert_eq!(bundle.primary_sector, "solar_energy");
        assert_eq!(bundle.status, BundleStatus::Proposed);
        assert_eq!(bundle.description, "Bundle of 2 solar_energy projects across 0 cities");
        assert!(bundle.rationale.contains("Blended ROI: 17.45%"));
    }
}
