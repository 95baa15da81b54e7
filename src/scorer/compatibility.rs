//! Weighted funder/opportunity compatibility score. Pure: no I/O.

use std::collections::HashSet;

use crate::config::BUNDLE_PREFILTER_RATIO;
use crate::scorer::bundle_analyzer::blended_roi;
use crate::scorer::format_amount;
use crate::types::{CriteriaSection, Funder, Opportunity};

pub const SECTOR_WEIGHT: f64 = 0.30;
pub const FINANCIAL_WEIGHT: f64 = 0.25;
pub const TIMELINE_WEIGHT: f64 = 0.20;
pub const ROI_WEIGHT: f64 = 0.15;
pub const TECHNICAL_WEIGHT: f64 = 0.10;

/// Sub-score given to a criterion whose section could not be read.
pub const NEUTRAL_SUBSCORE: f64 = 0.5;

/// Ceiling on the composite when the opportunities raise less than 80% of
/// the funder's minimum. Keeps such sets below the match threshold.
pub const INELIGIBLE_SCORE_CAP: f64 = 0.5;

const RELATED_SECTORS: &[(&str, &[&str])] = &[
    ("renewable_energy", &["solar_energy", "wind_energy", "energy_storage"]),
    ("solar_energy", &["renewable_energy"]),
    ("wind_energy", &["renewable_energy"]),
    ("energy_storage", &["renewable_energy", "solar_energy", "wind_energy"]),
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub sector: f64,
    pub financial: f64,
    pub timeline: f64,
    pub roi: f64,
    pub technical: f64,
}

impl ScoreBreakdown {
    pub fn weighted_sum(&self) -> f64 {
        self.sector * SECTOR_WEIGHT
            + self.financial * FINANCIAL_WEIGHT
            + self.timeline * TIMELINE_WEIGHT
            + self.roi * ROI_WEIGHT
            + self.technical * TECHNICAL_WEIGHT
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompatibilityScore {
    /// Composite in [0, 1].
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub criteria_met: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Notes {
    criteria_met: Vec<String>,
    warnings: Vec<String>,
}

impl Notes {
    fn met(&mut self, tag: &str) {
        self.criteria_met.push(tag.to_string());
    }

    fn warn(&mut self, msg: String) {
        self.warnings.push(msg);
    }
}

/// Score one funder against a set of opportunities (one for a simple match,
/// several for a bundle).
pub fn score(funder: &Funder, opportunities: &[Opportunity]) -> CompatibilityScore {
    let mut notes = Notes::default();

    let breakdown = ScoreBreakdown {
        sector: guarded(funder, opportunities, &[CriteriaSection::Sector], &mut notes, score_sector),
        financial: guarded(funder, opportunities, &[CriteriaSection::Financial], &mut notes, score_financial),
        timeline: guarded(funder, opportunities, &[CriteriaSection::Timeline], &mut notes, score_timeline),
        roi: guarded(funder, opportunities, &[CriteriaSection::Financial], &mut notes, score_roi),
        technical: guarded(funder, opportunities, &[CriteriaSection::Technical], &mut notes, score_technical),
    };

    let mut total = breakdown.weighted_sum().clamp(0.0, 1.0);

    let minimum = funder.minimum_required();
    let investment: f64 = opportunities.iter().map(Opportunity::amount).sum();
    if minimum > 0.0 && investment < minimum * BUNDLE_PREFILTER_RATIO && total > INELIGIBLE_SCORE_CAP {
        total = INELIGIBLE_SCORE_CAP;
        notes.warn("Below funder minimum scale; not eligible as a match".to_string());
    }

    CompatibilityScore {
        score: total,
        breakdown,
        criteria_met: notes.criteria_met,
        warnings: notes.warnings,
    }
}

/// Runs `criterion` unless one of the sections it reads is malformed on the
/// funder or any opportunity, in which case the criterion scores neutral.
fn guarded(
    funder: &Funder,
    opportunities: &[Opportunity],
    sections: &[CriteriaSection],
    notes: &mut Notes,
    criterion: fn(&Funder, &[Opportunity], &mut Notes) -> f64,
) -> f64 {
    let malformed = sections.iter().copied().find(|&section| {
        funder.alert.criteria.is_malformed(section)
            || opportunities.iter().any(|o| o.alert.criteria.is_malformed(section))
    });
    match malformed {
        Some(section) => {
            notes.warn(format!("Malformed {section} criteria; scored neutral"));
            NEUTRAL_SUBSCORE
        }
        None => criterion(funder, opportunities, notes),
    }
}

fn score_sector(funder: &Funder, opportunities: &[Opportunity], notes: &mut Notes) -> f64 {
    let Some(wanted) = funder.primary_sector() else {
        notes.met("sector_unknown");
        return 0.5;
    };
    let sectors: Vec<String> = opportunities.iter().filter_map(Opportunity::sector).collect();
    // No opportunity declares a sector: nothing to compare, so neutral
    // rather than a vacuous perfect match.
    if sectors.is_empty() {
        notes.met("sector_unknown");
        return 0.5;
    }

    if sectors.iter().all(|s| *s == wanted) {
        notes.met("sector_perfect_match");
        return 1.0;
    }
    if sectors.iter().any(|s| *s == wanted) {
        notes.met("sector_partial_match");
        return 0.6;
    }
    let related = RELATED_SECTORS
        .iter()
        .find(|(sector, _)| *sector == wanted)
        .map(|(_, related)| *related)
        .unwrap_or(&[]);
    if sectors.iter().any(|s| related.contains(&s.as_str())) {
        notes.met("sector_related_match");
        return 0.7;
    }
    notes.met("sector_mismatch");
    0.2
}

fn score_financial(funder: &Funder, opportunities: &[Opportunity], notes: &mut Notes) -> f64 {
    let total: f64 = opportunities.iter().map(Opportunity::amount).sum();
    let minimum = funder.minimum_required();
    let available = funder.available_funding();

    let mut score = if minimum > 0.0 {
        if total >= minimum {
            notes.met("minimum_scale_met");
            1.0
        } else if total >= minimum * 0.8 {
            notes.met("minimum_scale_nearly_met");
            notes.warn(format!(
                "Investment ${} slightly below minimum ${}",
                format_amount(total),
                format_amount(minimum)
            ));
            0.7
        } else {
            notes.warn(format!(
                "Investment ${} well below minimum ${}",
                format_amount(total),
                format_amount(minimum)
            ));
            0.3
        }
    } else {
        0.8
    };

    if available > 0.0 {
        if total <= available {
            notes.met("within_funding_capacity");
        } else if total <= available * 1.2 {
            notes.warn(format!(
                "Investment ${} slightly exceeds available ${}",
                format_amount(total),
                format_amount(available)
            ));
        } else {
            notes.warn(format!(
                "Investment ${} significantly exceeds available ${}",
                format_amount(total),
                format_amount(available)
            ));
            score *= 0.7;
        }
    }
    score
}

fn score_timeline(_funder: &Funder, opportunities: &[Opportunity], notes: &mut Notes) -> f64 {
    let starts: Vec<&str> = opportunities.iter().filter_map(Opportunity::execution_start).collect();
    if starts.len() < 2 {
        return 0.7;
    }
    let years: HashSet<&str> = starts.iter().filter_map(|s| s.get(..4)).collect();
    if years.len() == 1 {
        notes.met("timeline_aligned");
        1.0
    } else {
        notes.warn("Project timelines span multiple years".to_string());
        0.6
    }
}

fn score_roi(funder: &Funder, opportunities: &[Opportunity], notes: &mut Notes) -> f64 {
    let blended = blended_roi(opportunities);
    let expected = funder.roi_expected();

    if blended >= expected {
        notes.met("roi_acceptable");
        if blended >= expected * 1.2 {
            notes.met("roi_exceeds_expectations");
            return 1.0;
        }
        0.9
    } else if blended >= expected * 0.8 {
        notes.met("roi_nearly_acceptable");
        0.6
    } else {
        0.3
    }
}

fn score_technical(_funder: &Funder, opportunities: &[Opportunity], notes: &mut Notes) -> f64 {
    let technologies: HashSet<&str> = opportunities.iter().filter_map(Opportunity::technology).collect();
    if technologies.len() <= 1 {
        notes.met("technology_consistent");
        1.0
    } else {
        notes.met("mixed_technologies");
        0.7
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::{alert, funder, opportunity};
    use crate::types::{AlertType, ConfidenceLevel};
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn solar_funder() -> Funder {
        funder("fund-1", "solar_energy", 1_000_000.0, 10.0)
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = SECTOR_WEIGHT + FINANCIAL_WEIGHT + TIMELINE_WEIGHT + ROI_WEIGHT + TECHNICAL_WEIGHT;
        assert!(approx(sum, 1.0));
    }

    #[test]
    fn two_opportunity_bundle_is_high_confidence() {
        let opps = vec![
            opportunity("opp-1", "solar_energy", 500_000.0, 18.0, "2026-03-01"),
            opportunity("opp-2", "solar_energy", 600_000.0, 17.0, "2026-07-15"),
        ];
        let result = score(&solar_funder(), &opps);
        assert!(result.score >= 0.80, "score was {}", result.score);
        assert_eq!(ConfidenceLevel::from_score(result.score), ConfidenceLevel::High);
        assert!(result.criteria_met.contains(&"minimum_scale_met".to_string()));
        assert!(result.criteria_met.contains(&"timeline_aligned".to_string()));
        assert!(approx(result.breakdown.sector, 1.0));
    }

    #[test]
    fn single_small_opportunity_is_not_a_match() {
        let opps = vec![opportunity("opp-1", "solar_energy", 200_000.0, 18.0, "2026-03-01")];
        let result = score(&solar_funder(), &opps);
        assert!(approx(result.breakdown.financial, 0.3));
        assert!(result.score < 0.60, "score was {}", result.score);
        assert!(result.warnings.iter().any(|w| w == "Investment $200,000 well below minimum $1,000,000"));
    }

    #[test]
    fn nearly_met_minimum_is_not_capped() {
        let opps = vec![
            opportunity("opp-1", "solar_energy", 450_000.0, 18.0, "2026-03-01"),
            opportunity("opp-2", "solar_energy", 400_000.0, 17.0, "2026-04-01"),
        ];
        let result = score(&solar_funder(), &opps);
        assert!(approx(result.breakdown.financial, 0.7));
        assert!(result.criteria_met.contains(&"minimum_scale_nearly_met".to_string()));
        assert!(result.score > INELIGIBLE_SCORE_CAP);
    }

    #[test]
    fn sector_tiers() {
        let f = funder("f", "renewable_energy", 0.0, 0.0);
        let solar = opportunity("o1", "solar_energy", 1.0, 0.0, "");
        let wind = opportunity("o2", "wind_energy", 1.0, 0.0, "");
        let agri = opportunity("o3", "agriculture", 1.0, 0.0, "");
        let renewable = opportunity("o4", "renewable_energy", 1.0, 0.0, "");

        assert!(approx(score(&f, &[renewable.clone()]).breakdown.sector, 1.0));
        assert!(approx(score(&f, &[renewable, agri.clone()]).breakdown.sector, 0.6));
        assert!(approx(score(&f, &[solar, wind]).breakdown.sector, 0.7));
        assert!(approx(score(&f, &[agri]).breakdown.sector, 0.2));

        let unset = Funder::new(alert("f2", AlertType::Funding, json!({})));
        let result = score(&unset, &[opportunity("o5", "solar_energy", 1.0, 0.0, "")]);
        assert!(approx(result.breakdown.sector, 0.5));
        assert!(result.criteria_met.contains(&"sector_unknown".to_string()));

        let blank = [opportunity("o6", "", 1.0, 0.0, ""), opportunity("o7", "", 1.0, 0.0, "")];
        let result = score(&f, &blank);
        assert!(approx(result.breakdown.sector, 0.5));
        assert!(result.criteria_met.contains(&"sector_unknown".to_string()));
        assert!(!result.criteria_met.contains(&"sector_perfect_match".to_string()));
    }

    #[test]
    fn capacity_penalty_applies_above_120_percent() {
        let f = Funder::new(alert(
            "f",
            AlertType::Funding,
            json!({ "sector": { "primary": "solar_energy" }, "financial": { "amount": 100.0 } }),
        ));
        let within = score(&f, &[opportunity("o", "solar_energy", 100.0, 0.0, "")]);
        assert!(approx(within.breakdown.financial, 0.8));
        assert!(within.criteria_met.contains(&"within_funding_capacity".to_string()));

        let slightly = score(&f, &[opportunity("o", "solar_energy", 115.0, 0.0, "")]);
        assert!(approx(slightly.breakdown.financial, 0.8));
        assert_eq!(slightly.warnings.len(), 1);

        let far = score(&f, &[opportunity("o", "solar_energy", 200.0, 0.0, "")]);
        assert!(approx(far.breakdown.financial, 0.8 * 0.7));
    }

    #[test]
    fn timeline_tiers() {
        let f = funder("f", "solar_energy", 0.0, 0.0);
        let a = opportunity("a", "solar_energy", 1.0, 0.0, "2026-01-01");
        let b = opportunity("b", "solar_energy", 1.0, 0.0, "2027-01-01");
        let c = opportunity("c", "solar_energy", 1.0, 0.0, "");

        assert!(approx(score(&f, &[a.clone()]).breakdown.timeline, 0.7));
        assert!(approx(score(&f, &[a.clone(), c]).breakdown.timeline, 0.7));
        let spread = score(&f, &[a, b]);
        assert!(approx(spread.breakdown.timeline, 0.6));
        assert!(spread.warnings.contains(&"Project timelines span multiple years".to_string()));
    }

    #[test]
    fn roi_tiers() {
        let f = funder("f", "solar_energy", 0.0, 10.0);
        let at = |roi: f64| score(&f, &[opportunity("o", "solar_energy", 100.0, roi, "")]).breakdown.roi;
        assert!(approx(at(12.5), 1.0));
        assert!(approx(at(10.0), 0.9));
        assert!(approx(at(8.5), 0.6));
        assert!(approx(at(7.9), 0.3));
    }

    #[test]
    fn zero_investment_does_not_divide_by_zero() {
        let f = funder("f", "solar_energy", 0.0, 10.0);
        let result = score(&f, &[opportunity("o", "solar_energy", 0.0, 25.0, "")]);
        assert!(approx(result.breakdown.roi, 0.3));
        assert!(result.score.is_finite());
    }

    #[test]
    fn mixed_technologies_score_lower() {
        let f = funder("f", "solar_energy", 0.0, 0.0);
        let tech = |id: &str, t: &str| {
            Opportunity::new(alert(id, AlertType::Investment, json!({ "technical": { "technology": t } })))
        };
        assert!(approx(score(&f, &[tech("a", "pv"), tech("b", "pv")]).breakdown.technical, 1.0));
        assert!(approx(score(&f, &[tech("a", "pv"), tech("b", "csp")]).breakdown.technical, 0.7));
    }

    #[test]
    fn malformed_section_scores_neutral_with_warning() {
        let f = funder("f", "solar_energy", 0.0, 10.0);
        let broken = Opportunity::new(alert(
            "o",
            AlertType::Investment,
            json!({ "sector": { "primary": "solar_energy" }, "financial": "n/a" }),
        ));
        let result = score(&f, &[broken]);
        assert!(approx(result.breakdown.financial, NEUTRAL_SUBSCORE));
        assert!(approx(result.breakdown.roi, NEUTRAL_SUBSCORE));
        assert!(approx(result.breakdown.sector, 1.0));
        assert!(result.warnings.iter().any(|w| w.contains("financial")));
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let funders = [
            funder("f1", "solar_energy", 1_000_000.0, 10.0),
            funder("f2", "", 0.0, 0.0),
            funder("f3", "wind_energy", 5.0, 1_000.0),
        ];
        let pool = [
            opportunity("o1", "solar_energy", 0.0, 0.0, ""),
            opportunity("o2", "wind_energy", 2_000_000.0, 40.0, "2030-01-01"),
            opportunity("o3", "agriculture", 10.0, -5.0, "1999"),
        ];
        for f in &funders {
            for n in 1..=pool.len() {
                let result = score(f, &pool[..n]);
                assert!((0.0..=1.0).contains(&result.score), "score {} out of range", result.score);
            }
        }
    }
}
