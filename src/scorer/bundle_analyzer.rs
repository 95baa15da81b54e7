//! Bundle-level aggregates and the presentation strings stored with a bundle.

use crate::scorer::format_amount;
use crate::types::{BundleMetrics, Opportunity};

const REGIONS: &[(&str, &[&str])] = &[
    (
        "Europe",
        &[
            "France", "Germany", "United Kingdom", "Spain", "Italy", "Netherlands", "Belgium", "Sweden",
            "Norway", "Denmark", "Finland", "Poland", "Czech Republic", "Austria", "Switzerland",
        ],
    ),
    ("North America", &["United States", "Canada", "Mexico"]),
    (
        "Asia Pacific",
        &["Japan", "South Korea", "Singapore", "Australia", "New Zealand", "China", "India"],
    ),
    ("Latin America", &["Brazil", "Argentina", "Chile"]),
    ("Middle East", &["United Arab Emirates", "Saudi Arabia"]),
    ("Africa", &["South Africa"]),
];

/// Region for a country name; anything unlisted is "Other".
pub fn region_for(country: &str) -> &'static str {
    REGIONS
        .iter()
        .find(|(_, countries)| countries.contains(&country))
        .map_or("Other", |(region, _)| *region)
}

/// Investment-weighted ROI, unrounded; 0 when nothing is invested.
pub fn blended_roi(opportunities: &[Opportunity]) -> f64 {
    let total: f64 = opportunities.iter().map(Opportunity::amount).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f64 = opportunities.iter().map(|o| o.amount() * o.roi()).sum();
    weighted / total
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Aggregate metrics for a set of opportunities. Safe on an empty set.
/// Sets keep first-seen order and contain only values that are present.
pub fn compute_metrics(opportunities: &[Opportunity]) -> BundleMetrics {
    let mut m = BundleMetrics {
        opportunity_count: opportunities.len(),
        ..BundleMetrics::default()
    };

    for opp in opportunities {
        m.total_investment += opp.amount();
        m.total_carbon_reduction += opp.carbon_reduction();
        m.total_capacity_mw += opp.capacity_mw();

        if let Some(country) = opp.country() {
            push_unique(&mut m.countries, country);
            push_unique(&mut m.regions, region_for(country));
        }
        if let Some(city) = opp.city() {
            push_unique(&mut m.cities, city);
        }
        if let Some(sector) = opp.sector() {
            push_unique(&mut m.sectors, &sector);
        }
        if let Some(tech) = opp.technology() {
            push_unique(&mut m.technologies, tech);
        }

        if let Some(start) = opp.execution_start() {
            if m.earliest_start_date.as_deref().map_or(true, |cur| start < cur) {
                m.earliest_start_date = Some(start.to_string());
            }
        }
        if let Some(end) = opp.completion() {
            if m.latest_completion_date.as_deref().map_or(true, |cur| end > cur) {
                m.latest_completion_date = Some(end.to_string());
            }
        }
    }

    m.blended_roi = (blended_roi(opportunities) * 100.0).round() / 100.0;
    let rois = opportunities.iter().map(Opportunity::roi);
    m.roi_range_min = rois.clone().reduce(f64::min).unwrap_or(0.0);
    m.roi_range_max = rois.reduce(f64::max).unwrap_or(0.0);
    if !opportunities.is_empty() {
        m.average_carbon_per_project = m.total_carbon_reduction / opportunities.len() as f64;
    }
    m.geographic_spread = m.countries.len();
    m
}

/// First sector seen in the bundle, or "unknown".
pub fn primary_sector(metrics: &BundleMetrics) -> String {
    metrics.sectors.first().cloned().unwrap_or_else(|| "unknown".to_string())
}

/// `"{Sector} Portfolio - {up to three cities}[ +N more]"`.
pub fn bundle_name(metrics: &BundleMetrics) -> String {
    let shown = metrics.cities.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    let more = metrics.cities.len().saturating_sub(3);
    let cities = if more > 0 { format!("{shown} +{more} more") } else { shown };
    format!("{} Portfolio - {cities}", title_case(&primary_sector(metrics)))
}

pub fn bundle_description(metrics: &BundleMetrics) -> String {
    format!(
        "Bundle of {} {} projects across {} cities",
        metrics.opportunity_count,
        primary_sector(metrics),
        metrics.cities.len()
    )
}

pub fn bundling_rationale(metrics: &BundleMetrics, criteria_met: &[String]) -> String {
    let criteria = criteria_met.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
    format!(
        "Geographic diversification across {} countries. Blended ROI: {}%. \
         Total carbon reduction: {} tons/year. Criteria met: {criteria}",
        metrics.countries.len(),
        metrics.blended_roi,
        format_amount(metrics.total_carbon_reduction),
    )
}

/// Upper-cases the first letter of every alphabetic run: `solar_energy` -> `Solar_Energy`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if boundary {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            boundary = false;
        } else {
            out.push(ch);
            boundary = true;
        }
    }
    out
}
