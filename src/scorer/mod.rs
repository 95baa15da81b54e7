pub mod bundle_analyzer;
pub mod compatibility;

pub use bundle_analyzer::{compute_metrics, region_for};
pub use compatibility::{score, CompatibilityScore};

/// Whole-unit amount with thousands separators, e.g. `1,100,000`.
pub(crate) fn format_amount(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
