//! Price text to minor units (cents), as the patch endpoint expects.

/// Smallest price the API accepts for a sold license, in minor units.
pub const MIN_PRICE_MINOR_UNITS: u32 = 399;

/// Convert a human-entered price into minor units.
///
/// Accepts `,` or `.` as the decimal separator. Returns `None` for text that
/// is not a number and for prices below [`MIN_PRICE_MINOR_UNITS`]; callers must
/// treat `None` as invalid input, never as zero.
pub fn normalize(raw: &str) -> Option<u32> {
    let text = raw.trim().replace(',', ".");
    let value: f64 = text.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    let minor = (value * 100.0).round();
    if minor < f64::from(MIN_PRICE_MINOR_UNITS) || minor > f64::from(u32::MAX) {
        return None;
    }
    Some(minor as u32)
}

/// Whether `raw` parses as a number at all, regardless of the minimum.
pub fn is_numeric(raw: &str) -> bool {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map(f64::is_finite)
        .unwrap_or(false)
}
