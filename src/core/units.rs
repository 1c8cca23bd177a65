//! Byte → display unit conversion.
//!
//! Rounding policy: two decimals, half away from zero (`f64::round`). The
//! domain is non-negative, so this is round-half-up.

#![allow(clippy::cast_precision_loss)]

/// Bytes per GiB.
pub const BYTES_PER_GIB: u64 = 1 << 30;

/// Convert a byte count to GiB rounded to two decimals.
#[must_use]
pub fn to_display_unit(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GIB as f64)
}

/// Byte counts reported as signed integers; negatives clamp to zero.
#[must_use]
pub fn clamp_non_negative(bytes: i64) -> u64 {
    u64::try_from(bytes).unwrap_or(0)
}

/// Round to two decimals, half away from zero.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Render a GiB value for humans (`"4 GiB"`, `"12.5 GiB"`, `"0.13 GiB"`).
#[must_use]
pub fn format_gib(gib: f64) -> String {
    let rounded = round2(gib);
    let mut text = format!("{rounded:.2}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{text} GiB")
}
