//! Kubernetes resource quantity parsing
//!
//! Only the subset of the quantity grammar used by storage sizes and CPU/memory
//! bounds is supported: a non-negative decimal number followed by an optional
//! binary (`Ki`..`Ei`), decimal (`k`..`E`) or milli (`m`) suffix.

use crate::controller::error::{Error, Result};

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
pub const TIB: u64 = 1 << 40;

const SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity into its numeric value (e.g. "300m" -> 0.3, "1Gi" -> 1073741824)
pub fn parse_quantity(input: &str) -> Result<f64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::ValidationError("empty quantity".to_string()));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| Error::ValidationError(format!("invalid quantity number: {}", input)))?;

    let multiplier = if suffix.is_empty() {
        1.0
    } else {
        SUFFIXES
            .iter()
            .find(|(sfx, _)| *sfx == suffix)
            .map(|(_, m)| *m)
            .ok_or_else(|| {
                Error::ValidationError(format!("unsupported quantity suffix in: {}", input))
            })?
    };

    Ok(value * multiplier)
}

/// Parse a storage quantity into whole bytes, rounding fractional bytes up
pub fn parse_bytes(input: &str) -> Result<u64> {
    let value = parse_quantity(input)?;
    if value > u64::MAX as f64 {
        return Err(Error::ValidationError(format!(
            "quantity out of range: {}",
            input
        )));
    }
    Ok(value.ceil() as u64)
}

/// Render a byte count using the largest binary suffix that divides it exactly
pub fn format_bytes(bytes: u64) -> String {
    for (suffix, unit) in [("Ti", TIB), ("Gi", GIB), ("Mi", MIB), ("Ki", KIB)] {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

/// Round `bytes` up to the next multiple of `granularity`
pub fn round_up(bytes: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        return bytes;
    }
    match bytes % granularity {
        0 => bytes,
        rem => bytes.saturating_add(granularity - rem),
    }
}

/// Parse a ratio given either as a percentage ("80%") or a fraction ("0.8")
pub fn parse_ratio(input: &str) -> Result<f64> {
    let s = input.trim();
    let value = match s.strip_suffix('%') {
        Some(pct) => pct
            .trim()
            .parse::<f64>()
            .map(|v| v / 100.0)
            .map_err(|_| Error::ValidationError(format!("invalid percentage: {}", input)))?,
        None => s
            .parse::<f64>()
            .map_err(|_| Error::ValidationError(format!("invalid ratio: {}", input)))?,
    };

    if !value.is_finite() {
        return Err(Error::ValidationError(format!("invalid ratio: {}", input)));
    }
    Ok(value)
}
