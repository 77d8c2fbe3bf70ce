//! Duration expressions of the form `hours=8;minutes=30`.
//!
//! Providers carry their connection lifetime as such a string. Each `;`
//! separated part is `unit=value` where `value` may be fractional or
//! negative and `unit` is one of `weeks`, `days`, `hours`, `minutes`,
//! `seconds`, `milliseconds`, `microseconds`. Parts are summed.

use chrono::TimeDelta;

use crate::errors::CoreError;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

fn unit_seconds(unit: &str) -> Option<f64> {
    let secs = match unit {
        "weeks" => 7.0 * 86_400.0,
        "days" => 86_400.0,
        "hours" => 3_600.0,
        "minutes" => 60.0,
        "seconds" => 1.0,
        "milliseconds" => 0.001,
        "microseconds" => 0.000_001,
        _ => return None,
    };
    Some(secs)
}

/// Parse an expiry expression into a [`TimeDelta`].
pub fn parse_expiry(expr: &str) -> Result<TimeDelta, CoreError> {
    let mut total_secs = 0.0_f64;
    let mut parts = 0usize;

    for part in expr.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (unit, value) = part
            .split_once('=')
            .ok_or_else(|| CoreError::invalid_expiry(expr, format!("`{part}` is not unit=value")))?;
        let per_unit = unit_seconds(unit.trim())
            .ok_or_else(|| CoreError::invalid_expiry(expr, format!("unknown unit `{}`", unit.trim())))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|_| CoreError::invalid_expiry(expr, format!("`{}` is not a number", value.trim())))?;
        if !value.is_finite() {
            return Err(CoreError::invalid_expiry(expr, "value must be finite"));
        }
        total_secs += value * per_unit;
        parts += 1;
    }

    if parts == 0 {
        return Err(CoreError::invalid_expiry(expr, "empty expression"));
    }

    #[allow(clippy::cast_possible_truncation)]
    let micros = (total_secs * MICROS_PER_SECOND).round() as i64;
    Ok(TimeDelta::microseconds(micros))
}
