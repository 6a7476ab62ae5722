//! Field sanitisers applied at the encoder boundary.
//!
//! The feed is a dynamic bag; these are the only places where a raw value
//! becomes a typed column cell.

use model::ObservationValue;

/// Numeric cell: `None` for absent values, the `"ground"` sentinel, and
/// anything that does not coerce to a finite number. An empty or blank
/// string coerces to zero, like the other loose numeric strings the feed
/// emits.
pub fn safe_number(v: Option<&ObservationValue>) -> Option<f64> {
    match v? {
        ObservationValue::Number(n) if n.is_finite() => Some(*n),
        ObservationValue::Number(_) => None,
        ObservationValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("ground") {
                return None;
            }
            if trimmed.is_empty() {
                return Some(0.0);
            }
            trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        ObservationValue::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
    }
}

/// String cell: `None` for absent values and strings empty after trim.
pub fn safe_string(v: Option<&ObservationValue>) -> Option<String> {
    let rendered = match v? {
        ObservationValue::Text(s) => s.trim().to_string(),
        other => other.render(),
    };
    if rendered.is_empty() { None } else { Some(rendered) }
}

/// Boolean cell: `None` for absent values; true iff the value is exactly
/// the number 1 or the boolean true.
pub fn safe_boolean(v: Option<&ObservationValue>) -> Option<bool> {
    match v? {
        ObservationValue::Number(n) => Some(*n == 1.0),
        ObservationValue::Flag(b) => Some(*b),
        ObservationValue::Text(_) => Some(false),
    }
}

pub fn safe_i32(v: Option<&ObservationValue>) -> Option<i32> {
    let n = safe_number(v)?.round();
    if n >= i32::MIN as f64 && n <= i32::MAX as f64 {
        Some(n as i32)
    } else {
        None
    }
}

pub fn safe_i64(v: Option<&ObservationValue>) -> Option<i64> {
    let n = safe_number(v)?.round();
    if n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Some(n as i64)
    } else {
        None
    }
}
