//! Exact comparison of Kubernetes resource quantities (`5Gi`, `500M`, `1.5e3`).

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quantity {0:?}")]
pub struct QuantityError(pub String);

const NANO_DIGITS: u32 = 9;

/// Value of `q` in units of 10^-9, so `1` parses to `1_000_000_000`.
pub fn parse(q: &str) -> Result<i128, QuantityError> {
    let err = || QuantityError(q.to_string());
    let s = q.trim();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    if number.is_empty() || number == "." || number.matches('.').count() > 1 {
        return Err(err());
    }

    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    let digits = format!("{}{}", int_part, frac_part);
    let mantissa: i128 = digits.parse().map_err(|_| err())?;
    let frac_len = frac_part.len() as i32;

    let (binary, exp10) = match suffix {
        "" => (None, 0),
        "n" => (None, -9),
        "u" => (None, -6),
        "m" => (None, -3),
        "k" => (None, 3),
        "M" => (None, 6),
        "G" => (None, 9),
        "T" => (None, 12),
        "P" => (None, 15),
        "E" => (None, 18),
        "Ki" => (Some(10), 0),
        "Mi" => (Some(20), 0),
        "Gi" => (Some(30), 0),
        "Ti" => (Some(40), 0),
        "Pi" => (Some(50), 0),
        "Ei" => (Some(60), 0),
        s if s.starts_with(['e', 'E']) => (None, s[1..].parse::<i32>().map_err(|_| err())?),
        _ => return Err(err()),
    };

    let scale = exp10 - frac_len + NANO_DIGITS as i32;
    let mut value = if scale >= 0 {
        mantissa.checked_mul(10i128.checked_pow(scale as u32).ok_or_else(err)?).ok_or_else(err)?
    } else {
        mantissa / 10i128.checked_pow((-scale) as u32).ok_or_else(err)?
    };
    if let Some(shift) = binary {
        value = value.checked_mul(1i128 << shift).ok_or_else(err)?;
    }
    Ok(if negative { -value } else { value })
}

/// Ordering of two quantities by value.
pub fn compare(a: &Quantity, b: &Quantity) -> Result<Ordering, QuantityError> {
    Ok(parse(&a.0)?.cmp(&parse(&b.0)?))
}
