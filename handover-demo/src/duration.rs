// SPDX-License-Identifier: MIT

//! Durations written like `300ms`, `1.5s` or `1h2m`, in signed nanoseconds.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DurationError {
    #[error("time: invalid duration \"{0}\"")]
    Invalid(String),

    #[error("time: missing unit in duration \"{0}\"")]
    MissingUnit(String),

    #[error("time: unknown unit \"{unit}\" in duration \"{input}\"")]
    UnknownUnit { unit: String, input: String },
}

fn unit_nanos(unit: &str) -> Option<u64> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 60 * 60 * 1_000_000_000,
        _ => return None,
    })
}

/// Parse a sequence of decimal numbers, each with an optional fraction and a
/// unit suffix, with an optional leading sign. `"0"` needs no unit.
pub fn parse(input: &str) -> Result<i64, DurationError> {
    let invalid = || DurationError::Invalid(input.to_string());

    let (negative, mut rest) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };
    if rest == "0" {
        return Ok(0);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let (int_part, after) = rest.split_at(int_len);
        let (frac_part, after) = match after.strip_prefix('.') {
            Some(after) => {
                let frac_len = after.bytes().take_while(u8::is_ascii_digit).count();
                after.split_at(frac_len)
            }
            None => ("", after),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_len = after
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_len);
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }
        let scale = unit_nanos(unit).ok_or_else(|| DurationError::UnknownUnit {
            unit: unit.to_string(),
            input: input.to_string(),
        })?;

        let whole = if int_part.is_empty() {
            0
        } else {
            int_part.parse::<u64>().map_err(|_| invalid())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(invalid)?;
        if !frac_part.is_empty() {
            // Digits past nanosecond precision only round down.
            let mut fraction = 0u64;
            let mut divisor = 1u64;
            for digit in frac_part.bytes().take(19) {
                fraction = fraction * 10 + u64::from(digit - b'0');
                divisor *= 10;
            }
            let extra = u128::from(fraction) * u128::from(scale) / u128::from(divisor);
            value = value
                .checked_add(u64::try_from(extra).map_err(|_| invalid())?)
                .ok_or_else(invalid)?;
        }
        total = total.checked_add(value).ok_or_else(invalid)?;
        rest = after;
    }

    if negative {
        0i64.checked_sub_unsigned(total).ok_or_else(invalid)
    } else {
        i64::try_from(total).map_err(|_| invalid())
    }
}
