//! Go-style durations (`100ms`, `1m30s`) as used by mesh configuration.
//!
//! Use with `#[serde(with = "mesh_listener_controller_core::duration")]` on `Duration` fields.

use serde::{de, Deserializer, Serializer};
use std::{fmt, time::Duration};

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("durations may not be negative")]
    Negative,

    #[error("duration is too large")]
    Overflow,

    #[error("invalid floating-point number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),
}

const EXPECTED_UNITS: &str = "expected one of 'ns', 'us', '\u{00b5}s', 'ms', 's', 'm', or 'h'";

/// Parses a duration in the format produced by Go's `time.Duration.String()`.
pub fn parse(s: &str) -> Result<Duration, ParseError> {
    fn unit(unit: &str) -> Result<Duration, ParseError> {
        const MINUTE: Duration = Duration::from_secs(60);
        match unit {
            "ns" => Ok(Duration::from_nanos(1)),
            // U+00B5 is the "micro sign" while U+03BC is "Greek letter mu"
            "us" | "\u{00b5}s" | "\u{03bc}s" => Ok(Duration::from_micros(1)),
            "ms" => Ok(Duration::from_millis(1)),
            "s" => Ok(Duration::from_secs(1)),
            "m" => Ok(MINUTE),
            "h" => Ok(MINUTE * 60),
            _ => Err(ParseError::InvalidUnit),
        }
    }

    let mut s = s.trim();
    if s.starts_with('-') {
        return Err(ParseError::Negative);
    }
    s = s.trim_start_matches('+');
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    while !s.is_empty() {
        let unit_start = s
            .find(|c: char| c.is_alphabetic() || c == '\u{00b5}' || c == '\u{03bc}')
            .ok_or(ParseError::NoUnit)?;
        let (val, rest) = s.split_at(unit_start);
        let val = val.parse::<f64>()?;
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let (u, rest) = rest.split_at(unit_end);
        let base = unit(u)?;
        let d = if val.fract() == 0.0 && val <= f64::from(u32::MAX) {
            base.checked_mul(val as u32)
        } else {
            Duration::try_from_secs_f64(base.as_secs_f64() * val).ok()
        };
        total = d
            .and_then(|d| total.checked_add(d))
            .ok_or(ParseError::Overflow)?;
        s = rest;
    }
    Ok(total)
}

/// Formats a duration using the largest unit that represents it exactly.
pub fn format(d: Duration) -> String {
    Display(d).to_string()
}

struct Display(Duration);

impl fmt::Display for Display {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            f.write_str("0s")
        } else if nanos % 1_000_000_000 == 0 {
            write!(f, "{}s", nanos / 1_000_000_000)
        } else if nanos % 1_000_000 == 0 {
            write!(f, "{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            write!(f, "{}us", nanos / 1_000)
        } else {
            write!(f, "{}ns", nanos)
        }
    }
}

pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&Display(*d))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl de::Visitor<'_> for Visitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string in Go `time.Duration.String()` format")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            parse(value).map_err(E::custom)
        }
    }
    deserializer.deserialize_str(Visitor)
}
