//! Human-readable durations used in configuration files
//!
//! Accepts Go-style sequences (`"300ms"`, `"1h30m"`) plus the extended
//! units `d` (days) and `w` (weeks). Fractions are allowed (`"1.5h"`).

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

/// Parse a duration string such as `"5m"`, `"1h30m"`, `"7d"` or `"2w"`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::config("empty duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s;
    let mut total_secs = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(Error::config(format!("invalid duration {s:?}")));
        }
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| Error::config(format!("invalid duration number {number:?} in {s:?}")))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale = match unit {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3_600.0,
            "d" => 86_400.0,
            "w" => 604_800.0,
            "" => return Err(Error::config(format!("missing unit in duration {s:?}"))),
            other => {
                return Err(Error::config(format!(
                    "unknown unit {other:?} in duration {s:?}"
                )));
            }
        };

        total_secs += value * scale;
        rest = tail;
    }

    Duration::try_from_secs_f64(total_secs)
        .map_err(|e| Error::config(format!("duration {s:?} out of range: {e}")))
}

/// A duration that remembers the text it was written as
///
/// Serializes back to the original text so a saved configuration reads
/// the way the operator wrote it.
#[derive(Clone, PartialEq, Eq)]
pub struct HumanDuration {
    text: String,
    value: Duration,
}

impl HumanDuration {
    /// Parse from text
    pub fn parse(text: &str) -> Result<Self> {
        let value = parse_duration(text)?;
        Ok(Self {
            text: text.trim().to_string(),
            value,
        })
    }

    /// The parsed value
    pub const fn get(&self) -> Duration {
        self.value
    }

    /// The text as configured
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        let text = if value.subsec_nanos() != 0 {
            format!("{}ms", value.as_millis())
        } else {
            let secs = value.as_secs();
            match secs {
                0 => "0s".to_string(),
                s if s % 3_600 == 0 => format!("{}h", s / 3_600),
                s if s % 60 == 0 => format!("{}m", s / 60),
                s => format!("{s}s"),
            }
        };
        Self { text, value }
    }
}

impl fmt::Debug for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:?})", self.text, self.value)
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
