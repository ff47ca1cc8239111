use std::{fmt, str::FromStr, time::Duration};

/// A duration in the Go `time.Duration` string format the scope resource
/// uses for its intervals (`"90s"`, `"2m30s"`, `"24h"`).
///
/// Only the whole-valued units that make sense for polling configuration are
/// accepted: `ms`, `s`, `m`, and `h`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigDuration(Duration);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected one of 'ms', 's', 'm', or 'h'")]
    InvalidUnit,

    #[error("missing a unit suffix")]
    NoUnit,

    #[error("invalid number: {0}")]
    NotANumber(#[from] std::num::ParseIntError),
}

impl From<ConfigDuration> for Duration {
    fn from(ConfigDuration(duration): ConfigDuration) -> Self {
        duration
    }
}

impl From<Duration> for ConfigDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl FromStr for ConfigDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut s = s.trim();
        if s == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !s.is_empty() {
            let unit_start = s
                .find(|c: char| c.is_ascii_alphabetic())
                .ok_or(ParseError::NoUnit)?;
            let (value, rest) = s.split_at(unit_start);
            let value = value.parse::<u32>()?;

            let unit_end = rest
                .find(|c: char| !c.is_ascii_alphabetic())
                .unwrap_or(rest.len());
            let (unit, rest) = rest.split_at(unit_end);
            let base = match unit {
                "ms" => Duration::from_millis(1),
                "s" => Duration::from_secs(1),
                "m" => Duration::from_secs(60),
                "h" => Duration::from_secs(60 * 60),
                _ => return Err(ParseError::InvalidUnit),
            };

            total += base * value;
            s = rest;
        }

        Ok(Self(total))
    }
}

impl fmt::Display for ConfigDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut remainder = self.0.as_millis();
        if remainder == 0 {
            return f.write_str("0s");
        }
        for (unit, millis) in [("h", 3_600_000), ("m", 60_000), ("s", 1_000), ("ms", 1)] {
            let count = remainder / millis;
            if count > 0 {
                write!(f, "{count}{unit}")?;
                remainder %= millis;
            }
        }
        Ok(())
    }
}
