// src/utils/intervals.rs
use crate::error::ConfigError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTES_PER_HOUR: u32 = 60;
const MINUTES_PER_DAY: u32 = 1440;

/// Bar interval, stored in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    minutes: u32,
}

impl Interval {
    pub fn from_minutes(minutes: u32) -> Result<Self, ConfigError> {
        if minutes == 0 {
            return Err(ConfigError::ZeroPeriod("Interval".to_string()));
        }
        Ok(Self { minutes })
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }

    /// Interval between two consecutive bar timestamps.
    pub fn between(first: DateTime<Utc>, second: DateTime<Utc>) -> Result<Self, ConfigError> {
        let seconds = (second - first).num_seconds();
        if seconds < 60 {
            return Err(ConfigError::Invalid {
                name: "data".to_string(),
                message: format!(
                    "bars {} and {} are less than a minute apart",
                    first, second
                ),
            });
        }
        Self::from_minutes((seconds / 60) as u32)
    }
}

impl FromStr for Interval {
    type Err = ConfigError;

    /// Accepts short forms (`15m`, `1h`, `1d`) and long forms (`15 Minutes`, `1 Hour`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ConfigError::UnknownInterval(s.to_string());
        let trimmed = s.trim();
        let split_at = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(unknown)?;
        let (count, unit) = trimmed.split_at(split_at);
        let count: u32 = count.parse().map_err(|_| unknown())?;

        let multiplier = match unit.trim().to_lowercase().as_str() {
            "m" | "min" | "minute" | "minutes" => 1,
            "h" | "hour" | "hours" => MINUTES_PER_HOUR,
            "d" | "day" | "days" => MINUTES_PER_DAY,
            _ => return Err(unknown()),
        };

        Self::from_minutes(count * multiplier)
    }
}

impl TryFrom<String> for Interval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (count, unit) = if self.minutes % MINUTES_PER_DAY == 0 {
            (self.minutes / MINUTES_PER_DAY, "Day")
        } else if self.minutes % MINUTES_PER_HOUR == 0 {
            (self.minutes / MINUTES_PER_HOUR, "Hour")
        } else {
            (self.minutes, "Minute")
        };
        let plural = if count > 1 { "s" } else { "" };
        write!(f, "{} {}{}", count, unit, plural)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_short_and_long_forms() {
        assert_eq!("15m".parse::<Interval>().unwrap().minutes(), 15);
        assert_eq!("1h".parse::<Interval>().unwrap().minutes(), 60);
        assert_eq!("3d".parse::<Interval>().unwrap().minutes(), 4320);
        assert_eq!("15 Minutes".parse::<Interval>().unwrap().minutes(), 15);
        assert_eq!("12 Hours".parse::<Interval>().unwrap().minutes(), 720);
        assert!("15 parsecs".parse::<Interval>().is_err());
        assert!("m".parse::<Interval>().is_err());
        assert!("0m".parse::<Interval>().is_err());
    }

    #[test]
    fn displays_long_form() {
        assert_eq!(Interval::from_minutes(1).unwrap().to_string(), "1 Minute");
        assert_eq!(Interval::from_minutes(15).unwrap().to_string(), "15 Minutes");
        assert_eq!(Interval::from_minutes(60).unwrap().to_string(), "1 Hour");
        assert_eq!(Interval::from_minutes(1440).unwrap().to_string(), "1 Day");
    }

    #[test]
    fn infers_from_timestamps() {
        let a = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2021, 1, 1, 0, 15, 0).unwrap();
        assert_eq!(Interval::between(a, b).unwrap().minutes(), 15);
        assert!(Interval::between(a, a).is_err());
    }
}
