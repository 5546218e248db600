use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, de, ser};
use thiserror::Error;

/// Error produced when parsing or constructing a [`Timeframe`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeframeError {
    /// The string did not match `<positive_int><unit>`.
    #[error("invalid timeframe: {0:?}")]
    Malformed(String),
    /// The multiplier was zero or overflowed.
    #[error("timeframe multiplier out of range: {0:?}")]
    BadMultiplier(String),
    /// The unit character is not one of `m`, `h`, `d`, `w`, `M`, `y`.
    #[error("unsupported timeframe unit: {0:?}")]
    BadUnit(char),
}

/// A timeframe unit. Durations are fixed (calendar months and years use the
/// 30-day / 365-day approximations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeframeUnit {
    /// 60 seconds.
    Minute,
    /// 3600 seconds.
    Hour,
    /// 86400 seconds.
    Day,
    /// 7 days.
    Week,
    /// 30 days.
    Month,
    /// 365 days.
    Year,
}

impl TimeframeUnit {
    /// The unit character used in the wire grammar.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Minute => 'm',
            Self::Hour => 'h',
            Self::Day => 'd',
            Self::Week => 'w',
            Self::Month => 'M',
            Self::Year => 'y',
        }
    }

    /// Duration of one unit in milliseconds.
    #[must_use]
    pub const fn period_ms(self) -> i64 {
        match self {
            Self::Minute => 60_000,
            Self::Hour => 3_600_000,
            Self::Day => 86_400_000,
            Self::Week => 604_800_000,
            Self::Month => 2_592_000_000,
            Self::Year => 31_536_000_000,
        }
    }

    /// Parse a unit character.
    ///
    /// # Errors
    /// Returns [`TimeframeError::BadUnit`] for any character outside
    /// `m`, `h`, `d`, `w`, `M`, `y`.
    pub const fn from_char(c: char) -> Result<Self, TimeframeError> {
        match c {
            'm' => Ok(Self::Minute),
            'h' => Ok(Self::Hour),
            'd' => Ok(Self::Day),
            'w' => Ok(Self::Week),
            'M' => Ok(Self::Month),
            'y' => Ok(Self::Year),
            other => Err(TimeframeError::BadUnit(other)),
        }
    }
}

/// A chart timeframe: a positive multiplier and a unit, e.g. `5m`, `1h`, `1M`.
///
/// The wire form is `<positive_int><unit>`. Parsing and formatting round-trip:
/// `parse(format(tf)) == tf` for every valid value. Unit characters are
/// case-sensitive (`m` is minutes, `M` is months).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    amount: u32,
    unit: TimeframeUnit,
}

impl Timeframe {
    /// Construct a timeframe from a multiplier and unit.
    ///
    /// # Errors
    /// Returns [`TimeframeError::BadMultiplier`] when `amount` is zero.
    pub fn new(amount: u32, unit: TimeframeUnit) -> Result<Self, TimeframeError> {
        if amount == 0 {
            return Err(TimeframeError::BadMultiplier("0".into()));
        }
        Ok(Self { amount, unit })
    }

    /// One-minute timeframe, the base cadence used for resampling fallbacks.
    #[must_use]
    pub const fn one_minute() -> Self {
        Self {
            amount: 1,
            unit: TimeframeUnit::Minute,
        }
    }

    /// The multiplier.
    #[must_use]
    pub const fn amount(self) -> u32 {
        self.amount
    }

    /// The unit.
    #[must_use]
    pub const fn unit(self) -> TimeframeUnit {
        self.unit
    }

    /// Total duration of one bar in milliseconds.
    #[must_use]
    pub const fn period_ms(self) -> i64 {
        self.unit.period_ms() * self.amount as i64
    }

    /// Floor a millisecond timestamp to the open of its bucket.
    #[must_use]
    pub const fn bucket_start(self, ts_ms: i64) -> i64 {
        let p = self.period_ms();
        ts_ms.div_euclid(p) * p
    }

    /// Exclusive end of the bucket containing `ts_ms`.
    #[must_use]
    pub const fn bucket_end(self, ts_ms: i64) -> i64 {
        self.bucket_start(ts_ms) + self.period_ms()
    }

    /// Whether this timeframe is one minute exactly.
    #[must_use]
    pub fn is_one_minute(self) -> bool {
        self == Self::one_minute()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.as_char())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, rest) = s.split_at(digits_end);
        if digits.is_empty() {
            return Err(TimeframeError::Malformed(s.to_string()));
        }
        let mut rest_chars = rest.chars();
        let (Some(unit_char), None) = (rest_chars.next(), rest_chars.next()) else {
            return Err(TimeframeError::Malformed(s.to_string()));
        };
        let amount: u32 = digits
            .parse()
            .map_err(|_| TimeframeError::BadMultiplier(s.to_string()))?;
        let unit = TimeframeUnit::from_char(unit_char)?;
        Self::new(amount, unit)
    }
}

impl Serialize for Timeframe {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
