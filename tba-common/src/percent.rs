//! Exact two-decimal percentage values
//!
//! Percentages are carried as integer hundredths so that sums and running
//! totals never drift. `12.50%` is stored as `1250`, `100%` as `10000`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hundredths in one whole percent
pub const HUNDREDTHS_PER_PERCENT: i64 = 100;

/// Upper bound of a single percentage and the exact total of one submission
pub const FULL_ALLOCATION: i64 = 100 * HUNDREDTHS_PER_PERCENT;

/// A percentage in `[0, 100]` with at most two fractional digits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(try_from = "PercentRepr")]
pub struct Percent(i64);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const FULL: Percent = Percent(FULL_ALLOCATION);

    /// Build from integer hundredths, rejecting values outside `[0, 10000]`
    pub fn from_hundredths(hundredths: i64) -> Result<Self> {
        if !(0..=FULL_ALLOCATION).contains(&hundredths) {
            return Err(Error::Validation(format!(
                "Percentage must be between 0 and 100, got {}",
                format_hundredths(hundredths)
            )));
        }
        Ok(Percent(hundredths))
    }

    pub fn hundredths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / HUNDREDTHS_PER_PERCENT as f64
    }

    /// Average of `count` contributions summing to `total_hundredths`, rounded half-up
    ///
    /// Returns zero when `count` is zero. The SQL upsert in the summary table
    /// uses the same integer formula so both paths agree to the hundredth.
    pub fn average(total_hundredths: i64, count: i64) -> Percent {
        Percent(average_hundredths(total_hundredths, count))
    }
}

/// Half-up integer division of a non-negative total by a non-negative count
pub fn average_hundredths(total_hundredths: i64, count: i64) -> i64 {
    if count <= 0 {
        return 0;
    }
    (2 * total_hundredths + count) / (2 * count)
}

/// Render integer hundredths as a fixed two-decimal string
pub fn format_hundredths(hundredths: i64) -> String {
    let sign = if hundredths < 0 { "-" } else { "" };
    let abs = hundredths.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format_hundredths(self.0))
    }
}

impl FromStr for Percent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = || Error::Validation(format!("Invalid percentage: {:?}", s));

        if text.is_empty() || text.starts_with('-') || text.starts_with('+') {
            return Err(invalid());
        }

        let (whole, fraction) = match text.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (text, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if fraction.len() > 2 {
            return Err(Error::Validation(format!(
                "Percentage {:?} has more than two decimal places",
                s
            )));
        }

        // Anything longer than "100" cannot be in range; avoid overflow on absurd input
        let whole = whole.trim_start_matches('0');
        if whole.len() > 3 {
            return Err(Error::Validation(format!(
                "Percentage must be between 0 and 100, got {}",
                text
            )));
        }

        let whole_value: i64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let fraction_value: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        Percent::from_hundredths(whole_value * HUNDREDTHS_PER_PERCENT + fraction_value)
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

/// Accepted wire forms: decimal text (`"12.50"`) or a JSON number (`12.5`)
#[derive(Deserialize)]
#[serde(untagged)]
enum PercentRepr {
    Text(String),
    Number(f64),
}

impl TryFrom<PercentRepr> for Percent {
    type Error = Error;

    fn try_from(repr: PercentRepr) -> Result<Self> {
        match repr {
            PercentRepr::Text(text) => text.parse(),
            PercentRepr::Number(number) => {
                if !number.is_finite() {
                    return Err(Error::Validation(format!("Invalid percentage: {}", number)));
                }
                // Display yields the shortest round-trip form, so 12.5 -> "12.5"
                number.to_string().parse()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fractional() {
        assert_eq!("25".parse::<Percent>().unwrap().hundredths(), 2500);
        assert_eq!("12.5".parse::<Percent>().unwrap().hundredths(), 1250);
        assert_eq!("0.01".parse::<Percent>().unwrap().hundredths(), 1);
        assert_eq!(".5".parse::<Percent>().unwrap().hundredths(), 50);
        assert_eq!("100.00".parse::<Percent>().unwrap(), Percent::FULL);
        assert_eq!(" 007.10 ".parse::<Percent>().unwrap().hundredths(), 710);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", ".", "-1", "+5", "abc", "1e2", "12.345", "100.01", "1000", "5.5.5"] {
            let result = input.parse::<Percent>();
            assert!(
                matches!(result, Err(Error::Validation(_))),
                "expected validation error for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_display_two_decimals() {
        assert_eq!(Percent::from_hundredths(3000).unwrap().to_string(), "30.00");
        assert_eq!(Percent::from_hundredths(5).unwrap().to_string(), "0.05");
        assert_eq!(format_hundredths(-150), "-1.50");
    }

    #[test]
    fn test_average_rounds_half_up() {
        assert_eq!(average_hundredths(30_000, 10), 3000);
        assert_eq!(average_hundredths(33_000, 11), 3000);
        // 10.005 -> 10.01
        assert_eq!(average_hundredths(2001, 2), 1001);
        // 1/3 of a hundredth rounds down
        assert_eq!(average_hundredths(1, 3), 0);
        assert_eq!(average_hundredths(0, 0), 0);
        assert_eq!(Percent::average(6000, 3).to_string(), "20.00");
    }

    #[test]
    fn test_deserialize_text_and_number() {
        let from_text: Percent = serde_json::from_str("\"33.33\"").unwrap();
        let from_number: Percent = serde_json::from_str("33.33").unwrap();
        assert_eq!(from_text, from_number);
        assert_eq!(from_number.hundredths(), 3333);

        assert!(serde_json::from_str::<Percent>("33.333").is_err());
        assert!(serde_json::from_str::<Percent>("-1").is_err());
    }

    #[test]
    fn test_serialize_as_number() {
        let value = serde_json::to_value(Percent::from_hundredths(1250).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!(12.5));
    }
}
