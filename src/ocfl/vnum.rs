use core::fmt;
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ocfl::error::{OcflError, Result};

static VNUM_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^v\d+$").unwrap());

/// An object version number, `v1`, `v2`, ... Version numbers may be zero-padded, eg `v0042`,
/// in which case `width` records the total digit count and caps the largest representable
/// version. Equality, ordering, and hashing consider only the numeric value.
#[derive(Deserialize, Serialize, Debug, Copy, Clone)]
#[serde(try_from = "&str")]
#[serde(into = "String")]
pub struct VersionNum {
    pub number: u32,
    pub width: u32,
}

impl VersionNum {
    /// Creates an unpadded version number
    pub fn new(number: u32) -> Self {
        Self { number, width: 0 }
    }

    pub fn with_width(number: u32, width: u32) -> Self {
        Self { number, width }
    }

    /// The first version of an object, using the supplied padding width
    pub fn v1(width: u32) -> Self {
        Self { number: 1, width }
    }

    /// Returns the previous version, or an error if this is `v1`
    pub fn previous(&self) -> Result<VersionNum> {
        if self.number == 1 {
            return Err(OcflError::Protocol(
                "Versions cannot be less than 1".to_string(),
            ));
        }

        Ok(Self {
            number: self.number - 1,
            width: self.width,
        })
    }

    /// Returns the next version. Padded version numbers cannot exceed the largest value
    /// representable in their width, eg `v9999` for width 4.
    pub fn next(&self) -> Result<VersionNum> {
        let max = match self.width {
            0 => u64::from(u32::MAX),
            w => 10u64.pow(w) - 1,
        };

        if u64::from(self.number) + 1 > max {
            return Err(OcflError::Protocol(format!(
                "Version cannot be greater than v{max}"
            )));
        }

        Ok(Self {
            number: self.number + 1,
            width: self.width,
        })
    }
}

impl TryFrom<&str> for VersionNum {
    type Error = OcflError;

    /// Parses `v1` or `v0002` style strings. `v0` and malformed strings are rejected.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if !VNUM_REGEX.is_match(value) {
            return Err(OcflError::Protocol(format!("Invalid version: {value}")));
        }

        let num = value[1..]
            .parse::<u32>()
            .map_err(|_| OcflError::Protocol(format!("Invalid version: {value}")))?;

        if num < 1 {
            return Err(OcflError::Protocol(format!("Invalid version: {value}")));
        }

        let width = if value.starts_with("v0") {
            (value.len() - 1) as u32
        } else {
            0
        };

        Ok(Self { number: num, width })
    }
}

impl TryFrom<u32> for VersionNum {
    type Error = OcflError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value < 1 {
            return Err(OcflError::Protocol(format!("Invalid version: {value}")));
        }
        Ok(Self::new(value))
    }
}

impl FromStr for VersionNum {
    type Err = OcflError;

    /// Accepts either `v3` style strings or bare integers, for CLI arguments
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match VersionNum::try_from(s) {
            Ok(v) => Ok(v),
            Err(_) => match s.parse::<u32>() {
                Ok(num) => VersionNum::try_from(num),
                Err(_) => Err(OcflError::Protocol(format!("Invalid version: {s}"))),
            },
        }
    }
}

impl Display for VersionNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "v{:0width$}", self.number, width = self.width as usize)
    }
}

impl From<VersionNum> for String {
    fn from(value: VersionNum) -> Self {
        value.to_string()
    }
}

impl PartialEq for VersionNum {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for VersionNum {}

impl Hash for VersionNum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state)
    }
}

impl PartialOrd for VersionNum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionNum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::VersionNum;

    #[test]
    fn parse_unpadded() {
        let v = VersionNum::try_from("v3").unwrap();
        assert_eq!(3, v.number);
        assert_eq!(0, v.width);
        assert_eq!("v3", v.to_string());
    }

    #[test]
    fn parse_padded() {
        let v = VersionNum::try_from("v0042").unwrap();
        assert_eq!(42, v.number);
        assert_eq!(4, v.width);
        assert_eq!("v0042", v.to_string());
    }

    #[test]
    fn reject_invalid() {
        assert!(VersionNum::try_from("v0").is_err());
        assert!(VersionNum::try_from("3").is_err());
        assert!(VersionNum::try_from("v-1").is_err());
        assert!(VersionNum::try_from("v1.1").is_err());
        assert!(VersionNum::try_from("version1").is_err());
    }

    #[test]
    fn padded_versions_have_a_ceiling() {
        let v = VersionNum::with_width(9998, 4);
        let next = v.next().unwrap();
        assert_eq!("v9999", next.to_string());
        assert!(next.next().is_err());

        let unpadded = VersionNum::new(9999);
        assert_eq!("v10000", unpadded.next().unwrap().to_string());
    }

    #[test]
    fn previous_stops_at_v1() {
        assert!(VersionNum::new(1).previous().is_err());
        assert_eq!(
            VersionNum::new(1),
            VersionNum::new(2).previous().unwrap()
        );
    }

    #[test]
    fn equality_ignores_width() {
        assert_eq!(VersionNum::new(7), VersionNum::with_width(7, 4));
    }
}
