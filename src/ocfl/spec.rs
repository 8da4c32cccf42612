use core::fmt;
use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

use const_format::concatcp;

use crate::ocfl::consts::{
    INVENTORY_TYPE_1_0, INVENTORY_TYPE_1_1, NAMASTE_PREFIX, OBJECT_NAMASTE_BASE, OCFL_SPEC_URL_BASE,
    ROOT_NAMASTE_BASE,
};
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::namaste::Namaste;

/// The OCFL spec revisions this library understands. Revisions are ordered, and an object's
/// revision may never exceed the revision of the storage root that contains it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SpecVersion {
    Ocfl1_0,
    Ocfl1_1,
}

impl SpecVersion {
    pub fn all() -> &'static [SpecVersion] {
        &[SpecVersion::Ocfl1_0, SpecVersion::Ocfl1_1]
    }

    /// The `M.N` rendering of the revision
    pub fn version_str(self) -> &'static str {
        match self {
            SpecVersion::Ocfl1_0 => "1.0",
            SpecVersion::Ocfl1_1 => "1.1",
        }
    }

    /// The URL of the published spec for this revision, with a trailing slash
    pub fn spec_url(self) -> &'static str {
        match self {
            SpecVersion::Ocfl1_0 => concatcp!(OCFL_SPEC_URL_BASE, "1.0/spec/"),
            SpecVersion::Ocfl1_1 => concatcp!(OCFL_SPEC_URL_BASE, "1.1/spec/"),
        }
    }

    /// The URI that must appear in the inventory `type` field
    pub fn inventory_type(self) -> &'static str {
        match self {
            SpecVersion::Ocfl1_0 => INVENTORY_TYPE_1_0,
            SpecVersion::Ocfl1_1 => INVENTORY_TYPE_1_1,
        }
    }

    /// The namaste declaration found at the storage root
    pub fn root_namaste(self) -> Namaste {
        match self {
            SpecVersion::Ocfl1_0 => Namaste {
                filename: concatcp!(NAMASTE_PREFIX, ROOT_NAMASTE_BASE, "1.0"),
                dvalue: concatcp!(ROOT_NAMASTE_BASE, "1.0"),
            },
            SpecVersion::Ocfl1_1 => Namaste {
                filename: concatcp!(NAMASTE_PREFIX, ROOT_NAMASTE_BASE, "1.1"),
                dvalue: concatcp!(ROOT_NAMASTE_BASE, "1.1"),
            },
        }
    }

    /// The namaste declaration found at each object root
    pub fn object_namaste(self) -> Namaste {
        match self {
            SpecVersion::Ocfl1_0 => Namaste {
                filename: concatcp!(NAMASTE_PREFIX, OBJECT_NAMASTE_BASE, "1.0"),
                dvalue: concatcp!(OBJECT_NAMASTE_BASE, "1.0"),
            },
            SpecVersion::Ocfl1_1 => Namaste {
                filename: concatcp!(NAMASTE_PREFIX, OBJECT_NAMASTE_BASE, "1.1"),
                dvalue: concatcp!(OBJECT_NAMASTE_BASE, "1.1"),
            },
        }
    }

    pub fn try_from_num(version: &str) -> Result<Self> {
        match version {
            "1.0" => Ok(SpecVersion::Ocfl1_0),
            "1.1" => Ok(SpecVersion::Ocfl1_1),
            _ => Err(OcflError::Protocol(format!(
                "Unsupported OCFL spec version: {version}"
            ))),
        }
    }

    pub fn try_from_inventory_type(uri: &str) -> Result<Self> {
        match uri {
            INVENTORY_TYPE_1_0 => Ok(SpecVersion::Ocfl1_0),
            INVENTORY_TYPE_1_1 => Ok(SpecVersion::Ocfl1_1),
            _ => Err(OcflError::Protocol(format!(
                "Unknown inventory type: {uri}"
            ))),
        }
    }

    fn ordinal(self) -> u32 {
        match self {
            SpecVersion::Ocfl1_0 => 0,
            SpecVersion::Ocfl1_1 => 1,
        }
    }
}

impl PartialOrd for SpecVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SpecVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl Display for SpecVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SpecVersion;

    #[test]
    fn revisions_are_ordered() {
        assert!(SpecVersion::Ocfl1_0 < SpecVersion::Ocfl1_1);
    }

    #[test]
    fn namaste_values() {
        assert_eq!("0=ocfl_1.1", SpecVersion::Ocfl1_1.root_namaste().filename);
        assert_eq!("ocfl_1.1", SpecVersion::Ocfl1_1.root_namaste().dvalue);
        assert_eq!(
            "0=ocfl_object_1.0",
            SpecVersion::Ocfl1_0.object_namaste().filename
        );
        assert_eq!(
            "ocfl_object_1.0",
            SpecVersion::Ocfl1_0.object_namaste().dvalue
        );
    }

    #[test]
    fn parse_version_numbers() {
        assert_eq!(
            SpecVersion::Ocfl1_0,
            SpecVersion::try_from_num("1.0").unwrap()
        );
        assert!(SpecVersion::try_from_num("0.1").is_err());
        assert!(SpecVersion::try_from_num("2.0").is_err());
    }
}
