use core::fmt;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};
use std::str::Split;

use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::vnum::VersionNum;

/// Checks a path against the rules shared by logical and content paths: forward-slash
/// separated, non-empty, no leading or trailing `/`, and no `.`, `..`, or empty segments.
pub fn validate_path(value: &str) -> Result<()> {
    if value.is_empty() || value == "." {
        return Err(OcflError::InvalidPath(value.to_string()));
    }

    if value.starts_with('/') || value.ends_with('/') {
        return Err(OcflError::InvalidPath(value.to_string()));
    }

    let illegal = value
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..");

    if illegal {
        return Err(OcflError::InvalidPath(value.to_string()));
    }

    Ok(())
}

/// Checks a content directory name: a single path segment that is not `.` or `..`
pub fn validate_content_dir(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(OcflError::Protocol(format!(
            "Invalid content directory name: '{name}'"
        )));
    }
    Ok(())
}

/// Common behavior of validated inventory paths
pub trait InventoryPath:
    Clone + Eq + Ord + std::hash::Hash + Serialize + serde::de::DeserializeOwned + Display
{
    fn parse(value: &str) -> Result<Self>;

    fn as_str(&self) -> &str;

    /// Each `/`-separated segment of the path
    fn segments(&self) -> Split<char> {
        self.as_str().split('/')
    }

    /// The part after the final `/`, or the whole path if there is none
    fn filename(&self) -> &str {
        match self.as_str().rfind('/') {
            Some(i) => &self.as_str()[i + 1..],
            None => self.as_str(),
        }
    }

    /// The parent directory, or `None` when the path is a bare filename
    fn parent(&self) -> Option<&str> {
        self.as_str().rfind('/').map(|i| &self.as_str()[..i])
    }

    /// Every proper ancestor directory of the path, nearest first.
    /// `a/b/c` yields `a/b` then `a`.
    fn ancestors(&self) -> Ancestors {
        Ancestors {
            remaining: self.parent(),
        }
    }
}

pub struct Ancestors<'a> {
    remaining: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.remaining?;
        self.remaining = current.rfind('/').map(|i| &current[..i]);
        Some(current)
    }
}

macro_rules! path_newtype {
    ($name:ident, $expecting:literal) => {
        #[derive(Debug, Clone, Eq, Ord, PartialOrd, PartialEq, Hash)]
        pub struct $name(String);

        impl InventoryPath for $name {
            fn parse(value: &str) -> Result<Self> {
                validate_path(value)?;
                Ok(Self(value.to_string()))
            }

            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<&str> for $name {
            type Error = OcflError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::parse(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = OcflError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate_path(&value)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                struct PathVisitor;

                impl<'de> Visitor<'de> for PathVisitor {
                    type Value = $name;

                    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
                        formatter.write_str($expecting)
                    }

                    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                        $name::parse(v).map_err(|e| E::custom(e.to_string()))
                    }
                }

                deserializer.deserialize_str(PathVisitor)
            }
        }
    };
}

path_newtype!(LogicalPath, "a valid logical path");
path_newtype!(ContentPath, "a valid content path");

impl ContentPath {
    /// Content paths are relative the object root and must begin with a version directory
    pub fn version_num(&self) -> Result<VersionNum> {
        match self.0.find('/') {
            Some(i) => VersionNum::try_from(&self.0[..i]),
            None => Err(OcflError::InvalidPath(format!(
                "Content path '{}' must begin with a version directory",
                self.0
            ))),
        }
    }
}
