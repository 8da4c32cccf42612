//! The registry of validation codes. Every diagnostic the validator raises pairs one of
//! these codes with the spec revision of the object being validated; the revision selects
//! the reference URL. Structural checks never branch on the revision themselves.

use core::fmt;
use std::fmt::{Display, Formatter};

use strum_macros::{Display as EnumDisplay, EnumString};

use crate::ocfl::spec::SpecVersion;

/// Error codes from the published validation code tables. `fatal` diagnostics carry one of
/// these; a nonempty fatal list means the object is invalid.
#[allow(dead_code)]
#[derive(Debug, EnumDisplay, EnumString, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    E001, E002, E003, E004, E005, E006, E007, E008, E009, E010,
    E011, E012, E013, E014, E015, E016, E017, E018, E019, E020,
    E021, E022, E023, E024, E025, E026, E027, E028, E029, E030,
    E031, E032, E033, E034, E035, E036, E037, E038, E039, E040,
    E041, E042, E043, E044, E045, E046, E047, E048, E049, E050,
    E051, E052, E053, E054, E055, E056, E057, E058, E059, E060,
    E061, E062, E063, E064, E066, E067, E068, E069, E070, E071,
    E072, E073, E074, E075, E076, E077, E078, E079, E080, E081,
    E082, E083, E084, E085, E086, E087, E088, E089, E090, E091,
    E092, E093, E094, E095, E096, E097, E098, E099, E100, E101,
    E102, E103, E104, E105, E106, E107, E108, E109, E110, E111,
}

/// Warning codes. `warn` diagnostics are advisory and never invalidate an object.
#[allow(dead_code)]
#[derive(Debug, EnumDisplay, EnumString, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WarnCode {
    W001, W002, W003, W004, W005, W006, W007, W008, W009, W010,
    W011, W012, W013, W014, W015, W016,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Severity {
    Error,
    Warning,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A code resolved against a spec revision: its description and stable reference URL
#[derive(Debug, Clone)]
pub struct CodeRef {
    pub code: String,
    pub severity: Severity,
    pub description: &'static str,
    pub url: String,
}

impl ErrorCode {
    pub fn describe(self, spec: SpecVersion) -> CodeRef {
        CodeRef {
            code: self.to_string(),
            severity: Severity::Error,
            description: self.description(),
            url: format!("{}#{}", spec.spec_url(), self),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::E001 => "The object root must not contain files or directories other than those specified",
            ErrorCode::E003 => "The object root must contain exactly one conformance declaration",
            ErrorCode::E007 => "The conformance declaration's contents must equal its dvalue followed by a newline",
            ErrorCode::E008 => "An object must have at least one version",
            ErrorCode::E009 => "Version numbering must start at v1",
            ErrorCode::E010 => "The version sequence must be continuous with no missing versions",
            ErrorCode::E012 => "All version numbers of an object must use the same zero-padding",
            ErrorCode::E017 => "contentDirectory must not contain a forward slash",
            ErrorCode::E018 => "contentDirectory must not be '.' or '..'",
            ErrorCode::E019 => "contentDirectory must not change between versions",
            ErrorCode::E023 => "Every file in a version's content directory must be referenced in the manifest",
            ErrorCode::E024 => "Version content directories must not contain empty directories",
            ErrorCode::E025 => "digestAlgorithm must be sha512 or sha256",
            ErrorCode::E033 => "The inventory must be well-formed JSON",
            ErrorCode::E036 => "The inventory must include id, type, digestAlgorithm, and head",
            ErrorCode::E037 => "The inventory id must match the expected object id",
            ErrorCode::E038 => "The inventory type must be the inventory type URI of the object's spec revision",
            ErrorCode::E040 => "head must reference the highest version of the object",
            ErrorCode::E041 => "The inventory must include a well-formed manifest",
            ErrorCode::E043 => "The inventory must include a versions block",
            ErrorCode::E046 => "Version directories must correspond to the versions listed in the inventory",
            ErrorCode::E048 => "Every version must have a created timestamp",
            ErrorCode::E049 => "created must be an RFC 3339 timestamp with a timezone and seconds precision",
            ErrorCode::E050 => "Every state digest must appear in the manifest, and state must be a well-formed digest map",
            ErrorCode::E052 => "Logical paths must not begin or end with a forward slash",
            ErrorCode::E053 => "Logical paths must not contain '.', '..', or empty segments",
            ErrorCode::E054 => "A version user must have a name",
            ErrorCode::E057 => "The fixity block must map algorithm ids to well-formed digest maps",
            ErrorCode::E058 => "Every inventory must have a sidecar recording its digest",
            ErrorCode::E060 => "The inventory's digest must match the digest recorded in its sidecar",
            ErrorCode::E061 => "The sidecar must contain a digest followed by 'inventory.json'",
            ErrorCode::E063 => "The object root must contain an inventory",
            ErrorCode::E064 => "The root inventory and the head version's inventory must be byte-identical",
            ErrorCode::E066 => "Each version listed in a prior inventory must describe the same state as the root inventory",
            ErrorCode::E069 => "The storage root must contain exactly one conformance declaration",
            ErrorCode::E070 => "The storage root layout descriptor must name an extension and a description",
            ErrorCode::E073 => "The storage hierarchy must not contain empty directories",
            ErrorCode::E081 => "An object's spec revision must not exceed the storage root's",
            ErrorCode::E084 => "The storage hierarchy must not contain files outside of object roots",
            ErrorCode::E092 => "Every manifest entry must resolve to a file whose digest matches",
            ErrorCode::E093 => "Every fixity entry must match the digest of its content file",
            ErrorCode::E094 => "A version message must be a string",
            ErrorCode::E095 => "Logical paths within a version must be unique and non-conflicting",
            ErrorCode::E096 => "Digests must be unique within a digest map, compared case insensitively",
            ErrorCode::E100 => "Content paths must not begin or end with a forward slash",
            ErrorCode::E101 => "Content paths must be unique and non-conflicting",
            ErrorCode::E102 => "The inventory must not contain unknown fields",
            _ => "Violation of the OCFL specification",
        }
    }
}

impl WarnCode {
    pub fn describe(self, spec: SpecVersion) -> CodeRef {
        CodeRef {
            code: self.to_string(),
            severity: Severity::Warning,
            description: self.description(),
            url: format!("{}#{}", spec.spec_url(), self),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            WarnCode::W001 => "Version numbers should not be zero-padded",
            WarnCode::W002 => "Version directories should contain only the content directory and inventory files",
            WarnCode::W004 => "sha512 should be used rather than sha256",
            WarnCode::W005 => "The object id should be a URI",
            WarnCode::W007 => "Versions should record a message and a user",
            WarnCode::W008 => "A version user should have an address",
            WarnCode::W009 => "A user address should be a URI",
            WarnCode::W010 => "Each version directory should contain an inventory",
            WarnCode::W011 => "Version metadata should be consistent between inventories",
            WarnCode::W013 => "Fixity should use algorithms from the registry",
            WarnCode::W014 => "A layout extension directory should contain a config.json",
            WarnCode::W015 => "The storage root should not contain unexpected files",
            _ => "Advisory recommendation of the OCFL specification",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorCode, WarnCode};
    use crate::ocfl::spec::SpecVersion;
    use std::str::FromStr;

    #[test]
    fn urls_are_versioned_by_spec_revision() {
        let code = ErrorCode::E092.describe(SpecVersion::Ocfl1_0);
        assert_eq!("https://ocfl.io/1.0/spec/#E092", code.url);

        let code = ErrorCode::E092.describe(SpecVersion::Ocfl1_1);
        assert_eq!("https://ocfl.io/1.1/spec/#E092", code.url);

        let warn = WarnCode::W004.describe(SpecVersion::Ocfl1_1);
        assert_eq!("https://ocfl.io/1.1/spec/#W004", warn.url);
    }

    #[test]
    fn codes_parse_from_strings() {
        assert_eq!(ErrorCode::E073, ErrorCode::from_str("E073").unwrap());
        assert_eq!(WarnCode::W004, WarnCode::from_str("W004").unwrap());
        assert!(ErrorCode::from_str("E999").is_err());
    }
}
