use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ocfl::consts::{DEFAULT_CONTENT_DIR, INVENTORY_FILE};
use crate::ocfl::digest::{DigestAlgorithm, HexDigest};
use crate::ocfl::digestmap::DigestMap;
use crate::ocfl::error::{not_found, OcflError, Result};
use crate::ocfl::path::{validate_content_dir, ContentPath, LogicalPath};
use crate::ocfl::spec::SpecVersion;
use crate::ocfl::vnum::VersionNum;

static SIDECAR_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\t ]+").unwrap());

/// The per-object inventory document. Deserialization is strict: unknown fields are
/// rejected, timestamps must be RFC 3339 with a timezone, and the digest maps reject
/// duplicate paths and case-colliding digests as they are read. Call
/// [`Inventory::validate_shallow`] after decoding to enforce the joint rules.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Inventory {
    pub id: String,
    #[serde(rename = "type")]
    pub type_declaration: String,
    pub digest_algorithm: DigestAlgorithm,
    pub head: VersionNum,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_directory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixity: Option<BTreeMap<String, DigestMap<ContentPath>>>,
    pub manifest: DigestMap<ContentPath>,
    pub versions: BTreeMap<VersionNum, VersionRecord>,
}

/// One entry in the inventory's `versions` map
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct VersionRecord {
    #[serde(with = "rfc3339")]
    pub created: DateTime<FixedOffset>,
    pub state: DigestMap<LogicalPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>, address: Option<String>) -> Self {
        Self {
            name: Some(name.into()),
            address,
        }
    }
}

/// Strict RFC 3339 codec for `created`: a timezone and at least seconds precision are
/// required on read.
mod rfc3339 {
    use chrono::{DateTime, FixedOffset, SecondsFormat};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<FixedOffset>, D::Error> {
        let value = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&value).map_err(|e| {
            serde::de::Error::custom(format!("invalid RFC 3339 timestamp '{value}': {e}"))
        })
    }
}

impl Inventory {
    /// Creates an inventory for a brand new object with no versions yet. The caller adds
    /// the first version before serializing.
    pub fn new_object(
        id: impl Into<String>,
        spec: SpecVersion,
        digest_algorithm: DigestAlgorithm,
        head: VersionNum,
        content_directory: Option<String>,
    ) -> Result<Self> {
        if !digest_algorithm.content_addressing() {
            return Err(OcflError::Protocol(format!(
                "The inventory digest algorithm must be sha512 or sha256. Found: {digest_algorithm}"
            )));
        }

        if let Some(dir) = &content_directory {
            validate_content_dir(dir)?;
        }

        Ok(Self {
            id: id.into(),
            type_declaration: spec.inventory_type().to_string(),
            digest_algorithm,
            head,
            content_directory,
            fixity: None,
            manifest: DigestMap::empty(),
            versions: BTreeMap::new(),
        })
    }

    /// The spec revision this inventory declares through its `type` field
    pub fn spec_version(&self) -> Result<SpecVersion> {
        SpecVersion::try_from_inventory_type(&self.type_declaration)
    }

    pub fn head_version(&self) -> Result<&VersionRecord> {
        self.get_version(self.head)
    }

    pub fn get_version(&self, version_num: VersionNum) -> Result<&VersionRecord> {
        self.versions
            .get(&version_num)
            .ok_or_else(|| not_found(&self.id, Some(&version_num.to_string())))
    }

    /// The first content path mapped to the digest. Multiple content paths per digest are
    /// legal for deduplicated content; the first is canonical for reads.
    pub fn content_path_for_digest(&self, digest: &HexDigest) -> Result<&ContentPath> {
        self.manifest
            .paths_for(digest)
            .and_then(|paths| paths.first())
            .ok_or_else(|| OcflError::MissingDigest(digest.to_string()))
    }

    pub fn defaulted_content_dir(&self) -> &str {
        self.content_directory
            .as_deref()
            .unwrap_or(DEFAULT_CONTENT_DIR)
    }

    /// Enforces the joint rules that field-level decoding cannot: the digest algorithm is a
    /// content addressing algorithm, versions are a gapless `v1..head` run with consistent
    /// padding, every state digest appears in the manifest, and the digest maps contain no
    /// prefix conflicts.
    pub fn validate_shallow(&self) -> Result<()> {
        let violation = |code: &str, message: String| OcflError::Validation {
            code: code.to_string(),
            message: format!("Object {}: {}", self.id, message),
        };

        if !self.digest_algorithm.content_addressing() {
            return Err(violation(
                "E025",
                format!(
                    "digestAlgorithm must be sha512 or sha256. Found: {}",
                    self.digest_algorithm
                ),
            ));
        }

        self.spec_version()?;

        if let Some(dir) = &self.content_directory {
            validate_content_dir(dir)
                .map_err(|_| violation("E017", format!("invalid contentDirectory '{dir}'")))?;
        }

        if self.versions.is_empty() {
            return Err(violation("E008", "inventory contains no versions".to_string()));
        }

        let mut expected = 1;
        let width = self.versions.keys().next().map(|v| v.width).unwrap_or(0);

        for version_num in self.versions.keys() {
            if version_num.number != expected {
                return Err(violation(
                    "E010",
                    format!("version sequence has a gap: expected v{expected}, found {version_num}"),
                ));
            }
            if version_num.width != width {
                return Err(violation(
                    "E012",
                    format!("version {version_num} does not use the object's zero-padding width"),
                ));
            }
            expected += 1;
        }

        let highest = *self.versions.keys().next_back().unwrap();
        if self.head != highest {
            return Err(violation(
                "E040",
                format!("head is {} but the highest version is {}", self.head, highest),
            ));
        }

        self.manifest.validate()?;

        for (version_num, version) in &self.versions {
            version.state.validate()?;

            let mut missing = None;
            version.state.for_each(|digest, _| {
                if missing.is_none() && !self.manifest.has_digest(digest) {
                    missing = Some(digest.clone());
                }
            });

            if let Some(digest) = missing {
                return Err(violation(
                    "E050",
                    format!("state digest {digest} in {version_num} is not present in the manifest"),
                ));
            }

            if let Some(user) = &version.user {
                if user.name.is_none() {
                    return Err(violation(
                        "E054",
                        format!("version {version_num} has a user with no name"),
                    ));
                }
            }
        }

        if let Some(fixity) = &self.fixity {
            for map in fixity.values() {
                map.validate()?;
            }
        }

        Ok(())
    }

    /// Parses inventory bytes and runs the shallow validation
    pub fn from_slice(bytes: &[u8]) -> Result<Inventory> {
        let inventory: Inventory = serde_json::from_slice(bytes)?;
        inventory.validate_shallow()?;
        Ok(inventory)
    }

    /// Renders the inventory as pretty-printed JSON with a trailing newline
    pub fn to_pretty_json(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Digest-normalized equality, as required by the round-trip laws: digests are compared
    /// case insensitively and path list order is ignored.
    pub fn eq_normalized(&self, other: &Inventory) -> bool {
        if self.id != other.id
            || self.type_declaration != other.type_declaration
            || self.digest_algorithm != other.digest_algorithm
            || self.head != other.head
            || self.defaulted_content_dir() != other.defaulted_content_dir()
            || !self.manifest.equal(&other.manifest)
            || self.versions.len() != other.versions.len()
        {
            return false;
        }

        for (version_num, version) in &self.versions {
            match other.versions.get(version_num) {
                Some(other_version) => {
                    if version.created != other_version.created
                        || version.message != other_version.message
                        || version.user != other_version.user
                        || !version.state.equal(&other_version.state)
                    {
                        return false;
                    }
                }
                None => return false,
            }
        }

        match (&self.fixity, &other.fixity) {
            (None, None) => (),
            (Some(left), Some(right)) => {
                if left.len() != right.len() {
                    return false;
                }
                for (algorithm, map) in left {
                    match right.get(algorithm) {
                        Some(other_map) if map.equal(other_map) => (),
                        _ => return false,
                    }
                }
            }
            _ => return false,
        }

        true
    }
}

impl VersionRecord {
    pub fn new(
        created: DateTime<FixedOffset>,
        state: DigestMap<LogicalPath>,
        message: Option<String>,
        user: Option<User>,
    ) -> Self {
        Self {
            created,
            state,
            message,
            user,
        }
    }
}

/// The name of an inventory sidecar for the given algorithm, eg `inventory.json.sha512`
pub fn sidecar_name(algorithm: DigestAlgorithm) -> String {
    format!("{INVENTORY_FILE}.{algorithm}")
}

/// The canonical sidecar content for a digest
pub fn sidecar_line(digest: &HexDigest) -> String {
    format!("{digest} {INVENTORY_FILE}\n")
}

/// Parses sidecar bytes. The first whitespace-delimited token is the digest; the remainder,
/// ignoring trailing whitespace, must be `inventory.json`. Both space and tab separators
/// are accepted.
pub fn parse_sidecar(bytes: &[u8]) -> Result<HexDigest> {
    let invalid = || OcflError::Validation {
        code: "E061".to_string(),
        message: "Inventory sidecar is invalid".to_string(),
    };

    let content = std::str::from_utf8(bytes).map_err(|_| invalid())?;
    let parts: Vec<&str> = SIDECAR_SPLIT.split(content.trim_end()).collect();

    if parts.len() != 2 || parts[0].is_empty() || parts[1] != INVENTORY_FILE {
        return Err(invalid());
    }

    Ok(HexDigest::from(parts[0]))
}
