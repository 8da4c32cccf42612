//! Storage layout extensions map object ids to object root paths beneath the storage root.
//! The reference set is implemented here: flat-direct (0002), hash-and-id n-tuple (0003),
//! hashed n-tuple (0004), and n-tuple omit-prefix (0007). Layout functions are pure and
//! safe to cache.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use strum_macros::{Display as EnumDisplay, EnumString};

use crate::ocfl::digest::DigestAlgorithm;
use crate::ocfl::error::{OcflError, Result};

const MAX_0003_ENCAPSULATION_LENGTH: usize = 100;

static NON_ALPHA_PLUS: Lazy<AsciiSet> = Lazy::new(|| NON_ALPHANUMERIC.remove(b'-').remove(b'_'));

/// A bound layout: maps object ids to storage root relative paths
#[derive(Debug)]
pub struct StorageLayout {
    extension: LayoutExtension,
}

/// Names of the supported layout extensions
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumDisplay)]
pub enum LayoutExtensionName {
    #[strum(serialize = "0002-flat-direct-storage-layout")]
    #[serde(rename = "0002-flat-direct-storage-layout")]
    FlatDirect,
    #[strum(serialize = "0003-hash-and-id-n-tuple-storage-layout")]
    #[serde(rename = "0003-hash-and-id-n-tuple-storage-layout")]
    HashedNTupleObjectId,
    #[strum(serialize = "0004-hashed-n-tuple-storage-layout")]
    #[serde(rename = "0004-hashed-n-tuple-storage-layout")]
    HashedNTuple,
    #[strum(serialize = "0007-n-tuple-omit-prefix-storage-layout")]
    #[serde(rename = "0007-n-tuple-omit-prefix-storage-layout")]
    NTupleOmitPrefix,
}

/// The `ocfl_layout.json` descriptor at the storage root
#[derive(Deserialize, Serialize, Debug)]
pub struct LayoutDescriptor {
    pub extension: LayoutExtensionName,
    pub description: String,
}

impl StorageLayout {
    /// Binds a layout from its extension name and the raw bytes of its `config.json`, if
    /// one exists. Extensions with defaults fall back to them when the config is absent.
    pub fn new(name: LayoutExtensionName, config_bytes: Option<&[u8]>) -> Result<Self> {
        let extension = match name {
            LayoutExtensionName::FlatDirect => FlatDirectExtension::new(config_bytes)?.into(),
            LayoutExtensionName::HashedNTuple => HashedNTupleExtension::new(config_bytes)?.into(),
            LayoutExtensionName::HashedNTupleObjectId => {
                HashedNTupleObjectIdExtension::new(config_bytes)?.into()
            }
            LayoutExtensionName::NTupleOmitPrefix => {
                NTupleOmitPrefixExtension::new(config_bytes)?.into()
            }
        };

        Ok(StorageLayout { extension })
    }

    /// Maps an object id to its object root path, relative the storage root
    pub fn map_object_id(&self, object_id: &str) -> Result<String> {
        match &self.extension {
            LayoutExtension::FlatDirect(ext) => ext.map_object_id(object_id),
            LayoutExtension::HashedNTuple(ext) => ext.map_object_id(object_id),
            LayoutExtension::HashedNTupleObjectId(ext) => ext.map_object_id(object_id),
            LayoutExtension::NTupleOmitPrefix(ext) => ext.map_object_id(object_id),
        }
    }

    pub fn extension_name(&self) -> LayoutExtensionName {
        match &self.extension {
            LayoutExtension::FlatDirect(ext) => ext.config.extension_name,
            LayoutExtension::HashedNTuple(ext) => ext.config.extension_name,
            LayoutExtension::HashedNTupleObjectId(ext) => ext.config.extension_name,
            LayoutExtension::NTupleOmitPrefix(ext) => ext.config.extension_name,
        }
    }

    /// Serializes the layout's configuration for writing to `config.json`
    pub fn serialize_config(&self) -> Result<Vec<u8>> {
        let bytes = match &self.extension {
            LayoutExtension::FlatDirect(ext) => serde_json::to_vec_pretty(&ext.config)?,
            LayoutExtension::HashedNTuple(ext) => serde_json::to_vec_pretty(&ext.config)?,
            LayoutExtension::HashedNTupleObjectId(ext) => serde_json::to_vec_pretty(&ext.config)?,
            LayoutExtension::NTupleOmitPrefix(ext) => serde_json::to_vec_pretty(&ext.config)?,
        };
        Ok(bytes)
    }
}

#[derive(Debug)]
enum LayoutExtension {
    FlatDirect(FlatDirectExtension),
    HashedNTuple(HashedNTupleExtension),
    HashedNTupleObjectId(HashedNTupleObjectIdExtension),
    NTupleOmitPrefix(NTupleOmitPrefixExtension),
}

macro_rules! extension_from {
    ($ext:ident, $variant:ident) => {
        impl From<$ext> for LayoutExtension {
            fn from(extension: $ext) -> Self {
                LayoutExtension::$variant(extension)
            }
        }
    };
}

extension_from!(FlatDirectExtension, FlatDirect);
extension_from!(HashedNTupleExtension, HashedNTuple);
extension_from!(HashedNTupleObjectIdExtension, HashedNTupleObjectId);
extension_from!(NTupleOmitPrefixExtension, NTupleOmitPrefix);

fn invalid_id(object_id: &str, reason: &str) -> OcflError {
    OcflError::Protocol(format!(
        "Object id '{object_id}' cannot be mapped to a storage path: {reason}"
    ))
}

// ================ 0002 flat direct ================

#[derive(Debug)]
struct FlatDirectExtension {
    config: FlatDirectConfig,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct FlatDirectConfig {
    extension_name: LayoutExtensionName,
}

impl Default for FlatDirectConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::FlatDirect,
        }
    }
}

impl FlatDirectExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(bytes) => {
                let config: FlatDirectConfig = serde_json::from_slice(bytes)?;
                expect_name(LayoutExtensionName::FlatDirect, config.extension_name)?;
                config
            }
            None => FlatDirectConfig::default(),
        };

        Ok(Self { config })
    }

    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if object_id.contains('/') {
            return Err(invalid_id(object_id, "it contains a path separator"));
        }
        if object_id == "." || object_id == ".." || object_id.is_empty() {
            return Err(invalid_id(object_id, "it is not a valid directory name"));
        }
        Ok(object_id.to_string())
    }
}

// ================ 0004 hashed n-tuple ================

#[derive(Debug)]
struct HashedNTupleExtension {
    config: HashedNTupleConfig,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct HashedNTupleConfig {
    extension_name: LayoutExtensionName,
    digest_algorithm: DigestAlgorithm,
    tuple_size: usize,
    number_of_tuples: usize,
    short_object_root: bool,
}

impl Default for HashedNTupleConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::HashedNTuple,
            digest_algorithm: DigestAlgorithm::Sha256,
            tuple_size: 3,
            number_of_tuples: 3,
            short_object_root: false,
        }
    }
}

impl HashedNTupleExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(bytes) => {
                let config: HashedNTupleConfig = serde_json::from_slice(bytes)?;
                expect_name(LayoutExtensionName::HashedNTuple, config.extension_name)?;
                validate_tuple_config(config.tuple_size, config.number_of_tuples)?;
                validate_tuple_digest(
                    config.digest_algorithm,
                    config.tuple_size,
                    config.number_of_tuples,
                )?;
                config
            }
            None => HashedNTupleConfig::default(),
        };

        Ok(Self { config })
    }

    fn map_object_id(&self, object_id: &str) -> Result<String> {
        let digest: String = self
            .config
            .digest_algorithm
            .hash_hex(&mut object_id.as_bytes())?
            .into();

        if self.config.tuple_size == 0 {
            return Ok(digest);
        }

        let mut path = to_tuples(&digest, self.config.tuple_size, self.config.number_of_tuples);

        if self.config.short_object_root {
            let start = self.config.tuple_size * self.config.number_of_tuples;
            path.push_str(&digest[start..]);
        } else {
            path.push_str(&digest);
        }

        Ok(path)
    }
}

// ================ 0003 hash and id n-tuple ================

#[derive(Debug)]
struct HashedNTupleObjectIdExtension {
    config: HashedNTupleObjectIdConfig,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase", default)]
struct HashedNTupleObjectIdConfig {
    extension_name: LayoutExtensionName,
    digest_algorithm: DigestAlgorithm,
    tuple_size: usize,
    number_of_tuples: usize,
}

impl Default for HashedNTupleObjectIdConfig {
    fn default() -> Self {
        Self {
            extension_name: LayoutExtensionName::HashedNTupleObjectId,
            digest_algorithm: DigestAlgorithm::Sha256,
            tuple_size: 3,
            number_of_tuples: 3,
        }
    }
}

impl HashedNTupleObjectIdExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(bytes) => {
                let config: HashedNTupleObjectIdConfig = serde_json::from_slice(bytes)?;
                expect_name(
                    LayoutExtensionName::HashedNTupleObjectId,
                    config.extension_name,
                )?;
                validate_tuple_config(config.tuple_size, config.number_of_tuples)?;
                validate_tuple_digest(
                    config.digest_algorithm,
                    config.tuple_size,
                    config.number_of_tuples,
                )?;
                config
            }
            None => HashedNTupleObjectIdConfig::default(),
        };

        Ok(Self { config })
    }

    /// Like 0004, but the leaf directory is the percent-encoded object id, falling back to
    /// the digest when the encoded id exceeds 100 bytes
    fn map_object_id(&self, object_id: &str) -> Result<String> {
        let digest: String = self
            .config
            .digest_algorithm
            .hash_hex(&mut object_id.as_bytes())?
            .into();

        if self.config.tuple_size == 0 {
            return Ok(digest);
        }

        let mut path = to_tuples(&digest, self.config.tuple_size, self.config.number_of_tuples);

        // percent-encoding produces uppercase hex escapes; the extension requires lowercase
        let encoded = utf8_percent_encode(object_id, &NON_ALPHA_PLUS).to_string();
        let lower = lower_percent_escapes(&encoded);

        if lower.len() <= MAX_0003_ENCAPSULATION_LENGTH {
            path.push_str(&lower);
        } else {
            path.push_str(&lower[..MAX_0003_ENCAPSULATION_LENGTH]);
            path.push('-');
            path.push_str(&digest);
        }

        Ok(path)
    }
}

// ================ 0007 n-tuple omit prefix ================

#[derive(Debug)]
struct NTupleOmitPrefixExtension {
    config: NTupleOmitPrefixConfig,
    case_matters: bool,
    normalized_delimiter: String,
    width: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, EnumDisplay)]
enum Padding {
    #[strum(serialize = "left")]
    #[serde(rename = "left")]
    Left,
    #[strum(serialize = "right")]
    #[serde(rename = "right")]
    Right,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct NTupleOmitPrefixConfig {
    extension_name: LayoutExtensionName,
    delimiter: String,
    #[serde(default = "default_tuple")]
    tuple_size: usize,
    #[serde(default = "default_tuple")]
    number_of_tuples: usize,
    #[serde(default = "default_padding")]
    zero_padding: Padding,
    #[serde(default)]
    reverse_object_root: bool,
}

impl NTupleOmitPrefixExtension {
    fn new(config_bytes: Option<&[u8]>) -> Result<Self> {
        let config = match config_bytes {
            Some(bytes) => {
                let config: NTupleOmitPrefixConfig = serde_json::from_slice(bytes)?;
                expect_name(LayoutExtensionName::NTupleOmitPrefix, config.extension_name)?;
                config.validate()?;
                config
            }
            None => {
                return Err(OcflError::Protocol(
                    "The n-tuple omit-prefix layout requires a configuration".to_string(),
                ))
            }
        };

        let case_matters = config.delimiter.to_lowercase() != config.delimiter.to_uppercase();
        let normalized_delimiter = if case_matters {
            config.delimiter.to_lowercase()
        } else {
            config.delimiter.clone()
        };

        Ok(Self {
            width: config.tuple_size * config.number_of_tuples,
            config,
            case_matters,
            normalized_delimiter,
        })
    }

    fn map_object_id(&self, object_id: &str) -> Result<String> {
        if !object_id.is_ascii() {
            return Err(invalid_id(object_id, "it contains non-ASCII characters"));
        }

        let test_id = if self.case_matters {
            Cow::Owned(object_id.to_lowercase())
        } else {
            Cow::Borrowed(object_id)
        };

        let id_part = match test_id.rfind(&self.normalized_delimiter) {
            None => object_id,
            Some(index) => {
                let end = index + self.normalized_delimiter.len();
                if object_id.len() == end {
                    return Err(invalid_id(object_id, "it ends with the delimiter"));
                }
                &object_id[end..]
            }
        };

        let mut padded = match self.config.zero_padding {
            Padding::Left => format!("{:0>width$}", id_part, width = self.width),
            Padding::Right => format!("{:0<width$}", id_part, width = self.width),
        };

        if self.config.reverse_object_root {
            padded = padded.chars().rev().collect();
        }

        let mut path = to_tuples(&padded, self.config.tuple_size, self.config.number_of_tuples);
        path.push_str(id_part);
        Ok(path)
    }
}

impl NTupleOmitPrefixConfig {
    fn validate(&self) -> Result<()> {
        if self.delimiter.is_empty() {
            return Err(OcflError::Protocol(
                "Layout delimiter must be non-empty".to_string(),
            ));
        }

        if !(1..=32).contains(&self.tuple_size) {
            return Err(OcflError::Protocol(format!(
                "tupleSize must be between 1 and 32, inclusive. Found: {}",
                self.tuple_size
            )));
        }

        if !(1..=32).contains(&self.number_of_tuples) {
            return Err(OcflError::Protocol(format!(
                "numberOfTuples must be between 1 and 32, inclusive. Found: {}",
                self.number_of_tuples
            )));
        }

        Ok(())
    }
}

fn default_tuple() -> usize {
    3
}

fn default_padding() -> Padding {
    Padding::Left
}

/// Splits the value into N tuples of M chars, `/` joined with a trailing `/`
fn to_tuples(value: &str, tuple_size: usize, number_of_tuples: usize) -> String {
    let mut path = String::new();

    for i in 0..number_of_tuples {
        let start = i * tuple_size;
        path.push_str(&value[start..start + tuple_size]);
        path.push('/');
    }

    path
}

/// Lowercases the hex of percent escape sequences without touching other characters.
/// Assumes every non-ASCII byte has already been percent encoded.
fn lower_percent_escapes(original: &str) -> Cow<str> {
    if !original.contains('%') {
        return original.into();
    }

    let mut out = String::with_capacity(original.len());
    let mut remaining = 0;

    for c in original.chars() {
        if remaining > 0 {
            out.push(c.to_ascii_lowercase());
            remaining -= 1;
        } else {
            if c == '%' {
                remaining = 2;
            }
            out.push(c);
        }
    }

    Cow::Owned(out)
}

fn expect_name(expected: LayoutExtensionName, actual: LayoutExtensionName) -> Result<()> {
    if expected != actual {
        return Err(OcflError::Protocol(format!(
            "Expected layout extension {expected}; found {actual}"
        )));
    }
    Ok(())
}

fn validate_tuple_config(tuple_size: usize, number_of_tuples: usize) -> Result<()> {
    if (tuple_size == 0) != (number_of_tuples == 0) {
        return Err(OcflError::Protocol(format!(
            "If tupleSize ({tuple_size}) or numberOfTuples ({number_of_tuples}) is 0, both must be 0"
        )));
    }
    Ok(())
}

fn validate_tuple_digest(
    algorithm: DigestAlgorithm,
    tuple_size: usize,
    number_of_tuples: usize,
) -> Result<()> {
    let digest: String = algorithm.hash_hex(&mut "probe".as_bytes())?.into();
    let needed = tuple_size * number_of_tuples;

    if digest.len() < needed {
        return Err(OcflError::Protocol(format!(
            "tupleSize={tuple_size} and numberOfTuples={number_of_tuples} require at least \
             {needed} characters, but {algorithm} digests only have {}",
            digest.len()
        )));
    }

    Ok(())
}
