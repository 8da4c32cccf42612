//! Read-side view of a single object: an immutable snapshot of its parsed inventory plus
//! the virtual filesystem each version's state describes.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};

use crate::ocfl::digest::HexDigest;
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::inventory::{self, Inventory};
use crate::ocfl::namaste::{self, DeclarationLevel};
use crate::ocfl::path::{InventoryPath, LogicalPath};
use crate::ocfl::spec::SpecVersion;
use crate::ocfl::vfs::{join, Vfs, VfsFile};
use crate::ocfl::vnum::VersionNum;

/// An immutable snapshot of one object, loaded from storage. The root inventory's sidecar
/// digest is re-verified against the bytes actually read.
pub struct Object {
    pub id: String,
    /// Path of the object root relative the storage root
    pub object_root: String,
    /// The spec revision declared by the object's namaste
    pub spec: SpecVersion,
    pub inventory: Inventory,
    /// The verified digest of the root inventory bytes
    pub sidecar_digest: HexDigest,
    fs: Arc<dyn Vfs>,
}

/// A logical file opened through a version's state
pub struct StateFile {
    pub file: Box<dyn VfsFile>,
    pub size: u64,
    /// Synthesized modification time: the creation time of the version
    pub mtime: DateTime<FixedOffset>,
}

/// An entry returned by [`VersionState::read_dir`]
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct StateEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A change between two version states
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StateChange {
    Added(LogicalPath),
    Modified(LogicalPath),
    Removed(LogicalPath),
}

/// The virtual filesystem of one version of an object
pub struct VersionState<'a> {
    object: &'a Object,
    pub version_num: VersionNum,
}

impl Object {
    /// Loads the object rooted at `object_root`. When `max_spec` is supplied, the object's
    /// declared revision may not exceed it (the storage root's revision caps its objects).
    pub fn load(fs: Arc<dyn Vfs>, object_root: &str, max_spec: Option<SpecVersion>) -> Result<Object> {
        let entries = fs.read_dir(object_root)?;

        if entries.is_empty() {
            return Err(OcflError::NotFound(format!(
                "No object found at {object_root}"
            )));
        }

        let declaration = namaste::find_declaration(&entries, DeclarationLevel::Object)?;
        let spec = declaration.spec;
        namaste::validate(&fs, object_root, spec.object_namaste())?;

        if let Some(max_spec) = max_spec {
            if spec > max_spec {
                return Err(OcflError::Validation {
                    code: "E081".to_string(),
                    message: format!(
                        "Object at '{object_root}' declares OCFL {spec} but the storage root is OCFL {max_spec}"
                    ),
                });
            }
        }

        let mut inventory_bytes = Vec::new();
        fs.read(
            &join(object_root, crate::ocfl::consts::INVENTORY_FILE),
            &mut inventory_bytes,
        )?;

        let inventory = Inventory::from_slice(&inventory_bytes)?;

        if inventory.spec_version()? != spec {
            return Err(OcflError::Validation {
                code: "E038".to_string(),
                message: format!(
                    "Object {} declares OCFL {} but its inventory type is '{}'",
                    inventory.id, spec, inventory.type_declaration
                ),
            });
        }

        let sidecar_digest = verify_sidecar(&fs, object_root, &inventory, &inventory_bytes)?;

        Ok(Object {
            id: inventory.id.clone(),
            object_root: object_root.to_string(),
            spec,
            inventory,
            sidecar_digest,
            fs,
        })
    }

    /// The state of the head version
    pub fn head_state(&self) -> Result<VersionState> {
        self.state(self.inventory.head)
    }

    /// The state of a specific version
    pub fn state(&self, version_num: VersionNum) -> Result<VersionState> {
        self.inventory.get_version(version_num)?;
        Ok(VersionState {
            object: self,
            version_num,
        })
    }

    /// All version numbers, ascending
    pub fn versions(&self) -> impl Iterator<Item = VersionNum> + '_ {
        self.inventory.versions.keys().copied()
    }
}

impl<'a> VersionState<'a> {
    fn record(&self) -> &inventory::VersionRecord {
        // The version's existence was checked when the state was created
        self.object
            .inventory
            .versions
            .get(&self.version_num)
            .unwrap()
    }

    pub fn created(&self) -> DateTime<FixedOffset> {
        self.record().created
    }

    pub fn message(&self) -> Option<&str> {
        self.record().message.as_deref()
    }

    pub fn user(&self) -> Option<&inventory::User> {
        self.record().user.as_ref()
    }

    /// Every logical path in the state, unordered
    pub fn logical_paths(&self) -> Vec<&LogicalPath> {
        let mut paths = Vec::new();
        self.record().state.for_each(|_, path| paths.push(path));
        paths
    }

    pub fn digest_for(&self, logical_path: &LogicalPath) -> Option<&HexDigest> {
        self.record().state.digest_for(logical_path)
    }

    /// Resolves a logical path to the content path that backs it
    pub fn content_path_for(&self, logical_path: &LogicalPath) -> Result<&crate::ocfl::path::ContentPath> {
        let digest = self.digest_for(logical_path).ok_or_else(|| {
            OcflError::NotFound(format!(
                "Path {} in object {} version {}",
                logical_path, self.object.id, self.version_num
            ))
        })?;

        self.object.inventory.content_path_for_digest(digest)
    }

    /// Opens a logical file. The returned mtime is the version's creation time.
    pub fn open(&self, logical_path: &LogicalPath) -> Result<StateFile> {
        let content_path = self.content_path_for(logical_path)?;
        let storage_path = join(&self.object.object_root, content_path.as_str());

        let file = self.object.fs.open(&storage_path)?;
        let size = file.size();

        Ok(StateFile {
            file,
            size,
            mtime: self.created(),
        })
    }

    /// Copies a logical file's bytes into the sink
    pub fn read(&self, logical_path: &LogicalPath, sink: &mut dyn std::io::Write) -> Result<u64> {
        let content_path = self.content_path_for(logical_path)?;
        let storage_path = join(&self.object.object_root, content_path.as_str());
        self.object.fs.read(&storage_path, sink)
    }

    /// Lists the entries of a logical directory. `""` or `.` is the state root. Files are
    /// backed by manifest content; directories are implied by deeper logical paths.
    pub fn read_dir(&self, logical_dir: &str) -> Result<Vec<StateEntry>> {
        let prefix = if logical_dir.is_empty() || logical_dir == "." {
            String::new()
        } else {
            format!("{logical_dir}/")
        };

        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        let mut dir_exists = prefix.is_empty();

        self.record().state.for_each(|_, path| {
            if let Some(rest) = path.as_str().strip_prefix(&prefix) {
                dir_exists = true;
                match rest.find('/') {
                    Some(i) => {
                        entries.insert(rest[..i].to_string(), true);
                    }
                    None => {
                        entries.entry(rest.to_string()).or_insert(false);
                    }
                }
            }
        });

        if !dir_exists {
            return Err(OcflError::NotFound(format!(
                "Path {} in object {} version {}",
                logical_dir, self.object.id, self.version_num
            )));
        }

        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| StateEntry { name, is_dir })
            .collect())
    }

    /// Computes the changes from `prior` to this state. A `None` prior reports everything
    /// as added.
    pub fn diff(&self, prior: Option<&VersionState>) -> Vec<StateChange> {
        let mut changes = Vec::new();
        let state = &self.record().state;

        match prior {
            None => {
                state.for_each(|_, path| changes.push(StateChange::Added(path.clone())));
            }
            Some(prior) => {
                let prior_state = &prior.record().state;

                state.for_each(|digest, path| {
                    match prior_state.digest_for(path) {
                        None => changes.push(StateChange::Added(path.clone())),
                        Some(prior_digest) if prior_digest != digest => {
                            changes.push(StateChange::Modified(path.clone()))
                        }
                        Some(_) => (),
                    }
                });

                prior_state.for_each(|_, path| {
                    if state.digest_for(path).is_none() {
                        changes.push(StateChange::Removed(path.clone()));
                    }
                });
            }
        }

        changes
    }
}

/// Reads and verifies the inventory sidecar, returning the verified digest
fn verify_sidecar(
    fs: &Arc<dyn Vfs>,
    dir: &str,
    inventory: &Inventory,
    inventory_bytes: &[u8],
) -> Result<HexDigest> {
    let sidecar_path = join(dir, &inventory::sidecar_name(inventory.digest_algorithm));

    let mut sidecar_bytes = Vec::new();
    fs.read(&sidecar_path, &mut sidecar_bytes)
        .map_err(|_| OcflError::Validation {
            code: "E058".to_string(),
            message: format!("Inventory sidecar {sidecar_path} does not exist"),
        })?;

    let expected = inventory::parse_sidecar(&sidecar_bytes)?;

    let computed = inventory
        .digest_algorithm
        .hash_hex(&mut std::io::Cursor::new(inventory_bytes))?;

    if expected != computed {
        return Err(OcflError::Validation {
            code: "E060".to_string(),
            message: format!(
                "Inventory at {dir} does not match its sidecar digest. Expected: {expected}; Found: {computed}"
            ),
        });
    }

    Ok(computed)
}
