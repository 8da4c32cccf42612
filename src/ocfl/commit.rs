//! The commit engine: atomically promotes a stage into a new object version. The engine
//! stops on the first fatal error and rolls the partially written version back; a failed
//! commit leaves the object at its previous head.

use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::Utc;
use log::info;

use crate::ocfl::consts::INVENTORY_FILE;
use crate::ocfl::digest::HexDigest;
use crate::ocfl::digestmap::{AddError, DigestMap, MapMaker};
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::inventory::{self, Inventory, VersionRecord};
use crate::ocfl::namaste;
use crate::ocfl::object::Object;
use crate::ocfl::path::{ContentPath, InventoryPath, LogicalPath};
use crate::ocfl::root::StorageRoot;
use crate::ocfl::stage::{Stage, StageMeta};
use crate::ocfl::vfs::{join, Vfs};
use crate::ocfl::vnum::VersionNum;

#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// Permit a commit whose state equals the previous head's state
    pub allow_unchanged: bool,
    /// Zero-padding width for version numbers; applied only when creating a new object
    pub padding_width: u32,
    /// Validate and compute everything, but write nothing
    pub dry_run: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            allow_unchanged: false,
            padding_width: 0,
            dry_run: false,
        }
    }
}

#[derive(Debug)]
pub struct CommitOutcome {
    pub object_root: String,
    pub version: VersionNum,
    pub inventory: Inventory,
}

/// New content to be copied into the version directory
struct NewContent {
    digest: HexDigest,
    content_path: ContentPath,
    source_path: String,
}

/// Commits the stage as the next version of `object_id`. Two concurrent commits on the
/// same object are undefined; the caller must serialize them.
pub fn commit(
    root: &StorageRoot,
    object_id: &str,
    stage: Stage,
    options: &CommitOptions,
) -> Result<CommitOutcome> {
    if object_id.trim().is_empty() {
        return Err(OcflError::Protocol("Object ids may not be blank".to_string()));
    }

    let object_root = root.object_path(object_id)?;

    let existing = if root.fs().read_dir(&object_root)?.is_empty() {
        None
    } else {
        Some(root.object_at(&object_root)?)
    };

    let (state, meta) = stage.build_state();

    let candidate = build_candidate(root, object_id, existing.as_ref(), state, &meta, options)?;
    let new_head = candidate.inventory.head;

    if options.dry_run {
        info!("Dry run: {} would become {}", object_id, new_head);
        return Ok(CommitOutcome {
            object_root,
            version: new_head,
            inventory: candidate.inventory,
        });
    }

    write_version(root, object_id, &object_root, existing.is_none(), candidate, &meta)
}

struct Candidate {
    inventory: Inventory,
    new_content: Vec<NewContent>,
}

/// Computes the candidate inventory and the set of content files that must be written,
/// and validates everything before a single byte hits storage.
fn build_candidate(
    root: &StorageRoot,
    object_id: &str,
    existing: Option<&Object>,
    state: DigestMap<LogicalPath>,
    meta: &StageMeta,
    options: &CommitOptions,
) -> Result<Candidate> {
    let (spec, new_head, content_dir_field) = match existing {
        Some(object) => {
            if meta.algorithm != object.inventory.digest_algorithm {
                return Err(OcflError::Protocol(format!(
                    "The stage algorithm ({}) does not match the object's digest algorithm ({})",
                    meta.algorithm, object.inventory.digest_algorithm
                )));
            }

            if let Some(dir) = &meta.content_directory {
                if dir != object.inventory.defaulted_content_dir() {
                    return Err(OcflError::Protocol(format!(
                        "The content directory is immutable: object {} uses '{}'",
                        object_id,
                        object.inventory.defaulted_content_dir()
                    )));
                }
            }

            (
                object.spec,
                object.inventory.head.next()?,
                object.inventory.content_directory.clone(),
            )
        }
        None => (
            root.spec_version(),
            VersionNum::v1(options.padding_width),
            meta.content_directory.clone(),
        ),
    };

    if let Some(object) = existing {
        let prev_state = &object.inventory.head_version()?.state;
        if state.equal(prev_state) && !options.allow_unchanged {
            return Err(OcflError::Protocol(format!(
                "The stage is identical to the current head of {object_id}; pass allow_unchanged to commit it anyway"
            )));
        }
    }

    let content_dir = content_dir_field
        .as_deref()
        .unwrap_or(crate::ocfl::consts::DEFAULT_CONTENT_DIR)
        .to_string();

    // Rebuild the manifest: every existing entry plus one content path per new digest
    let mut manifest: MapMaker<ContentPath> = MapMaker::new();
    let mut new_content = Vec::new();

    if let Some(object) = existing {
        for (digest, paths) in object.inventory.manifest.iter() {
            for path in paths {
                map_add(&mut manifest, digest.clone(), path.clone())?;
            }
        }
    }

    for (digest, logical_paths) in state.iter() {
        if manifest.has_digest(digest) {
            continue;
        }

        let source_path = meta
            .source_for(digest)
            .ok_or_else(|| OcflError::MissingDigest(digest.to_string()))?
            .to_string();

        // Path lists are sorted by construction; the first logical path shapes the
        // content tree inside the version directory
        let logical = logical_paths.first().expect("path lists are non-empty");
        let content_path =
            ContentPath::parse(&format!("{new_head}/{content_dir}/{logical}"))?;

        map_add(&mut manifest, digest.clone(), content_path.clone())?;

        new_content.push(NewContent {
            digest: digest.clone(),
            content_path,
            source_path,
        });
    }

    let manifest = manifest.build();

    let fixity = build_fixity(existing, meta, &new_content)?;

    let created = meta.created.unwrap_or_else(|| Utc::now().fixed_offset());

    let mut versions: BTreeMap<VersionNum, VersionRecord> = existing
        .map(|o| o.inventory.versions.clone())
        .unwrap_or_default();

    versions.insert(
        new_head,
        VersionRecord::new(created, state, meta.message.clone(), meta.user.clone()),
    );

    let mut inventory = Inventory::new_object(
        object_id,
        spec,
        meta.algorithm,
        new_head,
        content_dir_field,
    )?;
    inventory.manifest = manifest;
    inventory.versions = versions;
    inventory.fixity = fixity;

    inventory.validate_shallow()?;

    Ok(Candidate {
        inventory,
        new_content,
    })
}

/// Extends each fixity submap with entries for the new content, preserving existing
/// entries and rejecting conflicts.
fn build_fixity(
    existing: Option<&Object>,
    meta: &StageMeta,
    new_content: &[NewContent],
) -> Result<Option<BTreeMap<String, DigestMap<ContentPath>>>> {
    let mut algorithms: Vec<String> = meta
        .fixity_algorithms
        .iter()
        .map(|a| a.to_string())
        .collect();

    if let Some(object) = existing {
        if let Some(fixity) = &object.inventory.fixity {
            for algorithm in fixity.keys() {
                if !algorithms.contains(algorithm) {
                    algorithms.push(algorithm.clone());
                }
            }
        }
    }

    if algorithms.is_empty() {
        return Ok(None);
    }

    let mut result = BTreeMap::new();

    for algorithm_id in algorithms {
        let mut maker: MapMaker<ContentPath> = MapMaker::new();

        if let Some(object) = existing {
            if let Some(existing_map) = object
                .inventory
                .fixity
                .as_ref()
                .and_then(|f| f.get(&algorithm_id))
            {
                for (digest, paths) in existing_map.iter() {
                    for path in paths {
                        map_add(&mut maker, digest.clone(), path.clone())?;
                    }
                }
            }
        }

        if let Ok(algorithm) = algorithm_id.parse() {
            for content in new_content {
                if let Some(fixity_digest) = meta.fixity_for(algorithm, &content.digest) {
                    map_add(&mut maker, fixity_digest.clone(), content.content_path.clone())?;
                }
            }
        }

        if !maker.is_empty() {
            result.insert(algorithm_id, maker.build());
        }
    }

    if result.is_empty() {
        Ok(None)
    } else {
        Ok(Some(result))
    }
}

/// Writes content, the version inventory, and promotes the new root inventory. Any
/// failure before the root writes rolls the version directory back.
fn write_version(
    root: &StorageRoot,
    object_id: &str,
    object_root: &str,
    is_new_object: bool,
    candidate: Candidate,
    meta: &StageMeta,
) -> Result<CommitOutcome> {
    let fs = root.fs();
    let inventory = &candidate.inventory;
    let new_head = inventory.head;
    let version_dir = join(object_root, &new_head.to_string());

    let attempt = || -> Result<()> {
        if is_new_object {
            namaste::write(fs, object_root, inventory.spec_version()?.object_namaste())?;
        }

        let source_fs = if candidate.new_content.is_empty() {
            None
        } else {
            Some(meta.source_fs.as_ref().ok_or_else(|| {
                OcflError::Protocol(
                    "The stage has no source filesystem but new content must be written"
                        .to_string(),
                )
            })?)
        };

        // Copies are re-digested in flight; a mismatch between the staged digest and the
        // bytes actually read aborts the commit
        for content in &candidate.new_content {
            let source_fs = source_fs.expect("source fs checked above");
            let source = source_fs.open(&content.source_path)?;
            let mut reader = inventory.digest_algorithm.reader(source);

            let target = join(object_root, content.content_path.as_str());
            fs.write(&target, &mut reader)?;

            let actual = reader.finalize_hex();
            if actual != content.digest {
                return Err(OcflError::DigestMismatch {
                    path: content.source_path.clone(),
                    algorithm: inventory.digest_algorithm.to_string(),
                    expected: content.digest.to_string(),
                    got: actual.to_string(),
                });
            }
        }

        // Version inventory and sidecar live inside the version directory
        let inventory_bytes = inventory.to_pretty_json()?;
        let inventory_digest = inventory
            .digest_algorithm
            .hash_hex(&mut Cursor::new(&inventory_bytes))?;
        let sidecar_name = inventory::sidecar_name(inventory.digest_algorithm);

        fs.write(
            &join(&version_dir, INVENTORY_FILE),
            &mut Cursor::new(inventory_bytes.clone()),
        )?;
        fs.write(
            &join(&version_dir, &sidecar_name),
            &mut Cursor::new(inventory::sidecar_line(&inventory_digest).into_bytes()),
        )?;

        // Promote: root inventory first, sidecar last, so an interrupted promote is
        // detectable by the sidecar's absence or mismatch
        fs.write(
            &join(object_root, INVENTORY_FILE),
            &mut Cursor::new(inventory_bytes),
        )?;
        fs.write(
            &join(object_root, &sidecar_name),
            &mut Cursor::new(inventory::sidecar_line(&inventory_digest).into_bytes()),
        )?;

        Ok(())
    };

    if let Err(original) = attempt() {
        let cleanup_target = if is_new_object { object_root } else { &version_dir };

        return match fs.remove_all(cleanup_target) {
            Ok(()) => Err(original),
            Err(cleanup) => Err(OcflError::CleanupFailed {
                original: Box::new(original),
                cleanup: cleanup.to_string(),
            }),
        };
    }

    info!("Committed {} {}", object_id, new_head);

    Ok(CommitOutcome {
        object_root: object_root.to_string(),
        version: new_head,
        inventory: candidate.inventory,
    })
}

fn map_add(
    maker: &mut MapMaker<ContentPath>,
    digest: HexDigest,
    path: ContentPath,
) -> Result<()> {
    match maker.insert(digest, path) {
        Ok(()) | Err(AddError::Exists) => Ok(()),
        Err(AddError::InvalidPath(path)) => Err(OcflError::InvalidPath(path)),
        Err(AddError::PathConflict(path)) => Err(OcflError::PathConflict(path)),
    }
}
