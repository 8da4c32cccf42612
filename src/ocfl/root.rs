//! Storage root discovery, initialization, layout binding, and object enumeration.

use std::io::Cursor;
use std::sync::Arc;

use log::{info, warn};

use crate::ocfl::consts::{EXTENSIONS_CONFIG_FILE, EXTENSIONS_DIR, OCFL_LAYOUT_FILE};
use crate::ocfl::error::{not_found, OcflError, Result};
use crate::ocfl::layout::{LayoutDescriptor, StorageLayout};
use crate::ocfl::namaste::{self, DeclarationLevel};
use crate::ocfl::object::Object;
use crate::ocfl::pipeline::CancelToken;
use crate::ocfl::spec::SpecVersion;
use crate::ocfl::vfs::{join, Vfs};

/// An open storage root. The root is readable without a layout, but object ids can only be
/// resolved to paths when a layout is bound.
pub struct StorageRoot {
    fs: Arc<dyn Vfs>,
    spec: SpecVersion,
    layout: Option<StorageLayout>,
}

/// An object root discovered by [`StorageRoot::scan_objects`]
#[derive(Debug, Clone)]
pub struct ObjectLocation {
    /// Path of the object root relative the storage root
    pub path: String,
    /// The spec revision the object's namaste declares
    pub spec: SpecVersion,
}

/// A storage-hierarchy rule violation found while scanning
#[derive(Debug, Clone)]
pub struct ScanIssue {
    pub code: &'static str,
    pub path: String,
    pub message: String,
}

impl StorageRoot {
    /// Opens an existing storage root: verifies the root namaste and binds the layout
    /// described by `ocfl_layout.json` when one is present. An unknown or unconfigured
    /// layout leaves the root readable with id resolution disabled.
    pub fn open(fs: Arc<dyn Vfs>) -> Result<Self> {
        let entries = fs.read_dir(".")?;

        if entries.is_empty() {
            return Err(OcflError::NotFound(
                "Storage root does not exist or is empty".to_string(),
            ));
        }

        let declaration = namaste::find_declaration(&entries, DeclarationLevel::StorageRoot)?;
        let spec = declaration.spec;
        namaste::validate(&fs, ".", spec.root_namaste())?;

        let layout = load_layout(&fs)?;

        Ok(Self { fs, spec, layout })
    }

    /// Initializes a new storage root in an empty directory
    pub fn init(fs: Arc<dyn Vfs>, spec: SpecVersion, layout: Option<StorageLayout>) -> Result<Self> {
        if !fs.read_dir(".")?.is_empty() {
            return Err(OcflError::Protocol(
                "Cannot initialize a storage root in a non-empty directory".to_string(),
            ));
        }

        namaste::write(&fs, ".", spec.root_namaste())?;

        if let Some(layout) = &layout {
            let descriptor = LayoutDescriptor {
                extension: layout.extension_name(),
                description: format!("Objects mapped with {}", layout.extension_name()),
            };

            let descriptor_bytes = serde_json::to_vec_pretty(&descriptor)?;
            fs.write(OCFL_LAYOUT_FILE, &mut Cursor::new(descriptor_bytes))?;

            let config_dir = join(EXTENSIONS_DIR, &layout.extension_name().to_string());
            fs.write(
                &join(&config_dir, EXTENSIONS_CONFIG_FILE),
                &mut Cursor::new(layout.serialize_config()?),
            )?;
        }

        info!("Initialized OCFL {} storage root", spec);

        Ok(Self { fs, spec, layout })
    }

    pub fn fs(&self) -> &Arc<dyn Vfs> {
        &self.fs
    }

    pub fn spec_version(&self) -> SpecVersion {
        self.spec
    }

    pub fn layout(&self) -> Option<&StorageLayout> {
        self.layout.as_ref()
    }

    /// Resolves an object id to its path under the storage root, or `LayoutUnbound` when no
    /// layout is available
    pub fn object_path(&self, object_id: &str) -> Result<String> {
        match &self.layout {
            Some(layout) => layout.map_object_id(object_id),
            None => Err(OcflError::LayoutUnbound),
        }
    }

    /// Loads the object with the given id
    pub fn object(&self, object_id: &str) -> Result<Object> {
        let path = self.object_path(object_id)?;

        if !self.fs.exists(&path)? {
            return Err(not_found(object_id, None));
        }

        let object = self.object_at(&path)?;

        if object.id != object_id {
            return Err(OcflError::Protocol(format!(
                "Expected object {} at {} but found {}",
                object_id, path, object.id
            )));
        }

        Ok(object)
    }

    /// Loads the object rooted at a path relative the storage root
    pub fn object_at(&self, path: &str) -> Result<Object> {
        Object::load(self.fs.clone(), path, Some(self.spec))
    }

    /// Walks the storage hierarchy breadth first looking for object roots. `on_object` is
    /// invoked from the worker thread that discovered the object and must be thread safe.
    /// Hierarchy rule violations are returned to the caller: files in intermediate
    /// directories (E084), empty directories (E073), and objects declaring a spec revision
    /// beyond the root's (E081). The `extensions` directory at the root is skipped.
    pub fn scan_objects<F>(
        &self,
        concurrency: usize,
        cancel: &CancelToken,
        on_object: F,
    ) -> Result<Vec<ScanIssue>>
    where
        F: Fn(&ObjectLocation) -> Result<()> + Sync,
    {
        let concurrency = concurrency.max(1);
        let mut issues = Vec::new();

        let mut frontier: Vec<String> = self
            .fs
            .read_dir(".")?
            .into_iter()
            .filter(|e| e.is_dir && e.name != EXTENSIONS_DIR)
            .map(|e| e.name)
            .collect();

        while !frontier.is_empty() {
            cancel.check()?;

            let chunk_size = (frontier.len() + concurrency - 1) / concurrency;
            let chunks: Vec<&[String]> = frontier.chunks(chunk_size).collect();

            let outcomes: Vec<Result<Vec<DirOutcome>>> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunks
                    .into_iter()
                    .map(|chunk| {
                        let on_object = &on_object;
                        scope.spawn(move || {
                            let mut outcomes = Vec::with_capacity(chunk.len());
                            for dir in chunk {
                                cancel.check()?;
                                let outcome = self.classify_dir(dir)?;
                                if let DirOutcome::Object { location, .. } = &outcome {
                                    on_object(location)?;
                                }
                                outcomes.push(outcome);
                            }
                            Ok(outcomes)
                        })
                    })
                    .collect();

                handles
                    .into_iter()
                    .map(|h| h.join().expect("scan worker panicked"))
                    .collect()
            });

            let mut next = Vec::new();

            for outcome in outcomes {
                for entry in outcome? {
                    match entry {
                        DirOutcome::Descend {
                            subdirs,
                            issues: dir_issues,
                        } => {
                            next.extend(subdirs);
                            issues.extend(dir_issues);
                        }
                        DirOutcome::Object { issues: dir_issues, .. } => {
                            issues.extend(dir_issues);
                        }
                    }
                }
            }

            frontier = next;
        }

        Ok(issues)
    }

    fn classify_dir(&self, dir: &str) -> Result<DirOutcome> {
        let entries = self.fs.read_dir(dir)?;

        if entries.is_empty() {
            return Ok(DirOutcome::Descend {
                subdirs: Vec::new(),
                issues: vec![ScanIssue {
                    code: "E073",
                    path: dir.to_string(),
                    message: format!("Storage hierarchy directory '{dir}' is empty"),
                }],
            });
        }

        let declaration = entries
            .iter()
            .filter(|e| !e.is_dir)
            .find_map(|e| namaste::parse_declaration(&e.name))
            .filter(|d| d.level == DeclarationLevel::Object);

        if let Some(declaration) = declaration {
            let mut issues = Vec::new();

            if declaration.spec > self.spec {
                issues.push(ScanIssue {
                    code: "E081",
                    path: dir.to_string(),
                    message: format!(
                        "Object at '{}' declares OCFL {} but the storage root is OCFL {}",
                        dir, declaration.spec, self.spec
                    ),
                });
            }

            return Ok(DirOutcome::Object {
                location: ObjectLocation {
                    path: dir.to_string(),
                    spec: declaration.spec,
                },
                issues,
            });
        }

        let mut issues = Vec::new();
        let mut subdirs = Vec::new();

        for entry in entries {
            if entry.is_dir {
                subdirs.push(join(dir, &entry.name));
            } else {
                issues.push(ScanIssue {
                    code: "E084",
                    path: join(dir, &entry.name),
                    message: format!(
                        "Storage hierarchy directory '{}' contains file '{}'",
                        dir, entry.name
                    ),
                });
            }
        }

        Ok(DirOutcome::Descend { subdirs, issues })
    }

    /// Removes an object and any empty parent directories left behind
    pub fn purge_object(&self, object_id: &str) -> Result<()> {
        let path = self.object_path(object_id)?;

        info!("Purging object {object_id} at {path}");
        self.fs.remove_all(&path)?;

        let mut current = path;
        while let Some(i) = current.rfind('/') {
            current.truncate(i);
            if !self.fs.read_dir(&current)?.is_empty() {
                break;
            }
            self.fs.remove_all(&current)?;
        }

        Ok(())
    }
}

enum DirOutcome {
    Object {
        location: ObjectLocation,
        issues: Vec<ScanIssue>,
    },
    Descend {
        subdirs: Vec<String>,
        issues: Vec<ScanIssue>,
    },
}

/// Reads `ocfl_layout.json` and binds the layout it names. Returns `None` when the file is
/// absent or the extension is unknown; in the latter case the problem is logged and id
/// resolution is simply unavailable.
fn load_layout(fs: &Arc<dyn Vfs>) -> Result<Option<StorageLayout>> {
    if !fs.exists(OCFL_LAYOUT_FILE)? {
        return Ok(None);
    }

    let mut bytes = Vec::new();
    fs.read(OCFL_LAYOUT_FILE, &mut bytes)?;

    let descriptor: LayoutDescriptor = match serde_json::from_slice(&bytes) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!("Failed to parse {OCFL_LAYOUT_FILE}: {e}");
            return Ok(None);
        }
    };

    let config_path = join(
        &join(EXTENSIONS_DIR, &descriptor.extension.to_string()),
        EXTENSIONS_CONFIG_FILE,
    );

    let config_bytes = if fs.exists(&config_path)? {
        let mut bytes = Vec::new();
        fs.read(&config_path, &mut bytes)?;
        Some(bytes)
    } else {
        // An extension directory without a config is treated as "use defaults"
        warn!(
            "Layout extension {} has no {}; using its default configuration",
            descriptor.extension, EXTENSIONS_CONFIG_FILE
        );
        None
    };

    match StorageLayout::new(descriptor.extension, config_bytes.as_deref()) {
        Ok(layout) => Ok(Some(layout)),
        Err(e) => {
            warn!("Failed to bind layout {}: {}", descriptor.extension, e);
            Ok(None)
        }
    }
}
