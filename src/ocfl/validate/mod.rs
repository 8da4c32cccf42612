//! Spec-conformance validation. The validator accumulates coded diagnostics rather than
//! stopping at the first problem: `fatal` errors mean the object is invalid, `warn`
//! notices are advisory. Structural checks are revision-agnostic; the code registry owns
//! the per-revision descriptions and reference URLs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use serde_json::Value;

use crate::ocfl::consts::{
    EXTENSIONS_CONFIG_FILE, EXTENSIONS_DIR, INVENTORY_FILE, INVENTORY_SIDECAR_PREFIX,
    OCFL_LAYOUT_FILE,
};
use crate::ocfl::digest::{AlgorithmRegistry, DigestAlgorithm, HexDigest};
use crate::ocfl::digestmap::{AddError, MapMaker};
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::inventory::{self, Inventory};
use crate::ocfl::namaste::{self, DeclarationLevel};
use crate::ocfl::path::{ContentPath, InventoryPath, LogicalPath};
use crate::ocfl::pipeline::{CancelToken, DigestPipeline, FileRef};
use crate::ocfl::root::StorageRoot;
use crate::ocfl::spec::SpecVersion;
use crate::ocfl::vfs::{join, Vfs};
use crate::ocfl::vnum::VersionNum;

mod codes;

pub use codes::{CodeRef, ErrorCode, Severity, WarnCode};

const ROOT_LOCATION: &str = "root";

/// A fatal spec violation
#[derive(Debug)]
pub struct ValidationError {
    /// Where the problem was found: `root` or a version number
    pub location: String,
    pub code: ErrorCode,
    pub text: String,
}

/// An advisory notice
#[derive(Debug)]
pub struct ValidationWarning {
    pub location: String,
    pub code: WarnCode,
    pub text: String,
}

/// A rendered diagnostic: the code resolved against the object's spec revision plus the
/// human context it was raised with
#[derive(Debug)]
pub struct Diagnostic {
    pub code: CodeRef,
    pub location: String,
    pub text: String,
}

/// Sink invoked for each diagnostic of a validation run
pub type DiagnosticSink = dyn Fn(&Diagnostic) + Send + Sync;

/// The accumulated outcome of validating one object (or the storage root itself)
#[derive(Debug)]
pub struct ValidationResult {
    pub object_id: Option<String>,
    /// The spec revision diagnostics are resolved against
    pub spec: SpecVersion,
    pub fatal: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    fn new(spec: SpecVersion) -> Self {
        Self {
            object_id: None,
            spec,
            fatal: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, location: &str, code: ErrorCode, text: String) {
        self.fatal.push(ValidationError {
            location: location.to_string(),
            code,
            text,
        });
    }

    pub fn warn(&mut self, location: &str, code: WarnCode, text: String) {
        self.warnings.push(ValidationWarning {
            location: location.to_string(),
            code,
            text,
        });
    }

    /// Zero fatal errors means the object passed
    pub fn has_errors(&self) -> bool {
        !self.fatal.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn has_error_code(&self, code: ErrorCode) -> bool {
        self.fatal.iter().any(|e| e.code == code)
    }

    pub fn has_warn_code(&self, code: WarnCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }

    /// Renders every diagnostic, errors first
    pub fn diagnostics(&self) -> impl Iterator<Item = Diagnostic> + '_ {
        let errors = self.fatal.iter().map(|e| Diagnostic {
            code: e.code.describe(self.spec),
            location: e.location.clone(),
            text: e.text.clone(),
        });

        let warnings = self.warnings.iter().map(|w| Diagnostic {
            code: w.code.describe(self.spec),
            location: w.location.clone(),
            text: w.text.clone(),
        });

        errors.chain(warnings)
    }
}

/// The outcome of validating a whole storage root
#[derive(Debug)]
pub struct RootValidationResult {
    pub storage_root: ValidationResult,
    pub objects: Vec<ValidationResult>,
}

impl RootValidationResult {
    pub fn has_errors(&self) -> bool {
        self.storage_root.has_errors() || self.objects.iter().any(|o| o.has_errors())
    }
}

#[derive(Clone)]
pub struct ValidatorConfig {
    /// Skip recomputing content digests
    pub skip_digests: bool,
    /// Worker count for the digest pipeline and storage root scan
    pub concurrency: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            skip_digests: false,
            concurrency: num_cpus::get(),
        }
    }
}

pub struct Validator {
    fs: Arc<dyn Vfs>,
    registry: AlgorithmRegistry,
    config: ValidatorConfig,
    sink: Option<Box<DiagnosticSink>>,
}

impl Validator {
    pub fn new(fs: Arc<dyn Vfs>) -> Self {
        Self {
            fs,
            registry: AlgorithmRegistry::standard(),
            config: ValidatorConfig::default(),
            sink: None,
        }
    }

    pub fn with_config(mut self, config: ValidatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Installs a sink that receives each diagnostic of a run
    pub fn with_sink(mut self, sink: Box<DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validates one object rooted at `object_root`. `expected_id` enables the id check
    /// (E037); `max_spec` caps the object's declared revision (E081).
    pub fn validate_object(
        &self,
        expected_id: Option<&str>,
        object_root: &str,
        max_spec: Option<SpecVersion>,
        cancel: &CancelToken,
    ) -> Result<ValidationResult> {
        let entries = self.fs.read_dir(object_root)?;

        if entries.is_empty() {
            return Err(OcflError::NotFound(format!(
                "No object found at {object_root}"
            )));
        }

        let declarations: Vec<_> = entries
            .iter()
            .filter(|e| !e.is_dir)
            .filter_map(|e| namaste::parse_declaration(&e.name))
            .filter(|d| d.level == DeclarationLevel::Object)
            .collect();

        let spec = declarations
            .first()
            .map(|d| d.spec)
            .or(max_spec)
            .unwrap_or(SpecVersion::Ocfl1_1);

        let mut result = ValidationResult::new(spec);
        if let Some(id) = expected_id {
            result.object_id = Some(id.to_string());
        }

        match declarations.len() {
            0 => result.error(
                ROOT_LOCATION,
                ErrorCode::E003,
                "Object conformance declaration does not exist".to_string(),
            ),
            1 => {
                if namaste::validate(&self.fs, object_root, spec.object_namaste()).is_err() {
                    result.error(
                        ROOT_LOCATION,
                        ErrorCode::E007,
                        format!(
                            "Object conformance declaration must contain '{}\\n'",
                            spec.object_namaste().dvalue
                        ),
                    );
                }
            }
            _ => result.error(
                ROOT_LOCATION,
                ErrorCode::E003,
                "Object root contains multiple conformance declarations".to_string(),
            ),
        }

        if let Some(max_spec) = max_spec {
            if spec > max_spec {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E081,
                    format!(
                        "Object declares OCFL {spec} but the storage root is OCFL {max_spec}"
                    ),
                );
            }
        }

        let has_inventory = entries
            .iter()
            .any(|e| !e.is_dir && e.name == INVENTORY_FILE);

        let mut root_inventory = None;
        let mut root_inventory_bytes = Vec::new();

        if has_inventory {
            self.fs
                .read(&join(object_root, INVENTORY_FILE), &mut root_inventory_bytes)?;

            root_inventory = parse_inventory(
                &root_inventory_bytes,
                &self.registry,
                ROOT_LOCATION,
                &mut result,
            );

            if let (Some(expected), Some(inventory)) = (expected_id, &root_inventory) {
                if inventory.id != expected {
                    result.error(
                        ROOT_LOCATION,
                        ErrorCode::E037,
                        format!(
                            "Inventory id must be '{}'. Found: {}",
                            expected, inventory.id
                        ),
                    );
                }
            }

            if result.object_id.is_none() {
                result.object_id = root_inventory.as_ref().map(|i| i.id.clone());
            }

            self.check_sidecar(
                object_root,
                ROOT_LOCATION,
                root_inventory.as_ref(),
                &entries,
                &root_inventory_bytes,
                &mut result,
            )?;
        } else {
            result.error(
                ROOT_LOCATION,
                ErrorCode::E063,
                "Object root does not contain an inventory".to_string(),
            );
        }

        self.check_object_root_contents(&entries, &mut result);

        if let Some(inventory) = &root_inventory {
            let version_dirs =
                self.check_version_directories(object_root, &entries, inventory, &mut result);

            for version_num in &version_dirs {
                cancel.check()?;
                self.check_version_contents(
                    object_root,
                    *version_num,
                    inventory,
                    &root_inventory_bytes,
                    &mut result,
                )?;
            }

            self.check_content_files(object_root, &version_dirs, inventory, &mut result)?;

            if !self.config.skip_digests {
                self.check_digests(object_root, inventory, cancel, &mut result)?;
            }
        }

        self.drain_sink(&result);

        Ok(result)
    }

    /// Validates the storage root itself and then every object discovered by scanning
    pub fn validate_root(
        &self,
        root: &StorageRoot,
        cancel: &CancelToken,
    ) -> Result<RootValidationResult> {
        let spec = root.spec_version();
        let mut root_result = ValidationResult::new(spec);

        let entries = self.fs.read_dir(".")?;

        match namaste::find_declaration(&entries, DeclarationLevel::StorageRoot) {
            Ok(_) => {
                if namaste::validate(&self.fs, ".", spec.root_namaste()).is_err() {
                    result_error_root(&mut root_result, ErrorCode::E069, format!(
                        "Storage root conformance declaration must contain '{}\\n'",
                        spec.root_namaste().dvalue
                    ));
                }
            }
            Err(_) => {
                result_error_root(
                    &mut root_result,
                    ErrorCode::E069,
                    "Storage root must contain exactly one conformance declaration".to_string(),
                );
            }
        }

        self.check_storage_root_contents(&entries, &mut root_result)?;

        let objects = Mutex::new(Vec::new());

        let scan_issues = root.scan_objects(self.config.concurrency, cancel, |location| {
            let object_result =
                self.validate_object(None, &location.path, Some(spec), cancel)?;
            objects.lock().unwrap().push(object_result);
            Ok(())
        })?;

        for issue in scan_issues {
            if let Ok(code) = ErrorCode::from_str(issue.code) {
                root_result.error(ROOT_LOCATION, code, issue.message);
            }
        }

        self.drain_sink(&root_result);

        Ok(RootValidationResult {
            storage_root: root_result,
            objects: objects.into_inner().unwrap(),
        })
    }

    fn check_sidecar(
        &self,
        dir: &str,
        location: &str,
        inventory: Option<&Inventory>,
        entries: &[crate::ocfl::vfs::DirEntry],
        inventory_bytes: &[u8],
        result: &mut ValidationResult,
    ) -> Result<()> {
        // Prefer the algorithm the inventory declares; fall back to a lone sidecar file
        let algorithm = match inventory {
            Some(inventory) => Some(inventory.digest_algorithm),
            None => {
                let mut found = Vec::new();
                for entry in entries {
                    if let Some(suffix) = entry.name.strip_prefix(INVENTORY_SIDECAR_PREFIX) {
                        if let Ok(algorithm) = self.registry.parse(suffix) {
                            found.push(algorithm);
                        }
                    }
                }
                (found.len() == 1).then(|| found[0])
            }
        };

        let algorithm = match algorithm {
            Some(algorithm) => algorithm,
            None => return Ok(()),
        };

        let sidecar_name = inventory::sidecar_name(algorithm);
        let sidecar_path = join(dir, &sidecar_name);

        if !self.fs.exists(&sidecar_path)? {
            result.error(
                location,
                ErrorCode::E058,
                format!("Inventory sidecar {sidecar_name} does not exist"),
            );
            return Ok(());
        }

        let mut sidecar_bytes = Vec::new();
        self.fs.read(&sidecar_path, &mut sidecar_bytes)?;

        match inventory::parse_sidecar(&sidecar_bytes) {
            Ok(expected) => {
                let computed =
                    algorithm.hash_hex(&mut std::io::Cursor::new(inventory_bytes))?;
                if expected != computed {
                    result.error(
                        location,
                        ErrorCode::E060,
                        format!(
                            "Inventory digest does not match its sidecar. Expected: {expected}; Found: {computed}"
                        ),
                    );
                }
            }
            Err(_) => {
                result.error(
                    location,
                    ErrorCode::E061,
                    format!("Inventory sidecar {sidecar_name} is invalid"),
                );
            }
        }

        Ok(())
    }

    /// The object root may only contain the namaste, inventory and sidecars, version
    /// directories, and an extensions directory
    fn check_object_root_contents(
        &self,
        entries: &[crate::ocfl::vfs::DirEntry],
        result: &mut ValidationResult,
    ) {
        for entry in entries {
            let allowed = if entry.is_dir {
                entry.name == EXTENSIONS_DIR || VersionNum::try_from(entry.name.as_str()).is_ok()
            } else {
                entry.name == INVENTORY_FILE
                    || entry.name.starts_with(INVENTORY_SIDECAR_PREFIX)
                    || namaste::parse_declaration(&entry.name).is_some()
            };

            if !allowed {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E001,
                    format!("Object root contains an unexpected entry: {}", entry.name),
                );
            }
        }
    }

    /// Checks version directory naming, continuity, and padding against the inventory.
    /// Returns the version directories that both exist and are listed in the inventory.
    fn check_version_directories(
        &self,
        _object_root: &str,
        entries: &[crate::ocfl::vfs::DirEntry],
        inventory: &Inventory,
        result: &mut ValidationResult,
    ) -> Vec<VersionNum> {
        let dir_versions: Vec<VersionNum> = entries
            .iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| VersionNum::try_from(e.name.as_str()).ok())
            .collect();

        let dir_set: HashSet<VersionNum> = dir_versions.iter().copied().collect();

        for version_num in inventory.versions.keys() {
            if !dir_set.contains(version_num) {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E010,
                    format!("Version directory {version_num} is missing"),
                );
            }
        }

        for version_num in &dir_versions {
            if !inventory.versions.contains_key(version_num) {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E046,
                    format!("Version directory {version_num} is not listed in the inventory"),
                );
            }
        }

        if let Some(first) = dir_versions.first() {
            let width = first.width;

            if dir_versions.iter().any(|v| v.width != width) {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E012,
                    "Version directories use inconsistent zero-padding".to_string(),
                );
            } else if width > 0 {
                result.warn(
                    ROOT_LOCATION,
                    WarnCode::W001,
                    "Version directory numbers are zero-padded".to_string(),
                );
            }
        }

        let mut known: Vec<VersionNum> = dir_versions
            .into_iter()
            .filter(|v| inventory.versions.contains_key(v))
            .collect();
        known.sort_unstable();
        known
    }

    /// Per-version checks: allowed entries, the version's own inventory (byte-identical at
    /// head, state-consistent before it), and its sidecar
    fn check_version_contents(
        &self,
        object_root: &str,
        version_num: VersionNum,
        root_inventory: &Inventory,
        root_inventory_bytes: &[u8],
        result: &mut ValidationResult,
    ) -> Result<()> {
        let location = version_num.to_string();
        let version_dir = join(object_root, &location);
        let entries = self.fs.read_dir(&version_dir)?;
        let content_dir = root_inventory.defaulted_content_dir();

        let mut has_inventory = false;

        for entry in &entries {
            if entry.is_dir {
                if entry.name != content_dir {
                    result.warn(
                        &location,
                        WarnCode::W002,
                        format!(
                            "Version directory contains an unexpected directory: {}",
                            entry.name
                        ),
                    );
                }
            } else if entry.name == INVENTORY_FILE {
                has_inventory = true;
            } else if !entry.name.starts_with(INVENTORY_SIDECAR_PREFIX) {
                result.error(
                    &location,
                    ErrorCode::E015,
                    format!("Version directory contains an unexpected file: {}", entry.name),
                );
            }
        }

        if !has_inventory {
            result.warn(
                &location,
                WarnCode::W010,
                "Version directory does not contain an inventory".to_string(),
            );
            return Ok(());
        }

        let mut version_bytes = Vec::new();
        self.fs
            .read(&join(&version_dir, INVENTORY_FILE), &mut version_bytes)?;

        if version_num == root_inventory.head {
            if version_bytes != root_inventory_bytes {
                result.error(
                    &location,
                    ErrorCode::E064,
                    "The head version's inventory is not identical to the root inventory"
                        .to_string(),
                );
            }
            // The root inventory's field checks already cover these bytes
            return Ok(());
        }

        let version_inventory =
            parse_inventory(&version_bytes, &self.registry, &location, result);

        if let Some(version_inventory) = version_inventory {
            self.check_sidecar(
                &version_dir,
                &location,
                Some(&version_inventory),
                &entries,
                &version_bytes,
                result,
            )?;

            if version_inventory.defaulted_content_dir() != content_dir {
                result.error(
                    &location,
                    ErrorCode::E019,
                    format!(
                        "Version inventory uses content directory '{}' but the object uses '{}'",
                        version_inventory.defaulted_content_dir(),
                        content_dir
                    ),
                );
            }

            // Prior inventories must describe the same state for every version they cover
            for (covered, covered_version) in &version_inventory.versions {
                match root_inventory.versions.get(covered) {
                    Some(root_version) => {
                        if !root_version.state.equal(&covered_version.state) {
                            result.error(
                                &location,
                                ErrorCode::E066,
                                format!(
                                    "The state of {covered} differs from the root inventory's"
                                ),
                            );
                        } else if root_version.message != covered_version.message
                            || root_version.user != covered_version.user
                        {
                            result.warn(
                                &location,
                                WarnCode::W011,
                                format!(
                                    "Version metadata of {covered} differs from the root inventory's"
                                ),
                            );
                        }
                    }
                    None => {
                        result.error(
                            &location,
                            ErrorCode::E066,
                            format!(
                                "Version {covered} is not present in the root inventory"
                            ),
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Reconciles the files on storage with the manifest: every real file must be
    /// referenced (E023), no empty directories (E024), every manifest path must exist
    /// (E092)
    fn check_content_files(
        &self,
        object_root: &str,
        version_dirs: &[VersionNum],
        inventory: &Inventory,
        result: &mut ValidationResult,
    ) -> Result<()> {
        let content_dir = inventory.defaulted_content_dir();
        let mut actual: HashSet<String> = HashSet::new();

        for version_num in version_dirs {
            let location = version_num.to_string();
            let content_root = join(&join(object_root, &location), content_dir);
            let mut files = Vec::new();
            let mut empty_dirs = Vec::new();

            self.walk_content(&content_root, "", &mut files, &mut empty_dirs)?;

            for dir in empty_dirs {
                result.error(
                    &location,
                    ErrorCode::E024,
                    format!("Content directory contains an empty directory: {dir}"),
                );
            }

            for file in files {
                actual.insert(format!("{location}/{content_dir}/{file}"));
            }
        }

        let mut manifest_paths: HashSet<&str> = HashSet::new();
        inventory.manifest.for_each(|_, path| {
            manifest_paths.insert(path.as_str());
        });

        for path in &actual {
            if !manifest_paths.contains(path.as_str()) {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E023,
                    format!("File is not referenced in the manifest: {path}"),
                );
            }
        }

        for path in manifest_paths {
            if !actual.contains(path) {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E092,
                    format!("Manifest references a file that does not exist: {path}"),
                );
            }
        }

        Ok(())
    }

    fn walk_content(
        &self,
        base: &str,
        prefix: &str,
        files: &mut Vec<String>,
        empty_dirs: &mut Vec<String>,
    ) -> Result<()> {
        let full = join(base, prefix);
        let entries = self.fs.read_dir(&full)?;

        if entries.is_empty() && !prefix.is_empty() {
            empty_dirs.push(prefix.to_string());
            return Ok(());
        }

        for entry in entries {
            let rel = join(prefix, &entry.name);
            if entry.is_dir {
                self.walk_content(base, &rel, files, empty_dirs)?;
            } else {
                files.push(rel);
            }
        }

        Ok(())
    }

    /// Recomputes every content file's digest and compares it against the manifest and
    /// fixity blocks
    fn check_digests(
        &self,
        object_root: &str,
        inventory: &Inventory,
        cancel: &CancelToken,
        result: &mut ValidationResult,
    ) -> Result<()> {
        let mut fixity_algorithms = Vec::new();

        if let Some(fixity) = &inventory.fixity {
            for algorithm_id in fixity.keys() {
                match self.registry.parse(algorithm_id) {
                    Ok(algorithm) => fixity_algorithms.push(algorithm),
                    Err(_) => result.warn(
                        ROOT_LOCATION,
                        WarnCode::W013,
                        format!("Fixity block uses an unknown algorithm: {algorithm_id}"),
                    ),
                }
            }
        }

        let mut expected: HashMap<String, HexDigest> = HashMap::new();
        inventory.manifest.for_each(|digest, path| {
            expected.insert(path.as_str().to_string(), digest.clone());
        });

        let refs: Vec<Result<FileRef>> = expected
            .keys()
            .map(|path| Ok(FileRef::new(object_root, path.clone())))
            .collect();

        let pipeline = DigestPipeline::new(inventory.digest_algorithm)
            .with_fixity(fixity_algorithms)
            .with_workers(self.config.concurrency);

        let stream = pipeline.run(self.fs.clone(), refs.into_iter(), cancel.clone());

        for item in stream {
            if let Some(OcflError::Cancelled) = item.error {
                return Err(OcflError::Cancelled);
            }

            if let Some(error) = item.error {
                result.error(
                    ROOT_LOCATION,
                    ErrorCode::E092,
                    format!("Failed to read content file {}: {error}", item.path),
                );
                continue;
            }

            let expected_digest = expected
                .get(&item.path)
                .expect("pipeline only sees manifest paths");

            if let Some(actual) = &item.digest {
                if actual != expected_digest {
                    result.error(
                        ROOT_LOCATION,
                        ErrorCode::E092,
                        format!(
                            "Content file {} does not match its expected {} digest. Expected: {expected_digest}; Found: {actual}",
                            item.path, inventory.digest_algorithm
                        ),
                    );
                }
            }

            if let (Some(fixity), Ok(content_path)) = (
                &inventory.fixity,
                ContentPath::parse(&item.path),
            ) {
                for (algorithm, actual) in &item.fixity {
                    if let Some(map) = fixity.get(&algorithm.to_string()) {
                        if let Some(expected_fixity) = map.digest_for(&content_path) {
                            if expected_fixity != actual {
                                result.error(
                                    ROOT_LOCATION,
                                    ErrorCode::E093,
                                    format!(
                                        "Content file {} does not match its {} fixity digest. Expected: {expected_fixity}; Found: {actual}",
                                        item.path, algorithm
                                    ),
                                );
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Root-level checks beyond the namaste: stray files and the layout descriptor
    fn check_storage_root_contents(
        &self,
        entries: &[crate::ocfl::vfs::DirEntry],
        result: &mut ValidationResult,
    ) -> Result<()> {
        for entry in entries {
            if entry.is_dir {
                continue;
            }

            let name = entry.name.as_str();
            let allowed = namaste::parse_declaration(name).is_some()
                || name == OCFL_LAYOUT_FILE
                || (name.starts_with("ocfl_") && name.ends_with(".txt"));

            if !allowed {
                result.warn(
                    ROOT_LOCATION,
                    WarnCode::W015,
                    format!("Storage root contains an unexpected file: {name}"),
                );
            }
        }

        if self.fs.exists(OCFL_LAYOUT_FILE)? {
            let mut bytes = Vec::new();
            self.fs.read(OCFL_LAYOUT_FILE, &mut bytes)?;

            match serde_json::from_slice::<crate::ocfl::layout::LayoutDescriptor>(&bytes) {
                Ok(descriptor) => {
                    let config_path = join(
                        &join(EXTENSIONS_DIR, &descriptor.extension.to_string()),
                        EXTENSIONS_CONFIG_FILE,
                    );
                    if !self.fs.exists(&config_path)? {
                        result.warn(
                            ROOT_LOCATION,
                            WarnCode::W014,
                            format!(
                                "Layout extension {} has no {}",
                                descriptor.extension, EXTENSIONS_CONFIG_FILE
                            ),
                        );
                    }
                }
                Err(e) => {
                    result.error(
                        ROOT_LOCATION,
                        ErrorCode::E070,
                        format!("{OCFL_LAYOUT_FILE} could not be parsed: {e}"),
                    );
                }
            }
        }

        Ok(())
    }

    fn drain_sink(&self, result: &ValidationResult) {
        if let Some(sink) = &self.sink {
            for diagnostic in result.diagnostics() {
                sink(&diagnostic);
            }
        }
    }
}

fn result_error_root(result: &mut ValidationResult, code: ErrorCode, text: String) {
    result.error(ROOT_LOCATION, code, text);
}

/// Field-by-field inventory parse that accumulates coded diagnostics instead of failing
/// fast. Returns the strictly parsed inventory only when no fatal problems were found.
fn parse_inventory(
    bytes: &[u8],
    registry: &AlgorithmRegistry,
    location: &str,
    result: &mut ValidationResult,
) -> Option<Inventory> {
    let errors_before = result.fatal.len();

    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            result.error(
                location,
                ErrorCode::E033,
                format!("Inventory is not well-formed JSON: {e}"),
            );
            return None;
        }
    };

    let fields = match value.as_object() {
        Some(fields) => fields,
        None => {
            result.error(
                location,
                ErrorCode::E033,
                "Inventory must be a JSON object".to_string(),
            );
            return None;
        }
    };

    const KNOWN_FIELDS: &[&str] = &[
        "id",
        "type",
        "digestAlgorithm",
        "head",
        "contentDirectory",
        "manifest",
        "versions",
        "fixity",
    ];

    for field in fields.keys() {
        if !KNOWN_FIELDS.contains(&field.as_str()) {
            result.error(
                location,
                ErrorCode::E102,
                format!("Inventory contains an unknown field: '{field}'"),
            );
        }
    }

    // id, type, digestAlgorithm, head
    match fields.get("id").and_then(Value::as_str) {
        Some(id) => {
            if uriparse::URI::try_from(id).is_err() {
                result.warn(
                    location,
                    WarnCode::W005,
                    format!("Object id should be a URI. Found: {id}"),
                );
            }
        }
        None => result.error(
            location,
            ErrorCode::E036,
            "Inventory field 'id' must be a string".to_string(),
        ),
    }

    match fields.get("type").and_then(Value::as_str) {
        Some(uri) => {
            if SpecVersion::try_from_inventory_type(uri).is_err() {
                result.error(
                    location,
                    ErrorCode::E038,
                    format!("Inventory field 'type' is not a known inventory type: {uri}"),
                );
            }
        }
        None => result.error(
            location,
            ErrorCode::E036,
            "Inventory field 'type' must be a string".to_string(),
        ),
    }

    let algorithm = match fields.get("digestAlgorithm").and_then(Value::as_str) {
        Some(id) => match registry.parse(id) {
            Ok(algorithm) if algorithm.content_addressing() => {
                if algorithm == DigestAlgorithm::Sha256 {
                    result.warn(
                        location,
                        WarnCode::W004,
                        "sha512 should be used rather than sha256".to_string(),
                    );
                }
                Some(algorithm)
            }
            _ => {
                result.error(
                    location,
                    ErrorCode::E025,
                    format!("digestAlgorithm must be sha512 or sha256. Found: {id}"),
                );
                None
            }
        },
        None => {
            result.error(
                location,
                ErrorCode::E036,
                "Inventory field 'digestAlgorithm' must be a string".to_string(),
            );
            None
        }
    };

    let head = match fields.get("head").and_then(Value::as_str) {
        Some(head) => match VersionNum::try_from(head) {
            Ok(head) => Some(head),
            Err(_) => {
                result.error(
                    location,
                    ErrorCode::E040,
                    format!("Inventory field 'head' is not a valid version: {head}"),
                );
                None
            }
        },
        None => {
            result.error(
                location,
                ErrorCode::E036,
                "Inventory field 'head' must be a string".to_string(),
            );
            None
        }
    };

    if let Some(dir) = fields.get("contentDirectory") {
        match dir.as_str() {
            Some(dir) if dir.contains('/') => {
                result.error(
                    location,
                    ErrorCode::E017,
                    format!("contentDirectory may not contain '/': {dir}"),
                );
            }
            Some(dir) if dir == "." || dir == ".." || dir.is_empty() => {
                result.error(
                    location,
                    ErrorCode::E018,
                    format!("contentDirectory may not be '.' or '..': '{dir}'"),
                );
            }
            Some(_) => (),
            None => result.error(
                location,
                ErrorCode::E017,
                "contentDirectory must be a string".to_string(),
            ),
        }
    }

    // manifest
    let manifest_digests = match fields.get("manifest").and_then(Value::as_object) {
        Some(raw) => Some(check_digest_map::<ContentPath>(
            raw,
            location,
            "manifest",
            ErrorCode::E100,
            ErrorCode::E101,
            result,
        )),
        None => {
            result.error(
                location,
                ErrorCode::E041,
                "Inventory field 'manifest' must be an object".to_string(),
            );
            None
        }
    };

    // versions
    match fields.get("versions").and_then(Value::as_object) {
        Some(raw_versions) => {
            check_versions(
                raw_versions,
                head,
                manifest_digests.as_ref(),
                location,
                result,
            );
        }
        None => {
            result.error(
                location,
                ErrorCode::E043,
                "Inventory field 'versions' must be an object".to_string(),
            );
        }
    }

    // fixity
    if let Some(fixity) = fields.get("fixity") {
        match fixity.as_object() {
            Some(blocks) => {
                for (algorithm_id, block) in blocks {
                    match block.as_object() {
                        Some(raw) => {
                            check_digest_map::<ContentPath>(
                                raw,
                                location,
                                &format!("fixity block '{algorithm_id}'"),
                                ErrorCode::E057,
                                ErrorCode::E057,
                                result,
                            );
                        }
                        None => result.error(
                            location,
                            ErrorCode::E057,
                            format!("Fixity block '{algorithm_id}' must be an object"),
                        ),
                    }
                }
            }
            None => result.error(
                location,
                ErrorCode::E057,
                "Inventory field 'fixity' must be an object".to_string(),
            ),
        }
    }

    let _ = algorithm;

    if result.fatal.len() > errors_before {
        return None;
    }

    // The field pass was clean; the strict decoder should accept the same bytes
    match Inventory::from_slice(bytes) {
        Ok(inventory) => Some(inventory),
        Err(e) => {
            result.error(
                location,
                ErrorCode::E033,
                format!("Inventory could not be parsed: {e}"),
            );
            None
        }
    }
}

/// Validates one raw digest map, reporting path and digest problems with the supplied
/// codes. Returns the lowercase digest set for cross-map checks.
fn check_digest_map<P: InventoryPath>(
    raw: &serde_json::Map<String, Value>,
    location: &str,
    context: &str,
    invalid_path_code: ErrorCode,
    conflict_code: ErrorCode,
    result: &mut ValidationResult,
) -> HashSet<String> {
    let mut maker: MapMaker<P> = MapMaker::new();
    let mut digests: HashSet<String> = HashSet::new();

    for (digest, paths) in raw {
        let lower = digest.to_ascii_lowercase();
        if !digests.insert(lower) {
            result.error(
                location,
                ErrorCode::E096,
                format!("In the {context}, digest '{digest}' collides with another digest when lowercased"),
            );
            continue;
        }

        let paths = match paths.as_array() {
            Some(paths) if !paths.is_empty() => paths,
            _ => {
                result.error(
                    location,
                    conflict_code,
                    format!("In the {context}, digest '{digest}' must map to a non-empty array of paths"),
                );
                continue;
            }
        };

        for path in paths {
            let path = match path.as_str() {
                Some(path) => path,
                None => {
                    result.error(
                        location,
                        invalid_path_code,
                        format!("In the {context}, digest '{digest}' maps to a non-string path"),
                    );
                    continue;
                }
            };

            match maker.add(HexDigest::from(digest.as_str()), path) {
                Ok(()) => (),
                Err(AddError::InvalidPath(path)) => {
                    result.error(
                        location,
                        invalid_path_code,
                        format!("In the {context}, path '{path}' is invalid"),
                    );
                }
                Err(AddError::PathConflict(_)) | Err(AddError::Exists) => {
                    result.error(
                        location,
                        conflict_code,
                        format!("In the {context}, path '{path}' conflicts with another path"),
                    );
                }
            }
        }
    }

    digests
}

fn check_versions(
    raw_versions: &serde_json::Map<String, Value>,
    head: Option<VersionNum>,
    manifest_digests: Option<&HashSet<String>>,
    location: &str,
    result: &mut ValidationResult,
) {
    if raw_versions.is_empty() {
        result.error(
            location,
            ErrorCode::E008,
            "Inventory must contain at least one version".to_string(),
        );
        return;
    }

    let mut numbers: BTreeMap<VersionNum, &str> = BTreeMap::new();

    for key in raw_versions.keys() {
        match VersionNum::try_from(key.as_str()) {
            Ok(version_num) => {
                numbers.insert(version_num, key);
            }
            Err(_) => {
                result.error(
                    location,
                    ErrorCode::E046,
                    format!("'{key}' is not a valid version number"),
                );
            }
        }
    }

    if let Some(first) = numbers.keys().next() {
        if first.number != 1 {
            result.error(
                location,
                ErrorCode::E009,
                "Version numbering must start at v1".to_string(),
            );
        }

        let width = first.width;
        let mut expected = first.number;

        for version_num in numbers.keys() {
            if version_num.width != width {
                result.error(
                    location,
                    ErrorCode::E012,
                    format!("Version {version_num} uses inconsistent zero-padding"),
                );
            }
            if version_num.number != expected {
                result.error(
                    location,
                    ErrorCode::E010,
                    format!("Version sequence has a gap before {version_num}"),
                );
                expected = version_num.number;
            }
            expected += 1;
        }

        if let Some(head) = head {
            let highest = *numbers.keys().next_back().unwrap();
            if head != highest {
                result.error(
                    location,
                    ErrorCode::E040,
                    format!("head is {head} but the highest version is {highest}"),
                );
            }
        }
    }

    for (version_key, version) in raw_versions {
        let version_location = if location == ROOT_LOCATION {
            version_key.clone()
        } else {
            location.to_string()
        };

        let version = match version.as_object() {
            Some(version) => version,
            None => {
                result.error(
                    &version_location,
                    ErrorCode::E048,
                    format!("Version {version_key} must be an object"),
                );
                continue;
            }
        };

        for field in version.keys() {
            if !["created", "state", "message", "user"].contains(&field.as_str()) {
                result.error(
                    &version_location,
                    ErrorCode::E102,
                    format!("Version {version_key} contains an unknown field: '{field}'"),
                );
            }
        }

        match version.get("created").and_then(Value::as_str) {
            Some(created) => {
                if DateTime::parse_from_rfc3339(created).is_err() {
                    result.error(
                        &version_location,
                        ErrorCode::E049,
                        format!(
                            "Version {version_key} 'created' is not an RFC 3339 timestamp: {created}"
                        ),
                    );
                }
            }
            None => {
                result.error(
                    &version_location,
                    ErrorCode::E048,
                    format!("Version {version_key} must have a 'created' timestamp"),
                );
            }
        }

        match version.get("state").and_then(Value::as_object) {
            Some(raw_state) => {
                let state_digests = check_digest_map::<LogicalPath>(
                    raw_state,
                    &version_location,
                    &format!("state of {version_key}"),
                    ErrorCode::E052,
                    ErrorCode::E095,
                    result,
                );

                if let Some(manifest_digests) = manifest_digests {
                    for digest in state_digests {
                        if !manifest_digests.contains(&digest) {
                            result.error(
                                &version_location,
                                ErrorCode::E050,
                                format!(
                                    "State digest in {version_key} is not present in the manifest: {digest}"
                                ),
                            );
                        }
                    }
                }
            }
            None => {
                result.error(
                    &version_location,
                    ErrorCode::E050,
                    format!("Version {version_key} must have a 'state' map"),
                );
            }
        }

        match version.get("message") {
            None => result.warn(
                &version_location,
                WarnCode::W007,
                format!("Version {version_key} should have a message"),
            ),
            Some(message) if !message.is_string() => {
                result.error(
                    &version_location,
                    ErrorCode::E094,
                    format!("Version {version_key} message must be a string"),
                );
            }
            Some(_) => (),
        }

        match version.get("user") {
            None => result.warn(
                &version_location,
                WarnCode::W007,
                format!("Version {version_key} should have a user"),
            ),
            Some(user) => match user.as_object() {
                Some(user) => {
                    if user.get("name").and_then(Value::as_str).is_none() {
                        result.error(
                            &version_location,
                            ErrorCode::E054,
                            format!("Version {version_key} user must have a name"),
                        );
                    }

                    match user.get("address").and_then(Value::as_str) {
                        Some(address) => {
                            if uriparse::URI::try_from(address).is_err() {
                                result.warn(
                                    &version_location,
                                    WarnCode::W009,
                                    format!(
                                        "Version {version_key} user address should be a URI: {address}"
                                    ),
                                );
                            }
                        }
                        None => result.warn(
                            &version_location,
                            WarnCode::W008,
                            format!("Version {version_key} user should have an address"),
                        ),
                    }
                }
                None => result.error(
                    &version_location,
                    ErrorCode::E054,
                    format!("Version {version_key} user must be an object"),
                ),
            },
        }
    }
}
