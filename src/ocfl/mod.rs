//! A storage agnostic library for reading, writing, and validating
//! [OCFL repositories](https://ocfl.io/).
//!
//! Open an existing storage root and read an object:
//!
//! ```no_run
//! use std::sync::Arc;
//! use ocflkit::ocfl::{LocalFs, StorageRoot};
//!
//! # fn main() -> ocflkit::ocfl::Result<()> {
//! let root = StorageRoot::open(Arc::new(LocalFs::new("path/to/storage/root")))?;
//! let object = root.object("urn:example:1")?;
//! let head = object.head_state()?;
//! # Ok(())
//! # }
//! ```

pub use self::commit::{commit, CommitOptions, CommitOutcome};
pub use self::digest::{
    AlgorithmRegistry, DigestAlgorithm, DigestReader, DigestWriter, Digester, HexDigest,
    MultiDigestWriter,
};
pub use self::digestmap::{AddError, DigestMap, MapMaker};
pub use self::error::{OcflError, Result};
pub use self::inventory::{Inventory, User, VersionRecord};
pub use self::layout::{LayoutDescriptor, LayoutExtensionName, StorageLayout};
pub use self::namaste::{Declaration, DeclarationLevel, Namaste};
pub use self::object::{Object, StateChange, StateEntry, StateFile, VersionState};
pub use self::path::{ContentPath, InventoryPath, LogicalPath};
pub use self::pipeline::{CancelToken, DigestPipeline, DigestStream, DigestedFile, FileRef};
pub use self::root::{ObjectLocation, ScanIssue, StorageRoot};
pub use self::spec::SpecVersion;
pub use self::stage::Stage;
pub use self::validate::{
    CodeRef, Diagnostic, DiagnosticSink, ErrorCode, RootValidationResult, Severity, ValidationError,
    ValidationResult, ValidationWarning, Validator, ValidatorConfig, WarnCode,
};
pub use self::vfs::{DirEntry, LocalFs, MemFs, Vfs, VfsFile};
pub use self::vnum::VersionNum;

mod commit;
mod consts;
mod digest;
mod digestmap;
mod error;
mod inventory;
mod layout;
mod namaste;
mod object;
mod path;
mod pipeline;
mod root;
mod spec;
mod stage;
mod validate;
mod vfs;
mod vnum;
