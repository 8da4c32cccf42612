//! A stage is the caller-owned description of the next version of an object: a prospective
//! logical tree with precomputed digests, plus the source filesystem any new content will
//! be copied from. Stages are transient; nothing is persisted until the commit engine runs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use log::info;

use crate::ocfl::digest::{DigestAlgorithm, HexDigest, MultiDigestWriter};
use crate::ocfl::digestmap::{AddError, DigestMap, MapMaker};
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::inventory::User;
use crate::ocfl::path::{validate_content_dir, LogicalPath};
use crate::ocfl::pipeline::{CancelToken, DigestPipeline, FileRef};
use crate::ocfl::vfs::{DirEntry, Vfs};

pub struct Stage {
    pub(crate) algorithm: DigestAlgorithm,
    pub(crate) fixity_algorithms: Vec<DigestAlgorithm>,
    pub(crate) state: MapMaker<LogicalPath>,
    /// Lowercase primary digest to the source path that can produce those bytes
    pub(crate) sources: HashMap<String, String>,
    /// Per fixity algorithm: lowercase primary digest to the fixity digest
    pub(crate) fixity: HashMap<DigestAlgorithm, HashMap<String, HexDigest>>,
    pub(crate) source_fs: Option<Arc<dyn Vfs>>,
    pub(crate) content_directory: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) user: Option<User>,
    pub(crate) created: Option<DateTime<FixedOffset>>,
}

impl Stage {
    /// Creates an empty stage. The algorithm must be a content addressing algorithm and
    /// must match the target object's algorithm when the object already exists.
    pub fn new(algorithm: DigestAlgorithm) -> Result<Self> {
        if !algorithm.content_addressing() {
            return Err(OcflError::Protocol(format!(
                "The stage digest algorithm must be sha512 or sha256. Found: {algorithm}"
            )));
        }

        Ok(Self {
            algorithm,
            fixity_algorithms: Vec::new(),
            state: MapMaker::new(),
            sources: HashMap::new(),
            fixity: HashMap::new(),
            source_fs: None,
            content_directory: None,
            message: None,
            user: None,
            created: None,
        })
    }

    /// Sets the filesystem new content is read from
    pub fn with_source(mut self, fs: Arc<dyn Vfs>) -> Self {
        self.source_fs = Some(fs);
        self
    }

    /// Additional algorithms to record in the inventory's fixity block
    pub fn with_fixity_algorithms(mut self, algorithms: Vec<DigestAlgorithm>) -> Self {
        self.fixity_algorithms = algorithms;
        self
    }

    /// Overrides the content directory name. Only honored when the commit creates a new
    /// object; an existing object's content directory is immutable.
    pub fn with_content_directory(mut self, name: &str) -> Result<Self> {
        validate_content_dir(name)?;
        self.content_directory = Some(name.to_string());
        Ok(self)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the committing user. A name is required to set an address.
    pub fn with_user(mut self, name: impl Into<String>, address: Option<String>) -> Self {
        self.user = Some(User::new(name, address));
        self
    }

    pub fn with_created(mut self, created: DateTime<FixedOffset>) -> Self {
        self.created = Some(created);
        self
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    pub fn has_digest(&self, digest: &HexDigest) -> bool {
        self.state.has_digest(digest)
    }

    /// Adds a logical path backed by a digest the caller already knows, typically content
    /// that is already in the object's manifest. Re-adding the identical pair is a no-op.
    pub fn add(&mut self, digest: HexDigest, logical_path: &str) -> Result<()> {
        match self.state.add(digest, logical_path) {
            Ok(()) | Err(AddError::Exists) => Ok(()),
            Err(AddError::InvalidPath(path)) => Err(OcflError::InvalidPath(path)),
            Err(AddError::PathConflict(path)) => Err(OcflError::PathConflict(path)),
        }
    }

    /// Digests a file from the source filesystem and stages it at the logical path.
    /// Returns the file's primary digest.
    pub fn add_source_file(&mut self, logical_path: &str, source_path: &str) -> Result<HexDigest> {
        let fs = self.require_source()?.clone();

        let mut algorithms = Vec::with_capacity(1 + self.fixity_algorithms.len());
        algorithms.push(self.algorithm);
        algorithms.extend(self.fixity_algorithms.iter().copied());

        let mut writer = MultiDigestWriter::new(&algorithms, std::io::sink());
        let mut file = fs.open(source_path)?;
        std::io::copy(&mut file, &mut writer)
            .map_err(|e| OcflError::io("read", source_path, e))?;

        let digest = writer
            .sum(self.algorithm)
            .expect("primary digest must have been computed");
        let fixity = writer.sums();

        self.record(digest.clone(), fixity, logical_path, source_path)?;
        Ok(digest)
    }

    /// Digests every file under a directory of the source filesystem with the concurrent
    /// pipeline, staging each at its path relative that directory, optionally beneath a
    /// logical prefix.
    pub fn add_source_dir(
        &mut self,
        source_dir: &str,
        logical_prefix: &str,
        workers: usize,
        cancel: &CancelToken,
    ) -> Result<()> {
        let fs = self.require_source()?.clone();

        let mut files = Vec::new();
        walk_files(fs.as_ref(), source_dir, "", &mut files)?;
        info!("Staging {} files from {}", files.len(), source_dir);

        let refs: Vec<Result<FileRef>> = files
            .iter()
            .map(|path| Ok(FileRef::new(source_dir, path.clone())))
            .collect();

        let mut pipeline = DigestPipeline::new(self.algorithm);
        if !self.fixity_algorithms.is_empty() {
            pipeline = pipeline.with_fixity(self.fixity_algorithms.clone());
        }
        if workers > 0 {
            pipeline = pipeline.with_workers(workers);
        }

        let stream = pipeline.run(fs, refs.into_iter(), cancel.clone());

        for item in stream {
            if let Some(error) = item.error {
                return Err(error);
            }

            let digest = item
                .digest
                .ok_or_else(|| OcflError::Protocol("Pipeline item missing digest".to_string()))?;

            let logical = if logical_prefix.is_empty() {
                item.path.clone()
            } else {
                format!("{logical_prefix}/{}", item.path)
            };

            let source_path = crate::ocfl::vfs::join(source_dir, &item.path);
            self.record(digest, item.fixity, &logical, &source_path)?;
        }

        Ok(())
    }

    /// The source path that can produce the digest's bytes, if one was staged
    pub(crate) fn source_for(&self, digest: &HexDigest) -> Option<&str> {
        self.sources
            .get(digest.normalized().as_str())
            .map(String::as_str)
    }

    /// Builds the final state map: lowercase digests, sorted path lists
    pub(crate) fn build_state(self) -> (DigestMap<LogicalPath>, StageMeta) {
        let meta = StageMeta {
            algorithm: self.algorithm,
            fixity_algorithms: self.fixity_algorithms,
            sources: self.sources,
            fixity: self.fixity,
            source_fs: self.source_fs,
            content_directory: self.content_directory,
            message: self.message,
            user: self.user,
            created: self.created,
        };

        (self.state.build(), meta)
    }

    fn record(
        &mut self,
        digest: HexDigest,
        fixity: HashMap<DigestAlgorithm, HexDigest>,
        logical_path: &str,
        source_path: &str,
    ) -> Result<()> {
        match self.state.add(digest.clone(), logical_path) {
            Ok(()) | Err(AddError::Exists) => (),
            Err(AddError::InvalidPath(path)) => return Err(OcflError::InvalidPath(path)),
            Err(AddError::PathConflict(path)) => return Err(OcflError::PathConflict(path)),
        }

        let key = digest.normalized();
        self.sources
            .insert(key.as_str().to_string(), source_path.to_string());

        for (algorithm, fixity_digest) in fixity {
            self.fixity
                .entry(algorithm)
                .or_default()
                .insert(key.as_str().to_string(), fixity_digest);
        }

        Ok(())
    }

    fn require_source(&self) -> Result<&Arc<dyn Vfs>> {
        self.source_fs.as_ref().ok_or_else(|| {
            OcflError::Protocol("The stage has no source filesystem configured".to_string())
        })
    }
}

/// Everything the commit engine needs from a consumed stage besides the state map
pub(crate) struct StageMeta {
    pub(crate) algorithm: DigestAlgorithm,
    pub(crate) fixity_algorithms: Vec<DigestAlgorithm>,
    pub(crate) sources: HashMap<String, String>,
    pub(crate) fixity: HashMap<DigestAlgorithm, HashMap<String, HexDigest>>,
    pub(crate) source_fs: Option<Arc<dyn Vfs>>,
    pub(crate) content_directory: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) user: Option<User>,
    pub(crate) created: Option<DateTime<FixedOffset>>,
}

impl StageMeta {
    pub(crate) fn source_for(&self, digest: &HexDigest) -> Option<&str> {
        self.sources
            .get(digest.normalized().as_str())
            .map(String::as_str)
    }

    pub(crate) fn fixity_for(
        &self,
        algorithm: DigestAlgorithm,
        digest: &HexDigest,
    ) -> Option<&HexDigest> {
        self.fixity
            .get(&algorithm)
            .and_then(|m| m.get(digest.normalized().as_str()))
    }
}

/// Collects every file beneath `dir`, returning paths relative to it
fn walk_files(fs: &dyn Vfs, dir: &str, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    let full = crate::ocfl::vfs::join(dir, prefix);
    let entries: Vec<DirEntry> = fs.read_dir(&full)?;

    for entry in entries {
        let rel = crate::ocfl::vfs::join(prefix, &entry.name);
        if entry.is_dir {
            walk_files(fs, dir, &rel, out)?;
        } else {
            out.push(rel);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::Stage;
    use crate::ocfl::digest::{DigestAlgorithm, HexDigest};
    use crate::ocfl::pipeline::CancelToken;
    use crate::ocfl::vfs::{MemFs, Vfs};

    fn source_fs() -> Arc<dyn Vfs> {
        let fs = MemFs::new();
        fs.write("data/a.txt", &mut Cursor::new(b"alpha\n".to_vec()))
            .unwrap();
        fs.write("data/sub/b.txt", &mut Cursor::new(b"beta\n".to_vec()))
            .unwrap();
        Arc::new(fs)
    }

    #[test]
    fn sha1_is_not_a_stage_algorithm() {
        assert!(Stage::new(DigestAlgorithm::Sha1).is_err());
        assert!(Stage::new(DigestAlgorithm::Sha512).is_ok());
    }

    #[test]
    fn add_source_file_records_digest_and_source() {
        let mut stage = Stage::new(DigestAlgorithm::Sha256)
            .unwrap()
            .with_source(source_fs());

        let digest = stage.add_source_file("docs/a.txt", "data/a.txt").unwrap();

        assert!(stage.has_digest(&digest));
        assert_eq!(Some("data/a.txt"), stage.source_for(&digest));
    }

    #[test]
    fn add_source_dir_stages_the_whole_tree() {
        let mut stage = Stage::new(DigestAlgorithm::Sha256)
            .unwrap()
            .with_source(source_fs())
            .with_fixity_algorithms(vec![DigestAlgorithm::Md5]);

        stage
            .add_source_dir("data", "", 2, &CancelToken::new())
            .unwrap();

        let (state, meta) = stage.build_state();
        assert_eq!(2, state.len());
        assert!(state.has_path(&"a.txt".try_into().unwrap()));
        assert!(state.has_path(&"sub/b.txt".try_into().unwrap()));

        for digest in state.digests() {
            assert!(meta.source_for(digest).is_some());
            assert!(meta.fixity_for(DigestAlgorithm::Md5, digest).is_some());
        }
    }

    #[test]
    fn conflicting_logical_paths_are_rejected() {
        let mut stage = Stage::new(DigestAlgorithm::Sha512).unwrap();

        stage.add(HexDigest::from("aa"), "a/b/c").unwrap();
        assert!(stage.add(HexDigest::from("bb"), "a/b").is_err());

        // identical digest and path is tolerated
        stage.add(HexDigest::from("AA"), "a/b/c").unwrap();
    }
}
