//! The digest map is the structure behind both the inventory manifest and every version's
//! state: a map from digest to a non-empty list of paths. The same path may not appear
//! twice anywhere in one map, no path may be a directory prefix of another, and no two
//! digest keys may collide when lowercased.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Formatter;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ocfl::digest::HexDigest;
use crate::ocfl::error::{OcflError, Result};
use crate::ocfl::path::InventoryPath;

/// An immutable, validated digest-to-paths map. Digest case is preserved exactly as read,
/// but all lookups are case insensitive. Construct one with [`MapMaker`] or by
/// deserializing JSON.
#[derive(Debug, Clone)]
pub struct DigestMap<P: InventoryPath> {
    entries: BTreeMap<HexDigest, Vec<P>>,
    path_index: HashMap<P, HexDigest>,
}

/// Builder for [`DigestMap`]. Internally maintains a trie over path segments so that exact
/// and prefix conflicts are rejected as entries are added.
pub struct MapMaker<P: InventoryPath> {
    entries: BTreeMap<HexDigest, Vec<P>>,
    tree: PathTree,
}

/// The failure modes of [`MapMaker::add`]. `Exists` signals that the identical digest/path
/// pair was already added; callers may treat it as success.
#[derive(Debug, Eq, PartialEq)]
pub enum AddError {
    InvalidPath(String),
    PathConflict(String),
    Exists,
}

impl<P: InventoryPath> DigestMap<P> {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            path_index: HashMap::new(),
        }
    }

    /// Builds and fully validates a map from raw entries. Intended for tests and callers
    /// that assemble maps outside of [`MapMaker`].
    pub fn from_entries<I, V>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (HexDigest, V)>,
        V: IntoIterator<Item = P>,
    {
        let mut map = Self::empty();

        for (digest, paths) in entries {
            let paths: Vec<P> = paths.into_iter().collect();
            map.insert_entry(digest, paths)?;
        }

        map.validate()?;
        Ok(map)
    }

    fn insert_entry(&mut self, digest: HexDigest, paths: Vec<P>) -> Result<()> {
        if paths.is_empty() {
            return Err(OcflError::Protocol(format!(
                "Digest {digest} maps to an empty path list"
            )));
        }

        if self.entries.contains_key(&digest) {
            return Err(OcflError::DigestConflict(digest.to_string()));
        }

        for path in &paths {
            if self.path_index.contains_key(path) {
                return Err(OcflError::PathConflict(path.as_str().to_string()));
            }
            self.path_index.insert(path.clone(), digest.clone());
        }

        self.entries.insert(digest, paths);
        Ok(())
    }

    /// Checks the remaining structural rule that insertion alone cannot catch: no path may
    /// be a directory prefix of another. Empty lists, duplicate paths, and case-colliding
    /// digests are rejected at insertion time.
    pub fn validate(&self) -> Result<()> {
        let mut tree = PathTree::new();

        for path in self.path_index.keys() {
            tree.insert(path.as_str())
                .map_err(|_| OcflError::PathConflict(path.as_str().to_string()))?;
        }

        Ok(())
    }

    /// The digest keys, case preserved
    pub fn digests(&self) -> impl Iterator<Item = &HexDigest> {
        self.entries.keys()
    }

    pub fn paths_for(&self, digest: &HexDigest) -> Option<&[P]> {
        self.entries.get(digest).map(|v| v.as_slice())
    }

    pub fn digest_for(&self, path: &P) -> Option<&HexDigest> {
        self.path_index.get(path)
    }

    pub fn has_digest(&self, digest: &HexDigest) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn has_path(&self, path: &P) -> bool {
        self.path_index.contains_key(path)
    }

    /// Visits every digest/path pair without allocating
    pub fn for_each<'a>(&'a self, mut f: impl FnMut(&'a HexDigest, &'a P)) {
        for (digest, paths) in &self.entries {
            for path in paths {
                f(digest, path);
            }
        }
    }

    /// Flattens the map into a path-to-digest table.
    ///
    /// Panics if a path appears twice. The map rejects duplicates on every construction
    /// path, so a duplicate here is a programming error, not an input error.
    pub fn paths(&self) -> HashMap<&P, &HexDigest> {
        let mut flat = HashMap::with_capacity(self.path_index.len());

        for (digest, paths) in &self.entries {
            for path in paths {
                if flat.insert(path, digest).is_some() {
                    panic!(
                        "Digest map invariant violated: path '{}' is mapped more than once",
                        path.as_str()
                    );
                }
            }
        }

        flat
    }

    /// Returns a copy with lowercase digests and sorted path lists
    pub fn normalized(&self) -> Result<DigestMap<P>> {
        let mut normalized = DigestMap::empty();

        for (digest, paths) in &self.entries {
            let mut paths = paths.clone();
            paths.sort_unstable();
            normalized.insert_entry(digest.normalized(), paths)?;
        }

        Ok(normalized)
    }

    /// True when the normalized forms of the two maps are structurally identical
    pub fn equal(&self, other: &DigestMap<P>) -> bool {
        if self.entries.len() != other.entries.len()
            || self.path_index.len() != other.path_index.len()
        {
            return false;
        }

        for (digest, paths) in &self.entries {
            let other_paths = match other.entries.get(digest) {
                Some(paths) => paths,
                None => return false,
            };

            if paths.len() != other_paths.len() {
                return false;
            }

            let mut left = paths.clone();
            let mut right = other_paths.clone();
            left.sort_unstable();
            right.sort_unstable();

            if left != right {
                return false;
            }
        }

        true
    }

    /// The number of path mappings in the map
    pub fn len(&self) -> usize {
        self.path_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HexDigest, &Vec<P>)> {
        self.entries.iter()
    }
}

impl<P: InventoryPath> Default for DigestMap<P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<P: InventoryPath> MapMaker<P> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            tree: PathTree::new(),
        }
    }

    /// Parses and adds a raw path for the digest. See [`MapMaker::insert`].
    pub fn add(&mut self, digest: HexDigest, path: &str) -> Result<(), AddError> {
        let path = P::parse(path).map_err(|_| AddError::InvalidPath(path.to_string()))?;
        self.insert(digest, path)
    }

    /// Adds a digest/path mapping. Fails with `PathConflict` if the path is already mapped
    /// to a different digest or conflicts with another path as a directory prefix, and with
    /// `Exists` if this exact pair was already added.
    pub fn insert(&mut self, digest: HexDigest, path: P) -> Result<(), AddError> {
        match self.tree.insert(path.as_str()) {
            Ok(()) => (),
            Err(Conflict::Exact) => {
                // The path is present. Same digest means the caller repeated themselves;
                // a different digest is a genuine conflict.
                let same = self
                    .entries
                    .get(&digest)
                    .map(|paths| paths.contains(&path))
                    .unwrap_or(false);

                return if same {
                    Err(AddError::Exists)
                } else {
                    Err(AddError::PathConflict(path.as_str().to_string()))
                };
            }
            Err(Conflict::Prefix) => {
                return Err(AddError::PathConflict(path.as_str().to_string()));
            }
        }

        self.entries.entry(digest).or_default().push(path);
        Ok(())
    }

    /// True if the digest, compared case insensitively, has been added
    pub fn has_digest(&self, digest: &HexDigest) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Produces the finished map with lowercase digests and sorted path lists
    pub fn build(self) -> DigestMap<P> {
        let mut entries = BTreeMap::new();
        let mut path_index = HashMap::new();

        for (digest, mut paths) in self.entries {
            let digest = digest.normalized();
            paths.sort_unstable();

            for path in &paths {
                path_index.insert(path.clone(), digest.clone());
            }

            entries.insert(digest, paths);
        }

        DigestMap {
            entries,
            path_index,
        }
    }
}

impl<P: InventoryPath> Default for MapMaker<P> {
    fn default() -> Self {
        Self::new()
    }
}

enum Conflict {
    Exact,
    Prefix,
}

/// Trie over path segments used to detect file-versus-directory collisions
struct PathTree {
    root: Node,
}

#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    terminal: bool,
}

impl PathTree {
    fn new() -> Self {
        Self {
            root: Node::default(),
        }
    }

    fn insert(&mut self, path: &str) -> Result<(), Conflict> {
        let segments: Vec<&str> = path.split('/').collect();
        let last = segments.len() - 1;

        let mut node = &mut self.root;

        for (i, segment) in segments.into_iter().enumerate() {
            if node.terminal {
                // An ancestor of this path is already a file
                return Err(Conflict::Prefix);
            }

            if i == last {
                let child = node.children.entry(segment.to_string()).or_default();
                if child.terminal {
                    return Err(Conflict::Exact);
                }
                if !child.children.is_empty() {
                    // This path is already a directory
                    return Err(Conflict::Prefix);
                }
                child.terminal = true;
            } else {
                node = node.children.entry(segment.to_string()).or_default();
            }
        }

        Ok(())
    }
}

impl<P: InventoryPath> Serialize for DigestMap<P> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.validate()
            .map_err(|e| serde::ser::Error::custom(e.to_string()))?;

        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (digest, paths) in &self.entries {
            map.serialize_entry(digest, paths)?;
        }
        map.end()
    }
}

struct DigestMapVisitor<P: InventoryPath> {
    brand: PhantomData<P>,
}

impl<'de, P: InventoryPath> Visitor<'de> for DigestMapVisitor<P> {
    type Value = DigestMap<P>;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        formatter.write_str("a map of digests to arrays of paths")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut access: M) -> Result<Self::Value, M::Error> {
        let mut map = DigestMap::empty();

        while let Some((digest, paths)) = access.next_entry::<HexDigest, Vec<P>>()? {
            map.insert_entry(digest, paths)
                .map_err(|e| serde::de::Error::custom(e.to_string()))?;
        }

        Ok(map)
    }
}

impl<'de, P: InventoryPath> Deserialize<'de> for DigestMap<P> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(DigestMapVisitor { brand: PhantomData })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::{AddError, DigestMap, MapMaker};
    use crate::ocfl::digest::HexDigest;
    use crate::ocfl::path::LogicalPath;

    fn path(p: &str) -> LogicalPath {
        p.try_into().unwrap()
    }

    fn digest(d: &str) -> HexDigest {
        HexDigest::from(d)
    }

    #[test]
    fn build_and_query() {
        let mut maker = MapMaker::new();
        maker.add(digest("ABCD"), "foo/bar.txt").unwrap();
        maker.add(digest("abcd"), "zz.txt").unwrap();
        maker.add(digest("efgh"), "foo/baz.txt").unwrap();

        let map = maker.build();

        assert_eq!(3, map.len());
        assert_eq!(
            vec![path("foo/bar.txt"), path("zz.txt")],
            map.paths_for(&digest("abcd")).unwrap().to_vec()
        );
        assert_eq!(
            &digest("efgh"),
            map.digest_for(&path("foo/baz.txt")).unwrap()
        );
        assert!(map.has_digest(&digest("ABCD")));
        assert!(!map.has_digest(&digest("0000")));
    }

    #[test]
    fn build_normalizes_digest_case_and_sorts_paths() {
        let mut maker = MapMaker::new();
        maker.add(digest("AbCd"), "b.txt").unwrap();
        maker.add(digest("ABCD"), "a.txt").unwrap();

        let map = maker.build();

        let keys: Vec<String> = map.digests().map(|d| d.to_string()).collect();
        assert_eq!(vec!["abcd".to_string()], keys);
        assert_eq!(
            vec![path("a.txt"), path("b.txt")],
            map.paths_for(&digest("abcd")).unwrap().to_vec()
        );
    }

    #[test]
    fn add_rejects_invalid_paths() {
        let mut maker: MapMaker<LogicalPath> = MapMaker::new();
        assert!(matches!(
            maker.add(digest("aa"), "/leading"),
            Err(AddError::InvalidPath(_))
        ));
        assert!(matches!(
            maker.add(digest("aa"), "a//b"),
            Err(AddError::InvalidPath(_))
        ));
        assert!(matches!(
            maker.add(digest("aa"), "."),
            Err(AddError::InvalidPath(_))
        ));
    }

    #[test]
    fn add_rejects_duplicate_paths() {
        let mut maker: MapMaker<LogicalPath> = MapMaker::new();
        maker.add(digest("aa"), "file.txt").unwrap();

        assert_eq!(
            Err(AddError::Exists),
            maker.add(digest("AA"), "file.txt")
        );
        assert!(matches!(
            maker.add(digest("bb"), "file.txt"),
            Err(AddError::PathConflict(_))
        ));
    }

    #[test]
    fn add_rejects_prefix_conflicts_both_directions() {
        let mut maker: MapMaker<LogicalPath> = MapMaker::new();
        maker.add(digest("aa"), "a/b/c").unwrap();

        assert!(matches!(
            maker.add(digest("bb"), "a/b"),
            Err(AddError::PathConflict(_))
        ));
        assert!(matches!(
            maker.add(digest("cc"), "a/b/c/d"),
            Err(AddError::PathConflict(_))
        ));

        // Siblings are fine
        maker.add(digest("dd"), "a/b/d").unwrap();
        maker.add(digest("ee"), "a/e").unwrap();
    }

    #[test]
    fn from_entries_rejects_case_colliding_digests() {
        let result: crate::ocfl::Result<DigestMap<LogicalPath>> = DigestMap::from_entries([
            (digest("ABC"), vec![path("a.txt")]),
            (digest("abc"), vec![path("b.txt")]),
        ]);

        assert!(matches!(
            result,
            Err(crate::ocfl::OcflError::DigestConflict(_))
        ));
    }

    #[test]
    fn from_entries_rejects_empty_path_lists() {
        let result: crate::ocfl::Result<DigestMap<LogicalPath>> =
            DigestMap::from_entries([(digest("abc"), Vec::new())]);
        assert!(result.is_err());
    }

    #[test]
    fn normalized_map_equals_original() {
        let map = DigestMap::from_entries([
            (digest("ABC"), vec![path("b.txt"), path("a.txt")]),
            (digest("def"), vec![path("c/d.txt")]),
        ])
        .unwrap();

        let normalized = map.normalized().unwrap();

        assert!(map.equal(&normalized));
        assert!(normalized.digests().all(|d| d.is_normalized()));
    }

    #[test]
    fn equality_is_case_and_order_insensitive() {
        let left = DigestMap::from_entries([(
            digest("ABC"),
            vec![path("b.txt"), path("a.txt")],
        )])
        .unwrap();
        let right =
            DigestMap::from_entries([(digest("abc"), vec![path("a.txt"), path("b.txt")])])
                .unwrap();
        let different =
            DigestMap::from_entries([(digest("abc"), vec![path("a.txt")])]).unwrap();

        assert!(left.equal(&right));
        assert!(!left.equal(&different));
    }

    #[test]
    fn flattened_paths_are_injective() {
        let map = DigestMap::from_entries([
            (digest("aa"), vec![path("x/a.txt"), path("x/b.txt")]),
            (digest("bb"), vec![path("y.txt")]),
        ])
        .unwrap();

        let flat = map.paths();
        assert_eq!(3, flat.len());
        assert_eq!(&&digest("bb"), flat.get(&path("y.txt")).unwrap());
    }

    #[test]
    fn json_round_trip() {
        let mut maker = MapMaker::new();
        maker.add(digest("abcd"), "foo/bar.txt").unwrap();
        maker.add(digest("abcd"), "copy.txt").unwrap();
        maker.add(digest("efgh"), "baz.txt").unwrap();
        let map = maker.build();

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(
            r#"{"abcd":["copy.txt","foo/bar.txt"],"efgh":["baz.txt"]}"#,
            json
        );

        let back: DigestMap<LogicalPath> = serde_json::from_str(&json).unwrap();
        assert!(map.equal(&back));
    }

    #[test]
    fn empty_map_serializes_to_empty_object() {
        let map: DigestMap<LogicalPath> = DigestMap::empty();
        assert_eq!("{}", serde_json::to_string(&map).unwrap());

        let back: DigestMap<LogicalPath> = serde_json::from_str("{}").unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn deserialize_rejects_conflicts() {
        let dup_path: Result<DigestMap<LogicalPath>, _> =
            serde_json::from_str(r#"{"aa":["f.txt"],"bb":["f.txt"]}"#);
        assert!(dup_path.is_err());

        let dup_digest: Result<DigestMap<LogicalPath>, _> =
            serde_json::from_str(r#"{"AA":["a.txt"],"aa":["b.txt"]}"#);
        assert!(dup_digest.is_err());
    }
}
