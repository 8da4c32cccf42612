//! End-to-end tests of the commit engine against in-memory and local filesystem backends.

use std::convert::TryInto;
use std::io::Cursor;
use std::sync::Arc;

use chrono::DateTime;
use ocflkit::ocfl::{
    commit, CancelToken, CommitOptions, DigestAlgorithm, HexDigest, LayoutExtensionName, LocalFs,
    MemFs, OcflError, SpecVersion, Stage, StateChange, StorageLayout, StorageRoot, Validator, Vfs,
};

const HELLO_SHA512: &str =
    "e7c22b994c59d9cf2b48e549b1e24666636045930d3da7c1acb299d1c3b7f931f94aae41edda2c2b207a36e\
     10f8bcb8d45223e54878f5b316e7ce3b6bc019629";

fn flat_root(fs: Arc<dyn Vfs>) -> StorageRoot {
    StorageRoot::init(
        fs,
        SpecVersion::Ocfl1_1,
        Some(StorageLayout::new(LayoutExtensionName::FlatDirect, None).unwrap()),
    )
    .unwrap()
}

fn write_str(fs: &dyn Vfs, path: &str, content: &str) {
    fs.write(path, &mut Cursor::new(content.as_bytes().to_vec()))
        .unwrap();
}

fn read_str(fs: &dyn Vfs, path: &str) -> String {
    let mut bytes = Vec::new();
    fs.read(path, &mut bytes).unwrap();
    String::from_utf8(bytes).unwrap()
}

fn hello_source() -> Arc<dyn Vfs> {
    let fs = MemFs::new();
    write_str(&fs, "in/hello.txt", "hello\n");
    Arc::new(fs)
}

fn hello_stage(source: Arc<dyn Vfs>) -> Stage {
    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_source(source)
        .with_message("init")
        .with_user("A", Some("mailto:a@x".to_string()))
        .with_created(DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap());

    stage
        .add_source_file("greetings/hello.txt", "in/hello.txt")
        .unwrap();

    stage
}

fn assert_no_fatal(fs: Arc<dyn Vfs>, object_root: &str, expected_id: &str) {
    let result = Validator::new(fs)
        .validate_object(
            Some(expected_id),
            object_root,
            Some(SpecVersion::Ocfl1_1),
            &CancelToken::new(),
        )
        .unwrap();

    assert!(
        !result.has_errors(),
        "expected no fatal errors, found: {:?}",
        result.fatal
    );
}

#[test]
fn create_single_version_object() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let outcome = commit(&root, "ex:1", hello_stage(hello_source()), &CommitOptions::default())
        .unwrap();

    assert_eq!("ex:1", outcome.object_root);
    assert_eq!("v1", outcome.version.to_string());

    for path in [
        "ex:1/0=ocfl_object_1.1",
        "ex:1/inventory.json",
        "ex:1/inventory.json.sha512",
        "ex:1/v1/inventory.json",
        "ex:1/v1/inventory.json.sha512",
        "ex:1/v1/content/greetings/hello.txt",
    ] {
        assert!(fs.exists(path).unwrap(), "missing {path}");
    }

    assert_eq!("hello\n", read_str(fs.as_ref(), "ex:1/v1/content/greetings/hello.txt"));
    assert_eq!(
        "ocfl_object_1.1\n",
        read_str(fs.as_ref(), "ex:1/0=ocfl_object_1.1")
    );

    let object = root.object("ex:1").unwrap();
    let digest = HexDigest::from(HELLO_SHA512);

    let manifest_paths = object.inventory.manifest.paths_for(&digest).unwrap();
    assert_eq!(1, manifest_paths.len());
    assert_eq!("v1/content/greetings/hello.txt", manifest_paths[0].as_ref());

    let state = object.head_state().unwrap();
    assert_eq!(
        &digest,
        state
            .digest_for(&"greetings/hello.txt".try_into().unwrap())
            .unwrap()
    );
    assert_eq!("init", state.message().unwrap());
    assert_eq!(
        "2024-01-01T00:00:00Z",
        state.created().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    let mut contents = Vec::new();
    state
        .read(&"greetings/hello.txt".try_into().unwrap(), &mut contents)
        .unwrap();
    assert_eq!(b"hello\n".to_vec(), contents);

    // the root inventory and head version inventory are identical bytes
    assert_eq!(
        read_str(fs.as_ref(), "ex:1/inventory.json"),
        read_str(fs.as_ref(), "ex:1/v1/inventory.json")
    );

    assert_no_fatal(fs, "ex:1", "ex:1");
}

#[test]
fn add_version_that_reuses_content() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    commit(&root, "ex:1", hello_stage(hello_source()), &CommitOptions::default()).unwrap();

    let digest = HexDigest::from(HELLO_SHA512);
    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_message("dedup")
        .with_user("A", None);
    stage.add(digest.clone(), "copies/hi.txt").unwrap();
    stage.add(digest.clone(), "greetings/hello.txt").unwrap();

    let outcome = commit(&root, "ex:1", stage, &CommitOptions::default()).unwrap();
    assert_eq!("v2", outcome.version.to_string());

    let object = root.object("ex:1").unwrap();

    // the manifest is unchanged and no v2 content was written
    assert_eq!(1, object.inventory.manifest.len());
    assert!(!fs.exists("ex:1/v2/content").unwrap());

    let state = object.head_state().unwrap();
    let paths: Vec<String> = object
        .inventory
        .versions
        .get(&outcome.version)
        .unwrap()
        .state
        .paths_for(&digest)
        .unwrap()
        .iter()
        .map(|p| p.as_ref().to_string())
        .collect();
    assert_eq!(
        vec!["copies/hi.txt".to_string(), "greetings/hello.txt".to_string()],
        paths
    );

    let mut contents = Vec::new();
    state
        .read(&"copies/hi.txt".try_into().unwrap(), &mut contents)
        .unwrap();
    assert_eq!(b"hello\n".to_vec(), contents);

    let versions: Vec<String> = object.versions().map(|v| v.to_string()).collect();
    assert_eq!(vec!["v1".to_string(), "v2".to_string()], versions);

    let v1 = object.state("v1".try_into().unwrap()).unwrap();
    let changes = state.diff(Some(&v1));
    assert_eq!(
        vec![StateChange::Added("copies/hi.txt".try_into().unwrap())],
        changes
    );

    assert_no_fatal(fs, "ex:1", "ex:1");
}

#[test]
fn unchanged_commits_are_rejected_unless_allowed() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    commit(&root, "ex:1", hello_stage(hello_source()), &CommitOptions::default()).unwrap();

    let digest = HexDigest::from(HELLO_SHA512);

    let unchanged = || {
        let mut stage = Stage::new(DigestAlgorithm::Sha512)
            .unwrap()
            .with_message("same")
            .with_user("A", None);
        stage.add(digest.clone(), "greetings/hello.txt").unwrap();
        stage
    };

    let err = commit(&root, "ex:1", unchanged(), &CommitOptions::default()).unwrap_err();
    assert!(matches!(err, OcflError::Protocol(_)), "{err}");

    let options = CommitOptions {
        allow_unchanged: true,
        ..Default::default()
    };

    let v2 = commit(&root, "ex:1", unchanged(), &options).unwrap();
    let v3 = commit(&root, "ex:1", unchanged(), &options).unwrap();

    assert_eq!("v2", v2.version.to_string());
    assert_eq!("v3", v3.version.to_string());

    let object = root.object("ex:1").unwrap();
    // no new content entered the manifest
    assert_eq!(1, object.inventory.manifest.len());

    let v1_state = &object.inventory.versions.get(&"v1".try_into().unwrap()).unwrap().state;
    let v3_state = &object.inventory.versions.get(&"v3".try_into().unwrap()).unwrap().state;
    assert!(v1_state.equal(v3_state));

    assert_no_fatal(fs, "ex:1", "ex:1");
}

#[test]
fn dry_run_writes_nothing() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let options = CommitOptions {
        dry_run: true,
        ..Default::default()
    };

    let outcome = commit(&root, "ex:1", hello_stage(hello_source()), &options).unwrap();

    assert_eq!("v1", outcome.version.to_string());
    assert!(!fs.exists("ex:1").unwrap());
}

#[test]
fn stage_algorithm_must_match_the_object() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    commit(&root, "ex:1", hello_stage(hello_source()), &CommitOptions::default()).unwrap();

    let source = hello_source();
    let mut stage = Stage::new(DigestAlgorithm::Sha256)
        .unwrap()
        .with_source(source);
    stage.add_source_file("other.txt", "in/hello.txt").unwrap();

    let err = commit(&root, "ex:1", stage, &CommitOptions::default()).unwrap_err();
    assert!(matches!(err, OcflError::Protocol(_)), "{err}");
}

#[test]
fn missing_source_for_new_digest_fails_before_writing() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_message("m")
        .with_user("A", None);
    stage
        .add(HexDigest::from("deadbeef"), "mystery.bin")
        .unwrap();

    let err = commit(&root, "ex:1", stage, &CommitOptions::default()).unwrap_err();
    assert!(matches!(err, OcflError::MissingDigest(_)), "{err}");
    assert!(!fs.exists("ex:1").unwrap());
}

#[test]
fn copy_mismatch_rolls_the_new_object_back() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let source = hello_source();
    let stage = hello_stage(source.clone());

    // the source changes between staging and commit, so the re-digest during the copy
    // cannot match the staged digest
    write_str(source.as_ref(), "in/hello.txt", "tampered\n");

    let err = commit(&root, "ex:1", stage, &CommitOptions::default()).unwrap_err();
    assert!(matches!(err, OcflError::DigestMismatch { .. }), "{err}");

    // the partial object was cleaned up and a retry succeeds
    assert!(!fs.exists("ex:1").unwrap());

    commit(&root, "ex:1", hello_stage(hello_source()), &CommitOptions::default()).unwrap();
    assert_no_fatal(fs, "ex:1", "ex:1");
}

#[test]
fn copy_mismatch_in_an_existing_object_preserves_the_previous_head() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    commit(&root, "ex:1", hello_stage(hello_source()), &CommitOptions::default()).unwrap();

    let source: Arc<dyn Vfs> = Arc::new(MemFs::new());
    write_str(source.as_ref(), "in/new.txt", "new bytes\n");

    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_source(source.clone())
        .with_message("update")
        .with_user("A", None);
    stage.add_source_file("new.txt", "in/new.txt").unwrap();

    write_str(source.as_ref(), "in/new.txt", "changed bytes\n");

    let err = commit(&root, "ex:1", stage, &CommitOptions::default()).unwrap_err();
    assert!(matches!(err, OcflError::DigestMismatch { .. }), "{err}");

    // the object is still at v1 and still valid
    let object = root.object("ex:1").unwrap();
    assert_eq!("v1", object.inventory.head.to_string());
    assert!(!fs.exists("ex:1/v2").unwrap());
    assert_no_fatal(fs, "ex:1", "ex:1");
}

#[test]
fn padded_version_numbers_are_preserved() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let options = CommitOptions {
        padding_width: 4,
        ..Default::default()
    };

    let outcome = commit(&root, "ex:pad", hello_stage(hello_source()), &options).unwrap();
    assert_eq!("v0001", outcome.version.to_string());
    assert!(fs.exists("ex:pad/v0001/content/greetings/hello.txt").unwrap());

    let digest = HexDigest::from(HELLO_SHA512);
    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_message("two")
        .with_user("A", None);
    stage.add(digest, "renamed.txt").unwrap();

    let outcome = commit(&root, "ex:pad", stage, &CommitOptions::default()).unwrap();
    assert_eq!("v0002", outcome.version.to_string());
    assert!(fs.exists("ex:pad/v0002/inventory.json").unwrap());
}

#[test]
fn empty_stage_creates_a_contentless_version() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_message("empty")
        .with_user("A", None);

    let outcome = commit(&root, "ex:empty", stage, &CommitOptions::default()).unwrap();
    assert_eq!("v1", outcome.version.to_string());

    assert!(fs.exists("ex:empty/v1/inventory.json").unwrap());
    assert!(!fs.exists("ex:empty/v1/content").unwrap());

    let object = root.object("ex:empty").unwrap();
    assert!(object.inventory.manifest.is_empty());
    assert!(object.head_state().unwrap().logical_paths().is_empty());

    assert_no_fatal(fs, "ex:empty", "ex:empty");
}

#[test]
fn fixity_digests_are_recorded_in_the_inventory() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone());

    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_source(hello_source())
        .with_fixity_algorithms(vec![DigestAlgorithm::Md5, DigestAlgorithm::Size])
        .with_message("init")
        .with_user("A", None);
    stage
        .add_source_file("greetings/hello.txt", "in/hello.txt")
        .unwrap();

    commit(&root, "ex:fix", stage, &CommitOptions::default()).unwrap();

    let object = root.object("ex:fix").unwrap();
    let fixity = object.inventory.fixity.as_ref().unwrap();

    let md5 = fixity.get("md5").unwrap();
    assert_eq!(
        &HexDigest::from("b1946ac92492d2347c6235b4d2611184"),
        md5.digest_for(&"v1/content/greetings/hello.txt".try_into().unwrap())
            .unwrap()
    );

    let size = fixity.get("size").unwrap();
    assert_eq!(
        &HexDigest::from("6"),
        size.digest_for(&"v1/content/greetings/hello.txt".try_into().unwrap())
            .unwrap()
    );

    assert_no_fatal(fs, "ex:fix", "ex:fix");
}

#[test]
fn commit_on_the_local_filesystem() {
    let temp = tempfile::tempdir().unwrap();
    let fs: Arc<dyn Vfs> = Arc::new(LocalFs::new(temp.path()));
    let root = flat_root(fs.clone());

    let src_temp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src_temp.path().join("docs")).unwrap();
    std::fs::write(src_temp.path().join("docs/report.txt"), b"report\n").unwrap();
    std::fs::write(src_temp.path().join("readme.md"), b"# readme\n").unwrap();

    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_source(Arc::new(LocalFs::new(src_temp.path())))
        .with_message("ingest")
        .with_user("A", Some("mailto:a@x".to_string()));
    stage
        .add_source_dir(".", "", 2, &CancelToken::new())
        .unwrap();

    let outcome = commit(&root, "local:1", stage, &CommitOptions::default()).unwrap();
    assert_eq!("v1", outcome.version.to_string());

    let object = root.object("local:1").unwrap();
    let state = object.head_state().unwrap();

    let mut paths = state.logical_paths();
    paths.sort_unstable();
    let names: Vec<&str> = paths.iter().map(|p| p.as_ref()).collect();
    assert_eq!(vec!["docs/report.txt", "readme.md"], names);

    let entries = state.read_dir("").unwrap();
    assert_eq!(2, entries.len());
    assert!(entries[0].is_dir && entries[0].name == "docs");

    let entries = state.read_dir("docs").unwrap();
    assert_eq!(1, entries.len());
    assert!(!entries[0].is_dir && entries[0].name == "report.txt");

    // open exposes the size and the synthesized mtime
    let file = state.open(&"docs/report.txt".try_into().unwrap()).unwrap();
    assert_eq!(7, file.size);
    assert_eq!(state.created(), file.mtime);

    assert_no_fatal(fs, "local:1", "local:1");
}
