//! Validator tests over handcrafted and engine-written objects.

use std::io::Cursor;
use std::sync::Arc;

use ocflkit::ocfl::{
    commit, CancelToken, CommitOptions, DigestAlgorithm, ErrorCode, LayoutExtensionName, MemFs,
    SpecVersion, Stage, StorageLayout, StorageRoot, ValidationResult, Validator, ValidatorConfig,
    Vfs, WarnCode,
};

fn flat_root(fs: Arc<dyn Vfs>, spec: SpecVersion) -> StorageRoot {
    StorageRoot::init(
        fs,
        spec,
        Some(StorageLayout::new(LayoutExtensionName::FlatDirect, None).unwrap()),
    )
    .unwrap()
}

fn write_str(fs: &dyn Vfs, path: &str, content: &str) {
    fs.write(path, &mut Cursor::new(content.as_bytes().to_vec()))
        .unwrap();
}

fn commit_hello(root: &StorageRoot, object_id: &str) {
    let source = MemFs::new();
    write_str(&source, "hello.txt", "hello\n");

    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_source(Arc::new(source))
        .with_message("init")
        .with_user("A", Some("mailto:a@x".to_string()));
    stage
        .add_source_file("greetings/hello.txt", "hello.txt")
        .unwrap();

    commit(root, object_id, stage, &CommitOptions::default()).unwrap();
}

fn validate(fs: Arc<dyn Vfs>, object_root: &str, skip_digests: bool) -> ValidationResult {
    let config = ValidatorConfig {
        skip_digests,
        concurrency: 2,
    };

    Validator::new(fs)
        .with_config(config)
        .validate_object(
            None,
            object_root,
            Some(SpecVersion::Ocfl1_1),
            &CancelToken::new(),
        )
        .unwrap()
}

/// Writes a handcrafted single-version object: namaste, the supplied inventory at the
/// root and in v1, computed sidecars, and the supplied content files.
fn write_object(fs: &dyn Vfs, path: &str, inventory_json: &str, files: &[(&str, &str)]) {
    write_str(fs, &format!("{path}/0=ocfl_object_1.1"), "ocfl_object_1.1\n");

    let digest = DigestAlgorithm::Sha512
        .hash_hex(&mut inventory_json.as_bytes())
        .unwrap();
    let sidecar = format!("{digest} inventory.json\n");

    write_str(fs, &format!("{path}/inventory.json"), inventory_json);
    write_str(fs, &format!("{path}/inventory.json.sha512"), &sidecar);
    write_str(fs, &format!("{path}/v1/inventory.json"), inventory_json);
    write_str(fs, &format!("{path}/v1/inventory.json.sha512"), &sidecar);

    for (file, content) in files {
        write_str(fs, &format!("{path}/{file}"), content);
    }
}

fn minimal_inventory(extra_top_level: &str, manifest: &str, state: &str) -> String {
    format!(
        r#"{{
  {extra_top_level}"id": "urn:example:obj",
  "type": "https://ocfl.io/1.1/spec/#inventory",
  "digestAlgorithm": "sha512",
  "head": "v1",
  "manifest": {manifest},
  "versions": {{
    "v1": {{
      "created": "2024-01-01T00:00:00Z",
      "state": {state},
      "message": "m",
      "user": {{"name": "A", "address": "mailto:a@x"}}
    }}
  }}
}}"#
    )
}

#[test]
fn a_committed_object_validates_cleanly() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    let result = validate(fs, "ex:1", false);
    assert!(!result.has_errors(), "{:?}", result.fatal);
    assert!(!result.has_warnings(), "{:?}", result.warnings);
}

#[test]
fn tampered_content_is_detected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    // flip the first byte of the content file
    write_str(fs.as_ref(), "ex:1/v1/content/greetings/hello.txt", "jello\n");

    let result = validate(fs.clone(), "ex:1", false);
    assert!(result.has_error_code(ErrorCode::E092), "{:?}", result.fatal);

    // with digest checking suppressed the tamper goes unnoticed
    let result = validate(fs, "ex:1", true);
    assert!(!result.has_errors(), "{:?}", result.fatal);
}

#[test]
fn cross_spec_object_under_an_older_root() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_0);

    write_str(fs.as_ref(), "newer/0=ocfl_object_1.1", "ocfl_object_1.1\n");

    let results = Validator::new(fs)
        .with_config(ValidatorConfig {
            skip_digests: true,
            concurrency: 1,
        })
        .validate_root(&root, &CancelToken::new())
        .unwrap();

    assert!(
        results.storage_root.has_error_code(ErrorCode::E081),
        "{:?}",
        results.storage_root.fatal
    );
}

#[test]
fn unknown_inventory_field_is_an_error() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());

    let inventory = minimal_inventory(
        r#""bogusField": true, "#,
        r#"{"abc": ["v1/content/a.txt"]}"#,
        r#"{"abc": ["a.txt"]}"#,
    );
    write_object(fs.as_ref(), "obj", &inventory, &[("v1/content/a.txt", "x")]);

    let result = validate(fs, "obj", true);
    assert!(result.has_error_code(ErrorCode::E102), "{:?}", result.fatal);
}

#[test]
fn logical_path_prefix_conflicts_are_rejected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());

    let inventory = minimal_inventory(
        "",
        r#"{"abc": ["v1/content/a/b"], "def": ["v1/content/other"]}"#,
        r#"{"abc": ["a/b"], "def": ["a/b/c"]}"#,
    );
    write_object(
        fs.as_ref(),
        "obj",
        &inventory,
        &[("v1/content/a/b", "x"), ("v1/content/other", "y")],
    );

    let result = validate(fs, "obj", true);
    assert!(result.has_error_code(ErrorCode::E095), "{:?}", result.fatal);
}

#[test]
fn content_path_conflicts_are_rejected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());

    let inventory = minimal_inventory(
        "",
        r#"{"abc": ["v1/content/a/b"], "def": ["v1/content/a/b/c"]}"#,
        r#"{"abc": ["a.txt"], "def": ["b.txt"]}"#,
    );
    write_object(fs.as_ref(), "obj", &inventory, &[]);

    let result = validate(fs, "obj", true);
    assert!(result.has_error_code(ErrorCode::E101), "{:?}", result.fatal);
}

#[test]
fn case_colliding_digests_are_rejected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());

    let inventory = minimal_inventory(
        "",
        r#"{"ABC": ["v1/content/a.txt"], "abc": ["v1/content/b.txt"]}"#,
        r#"{"ABC": ["a.txt"]}"#,
    );
    write_object(fs.as_ref(), "obj", &inventory, &[]);

    let result = validate(fs, "obj", true);
    assert!(result.has_error_code(ErrorCode::E096), "{:?}", result.fatal);
}

#[test]
fn sha1_content_addressing_is_rejected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());

    let inventory = minimal_inventory(
        "",
        r#"{"abc": ["v1/content/a.txt"]}"#,
        r#"{"abc": ["a.txt"]}"#,
    )
    .replace("sha512", "sha1");
    write_object(fs.as_ref(), "obj", &inventory, &[("v1/content/a.txt", "x")]);

    // the sidecar suffix no longer matches the algorithm, so only assert on E025
    let result = validate(fs, "obj", true);
    assert!(result.has_error_code(ErrorCode::E025), "{:?}", result.fatal);
}

#[test]
fn missing_sidecar_is_an_error() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    fs.remove("ex:1/inventory.json.sha512").unwrap();

    let result = validate(fs, "ex:1", true);
    assert!(result.has_error_code(ErrorCode::E058), "{:?}", result.fatal);
}

#[test]
fn sidecar_digest_mismatch_is_an_error() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    write_str(
        fs.as_ref(),
        "ex:1/inventory.json.sha512",
        "cafef00d inventory.json\n",
    );

    let result = validate(fs, "ex:1", true);
    assert!(result.has_error_code(ErrorCode::E060), "{:?}", result.fatal);
}

#[test]
fn head_must_be_the_highest_version() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());

    let inventory = minimal_inventory(
        "",
        r#"{"abc": ["v1/content/a.txt"]}"#,
        r#"{"abc": ["a.txt"]}"#,
    )
    .replace("\"head\": \"v1\"", "\"head\": \"v2\"");
    write_object(fs.as_ref(), "obj", &inventory, &[("v1/content/a.txt", "x")]);

    let result = validate(fs, "obj", true);
    assert!(result.has_error_code(ErrorCode::E040), "{:?}", result.fatal);
}

#[test]
fn orphaned_content_files_are_detected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    write_str(fs.as_ref(), "ex:1/v1/content/orphan.txt", "orphan\n");

    let result = validate(fs, "ex:1", true);
    assert!(result.has_error_code(ErrorCode::E023), "{:?}", result.fatal);
}

#[test]
fn missing_content_files_are_detected() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    fs.remove("ex:1/v1/content/greetings/hello.txt").unwrap();

    let result = validate(fs, "ex:1", true);
    assert!(result.has_error_code(ErrorCode::E092), "{:?}", result.fatal);
}

#[test]
fn head_version_inventory_must_match_the_root_byte_for_byte() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    let mut bytes = Vec::new();
    fs.read("ex:1/v1/inventory.json", &mut bytes).unwrap();
    bytes.push(b'\n');
    fs.write("ex:1/v1/inventory.json", &mut Cursor::new(bytes))
        .unwrap();

    let result = validate(fs, "ex:1", true);
    assert!(result.has_error_code(ErrorCode::E064), "{:?}", result.fatal);
}

#[test]
fn prior_version_inventories_must_describe_the_same_state() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    // second version renames the file
    let digest = {
        let object = root.object("ex:1").unwrap();
        let digest = object
            .inventory
            .manifest
            .digests()
            .next()
            .unwrap()
            .to_string();
        digest
    };

    let mut stage = Stage::new(DigestAlgorithm::Sha512)
        .unwrap()
        .with_message("rename")
        .with_user("A", None);
    stage.add(digest.as_str().into(), "renamed.txt").unwrap();
    commit(&root, "ex:1", stage, &CommitOptions::default()).unwrap();

    // rewrite the prior version's inventory so its v1 state no longer matches
    let mut v1_inventory = Vec::new();
    fs.read("ex:1/v1/inventory.json", &mut v1_inventory).unwrap();
    let altered = String::from_utf8(v1_inventory)
        .unwrap()
        .replace("greetings/hello.txt", "greetings/other.txt");

    let sidecar_digest = DigestAlgorithm::Sha512
        .hash_hex(&mut altered.as_bytes())
        .unwrap();
    write_str(fs.as_ref(), "ex:1/v1/inventory.json", &altered);
    write_str(
        fs.as_ref(),
        "ex:1/v1/inventory.json.sha512",
        &format!("{sidecar_digest} inventory.json\n"),
    );

    let result = validate(fs, "ex:1", true);
    assert!(result.has_error_code(ErrorCode::E066), "{:?}", result.fatal);
}

#[test]
fn advisory_warnings_are_raised() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);

    // sha256 and a padded first version are both legal but discouraged
    let source = MemFs::new();
    write_str(&source, "a.txt", "a\n");

    let mut stage = Stage::new(DigestAlgorithm::Sha256)
        .unwrap()
        .with_source(Arc::new(source));
    stage.add_source_file("a.txt", "a.txt").unwrap();

    let options = CommitOptions {
        padding_width: 3,
        ..Default::default()
    };
    commit(&root, "ex:warn", stage, &options).unwrap();

    let result = validate(fs, "ex:warn", false);
    assert!(!result.has_errors(), "{:?}", result.fatal);
    assert!(result.has_warn_code(WarnCode::W004), "{:?}", result.warnings);
    assert!(result.has_warn_code(WarnCode::W001), "{:?}", result.warnings);
    // no message or user was staged
    assert!(result.has_warn_code(WarnCode::W007), "{:?}", result.warnings);
}

#[test]
fn whole_repository_validation() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");
    commit_hello(&root, "ex:2");

    let results = Validator::new(fs.clone())
        .validate_root(&root, &CancelToken::new())
        .unwrap();

    assert!(!results.has_errors());
    assert_eq!(2, results.objects.len());

    // tamper with one object and revalidate
    write_str(fs.as_ref(), "ex:2/v1/content/greetings/hello.txt", "jello\n");

    let results = Validator::new(fs)
        .validate_root(&root, &CancelToken::new())
        .unwrap();

    assert!(results.has_errors());
    let bad: Vec<_> = results
        .objects
        .iter()
        .filter(|o| o.has_error_code(ErrorCode::E092))
        .collect();
    assert_eq!(1, bad.len());
    assert_eq!(Some("ex:2".to_string()), bad[0].object_id);
}

#[test]
fn diagnostics_carry_code_description_and_url() {
    let fs: Arc<dyn Vfs> = Arc::new(MemFs::new());
    let root = flat_root(fs.clone(), SpecVersion::Ocfl1_1);
    commit_hello(&root, "ex:1");

    write_str(fs.as_ref(), "ex:1/v1/content/greetings/hello.txt", "jello\n");

    let result = validate(fs, "ex:1", false);
    let diagnostic = result
        .diagnostics()
        .find(|d| d.code.code == "E092")
        .expect("expected an E092 diagnostic");

    assert_eq!("https://ocfl.io/1.1/spec/#E092", diagnostic.code.url);
    assert!(!diagnostic.code.description.is_empty());
    assert!(diagnostic.text.contains("greetings/hello.txt"));
}
