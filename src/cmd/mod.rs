//! Command implementations backing the `ocflkit` binary.

use std::io::Write;
use std::sync::Arc;

use log::LevelFilter;

use crate::ocfl::{
    commit, AlgorithmRegistry, CancelToken, CommitOptions, LayoutExtensionName, LocalFs, OcflError,
    Result, Severity, SpecVersion, Stage, StorageLayout, StorageRoot, ValidationResult, Validator,
    ValidatorConfig, Vfs,
};

pub mod opts;

use opts::{CatCmd, Cli, Command, CommitCmd, InitCmd, LsCmd, ValidateCmd};

/// Exit code used when validation finds errors, as opposed to the command itself failing
pub const VALIDATION_FAILED: i32 = 2;

/// Initializes logging based on the CLI flags
pub fn init_logging(cli: &Cli) {
    let level = if cli.quiet {
        LevelFilter::Error
    } else {
        match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();
}

/// Runs the parsed command, returning the process exit code
pub fn exec(cli: &Cli, cancel: &CancelToken) -> Result<i32> {
    match &cli.command {
        Command::Init(cmd) => init_repo(cli, cmd),
        Command::Ls(cmd) => ls(cli, cmd),
        Command::Cat(cmd) => cat(cli, cmd),
        Command::Validate(cmd) => validate(cli, cmd, cancel),
        Command::Commit(cmd) => commit_cmd(cli, cmd, cancel),
    }
}

fn root_fs(cli: &Cli) -> Arc<dyn Vfs> {
    Arc::new(LocalFs::new(&cli.root))
}

fn open_root(cli: &Cli) -> Result<StorageRoot> {
    StorageRoot::open(root_fs(cli))
}

fn init_repo(cli: &Cli, cmd: &InitCmd) -> Result<i32> {
    let spec = SpecVersion::try_from_num(&cmd.spec)?;

    let name: LayoutExtensionName = cmd
        .layout
        .parse()
        .map_err(|_| OcflError::Protocol(format!("Unknown layout extension: {}", cmd.layout)))?;
    let layout = StorageLayout::new(name, None)?;

    StorageRoot::init(root_fs(cli), spec, Some(layout))?;

    println!(
        "Initialized OCFL {} storage root at {}",
        spec,
        cli.root.display()
    );
    Ok(0)
}

fn ls(cli: &Cli, cmd: &LsCmd) -> Result<i32> {
    let root = open_root(cli)?;

    match &cmd.object_id {
        Some(object_id) => {
            let object = root.object(object_id)?;
            let state = match cmd.version {
                Some(version) => object.state(version)?,
                None => object.head_state()?,
            };

            let mut paths = state.logical_paths();
            paths.sort_unstable();

            for path in paths {
                println!("{path}");
            }
        }
        None => {
            let results = std::sync::Mutex::new(Vec::new());

            root.scan_objects(num_cpus::get(), &CancelToken::new(), |location| {
                let object = root.object_at(&location.path)?;
                results
                    .lock()
                    .unwrap()
                    .push((object.id.clone(), object.inventory.head, location.path.clone()));
                Ok(())
            })?;

            let mut results = results.into_inner().unwrap();
            results.sort_unstable();

            for (id, head, path) in results {
                println!("{id}\t{head}\t{path}");
            }
        }
    }

    Ok(0)
}

fn cat(cli: &Cli, cmd: &CatCmd) -> Result<i32> {
    let root = open_root(cli)?;
    let object = root.object(&cmd.object_id)?;

    let state = match cmd.version {
        Some(version) => object.state(version)?,
        None => object.head_state()?,
    };

    let logical_path = cmd.path.as_str().try_into()?;

    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    state.read(&logical_path, &mut lock)?;
    lock.flush()
        .map_err(|e| OcflError::io("write", "stdout", e))?;

    Ok(0)
}

fn validate(cli: &Cli, cmd: &ValidateCmd, cancel: &CancelToken) -> Result<i32> {
    let root = open_root(cli)?;

    let config = ValidatorConfig {
        skip_digests: cmd.no_digests,
        concurrency: cmd.concurrency.unwrap_or_else(num_cpus::get),
    };

    let validator = Validator::new(root.fs().clone())
        .with_registry(AlgorithmRegistry::standard())
        .with_config(config);

    let mut failed = false;

    if let Some(path) = &cmd.path {
        let result =
            validator.validate_object(None, path, Some(root.spec_version()), cancel)?;
        failed |= print_result(&result, cmd.no_warnings);
    } else if let Some(object_id) = &cmd.object_id {
        let path = root.object_path(object_id)?;
        let result = validator.validate_object(
            Some(object_id),
            &path,
            Some(root.spec_version()),
            cancel,
        )?;
        failed |= print_result(&result, cmd.no_warnings);
    } else {
        let results = validator.validate_root(&root, cancel)?;
        failed |= print_result(&results.storage_root, cmd.no_warnings);
        for result in &results.objects {
            failed |= print_result(result, cmd.no_warnings);
        }
    }

    if failed {
        Ok(VALIDATION_FAILED)
    } else {
        println!("Valid");
        Ok(0)
    }
}

fn print_result(result: &ValidationResult, no_warnings: bool) -> bool {
    let subject = result
        .object_id
        .clone()
        .unwrap_or_else(|| "storage root".to_string());

    for diagnostic in result.diagnostics() {
        if no_warnings && diagnostic.code.severity == Severity::Warning {
            continue;
        }

        println!(
            "{} [{}] ({}) {} ({})",
            diagnostic.code.severity,
            diagnostic.code.code,
            subject,
            diagnostic.text,
            diagnostic.code.url,
        );
    }

    result.has_errors()
}

fn commit_cmd(cli: &Cli, cmd: &CommitCmd, cancel: &CancelToken) -> Result<i32> {
    let root = open_root(cli)?;

    let algorithm = crate::ocfl::DigestAlgorithm::Sha512;
    let mut fixity = Vec::with_capacity(cmd.fixity.len());
    let registry = AlgorithmRegistry::standard();
    for id in &cmd.fixity {
        fixity.push(registry.parse(id)?);
    }

    let mut stage = Stage::new(algorithm)?
        .with_source(Arc::new(LocalFs::new(&cmd.source)))
        .with_fixity_algorithms(fixity);

    if let Some(message) = &cmd.message {
        stage = stage.with_message(message);
    }
    if let Some(name) = &cmd.user_name {
        stage = stage.with_user(name, cmd.user_address.clone());
    }

    stage.add_source_dir(".", "", num_cpus::get(), cancel)?;

    let options = CommitOptions {
        allow_unchanged: cmd.allow_unchanged,
        padding_width: cmd.padding,
        dry_run: cmd.dry_run,
    };

    let outcome = commit(&root, &cmd.object_id, stage, &options)?;

    if cmd.dry_run {
        println!(
            "Dry run: {} would become {}",
            cmd.object_id, outcome.version
        );
    } else {
        println!("Committed {} {}", cmd.object_id, outcome.version);
    }

    Ok(0)
}
