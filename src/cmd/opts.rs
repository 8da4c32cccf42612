use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::ocfl::VersionNum;

/// A CLI for OCFL repositories
#[derive(Parser, Debug)]
#[command(name = "ocflkit", version, about, max_term_width = 100)]
pub struct Cli {
    /// Path to the OCFL storage root
    #[arg(short, long, value_name = "PATH", default_value = ".", global = true)]
    pub root: PathBuf,

    /// Increase log verbosity; may be repeated
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new OCFL storage root
    Init(InitCmd),
    /// List objects, or the files of an object version
    Ls(LsCmd),
    /// Write the contents of a logical file to stdout
    Cat(CatCmd),
    /// Validate an object or the entire repository
    Validate(ValidateCmd),
    /// Commit a directory of files as the next version of an object
    Commit(CommitCmd),
}

#[derive(Args, Debug)]
pub struct InitCmd {
    /// Storage layout extension to configure
    #[arg(
        short,
        long,
        value_name = "NAME",
        default_value = "0004-hashed-n-tuple-storage-layout"
    )]
    pub layout: String,

    /// OCFL spec version of the new root
    #[arg(long, value_name = "VERSION", default_value = "1.1")]
    pub spec: String,
}

#[derive(Args, Debug)]
pub struct LsCmd {
    /// Object to list; lists all objects when omitted
    pub object_id: Option<String>,

    /// Version to list; defaults to head
    #[arg(short = 'V', long, value_name = "VERSION")]
    pub version: Option<VersionNum>,
}

#[derive(Args, Debug)]
pub struct CatCmd {
    pub object_id: String,

    /// Logical path of the file to print
    pub path: String,

    /// Version to read from; defaults to head
    #[arg(short = 'V', long, value_name = "VERSION")]
    pub version: Option<VersionNum>,
}

#[derive(Args, Debug)]
pub struct ValidateCmd {
    /// Object to validate; validates the entire repository when omitted
    pub object_id: Option<String>,

    /// Validate the object at this path, relative the storage root, instead of resolving
    /// an id through the layout
    #[arg(short, long, value_name = "PATH", conflicts_with = "object_id")]
    pub path: Option<String>,

    /// Skip recomputing content digests
    #[arg(short = 'n', long)]
    pub no_digests: bool,

    /// Suppress warnings; only errors are reported
    #[arg(short = 'w', long)]
    pub no_warnings: bool,

    /// Number of parallel workers
    #[arg(short, long, value_name = "N")]
    pub concurrency: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CommitCmd {
    pub object_id: String,

    /// Directory whose contents become the new version's logical tree
    #[arg(value_name = "SRC_DIR")]
    pub source: PathBuf,

    /// Version message
    #[arg(short, long)]
    pub message: Option<String>,

    /// Name of the committing user; required when an address is given
    #[arg(short = 'n', long, value_name = "NAME")]
    pub user_name: Option<String>,

    /// URI address of the committing user, eg mailto:user@example.com
    #[arg(short = 'a', long, value_name = "ADDRESS", requires = "user_name")]
    pub user_address: Option<String>,

    /// Additional fixity algorithms to record, eg md5
    #[arg(long, value_name = "ALGORITHM")]
    pub fixity: Vec<String>,

    /// Permit a commit that does not change the object's state
    #[arg(long)]
    pub allow_unchanged: bool,

    /// Zero-padding width for version numbers; only applies to new objects
    #[arg(long, value_name = "WIDTH", default_value_t = 0)]
    pub padding: u32,

    /// Compute and validate everything, but write nothing
    #[arg(long)]
    pub dry_run: bool,
}
