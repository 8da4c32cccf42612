use std::process::exit;

use clap::Parser;
use log::error;
use ocflkit::cmd::{self, opts::Cli};
use ocflkit::ocfl::CancelToken;

fn main() {
    let cli = Cli::parse();

    cmd::init_logging(&cli);

    let cancel = CancelToken::new();

    match cmd::exec(&cli, &cancel) {
        Ok(code) => exit(code),
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            exit(1);
        }
    }
}
