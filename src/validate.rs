#![allow(missing_docs)]
use std::path::PathBuf;

use clap::Parser;

use crate::config::{self, FormatHint};

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct Opts {
    /// Configuration files to validate. Defaults to the `--config` path.
    #[arg(id = "paths")]
    pub paths: Vec<PathBuf>,
}

/// Loads and builds each configuration, collecting every failure.
pub fn validate_paths(paths: &[PathBuf], hint: FormatHint) -> Result<(), Vec<String>> {
    let errors = paths
        .iter()
        .filter_map(|path| {
            let result = config::load_from_path(path, hint)
                .map_err(|error| error.to_string())
                .and_then(|config| config.build().map_err(|error| error.to_string()));
            result
                .err()
                .map(|error| format!("{}: {}", path.display(), error))
        })
        .collect::<Vec<_>>();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn cmd(opts: &Opts, root: &crate::cli::RootOpts) -> exitcode::ExitCode {
    let paths = if opts.paths.is_empty() {
        vec![root.config_path.clone()]
    } else {
        opts.paths.clone()
    };

    match validate_paths(&paths, root.config_format) {
        Ok(()) => {
            #[allow(clippy::print_stdout)]
            {
                println!("Validated");
            }
            exitcode::OK
        }
        Err(errors) => crate::cli::handle_config_errors(errors),
    }
}
