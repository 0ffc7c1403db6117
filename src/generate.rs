#![allow(missing_docs)]
use std::{fs::File, io::Write, path::PathBuf};

use clap::Parser;

use crate::{
    config::{Format, format},
    sinks::loki::LokiConfig,
};

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct Opts {
    /// Encoding of the generated configuration.
    #[arg(long, default_value = "yaml")]
    format: Format,

    /// Write the configuration to a file instead of stdout.
    #[arg(long)]
    file: Option<PathBuf>,
}

pub fn generate_example(format: Format) -> Result<String, String> {
    format::serialize(&LokiConfig::example(), format)
}

pub fn cmd(opts: &Opts) -> exitcode::ExitCode {
    let config = match generate_example(opts.format) {
        Ok(config) => config,
        Err(error) => {
            error!(message = "Failed to generate config.", %error);
            return exitcode::SOFTWARE;
        }
    };

    match &opts.file {
        Some(path) => {
            let written = File::create(path).and_then(|mut file| file.write_all(config.as_bytes()));
            if let Err(error) = written {
                error!(message = "Failed to write config.", path = ?path, %error);
                return exitcode::IOERR;
            }
            info!(message = "Config file written.", path = ?path);
        }
        None => {
            #[allow(clippy::print_stdout)]
            {
                println!("{config}");
            }
        }
    }

    exitcode::OK
}
