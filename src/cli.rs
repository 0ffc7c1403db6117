#![allow(missing_docs)]
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{config, generate, get_version, validate};

#[derive(Parser, Debug)]
#[command(name = "kube-event-loki", rename_all = "kebab-case")]
pub struct Opts {
    #[command(flatten)]
    pub root: RootOpts,

    #[command(subcommand)]
    pub sub_command: Option<SubCommand>,
}

impl Opts {
    pub fn get_matches() -> Result<Self, clap::Error> {
        let version = get_version();
        let command = <Self as clap::CommandFactory>::command()
            .version(version)
            .infer_subcommands(true);
        let mut matches = command.try_get_matches()?;
        <Self as clap::FromArgMatches>::from_arg_matches_mut(&mut matches)
    }

    pub const fn log_level(&self) -> &'static str {
        let (quiet_level, verbose_level) = match self.sub_command {
            Some(SubCommand::Validate(_)) | Some(SubCommand::Generate(_)) => {
                if self.root.verbose == 0 {
                    (self.root.quiet + 1, self.root.verbose)
                } else {
                    (self.root.quiet, self.root.verbose - 1)
                }
            }
            None => (self.root.quiet, self.root.verbose),
        };
        match quiet_level {
            0 => match verbose_level {
                0 => "info",
                1 => "debug",
                2..=255 => "trace",
            },
            1 => "warn",
            2 => "error",
            3..=255 => "off",
        }
    }
}

#[derive(Parser, Debug)]
#[command(rename_all = "kebab-case")]
pub struct RootOpts {
    /// Read the sink configuration from this file.
    /// The format is detected from the file name unless `--config-format` is given.
    #[arg(
        id = "config",
        short,
        long,
        env = "KUBE_EVENT_LOKI_CONFIG",
        default_value = "/etc/kube-event-loki/config.yaml"
    )]
    pub config_path: PathBuf,

    /// Force the configuration format.
    #[arg(long, env = "KUBE_EVENT_LOKI_CONFIG_FORMAT")]
    pub config_format: Option<config::Format>,

    /// Read newline-delimited JSON events from this file instead of stdin.
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Enable more detailed internal logging. Repeat to increase level. Overridden by `--quiet`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Reduce detail of internal logging. Repeat to reduce further. Overrides `--verbose`.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Set the logging format
    #[arg(long, default_value = "text", env = "KUBE_EVENT_LOKI_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Control when ANSI terminal formatting is used.
    ///
    /// By default ANSI formatting is enabled when stdout is a terminal.
    /// `--color always` forces it on and `--color never` turns it off.
    #[arg(long, default_value = "auto", env = "KUBE_EVENT_LOKI_COLOR")]
    pub color: Color,
}

impl RootOpts {
    pub fn use_color(&self) -> bool {
        match self.color {
            Color::Always => true,
            Color::Never => false,
            Color::Auto => std::io::IsTerminal::is_terminal(&std::io::stdout()),
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum SubCommand {
    /// Validate the target config, then exit.
    Validate(validate::Opts),

    /// Print an example configuration, then exit.
    Generate(generate::Opts),
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Auto,
    Always,
    Never,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

pub fn handle_config_errors(errors: Vec<String>) -> exitcode::ExitCode {
    for error in errors {
        error!(message = "Configuration error.", %error);
    }

    exitcode::CONFIG
}
