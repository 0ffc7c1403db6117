use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use snafu::{ResultExt, Snafu};

pub mod format;
pub mod proxy;
mod vars;

pub use format::{Format, FormatHint};
pub use proxy::ProxyConfig;

pub use crate::sinks::loki::LokiConfig;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Could not read config file {:?}: {}", path, source))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not interpolate environment variables: {}", errors.join("; ")))]
    Interpolate { errors: Vec<String> },
    #[snafu(display("Could not parse {} config: {}", format, errors.join("; ")))]
    Parse { format: Format, errors: Vec<String> },
}

/// Parses a sink configuration, substituting environment variables first.
pub fn load_from_str(input: &str, format: Format) -> Result<LokiConfig, ConfigError> {
    let env = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect::<HashMap<_, _>>();

    let (with_vars, warnings) =
        vars::interpolate(input, &env).map_err(|errors| ConfigError::Interpolate { errors })?;
    for warning in warnings {
        warn!("{}", warning);
    }

    format::deserialize(&with_vars, format).map_err(|errors| ConfigError::Parse { format, errors })
}

/// Loads a sink configuration from `path`. Without a hint the format is
/// guessed from the extension, defaulting to YAML.
pub fn load_from_path(
    path: impl AsRef<Path>,
    hint: FormatHint,
) -> Result<LokiConfig, ConfigError> {
    let path = path.as_ref();
    let format = hint
        .or_else(|| Format::from_path(path).ok())
        .unwrap_or_default();
    let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;

    debug!(message = "Loading config.", path = ?path, %format);
    load_from_str(&content, format)
}
