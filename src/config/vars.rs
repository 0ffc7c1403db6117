use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};

// Names are restricted to `[:word:]` plus `.`, closer to what a shell accepts.
static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$|
        \$([[:word:].]+)|
        \$\{([[:word:].]+)(?:(:?-|:?\?)([^}]*))?\}",
    )
    .expect("interpolation regex is valid")
});

/// Substitutes `$VAR`, `${VAR}`, `${VAR:-default}`, `${VAR-default}`,
/// `${VAR:?error}` and `${VAR?error}` from `vars`. `$$` escapes a dollar sign.
///
/// Returns the interpolated text with warnings for unknown variables, or the
/// errors raised by required variables.
pub fn interpolate(
    input: &str,
    vars: &HashMap<String, String>,
) -> Result<(String, Vec<String>), Vec<String>> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let interpolated = VAR_RE
        .replace_all(input, |caps: &Captures<'_>| {
            let Some(name) = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()) else {
                return "$".to_owned();
            };
            let flags = caps.get(3).map_or("", |m| m.as_str());
            let fallback = caps.get(4).map_or("", |m| m.as_str());
            let value = vars.get(name).map(String::as_str);
            let non_empty = value.filter(|v| !v.is_empty());

            match flags {
                ":-" => non_empty.unwrap_or(fallback),
                "-" => value.unwrap_or(fallback),
                ":?" => non_empty.unwrap_or_else(|| {
                    errors.push(format!(
                        "Non-empty environment variable required in config. name = {name:?}, error = {fallback:?}"
                    ));
                    ""
                }),
                "?" => value.unwrap_or_else(|| {
                    errors.push(format!(
                        "Missing environment variable required in config. name = {name:?}, error = {fallback:?}"
                    ));
                    ""
                }),
                _ => value.unwrap_or_else(|| {
                    warnings.push(format!("Unknown environment variable in config. name = {name:?}"));
                    ""
                }),
            }
            .to_owned()
        })
        .into_owned();

    if errors.is_empty() {
        Ok((interpolated, warnings))
    } else {
        Err(errors)
    }
}
