//! Field templates such as `{{ .InvolvedObject.Name }}`.
//!
//! A template is literal text with embedded `{{ ... }}` expressions. An
//! expression is either a field path (`.Reason`, `.InvolvedObject.Kind`, or `.`
//! for the whole event) or an `index` lookup into a map field
//! (`index .InvolvedObject.Labels "app.kubernetes.io/name"`).
//!
//! Field paths are resolved against the JSON view of an
//! [`EnhancedEvent`](crate::event::EnhancedEvent). Each segment matches a key
//! exactly or, failing that, ignoring ASCII case, so Go-style field names
//! resolve camelCase Kubernetes keys. A first segment that is not a top-level
//! key is looked up under `metadata`. Keys below `labels` and `annotations` must
//! match exactly, and an absent one renders empty.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::Snafu;

use crate::event::EnhancedEvent;

static RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(?P<expr>.*?)\}\}").expect("template regex is valid"));

const METADATA_KEY: &str = "metadata";
const MAP_FIELDS: [&str; 2] = ["labels", "annotations"];

#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum TemplateParseError {
    #[snafu(display("Unterminated template expression in {:?}.", src))]
    Unterminated { src: String },
    #[snafu(display("Empty template expression in {:?}.", src))]
    EmptyExpression { src: String },
    #[snafu(display("Unsupported template expression {:?}.", expr))]
    UnsupportedExpression { expr: String },
    #[snafu(display("Invalid field path {:?}.", path))]
    InvalidPath { path: String },
    #[snafu(display("Invalid quoted key in {:?}.", expr))]
    InvalidKey { expr: String },
}

#[derive(Clone, Debug, Eq, PartialEq, Snafu)]
pub enum TemplateRenderingError {
    #[snafu(display("Missing fields on event: {:?}", keys))]
    MissingKeys { keys: Vec<String> },
    #[snafu(display("Field {:?} cannot be indexed.", path))]
    NotIndexable { path: String },
}

/// A dotted field path. An empty path refers to the whole event.
#[derive(Clone, Debug, Eq, PartialEq)]
struct FieldPath(Vec<String>);

impl FieldPath {
    fn parse(src: &str) -> Result<Self, TemplateParseError> {
        if src == "." {
            return Ok(Self(Vec::new()));
        }

        let rest = src
            .strip_prefix('.')
            .ok_or_else(|| TemplateParseError::InvalidPath { path: src.into() })?;

        let segments = rest
            .split('.')
            .map(|segment| {
                let valid = !segment.is_empty()
                    && segment
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
                if valid {
                    Ok(segment.to_owned())
                } else {
                    Err(TemplateParseError::InvalidPath { path: src.into() })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(segments))
    }

    fn lookup<'a>(&self, root: &'a Value) -> Lookup<'a> {
        let Some((first, rest)) = self.0.split_first() else {
            return Lookup::Found(root);
        };

        let Some(mut current) = get_field(root, first).or_else(|| {
            root.get(METADATA_KEY)
                .and_then(|metadata| get_field(metadata, first))
        }) else {
            return Lookup::Missing;
        };

        let mut parent = first;
        for segment in rest {
            let in_map = is_map_field(parent);
            let next = if in_map {
                current.as_object().and_then(|map| map.get(segment))
            } else {
                get_field(current, segment)
            };
            current = match next {
                Some(value) => value,
                None if in_map && current.is_object() => return Lookup::NoKey,
                None => return Lookup::Missing,
            };
            parent = segment;
        }

        Lookup::Found(current)
    }
}

/// Result of resolving a [`FieldPath`].
enum Lookup<'a> {
    Found(&'a Value),
    /// The key is absent from a map field, which renders empty.
    NoKey,
    Missing,
}

/// Map-valued fields are keyed by user data, not by the event schema.
fn is_map_field(name: &str) -> bool {
    MAP_FIELDS
        .iter()
        .any(|field| field.eq_ignore_ascii_case(name))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".{}", self.0.join("."))
    }
}

fn get_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let map = value.as_object()?;
    map.get(key).or_else(|| {
        map.iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
    })
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Expr {
    Path(FieldPath),
    Index { target: FieldPath, keys: Vec<String> },
}

impl Expr {
    fn parse(expr: &str) -> Result<Self, TemplateParseError> {
        if expr.starts_with('.') {
            return FieldPath::parse(expr).map(Expr::Path);
        }

        if let Some(args) = expr.strip_prefix("index") {
            if args.starts_with(char::is_whitespace) {
                return Self::parse_index(expr, args.trim_start());
            }
        }

        Err(TemplateParseError::UnsupportedExpression { expr: expr.into() })
    }

    fn parse_index(expr: &str, args: &str) -> Result<Self, TemplateParseError> {
        let (target, mut rest) = args.split_once(char::is_whitespace).ok_or_else(|| {
            TemplateParseError::UnsupportedExpression { expr: expr.into() }
        })?;
        let target = FieldPath::parse(target)?;

        let mut keys = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let (key, remaining) = parse_quoted(rest)
                .ok_or_else(|| TemplateParseError::InvalidKey { expr: expr.into() })?;
            keys.push(key);
            rest = remaining;
        }

        if keys.is_empty() {
            return Err(TemplateParseError::UnsupportedExpression { expr: expr.into() });
        }

        Ok(Expr::Index { target, keys })
    }

    fn render(
        &self,
        root: &Value,
        missing: &mut Vec<String>,
    ) -> Result<String, TemplateRenderingError> {
        match self {
            Expr::Path(path) => match path.lookup(root) {
                Lookup::Found(value) => Ok(value_to_string(value)),
                Lookup::NoKey => Ok(String::new()),
                Lookup::Missing => {
                    missing.push(path.to_string());
                    Ok(String::new())
                }
            },
            Expr::Index { target, keys } => {
                let mut current = match target.lookup(root) {
                    Lookup::Found(value) => value,
                    Lookup::NoKey => return Ok(String::new()),
                    Lookup::Missing => {
                        missing.push(target.to_string());
                        return Ok(String::new());
                    }
                };

                for key in keys {
                    current = match current {
                        Value::Object(map) => match map.get(key) {
                            Some(value) => value,
                            // A map miss renders empty rather than failing.
                            None => return Ok(String::new()),
                        },
                        Value::Array(items) => {
                            match key.parse::<usize>().ok().and_then(|i| items.get(i)) {
                                Some(value) => value,
                                None => return Ok(String::new()),
                            }
                        }
                        Value::Null => return Ok(String::new()),
                        _ => {
                            return Err(TemplateRenderingError::NotIndexable {
                                path: target.to_string(),
                            });
                        }
                    };
                }

                Ok(value_to_string(current))
            }
        }
    }

    fn field(&self) -> String {
        match self {
            Expr::Path(path) | Expr::Index { target: path, .. } => path.to_string(),
        }
    }
}

/// Parses a leading double-quoted string, returning the unescaped contents and
/// the remaining input.
fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let mut chars = input.char_indices();
    if chars.next()?.1 != '"' {
        return None;
    }

    let mut out = String::new();
    let mut escaped = false;
    for (i, ch) in chars {
        match (escaped, ch) {
            (true, 'n') => out.push('\n'),
            (true, 't') => out.push('\t'),
            (true, other) => out.push(other),
            (false, '\\') => {
                escaped = true;
                continue;
            }
            (false, '"') => return Some((out, &input[i + 1..])),
            (false, other) => out.push(other),
        }
        escaped = false;
    }

    None
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Part {
    Literal(String),
    Expr(Expr),
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    src: String,
    parts: Vec<Part>,
    is_static: bool,
}

impl TryFrom<&str> for Template {
    type Error = TemplateParseError;

    fn try_from(src: &str) -> Result<Self, Self::Error> {
        let mut parts = Vec::new();
        let mut last_end = 0;

        for cap in RE.captures_iter(src) {
            let Some(whole) = cap.get(0) else {
                continue;
            };
            push_literal(&mut parts, &src[last_end..whole.start()], src)?;

            let expr = cap.name("expr").map_or("", |m| m.as_str());
            let expr = trim_markers(expr);
            if expr.is_empty() {
                return Err(TemplateParseError::EmptyExpression { src: src.into() });
            }
            parts.push(Part::Expr(Expr::parse(expr)?));

            last_end = whole.end();
        }
        push_literal(&mut parts, &src[last_end..], src)?;

        let is_static = parts.iter().all(|part| matches!(part, Part::Literal(_)));

        Ok(Template {
            src: src.to_owned(),
            parts,
            is_static,
        })
    }
}

impl TryFrom<String> for Template {
    type Error = TemplateParseError;

    fn try_from(src: String) -> Result<Self, Self::Error> {
        Self::try_from(src.as_str())
    }
}

impl From<Template> for String {
    fn from(template: Template) -> String {
        template.src
    }
}

fn push_literal(parts: &mut Vec<Part>, text: &str, src: &str) -> Result<(), TemplateParseError> {
    if text.contains("{{") {
        return Err(TemplateParseError::Unterminated { src: src.into() });
    }
    if !text.is_empty() {
        parts.push(Part::Literal(text.to_owned()));
    }
    Ok(())
}

/// Strips surrounding whitespace along with `-` trim markers.
fn trim_markers(expr: &str) -> &str {
    let mut expr = expr;
    if let Some(rest) = expr.strip_prefix('-') {
        if rest.starts_with(char::is_whitespace) {
            expr = rest;
        }
    }
    if let Some(rest) = expr.strip_suffix('-') {
        if rest.ends_with(char::is_whitespace) {
            expr = rest;
        }
    }
    expr.trim()
}

impl Template {
    pub fn get_ref(&self) -> &str {
        &self.src
    }

    pub const fn is_dynamic(&self) -> bool {
        !self.is_static
    }

    /// Field paths referenced by this template, if any.
    pub fn get_fields(&self) -> Option<Vec<String>> {
        let fields = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Expr(expr) => Some(expr.field()),
                Part::Literal(_) => None,
            })
            .collect::<Vec<_>>();

        (!fields.is_empty()).then_some(fields)
    }

    pub fn render_string(&self, event: &EnhancedEvent) -> Result<String, TemplateRenderingError> {
        if self.is_static {
            return Ok(self.src.clone());
        }
        // The event type has only string-keyed maps, so this cannot fail.
        let root = event.to_value().unwrap_or(Value::Object(Map::new()));
        self.render_value(&root)
    }

    /// Renders against an already-serialized event view.
    pub fn render_value(&self, root: &Value) -> Result<String, TemplateRenderingError> {
        if self.is_static {
            return Ok(self.src.clone());
        }

        let mut missing = Vec::new();
        let mut out = String::with_capacity(self.src.len());
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::Expr(expr) => out.push_str(&expr.render(root, &mut missing)?),
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(TemplateRenderingError::MissingKeys { keys: missing })
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.src == other.src
    }
}

impl Eq for Template {}

impl Hash for Template {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.src.hash(state);
    }
}
