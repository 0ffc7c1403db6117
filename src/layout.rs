//! Declarative JSON bodies built from event fields.
//!
//! A layout maps output field names to values. String values containing a
//! `{{ ... }}` expression are [`Template`]s, other scalars are emitted as-is,
//! and maps and sequences nest.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

use crate::{
    event::EnhancedEvent,
    template::{Template, TemplateParseError, TemplateRenderingError},
};

pub type Layout = IndexMap<String, LayoutValue>;

#[derive(Debug, Snafu)]
pub enum LayoutError {
    #[snafu(display("Failed to render layout field {:?}: {}", field, source))]
    RenderField {
        field: String,
        source: TemplateRenderingError,
    },
    #[snafu(display("Failed to encode event: {}", source))]
    EncodeEvent { source: serde_json::Error },
    #[snafu(display("Failed to encode layout body: {}", source))]
    EncodeBody { source: serde_json::Error },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum LayoutValue {
    Literal(Value),
    Template(Template),
    Map(Layout),
    List(Vec<LayoutValue>),
}

impl LayoutValue {
    fn render(&self, field: &str, root: &Value) -> Result<Value, LayoutError> {
        Ok(match self {
            LayoutValue::Literal(value) => value.clone(),
            LayoutValue::Template(template) => Value::String(
                template
                    .render_value(root)
                    .context(RenderFieldSnafu { field })?,
            ),
            LayoutValue::Map(layout) => Value::Object(render_map(layout, Some(field), root)?),
            LayoutValue::List(items) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| item.render(&format!("{field}[{i}]"), root))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

impl From<Template> for LayoutValue {
    fn from(template: Template) -> Self {
        if template.is_dynamic() {
            LayoutValue::Template(template)
        } else {
            LayoutValue::Literal(Value::String(template.into()))
        }
    }
}

impl TryFrom<Value> for LayoutValue {
    type Error = TemplateParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::String(s) if s.contains("{{") => LayoutValue::Template(Template::try_from(s)?),
            Value::Object(map) => LayoutValue::Map(
                map.into_iter()
                    .map(|(key, value)| Ok((key, LayoutValue::try_from(value)?)))
                    .collect::<Result<_, Self::Error>>()?,
            ),
            Value::Array(items) => LayoutValue::List(
                items
                    .into_iter()
                    .map(LayoutValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            other => LayoutValue::Literal(other),
        })
    }
}

impl From<LayoutValue> for Value {
    fn from(value: LayoutValue) -> Self {
        match value {
            LayoutValue::Literal(value) => value,
            LayoutValue::Template(template) => Value::String(template.into()),
            LayoutValue::Map(layout) => Value::Object(
                layout
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
            LayoutValue::List(items) => Value::Array(items.into_iter().map(Into::into).collect()),
        }
    }
}

fn render_map(
    layout: &Layout,
    parent: Option<&str>,
    root: &Value,
) -> Result<Map<String, Value>, LayoutError> {
    layout
        .iter()
        .map(|(key, value)| {
            let field = match parent {
                Some(parent) => format!("{parent}.{key}"),
                None => key.clone(),
            };
            Ok((key.clone(), value.render(&field, root)?))
        })
        .collect()
}

/// Renders `layout` against an already-serialized event view.
pub fn render(layout: &Layout, root: &Value) -> Result<Value, LayoutError> {
    render_map(layout, None, root).map(Value::Object)
}

/// Applies `layout` to `event`, producing the JSON document used as a log line.
pub fn serialize(layout: &Layout, event: &EnhancedEvent) -> Result<Vec<u8>, LayoutError> {
    let root = event.to_value().context(EncodeEventSnafu)?;
    serialize_value(layout, &root)
}

pub fn serialize_value(layout: &Layout, root: &Value) -> Result<Vec<u8>, LayoutError> {
    let body = render(layout, root)?;
    serde_json::to_vec(&body).context(EncodeBodySnafu)
}
