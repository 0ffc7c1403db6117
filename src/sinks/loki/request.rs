use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use http::{HeaderName, Request, Uri, header::CONTENT_TYPE};
use hyper::Body;
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use super::service::{BuildRequestSnafu, EncodeEnvelopeSnafu, LokiError};
use crate::{
    internal_events::LokiHeaderTemplateFallback,
    template::{Template, TemplateParseError, TemplateRenderingError},
};

/// Loki takes nanoseconds; only whole seconds are kept.
pub fn generate_timestamp(now: DateTime<Utc>) -> String {
    format!("{}000000000", now.timestamp())
}

#[derive(Debug, Serialize)]
pub(super) struct LokiPush<'a> {
    streams: [LokiStream<'a>; 1],
}

#[derive(Debug, Serialize)]
struct LokiStream<'a> {
    stream: &'a BTreeMap<String, String>,
    values: [[&'a str; 2]; 1],
}

impl<'a> LokiPush<'a> {
    pub(super) fn new(
        labels: &'a BTreeMap<String, String>,
        timestamp: &'a str,
        line: &'a str,
    ) -> Self {
        Self {
            streams: [LokiStream {
                stream: labels,
                values: [[timestamp, line]],
            }],
        }
    }

    pub(super) fn encode(&self) -> Result<Vec<u8>, LokiError> {
        serde_json::to_vec(self).context(EncodeEnvelopeSnafu)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Snafu)]
pub enum HeaderTemplateError {
    #[snafu(display("{}", source))]
    Parse { source: TemplateParseError },
    #[snafu(display("{}", source))]
    Render { source: TemplateRenderingError },
}

/// Where a header value came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderValueSource {
    Rendered(String),
    /// The template could not be used; its raw text is sent instead.
    Fallback {
        literal: String,
        error: HeaderTemplateError,
    },
}

impl HeaderValueSource {
    pub fn value(&self) -> &str {
        match self {
            HeaderValueSource::Rendered(value) => value,
            HeaderValueSource::Fallback { literal, .. } => literal,
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct HeaderTemplate {
    name: HeaderName,
    raw: String,
    template: Result<Template, TemplateParseError>,
}

impl HeaderTemplate {
    pub(super) fn new(name: HeaderName, raw: String) -> Self {
        let template = Template::try_from(raw.as_str());
        Self {
            name,
            raw,
            template,
        }
    }

    pub(super) fn render(&self, root: &Value) -> HeaderValueSource {
        let rendered = match &self.template {
            Ok(template) => template
                .render_value(root)
                .map_err(|source| HeaderTemplateError::Render { source }),
            Err(source) => Err(HeaderTemplateError::Parse {
                source: source.clone(),
            }),
        };

        match rendered {
            Ok(value) => HeaderValueSource::Rendered(value),
            Err(error) => HeaderValueSource::Fallback {
                literal: self.raw.clone(),
                error,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub(super) struct LokiRequestBuilder {
    uri: Uri,
    headers: Vec<HeaderTemplate>,
}

impl LokiRequestBuilder {
    pub(super) const fn new(uri: Uri, headers: Vec<HeaderTemplate>) -> Self {
        Self { uri, headers }
    }

    /// Builds the POST carrying `payload`. Configured headers are rendered
    /// against `root` and added after `Content-Type`.
    pub(super) fn build(
        &self,
        payload: Vec<u8>,
        root: &Value,
    ) -> Result<Request<Body>, LokiError> {
        let mut builder = Request::post(&self.uri).header(CONTENT_TYPE, "application/json");

        for header in &self.headers {
            let source = header.render(root);
            if let HeaderValueSource::Fallback { error, .. } = &source {
                emit!(LokiHeaderTemplateFallback {
                    header: header.name.as_str(),
                    error,
                });
            }
            builder = builder.header(&header.name, source.value());
        }

        builder.body(Body::from(payload)).context(BuildRequestSnafu)
    }
}
