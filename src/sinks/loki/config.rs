use std::collections::HashSet;

use http::{HeaderName, Uri, header::InvalidHeaderName, uri::InvalidUri};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use super::{
    labels::LabelResolver,
    request::{HeaderTemplate, LokiRequestBuilder},
    service::LokiService,
    sink::LokiSink,
};
use crate::{
    config::ProxyConfig,
    http::{HttpClient, HttpError},
    layout::Layout,
    template::Template,
    tls::{TlsError, TlsOptions, TlsSettings},
};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LokiConfig {
    /// Full push endpoint, used as-is.
    pub url: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub layout: Layout,

    #[serde(
        default,
        rename = "streamLabels",
        alias = "stream_labels",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub stream_labels: IndexMap<String, Template>,

    /// Header values may be templates. Values that fail to parse or render
    /// are sent verbatim.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub headers: IndexMap<String, String>,

    #[serde(
        default,
        alias = "ignoreNamespaces",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub ignore_namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsOptions>,
}

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("Invalid URL {:?}: {}", url, source))]
    InvalidUrl { url: String, source: InvalidUri },
    #[snafu(display("URL {:?} must use the http or https scheme", url))]
    UnsupportedScheme { url: String },
    #[snafu(display("Invalid label name {:?}", name))]
    InvalidLabelName { name: String },
    #[snafu(display("Invalid header name {:?}: {}", name, source))]
    InvalidHeaderName {
        name: String,
        source: InvalidHeaderName,
    },
    #[snafu(display("Failed to load TLS settings: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("Failed to build HTTP client: {}", source))]
    Client { source: HttpError },
}

impl LokiConfig {
    pub fn example() -> Self {
        serde_yaml::from_str(
            r#"
url: http://loki.monitoring:3100/loki/api/v1/push
streamLabels:
  app: kube-events
  cluster: "{{ .ClusterName }}"
layout:
  message: "{{ .Message }}"
  reason: "{{ .Reason }}"
  type: "{{ .Type }}"
  kind: "{{ .InvolvedObject.Kind }}"
  count: "{{ .Count }}"
ignore_namespaces:
  - kube-system
"#,
        )
        .unwrap_or_else(|_| Self::new("http://localhost:3100/loki/api/v1/push"))
    }

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            layout: Layout::new(),
            stream_labels: IndexMap::new(),
            headers: IndexMap::new(),
            ignore_namespaces: Vec::new(),
            tls: None,
        }
    }

    /// Builds a sink that honours the proxy environment variables.
    pub fn build(&self) -> Result<LokiSink, BuildError> {
        self.build_with_proxy(&ProxyConfig::from_env())
    }

    pub fn build_with_proxy(&self, proxy: &ProxyConfig) -> Result<LokiSink, BuildError> {
        let uri = self.uri()?;

        for name in self.stream_labels.keys() {
            if !valid_label_name(name) {
                return Err(BuildError::InvalidLabelName { name: name.clone() });
            }
        }

        let headers = self
            .headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .context(InvalidHeaderNameSnafu { name })?;
                Ok(HeaderTemplate::new(name, value.clone()))
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        let tls = TlsSettings::from_options(&self.tls).context(TlsSnafu)?;
        let client = HttpClient::new(&tls, proxy).context(ClientSnafu)?;

        let resolver = LabelResolver::new(
            self.stream_labels.clone(),
            &self.layout,
            self.ignore_namespaces.iter().cloned().collect::<HashSet<_>>(),
        );

        Ok(LokiSink::new(
            resolver,
            LokiRequestBuilder::new(uri, headers),
            LokiService::new(client),
        ))
    }

    fn uri(&self) -> Result<Uri, BuildError> {
        let uri = self
            .url
            .parse::<Uri>()
            .context(InvalidUrlSnafu { url: &self.url })?;
        match uri.scheme_str() {
            Some("http" | "https") if uri.host().is_some() => Ok(uri),
            _ => Err(BuildError::UnsupportedScheme {
                url: self.url.clone(),
            }),
        }
    }
}

/// Loki follows Prometheus for label names: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn valid_label_name(label: &str) -> bool {
    let mut chars = label.chars();
    match chars.next() {
        Some(ch) => {
            (ch.is_ascii_alphabetic() || ch == '_')
                && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        }
        None => false,
    }
}
