//! Pushes Kubernetes events to Loki's push API.
//!
//! Every event becomes a single stream with one entry. The stream labels come
//! from `streamLabels` plus per-event labels (`host` for nodes, `namespace` and
//! `index` for namespaced objects) and the entry body from `layout`.

mod config;
mod labels;
mod request;
mod service;
mod sink;

#[cfg(test)]
mod tests;

pub use self::config::{BuildError, LokiConfig};
pub use self::request::{HeaderTemplateError, HeaderValueSource, generate_timestamp};
pub use self::service::LokiError;
pub use self::sink::{Delivery, LokiSink};
