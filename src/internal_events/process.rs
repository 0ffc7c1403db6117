use std::path::Path;

use metrics::counter;

use super::{InternalEvent, error_stage, error_type};
use crate::config::ConfigError;

#[derive(Debug)]
pub struct KubeEventLokiStarted<'a> {
    pub config_path: &'a Path,
}

impl InternalEvent for KubeEventLokiStarted<'_> {
    fn emit_logs(&self) {
        info!(
            target: "kube_event_loki",
            message = "Sink has started.",
            version = env!("CARGO_PKG_VERSION"),
            config_path = ?self.config_path,
        );
    }

    fn emit_metrics(&self) {
        counter!("started_total").increment(1);
    }
}

#[derive(Debug)]
pub struct KubeEventLokiStopped {
    pub processed: u64,
    pub failed: u64,
}

impl InternalEvent for KubeEventLokiStopped {
    fn emit_logs(&self) {
        info!(
            target: "kube_event_loki",
            message = "Sink has stopped.",
            processed = self.processed,
            failed = self.failed,
        );
    }

    fn emit_metrics(&self) {
        counter!("stopped_total").increment(1);
    }
}

#[derive(Debug)]
pub struct KubeEventLokiConfigLoadFailed<'a> {
    pub error: &'a ConfigError,
}

impl InternalEvent for KubeEventLokiConfigLoadFailed<'_> {
    fn emit_logs(&self) {
        error!(
            target: "kube_event_loki",
            message = "Configuration error.",
            error = %self.error,
        );
    }

    fn emit_metrics(&self) {
        counter!("config_load_errors_total").increment(1);
    }
}

/// An input line that is not a JSON event.
#[derive(Debug)]
pub struct EventDecodeFailed<'a> {
    pub line: u64,
    pub error: &'a serde_json::Error,
}

impl InternalEvent for EventDecodeFailed<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Skipping undecodable event.",
            line = self.line,
            error = %self.error,
            error_type = error_type::PARSER_FAILED,
            stage = error_stage::RECEIVING,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => error_type::PARSER_FAILED,
            "stage" => error_stage::RECEIVING,
        )
        .increment(1);
    }
}
