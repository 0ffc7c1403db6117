use metrics::counter;

use super::InternalEvent;
use crate::sinks::loki::{HeaderTemplateError, LokiError};

#[derive(Debug)]
pub struct LokiEventFiltered<'a> {
    pub namespace: &'a str,
}

impl InternalEvent for LokiEventFiltered<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Event namespace is ignored; dropping event.",
            namespace = %self.namespace,
        );
    }

    fn emit_metrics(&self) {
        counter!("component_discarded_events_total", "reason" => "ignored_namespace").increment(1);
    }
}

#[derive(Debug)]
pub struct LokiHeaderTemplateFallback<'a> {
    pub header: &'a str,
    pub error: &'a HeaderTemplateError,
}

impl InternalEvent for LokiHeaderTemplateFallback<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Failed to render header template; using it as a literal value.",
            header = %self.header,
            error = %self.error,
        );
    }
}

#[derive(Debug)]
pub struct LokiEventsSent {
    pub byte_size: usize,
}

impl InternalEvent for LokiEventsSent {
    fn emit_logs(&self) {
        trace!(message = "Events sent.", count = 1, byte_size = %self.byte_size);
    }

    fn emit_metrics(&self) {
        counter!("component_sent_events_total").increment(1);
        counter!("component_sent_bytes_total").increment(self.byte_size as u64);
    }
}

#[derive(Debug)]
pub struct LokiPushFailed<'a> {
    pub error: &'a LokiError,
}

impl InternalEvent for LokiPushFailed<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Failed to push event to Loki.",
            error = %self.error,
            error_type = self.error.error_type(),
            stage = self.error.stage(),
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => self.error.error_type(),
            "stage" => self.error.stage(),
        )
        .increment(1);
    }
}
