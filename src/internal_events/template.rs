use metrics::counter;

use super::{error_stage, error_type, InternalEvent};
use crate::template::TemplateRenderingError;

#[derive(Debug)]
pub struct TemplateRenderingFailed<'a> {
    pub field: Option<&'a str>,
    pub drop_event: bool,
    pub error: &'a TemplateRenderingError,
}

impl InternalEvent for TemplateRenderingFailed<'_> {
    fn emit_logs(&self) {
        let mut msg = "Failed to render template".to_owned();
        if let Some(field) = self.field {
            use std::fmt::Write;
            _ = write!(msg, " for \"{}\"", field);
        }
        msg.push('.');

        if self.drop_event {
            error!(
                message = %msg,
                error = %self.error,
                error_type = error_type::TEMPLATE_FAILED,
                stage = error_stage::PROCESSING,
            );
        } else {
            debug!(
                message = %msg,
                error = %self.error,
                error_type = error_type::TEMPLATE_FAILED,
                stage = error_stage::PROCESSING,
            );
        }
    }

    fn emit_metrics(&self) {
        if self.drop_event {
            counter!(
                "component_errors_total",
                "error_type" => error_type::TEMPLATE_FAILED,
                "stage" => error_stage::PROCESSING,
            )
            .increment(1);
        }
    }
}
