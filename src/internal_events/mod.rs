mod http_client;
mod loki;
mod process;
mod template;

pub use self::http_client::*;
pub use self::loki::*;
pub use self::process::*;
pub use self::template::*;

/// Error stages and types attached to `component_errors_total`.
pub mod error_stage {
    pub const RECEIVING: &str = "receiving";
    pub const PROCESSING: &str = "processing";
    pub const SENDING: &str = "sending";
}

pub mod error_type {
    pub const ENCODER_FAILED: &str = "encoder_failed";
    pub const PARSER_FAILED: &str = "parser_failed";
    pub const REQUEST_FAILED: &str = "request_failed";
    pub const TEMPLATE_FAILED: &str = "template_failed";
}

pub trait InternalEvent {
    fn emit_logs(&self) {}
    fn emit_metrics(&self) {}
}

pub fn emit(event: impl InternalEvent) {
    event.emit_logs();
    event.emit_metrics();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event);
    };
}
