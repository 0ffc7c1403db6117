use async_trait::async_trait;

use crate::event::EnhancedEvent;

pub mod loki;

/// A delivery adapter that forwards one event at a time to an external backend.
///
/// `send` performs a single delivery attempt. Retrying, dropping or alerting on
/// failure is left to the caller.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, event: &EnhancedEvent) -> crate::Result<()>;

    /// Releases pooled resources. In-flight sends are not cancelled.
    fn close(&self);
}
