use async_trait::async_trait;
use chrono::Utc;
use snafu::ResultExt;
use tracing::Instrument;

use super::{
    labels::LabelResolver,
    request::{LokiPush, LokiRequestBuilder, generate_timestamp},
    service::{LokiError, LokiService, SerializeBodySnafu},
};
use crate::{
    event::EnhancedEvent,
    internal_events::{LokiEventFiltered, LokiEventsSent, LokiPushFailed, TemplateRenderingFailed},
    layout::{self, LayoutError},
    sinks::Sink,
};

/// Outcome of a successful [`LokiSink::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The event's namespace is ignored; nothing was sent.
    Filtered,
}

#[derive(Debug)]
pub struct LokiSink {
    resolver: LabelResolver,
    request_builder: LokiRequestBuilder,
    service: LokiService,
}

impl LokiSink {
    pub(super) const fn new(
        resolver: LabelResolver,
        request_builder: LokiRequestBuilder,
        service: LokiService,
    ) -> Self {
        Self {
            resolver,
            request_builder,
            service,
        }
    }

    /// Delivers `event` as a single stream entry.
    ///
    /// Safe to call concurrently: each call works on its own labels and body.
    pub async fn push(&self, event: &EnhancedEvent) -> Result<Delivery, LokiError> {
        let span = info_span!(
            "loki",
            kind = %event.involved_object.kind,
            name = %event.involved_object.name,
            namespace = %event.involved_object.namespace,
        );

        let result = self.try_push(event).instrument(span).await;
        if let Err(error) = &result {
            match error.template_error() {
                Some((field, error)) => {
                    emit!(TemplateRenderingFailed {
                        field: Some(field),
                        drop_event: true,
                        error,
                    });
                }
                None => {
                    emit!(LokiPushFailed { error });
                }
            }
        }
        result
    }

    async fn try_push(&self, event: &EnhancedEvent) -> Result<Delivery, LokiError> {
        if let Some(namespace) = self.resolver.ignored(event) {
            emit!(LokiEventFiltered { namespace });
            return Ok(Delivery::Filtered);
        }

        let root = event
            .to_value()
            .map_err(|source| LayoutError::EncodeEvent { source })
            .context(SerializeBodySnafu)?;

        let labels = self.resolver.resolve(event, &root)?;
        let body = layout::serialize_value(self.resolver.layout_for(event), &root)
            .context(SerializeBodySnafu)?;
        let line = String::from_utf8_lossy(&body);

        let timestamp = generate_timestamp(Utc::now());
        let payload = LokiPush::new(&labels, &timestamp, &line).encode()?;
        let byte_size = payload.len();

        let request = self.request_builder.build(payload, &root)?;
        self.service.push(request).await?;

        emit!(LokiEventsSent { byte_size });
        Ok(Delivery::Sent)
    }

    /// Closes idle pooled connections.
    pub fn close(&self) {
        self.service.close();
    }
}

#[async_trait]
impl Sink for LokiSink {
    async fn send(&self, event: &EnhancedEvent) -> crate::Result<()> {
        self.push(event).await?;
        Ok(())
    }

    fn close(&self) {
        LokiSink::close(self);
    }
}
