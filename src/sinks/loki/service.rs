use http::{Request, StatusCode};
use hyper::Body;
use snafu::{ResultExt, Snafu};
use tracing::Instrument;

use crate::{
    http::{HttpClient, HttpError},
    internal_events::{error_stage, error_type},
    layout::LayoutError,
    template::TemplateRenderingError,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum LokiError {
    #[snafu(display("Failed to render stream label {:?}: {}", label, source))]
    RenderLabel {
        label: String,
        source: TemplateRenderingError,
    },
    #[snafu(display("Failed to serialize event body: {}", source))]
    SerializeBody { source: LayoutError },
    #[snafu(display("Failed to encode push request: {}", source))]
    EncodeEnvelope { source: serde_json::Error },
    #[snafu(display("Failed to build push request: {}", source))]
    BuildRequest { source: http::Error },
    #[snafu(display("{}", source))]
    Transport { source: HttpError },
    #[snafu(display("Failed to read response body: {}", source))]
    ReadResponse { source: hyper::Error },
    #[snafu(display("not successful (2xx) response ({}): {}", status, body))]
    ServerError { status: StatusCode, body: String },
}

impl LokiError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            LokiError::RenderLabel { .. } => error_type::TEMPLATE_FAILED,
            LokiError::SerializeBody { .. } | LokiError::EncodeEnvelope { .. } => {
                error_type::ENCODER_FAILED
            }
            LokiError::BuildRequest { .. }
            | LokiError::Transport { .. }
            | LokiError::ReadResponse { .. }
            | LokiError::ServerError { .. } => error_type::REQUEST_FAILED,
        }
    }

    pub const fn stage(&self) -> &'static str {
        match self {
            LokiError::RenderLabel { .. }
            | LokiError::SerializeBody { .. }
            | LokiError::EncodeEnvelope { .. }
            | LokiError::BuildRequest { .. } => error_stage::PROCESSING,
            LokiError::Transport { .. }
            | LokiError::ReadResponse { .. }
            | LokiError::ServerError { .. } => error_stage::SENDING,
        }
    }

    /// The failing template and its field, for label and body render errors.
    pub fn template_error(&self) -> Option<(&str, &TemplateRenderingError)> {
        match self {
            LokiError::RenderLabel { label, source } => Some((label.as_str(), source)),
            LokiError::SerializeBody {
                source: LayoutError::RenderField { field, source },
            } => Some((field.as_str(), source)),
            _ => None,
        }
    }
}

/// Executes push requests and classifies the responses.
#[derive(Debug)]
pub(super) struct LokiService {
    client: HttpClient,
}

impl LokiService {
    pub(super) const fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Sends `request` and reads the whole response body, so the connection
    /// goes back to the pool whatever the status.
    pub(super) async fn push(&self, request: Request<Body>) -> Result<(), LokiError> {
        let response = self
            .client
            .send(request)
            .in_current_span()
            .await
            .context(TransportSnafu)?;

        let (parts, body) = response.into_parts();
        let body = hyper::body::to_bytes(body)
            .await
            .context(ReadResponseSnafu)?;

        if parts.status.is_success() {
            Ok(())
        } else {
            Err(LokiError::ServerError {
                status: parts.status,
                body: String::from_utf8_lossy(&body).into_owned(),
            })
        }
    }

    pub(super) fn close(&self) {
        self.client.close_idle_connections();
    }
}
