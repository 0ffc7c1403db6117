use std::{fmt, sync::Arc, time::Instant};

use arc_swap::ArcSwap;
use futures::future::BoxFuture;
use http::{HeaderValue, Request, Response, header};
use hyper::{
    body::{Body, HttpBody},
    client::{Client, HttpConnector},
};
use hyper_openssl::HttpsConnector;
use hyper_proxy::ProxyConnector;
use snafu::{ResultExt, Snafu};
use tracing::{Instrument, Span};

use crate::{
    config::ProxyConfig,
    internal_events::{AboutToSendHttpRequest, GotHttpError, GotHttpResponse},
    tls::{TlsError, TlsSettings, tls_connector, tls_connector_builder},
};

pub type HttpsProxyConnector = ProxyConnector<HttpsConnector<HttpConnector>>;

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    BuildTlsConnector { source: TlsError },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to build Proxy connector: {}", source))]
    MakeProxyConnector { source: std::io::Error },
    #[snafu(display("Invalid proxy URI: {}", source))]
    InvalidProxyUri { source: http::uri::InvalidUri },
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
}

/// A pooled HTTP(S) client.
///
/// The pool lives behind an [`ArcSwap`] so that idle connections can be dropped
/// while requests already in flight keep the pool they started on.
pub struct HttpClient<B = Body> {
    client: ArcSwap<Client<HttpsProxyConnector, B>>,
    proxy_connector: HttpsProxyConnector,
    span: Span,
    user_agent: HeaderValue,
}

impl<B> HttpClient<B>
where
    B: fmt::Debug + HttpBody + Send + 'static,
    B::Data: Send,
    B::Error: Into<crate::Error>,
{
    pub fn new(tls_settings: &TlsSettings, proxy_config: &ProxyConfig) -> Result<Self, HttpError> {
        let proxy_connector = build_proxy_connector(tls_settings, proxy_config)?;
        let client = Client::builder().build(proxy_connector.clone());

        let user_agent = HeaderValue::from_str(&format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            crate::get_version()
        ))
        .unwrap_or_else(|_| HeaderValue::from_static(env!("CARGO_PKG_NAME")));

        let span = tracing::info_span!("http");

        Ok(HttpClient {
            client: ArcSwap::from_pointee(client),
            proxy_connector,
            span,
            user_agent,
        })
    }

    pub fn send(
        &self,
        mut request: Request<B>,
    ) -> BoxFuture<'static, Result<Response<Body>, HttpError>> {
        let _enter = self.span.enter();

        default_request_headers(&mut request, &self.user_agent);
        self.maybe_add_proxy_headers(&mut request);

        emit!(AboutToSendHttpRequest { request: &request });

        let response = self.client.load().request(request);

        let fut = async move {
            // Request doesn't start the processing until we start polling it.
            let before = Instant::now();

            let response_result = response.await;

            let roundtrip = before.elapsed();

            let response = response_result
                .inspect_err(|error| {
                    emit!(GotHttpError {
                        error,
                        roundtrip
                    });
                })
                .context(CallRequestSnafu)?;

            emit!(GotHttpResponse {
                response: &response,
                roundtrip
            });
            Ok(response)
        }
        .instrument(self.span.clone());

        Box::pin(fut)
    }

    /// Replaces the connection pool with an empty one. Idle connections of
    /// the old pool are closed once the last in-flight request using it ends.
    pub fn close_idle_connections(&self) {
        debug!(message = "Closing idle HTTP connections.");
        self.client
            .store(Arc::new(Client::builder().build(self.proxy_connector.clone())));
    }

    fn maybe_add_proxy_headers(&self, request: &mut Request<B>) {
        if let Some(proxy_headers) = self.proxy_connector.http_headers(request.uri()) {
            let headers = request.headers_mut();
            for (name, value) in proxy_headers {
                if !headers.contains_key(name) {
                    headers.insert(name, value.clone());
                }
            }
        }
    }
}

pub fn build_proxy_connector(
    tls_settings: &TlsSettings,
    proxy_config: &ProxyConfig,
) -> Result<HttpsProxyConnector, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);

    let tls = tls_connector_builder(tls_settings).context(BuildTlsConnectorSnafu)?;
    let mut https = HttpsConnector::with_connector(http, tls).context(MakeHttpsConnectorSnafu)?;

    let settings = tls_settings.clone();
    https.set_callback(move |c, _uri| settings.apply_connect_configuration(c));

    let mut proxy = ProxyConnector::new(https).context(MakeProxyConnectorSnafu)?;
    // Connections tunneled through an HTTPS proxy verify against the same TLS settings.
    let tls = tls_connector(tls_settings).context(BuildTlsConnectorSnafu)?;
    proxy.set_tls(Some(tls));
    proxy_config
        .configure(&mut proxy)
        .context(InvalidProxyUriSnafu)?;
    Ok(proxy)
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(header::USER_AGENT) {
        request
            .headers_mut()
            .insert(header::USER_AGENT, user_agent.clone());
    }

    if !request.headers().contains_key(header::ACCEPT_ENCODING) {
        // compressed responses are not supported
        request
            .headers_mut()
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

impl<B> fmt::Debug for HttpClient<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
