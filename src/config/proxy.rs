use headers::Authorization;
use http::uri::InvalidUri;
use hyper_proxy::{Custom, Intercept, Proxy, ProxyConnector};
use no_proxy::NoProxy;
use url::Url;

// lowercase first, then uppercase
fn from_env(key: &str) -> Option<String> {
    std::env::var(key.to_lowercase())
        .ok()
        .or_else(|| std::env::var(key.to_uppercase()).ok())
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct NoProxyInterceptor(NoProxy);

impl NoProxyInterceptor {
    fn intercept(self, expected_scheme: &'static str) -> Intercept {
        Intercept::Custom(Custom::from(
            move |scheme: Option<&str>, host: Option<&str>, port: Option<u16>| {
                if scheme.is_some() && scheme != Some(expected_scheme) {
                    return false;
                }
                let matches = host.is_some_and(|host| {
                    self.0.matches(host)
                        || port.is_some_and(|port| self.0.matches(&format!("{host}:{port}")))
                });
                // only intercept those that don't match
                !matches
            },
        ))
    }
}

/// Proxy settings picked up from the process environment.
///
/// `HTTP_PROXY` and `HTTPS_PROXY` select the proxy per target scheme; hosts
/// matching `NO_PROXY` are connected to directly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http: Option<String>,
    pub https: Option<String>,
    pub no_proxy: NoProxy,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self {
            http: from_env("HTTP_PROXY"),
            https: from_env("HTTPS_PROXY"),
            no_proxy: from_env("NO_PROXY").map(NoProxy::from).unwrap_or_default(),
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none()
    }

    fn interceptor(&self) -> NoProxyInterceptor {
        NoProxyInterceptor(self.no_proxy.clone())
    }

    fn build_proxy(
        &self,
        proxy_scheme: &'static str,
        proxy_url: &Option<String>,
    ) -> Result<Option<Proxy>, InvalidUri> {
        proxy_url
            .as_ref()
            .map(|url| {
                url.parse().map(|parsed| {
                    let mut proxy = Proxy::new(self.interceptor().intercept(proxy_scheme), parsed);
                    if let Ok(authority) = Url::parse(url) {
                        if let Some(password) = authority.password() {
                            proxy.set_authorization(Authorization::basic(
                                authority.username(),
                                password,
                            ));
                        }
                    }
                    proxy
                })
            })
            .transpose()
    }

    fn http_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("http", &self.http)
    }

    fn https_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("https", &self.https)
    }

    /// Install the proxies of this `ProxyConfig` into `connector`.
    ///
    /// # Errors
    ///
    /// Fails if a proxy URL is not a valid URI.
    pub fn configure<C>(&self, connector: &mut ProxyConnector<C>) -> Result<(), InvalidUri> {
        if let Some(proxy) = self.http_proxy()? {
            connector.add_proxy(proxy);
        }
        if let Some(proxy) = self.https_proxy()? {
            connector.add_proxy(proxy);
        }
        Ok(())
    }
}
