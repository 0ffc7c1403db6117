use std::path::PathBuf;

use openssl::{
    error::ErrorStack,
    ssl::{SslConnector, SslConnectorBuilder, SslMethod},
};
use snafu::{ResultExt, Snafu};

mod settings;

pub use settings::{TlsOptions, TlsSettings};

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not open {} file {:?}: {}", note, filename, source))]
    FileOpenFailed {
        note: &'static str,
        filename: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not read {} file {:?}: {}", note, filename, source))]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not build TLS connector: {}", source))]
    TlsBuildConnector { source: ErrorStack },
    #[snafu(display("Could not parse X509 certificate in {:?}: {}", filename, source))]
    X509ParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("Could not parse private key in {:?}: {}", filename, source))]
    PrivateKeyParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("Could not parse identity in {:?}: {}", filename, source))]
    ParsePkcs12 {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("PKCS#12 archive {:?} does not contain a certificate and key.", filename))]
    IncompletePkcs12 { filename: PathBuf },
    #[snafu(display("Must specify both TLS key_file and crt_file"))]
    MissingCrtKeyFile,
    #[snafu(display("Could not set TLS certificate: {}", source))]
    SetCertificate { source: ErrorStack },
    #[snafu(display("Could not set TLS private key: {}", source))]
    SetPrivateKey { source: ErrorStack },
    #[snafu(display("Could not add extra chain certificate: {}", source))]
    AddExtraChainCert { source: ErrorStack },
    #[snafu(display("Could not create a certificate store: {}", source))]
    NewStoreBuilder { source: ErrorStack },
    #[snafu(display("Could not add certificate to store: {}", source))]
    AddCertToStore { source: ErrorStack },
    #[snafu(display("Could not set verify certificate store: {}", source))]
    SetVerifyCert { source: ErrorStack },
}

/// Creates a connector builder carrying the CA, identity and verification
/// settings. Hostname checks are applied per connection through
/// [`TlsSettings::apply_connect_configuration`].
pub fn tls_connector_builder(settings: &TlsSettings) -> Result<SslConnectorBuilder> {
    let mut builder = SslConnector::builder(SslMethod::tls()).context(TlsBuildConnectorSnafu)?;
    settings.apply_context(&mut builder)?;
    Ok(builder)
}

pub fn tls_connector(settings: &TlsSettings) -> Result<SslConnector> {
    tls_connector_builder(settings).map(SslConnectorBuilder::build)
}
