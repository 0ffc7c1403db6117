use std::{
    fmt::{self, Debug, Formatter},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use openssl::{
    error::ErrorStack,
    pkcs12::Pkcs12,
    pkey::{PKey, Private},
    ssl::{ConnectConfiguration, SslContextBuilder, SslVerifyMode},
    x509::{X509, store::X509StoreBuilder},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::{
    AddCertToStoreSnafu, AddExtraChainCertSnafu, FileOpenFailedSnafu, FileReadFailedSnafu,
    IncompletePkcs12Snafu, NewStoreBuilderSnafu, ParsePkcs12Snafu, PrivateKeyParseSnafu, Result,
    SetCertificateSnafu, SetPrivateKeySnafu, SetVerifyCertSnafu, TlsError, X509ParseSnafu,
};

const PEM_START_MARKER: &str = "-----BEGIN ";

/// TLS options for the connection to the push endpoint.
///
/// File options accept either a path or the PEM content itself.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_certificate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_hostname: Option<bool>,
    /// Disables both certificate and hostname verification unless they are
    /// set explicitly.
    #[serde(default, alias = "insecureSkipVerify", skip_serializing_if = "is_false")]
    pub insecure_skip_verify: bool,
    #[serde(
        default,
        alias = "ca_path",
        alias = "caFile",
        skip_serializing_if = "Option::is_none"
    )]
    pub ca_file: Option<PathBuf>,
    #[serde(
        default,
        alias = "crt_path",
        alias = "cert_file",
        alias = "certFile",
        skip_serializing_if = "Option::is_none"
    )]
    pub crt_file: Option<PathBuf>,
    #[serde(
        default,
        alias = "key_path",
        alias = "keyFile",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pass: Option<String>,
    /// Name used for SNI and hostname verification instead of the URL host.
    #[serde(default, alias = "serverName", skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // Calling convention is required by serde
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Directly usable settings for TLS connectors
#[derive(Clone, Default)]
pub struct TlsSettings {
    verify_certificate: bool,
    verify_hostname: bool,
    server_name: Option<String>,
    authorities: Vec<X509>,
    identity: Option<Identity>,
}

#[derive(Clone)]
struct Identity {
    cert: X509,
    key: PKey<Private>,
    chain: Vec<X509>,
}

impl TlsSettings {
    /// Generate a filled out settings struct from the given optional
    /// option set. If `options` is `None`, the result verifies peers
    /// against the system roots and carries no client identity.
    pub fn from_options(options: &Option<TlsOptions>) -> Result<Self> {
        let default = TlsOptions::default();
        let options = options.as_ref().unwrap_or(&default);

        let verify_certificate = options
            .verify_certificate
            .unwrap_or(!options.insecure_skip_verify);
        let verify_hostname = options
            .verify_hostname
            .unwrap_or(!options.insecure_skip_verify);

        if !verify_certificate {
            warn!("`verify_certificate` is DISABLED, this may lead to security vulnerabilities");
        }
        if !verify_hostname {
            warn!("`verify_hostname` is DISABLED, this may lead to security vulnerabilities");
        }

        Ok(Self {
            verify_certificate,
            verify_hostname,
            server_name: options.server_name.clone(),
            authorities: options.load_authorities()?,
            identity: options.load_identity()?,
        })
    }

    pub const fn verify_certificate(&self) -> bool {
        self.verify_certificate
    }

    pub const fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    pub const fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub fn authority_count(&self) -> usize {
        self.authorities.len()
    }

    pub(super) fn apply_context(&self, context: &mut SslContextBuilder) -> Result<()> {
        context.set_verify(if self.verify_certificate {
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        } else {
            SslVerifyMode::NONE
        });

        if let Some(identity) = &self.identity {
            context
                .set_certificate(&identity.cert)
                .context(SetCertificateSnafu)?;
            context
                .set_private_key(&identity.key)
                .context(SetPrivateKeySnafu)?;
            for cert in &identity.chain {
                context
                    .add_extra_chain_cert(cert.clone())
                    .context(AddExtraChainCertSnafu)?;
            }
        }

        if self.authorities.is_empty() {
            debug!("Using system root certs.");
        } else {
            let mut store = X509StoreBuilder::new().context(NewStoreBuilderSnafu)?;
            for authority in &self.authorities {
                store
                    .add_cert(authority.clone())
                    .context(AddCertToStoreSnafu)?;
            }
            context
                .set_verify_cert_store(store.build())
                .context(SetVerifyCertSnafu)?;
        }

        Ok(())
    }

    /// Per-connection settings, run for every new TLS connection.
    pub fn apply_connect_configuration(
        &self,
        connection: &mut ConnectConfiguration,
    ) -> std::result::Result<(), ErrorStack> {
        match &self.server_name {
            Some(server_name) => {
                // Replace the URL host with the configured name for both SNI and verification.
                connection.set_use_server_name_indication(false);
                connection.set_verify_hostname(false);
                connection.set_hostname(server_name)?;
                if self.verify_hostname {
                    connection.param_mut().set_host(server_name)?;
                }
            }
            None => connection.set_verify_hostname(self.verify_hostname),
        }
        Ok(())
    }
}

impl TlsOptions {
    fn load_authorities(&self) -> Result<Vec<X509>> {
        match &self.ca_file {
            None => Ok(vec![]),
            Some(filename) => {
                let (data, filename) = open_read(filename, "certificate")?;
                der_or_pem(
                    data,
                    |der| X509::from_der(&der).map(|x509| vec![x509]),
                    |pem| {
                        pem.match_indices(PEM_START_MARKER)
                            .map(|(start, _)| X509::from_pem(pem[start..].as_bytes()))
                            .collect()
                    },
                )
                .with_context(|_| X509ParseSnafu { filename })
            }
        }
    }

    fn load_identity(&self) -> Result<Option<Identity>> {
        match (&self.crt_file, &self.key_file) {
            (None, Some(_)) => Err(TlsError::MissingCrtKeyFile),
            (None, None) => Ok(None),
            (Some(filename), _) => {
                let (data, filename) = open_read(filename, "certificate")?;
                der_or_pem(
                    data,
                    |der| self.parse_pkcs12_identity(der, &filename),
                    |pem| self.parse_pem_identity(pem, &filename),
                )
                .map(Some)
            }
        }
    }

    /// Parse identity from a PEM encoded certificate + key pair of files
    fn parse_pem_identity(&self, pem: String, crt_file: &Path) -> Result<Identity> {
        let key_file = self.key_file.as_ref().ok_or(TlsError::MissingCrtKeyFile)?;

        let mut certs = pem
            .match_indices(PEM_START_MARKER)
            .map(|(start, _)| X509::from_pem(pem[start..].as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|_| X509ParseSnafu { filename: crt_file })?
            .into_iter();
        let cert = certs
            .next()
            .ok_or_else(|| TlsError::MissingCrtKeyFile)?;
        let key = load_key(key_file, &self.key_pass)?;

        Ok(Identity {
            cert,
            key,
            chain: certs.collect(),
        })
    }

    /// Parse identity from a DER encoded PKCS#12 archive
    fn parse_pkcs12_identity(&self, der: Vec<u8>, filename: &Path) -> Result<Identity> {
        let key_pass = self.key_pass.as_deref().unwrap_or("");
        let parsed = Pkcs12::from_der(&der)
            .and_then(|pkcs12| pkcs12.parse2(key_pass))
            .with_context(|_| ParsePkcs12Snafu { filename })?;

        match (parsed.cert, parsed.pkey) {
            (Some(cert), Some(key)) => Ok(Identity {
                cert,
                key,
                chain: parsed
                    .ca
                    .map(|stack| stack.into_iter().collect())
                    .unwrap_or_default(),
            }),
            _ => IncompletePkcs12Snafu { filename }.fail(),
        }
    }
}

impl Debug for TlsSettings {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("verify_certificate", &self.verify_certificate)
            .field("verify_hostname", &self.verify_hostname)
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Load a private key from a named file
fn load_key(filename: &Path, pass_phrase: &Option<String>) -> Result<PKey<Private>> {
    let (data, filename) = open_read(filename, "key")?;
    match pass_phrase {
        None => der_or_pem(
            data,
            |der| PKey::private_key_from_der(&der),
            |pem| PKey::private_key_from_pem(pem.as_bytes()),
        )
        .with_context(|_| PrivateKeyParseSnafu { filename }),
        Some(phrase) => der_or_pem(
            data,
            |der| PKey::private_key_from_pkcs8_passphrase(&der, phrase.as_bytes()),
            |pem| PKey::private_key_from_pem_passphrase(pem.as_bytes(), phrase.as_bytes()),
        )
        .with_context(|_| PrivateKeyParseSnafu { filename }),
    }
}

/// Parse the data one way if it looks like a DER file, and the other if
/// it looks like a PEM file. For the content to be treated as PEM, it
/// must parse as valid UTF-8 and contain a PEM start marker.
fn der_or_pem<T>(data: Vec<u8>, der_fn: impl Fn(Vec<u8>) -> T, pem_fn: impl Fn(String) -> T) -> T {
    match String::from_utf8(data) {
        Ok(text) => match text.find(PEM_START_MARKER) {
            Some(_) => pem_fn(text),
            None => der_fn(text.into_bytes()),
        },
        Err(err) => der_fn(err.into_bytes()),
    }
}

/// Open the named file and read its entire contents into memory. If the
/// file "name" contains a PEM start marker, it is assumed to contain
/// inline data and is used directly instead of opening a file.
fn open_read(filename: &Path, note: &'static str) -> Result<(Vec<u8>, PathBuf)> {
    if let Some(filename) = filename.to_str() {
        if filename.contains(PEM_START_MARKER) {
            return Ok((Vec::from(filename), "inline text".into()));
        }
    }

    let mut text = Vec::<u8>::new();

    File::open(filename)
        .with_context(|_| FileOpenFailedSnafu { note, filename })?
        .read_to_end(&mut text)
        .with_context(|_| FileReadFailedSnafu { note, filename })?;

    Ok((text, filename.into()))
}
