//! TLS configuration helpers.
//!
//! Builds the reqwest clients used against the identity service (server
//! authentication only) and the ingestion service (mutual TLS), and parses
//! the PEM files produced during provisioning.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::{ClientConfig, TrustAnchors};
use crate::error::{Result, TelemetryError};

const CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const CERTIFICATE_END: &str = "-----END CERTIFICATE-----";

/// Client certificate chain and decrypted private key, PEM-encoded.
#[derive(Clone)]
pub struct ClientIdentity {
    /// Certificate chain, leaf first.
    pub cert_pem: Vec<u8>,

    /// Unencrypted private key.
    pub key_pem: Vec<u8>,
}

impl ClientIdentity {
    /// Create a new client identity from PEM-encoded data.
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Load an identity from the certificate file as issued and the
    /// decrypted key file.
    ///
    /// The certificate file also carries the encrypted key; only its
    /// certificate blocks are kept.
    pub fn from_files(
        cert_path: impl AsRef<std::path::Path>,
        key_path: impl AsRef<std::path::Path>,
    ) -> Result<Self> {
        let issued = std::fs::read_to_string(cert_path)?;
        let cert_pem = certificate_blocks(&issued);
        let key_pem = std::fs::read(key_path)?;

        parse_pem_certificates(cert_pem.as_bytes())?;
        parse_pem_private_key(&key_pem)?;

        Ok(Self {
            cert_pem: cert_pem.into_bytes(),
            key_pem,
        })
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Build a reqwest Client with the appropriate TLS configuration.
///
/// When `identity` is given, it is presented for TLS client authentication.
pub fn build_http_client(
    config: &ClientConfig,
    identity: Option<&ClientIdentity>,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .use_rustls_tls();

    match &config.trust_anchors {
        TrustAnchors::WebPki => {
            builder = builder.tls_built_in_root_certs(true);
        }
        TrustAnchors::Explicit(ca_certs) => {
            builder = builder.tls_built_in_root_certs(false);
            for ca_pem in ca_certs {
                let cert = reqwest::Certificate::from_pem(ca_pem)
                    .map_err(|e| TelemetryError::tls(format!("Failed to parse CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }
        TrustAnchors::InsecureAcceptAny => {
            builder = builder
                .tls_built_in_root_certs(false)
                .danger_accept_invalid_certs(true);
        }
    }

    if let Some(identity) = identity {
        builder = builder.identity(build_reqwest_identity(identity)?);
    }

    builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);

    builder
        .build()
        .map_err(|e| TelemetryError::tls(format!("Failed to build HTTP client: {}", e)))
}

/// Build a reqwest Identity from PEM-encoded certificate and key.
fn build_reqwest_identity(identity: &ClientIdentity) -> Result<reqwest::Identity> {
    // reqwest wants certificate and key in a single PEM buffer
    let mut pem_data = identity.cert_pem.clone();
    pem_data.extend_from_slice(b"\n");
    pem_data.extend_from_slice(&identity.key_pem);

    reqwest::Identity::from_pem(&pem_data)
        .map_err(|e| TelemetryError::tls(format!("Failed to create client identity: {}", e)))
}

/// Extract the `CERTIFICATE` blocks from a PEM document, dropping
/// everything else.
///
/// The issued file starts with a legacy encrypted key whose block carries
/// `Proc-Type` and `DEK-Info` headers. `rustls_pemfile` decodes those header
/// lines as base64 and fails on that block, so the certificates are cut out
/// as text before being handed to it.
pub fn certificate_blocks(pem: &str) -> String {
    let mut out = String::new();
    let mut rest = pem;

    while let Some(start) = rest.find(CERTIFICATE_BEGIN) {
        let Some(len) = rest[start..].find(CERTIFICATE_END) else {
            break;
        };
        let end = start + len + CERTIFICATE_END.len();
        out.push_str(&rest[start..end]);
        out.push('\n');
        rest = &rest[end..];
    }

    out
}

/// Parse PEM-encoded certificates.
pub fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| result.ok())
        .collect();

    if certs.is_empty() {
        return Err(TelemetryError::invalid_pem("No certificates found in PEM data"));
    }

    Ok(certs)
}

/// Parse a PEM-encoded private key.
pub fn parse_pem_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem_data);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(TelemetryError::invalid_pem(format!("Failed to parse PEM: {:?}", e)));
            }
        }
    }

    Err(TelemetryError::invalid_pem("No private key found in PEM data"))
}
