// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration types for provisioning and delivery.
//!
//! [`ClientConfig`] is built once per invocation and handed to every
//! component. It can be assembled programmatically through
//! [`ClientConfigBuilder`] or seeded from a TOML file via [`FileConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TelemetryError};

/// Default path of the device management API on the instance.
pub const DEFAULT_CORE_API_PATH: &str = "/iot/core/api/v1";

/// Default path of the REST gateway on the instance.
pub const DEFAULT_GATEWAY_PATH: &str = "/iot/gateway/rest";

/// Default name of the certificate file.
pub const DEFAULT_CERTIFICATE_FILE: &str = "cert.pem";

/// Default HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between delivery attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Configuration shared by all components.
#[derive(Clone)]
pub struct ClientConfig {
    /// Instance base URL (e.g., "https://tenant.example.com").
    pub instance_url: Url,

    /// Path prefix of the device management API.
    pub core_api_path: String,

    /// Path prefix of the REST gateway.
    pub gateway_path: String,

    /// Credentials for the identity service.
    pub http_auth: Option<HttpAuth>,

    /// Trust anchor configuration for server certificate verification.
    pub trust_anchors: TrustAnchors,

    /// Request timeout duration.
    pub timeout: Duration,

    /// Fixed delay between delivery attempts.
    pub retry_interval: Duration,

    /// Directory holding the certificate and key files.
    pub work_dir: PathBuf,

    /// File name of the certificate as issued.
    pub certificate_file_name: String,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("instance_url", &self.instance_url)
            .field("core_api_path", &self.core_api_path)
            .field("gateway_path", &self.gateway_path)
            .field("http_auth", &self.http_auth.is_some())
            .field("trust_anchors", &self.trust_anchors)
            .field("timeout", &self.timeout)
            .field("retry_interval", &self.retry_interval)
            .field("work_dir", &self.work_dir)
            .field("certificate_file_name", &self.certificate_file_name)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// URL of the client certificate endpoint for a device.
    pub fn certificate_url(&self, device_id: &str) -> Result<Url> {
        self.endpoint(
            &self.core_api_path,
            &[
                "devices",
                device_id,
                "authentications",
                "clientCertificate",
                "pem",
            ],
        )
    }

    /// URL of the measures endpoint for a device.
    pub fn measures_url(&self, device_alternate_id: &str) -> Result<Url> {
        self.endpoint(&self.gateway_path, &["measures", device_alternate_id])
    }

    fn endpoint(&self, prefix: &str, segments: &[&str]) -> Result<Url> {
        let mut url = self.instance_url.clone();
        url.path_segments_mut()
            .map_err(|_| TelemetryError::config("instance URL cannot carry a path"))?
            .pop_if_empty()
            .extend(prefix.split('/').filter(|s| !s.is_empty()))
            .extend(segments);
        Ok(url)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    instance_url: Option<Url>,
    core_api_path: Option<String>,
    gateway_path: Option<String>,
    http_auth: Option<HttpAuth>,
    trust_anchors: Option<TrustAnchors>,
    timeout: Option<Duration>,
    retry_interval: Option<Duration>,
    work_dir: Option<PathBuf>,
    certificate_file_name: Option<String>,
}

impl ClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance.
    ///
    /// Accepts either a bare host name, which is reached over HTTPS, or a
    /// full URL.
    pub fn instance(mut self, instance: impl AsRef<str>) -> std::result::Result<Self, url::ParseError> {
        self.instance_url = Some(parse_instance(instance.as_ref())?);
        Ok(self)
    }

    /// Set the instance from a pre-parsed URL.
    pub fn instance_url(mut self, url: Url) -> Self {
        self.instance_url = Some(url);
        self
    }

    /// Override the device management API path prefix.
    pub fn core_api_path(mut self, path: impl Into<String>) -> Self {
        self.core_api_path = Some(path.into());
        self
    }

    /// Override the REST gateway path prefix.
    pub fn gateway_path(mut self, path: impl Into<String>) -> Self {
        self.gateway_path = Some(path.into());
        self
    }

    /// Set the identity service credentials.
    pub fn http_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.http_auth = Some(HttpAuth::new(username, password));
        self
    }

    /// Use the bundled WebPKI roots for server verification.
    pub fn trust_webpki_roots(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::WebPki);
        self
    }

    /// Use explicit CA certificates for server verification.
    pub fn trust_explicit(mut self, ca_certs: Vec<Vec<u8>>) -> Self {
        self.trust_anchors = Some(TrustAnchors::Explicit(ca_certs));
        self
    }

    /// Accept any server certificate (insecure, for testing only).
    pub fn trust_any_insecure(mut self) -> Self {
        self.trust_anchors = Some(TrustAnchors::InsecureAcceptAny);
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the delay between delivery attempts.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Set the directory for certificate and key files.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Set the certificate file name.
    pub fn certificate_file_name(mut self, name: impl Into<String>) -> Self {
        self.certificate_file_name = Some(name.into());
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is not set.
    pub fn build(self) -> Result<ClientConfig> {
        let instance_url = self
            .instance_url
            .ok_or_else(|| TelemetryError::config("instance is required"))?;

        Ok(ClientConfig {
            instance_url,
            core_api_path: self
                .core_api_path
                .unwrap_or_else(|| DEFAULT_CORE_API_PATH.to_string()),
            gateway_path: self
                .gateway_path
                .unwrap_or_else(|| DEFAULT_GATEWAY_PATH.to_string()),
            http_auth: self.http_auth,
            trust_anchors: self.trust_anchors.unwrap_or(TrustAnchors::WebPki),
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry_interval: self.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL),
            work_dir: self.work_dir.unwrap_or_else(|| PathBuf::from(".")),
            certificate_file_name: self
                .certificate_file_name
                .unwrap_or_else(|| DEFAULT_CERTIFICATE_FILE.to_string()),
        })
    }
}

fn parse_instance(instance: &str) -> std::result::Result<Url, url::ParseError> {
    if instance.contains("://") {
        Url::parse(instance)
    } else {
        Url::parse(&format!("https://{}", instance))
    }
}

/// HTTP Basic authentication credentials.
#[derive(Clone)]
pub struct HttpAuth {
    /// Username.
    pub username: String,

    /// Password.
    pub password: String,
}

impl HttpAuth {
    /// Create new HTTP auth credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Trust anchor configuration for server certificate verification.
#[derive(Clone)]
pub enum TrustAnchors {
    /// Use the WebPKI root store bundled with the HTTP client.
    WebPki,

    /// Use explicit CA certificates (PEM-encoded).
    Explicit(Vec<Vec<u8>>),

    /// Accept any server certificate (insecure, for testing only).
    ///
    /// **WARNING**: This disables all server certificate verification.
    InsecureAcceptAny,
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WebPki => write!(f, "WebPki"),
            Self::Explicit(certs) => write!(f, "Explicit({} certs)", certs.len()),
            Self::InsecureAcceptAny => write!(f, "InsecureAcceptAny"),
        }
    }
}

/// TOML configuration file.
///
/// Every field is optional; values given on the command line take
/// precedence.
///
/// ```toml
/// instance = "tenant.example.com"
///
/// [identity]
/// username = "device-admin"
/// password = "secret"
///
/// [storage]
/// work_dir = "/var/lib/iot-measure"
/// certificate_file = "cert.pem"
///
/// [http]
/// timeout_secs = 30
/// retry_interval_secs = 2
/// ca_file = "/etc/ssl/certs/tenant-ca.pem"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Instance host or URL.
    pub instance: Option<String>,

    /// Identity service credentials.
    #[serde(default)]
    pub identity: IdentityFileConfig,

    /// File locations.
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// HTTP behaviour.
    #[serde(default)]
    pub http: HttpFileConfig,
}

/// `[identity]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityFileConfig {
    /// Identity service user.
    pub username: Option<String>,

    /// Identity service password.
    pub password: Option<String>,
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageFileConfig {
    /// Directory for certificate and key files.
    pub work_dir: Option<PathBuf>,

    /// Certificate file name.
    pub certificate_file: Option<String>,
}

/// `[http]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpFileConfig {
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// Delay between delivery attempts in seconds.
    pub retry_interval_secs: Option<u64>,

    /// PEM bundle of CA certificates to trust instead of the WebPKI roots.
    pub ca_file: Option<PathBuf>,

    /// Path prefix of the device management API.
    pub core_api_path: Option<String>,

    /// Path prefix of the REST gateway.
    pub gateway_path: Option<String>,
}

impl FileConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or has unknown keys.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| TelemetryError::config(format!("Invalid TOML: {e}")))
    }

    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TelemetryError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Seed a builder with the values present in this file.
    pub fn apply(&self, mut builder: ClientConfigBuilder) -> Result<ClientConfigBuilder> {
        if let Some(ref instance) = self.instance {
            builder = builder.instance(instance)?;
        }
        match (&self.identity.username, &self.identity.password) {
            (Some(user), Some(password)) => builder = builder.http_auth(user, password),
            (None, None) => {}
            _ => {
                return Err(TelemetryError::config(
                    "[identity] needs both username and password",
                ))
            }
        }
        if let Some(ref dir) = self.storage.work_dir {
            builder = builder.work_dir(dir);
        }
        if let Some(ref name) = self.storage.certificate_file {
            builder = builder.certificate_file_name(name);
        }
        if let Some(secs) = self.http.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.http.retry_interval_secs {
            builder = builder.retry_interval(Duration::from_secs(secs));
        }
        if let Some(ref path) = self.http.core_api_path {
            builder = builder.core_api_path(path);
        }
        if let Some(ref path) = self.http.gateway_path {
            builder = builder.gateway_path(path);
        }
        if let Some(ref ca_file) = self.http.ca_file {
            builder = builder.trust_explicit(vec![std::fs::read(ca_file)?]);
        }
        Ok(builder)
    }
}
