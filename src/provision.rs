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

//! Device certificate provisioning.
//!
//! Fetches the device's client certificate bundle from the identity
//! service, stores the certificate as issued and derives the plaintext key
//! file from it.

use base64::prelude::*;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::config::{ClientConfig, HttpAuth};
use crate::convert::CredentialConverter;
use crate::error::{Result, TelemetryError};
use crate::store::KeyMaterialStore;
use crate::tls::build_http_client;
use crate::types::{CredentialBundle, DeviceIdentity, KeyMaterial};

/// Client for the identity service's certificate endpoint.
///
/// # Example
///
/// ```no_run
/// use iot_measure_client::{CertificateProvisioner, ClientConfig, DeviceIdentity, HttpAuth};
/// use iot_measure_client::convert::CredentialConverter;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::builder()
///     .instance("tenant.example.com")?
///     .build()?;
///
/// let provisioner = CertificateProvisioner::new(config, CredentialConverter::native())?;
/// let identity = DeviceIdentity::new("42", "D1", "S1", "C1");
///
/// let material = provisioner
///     .provision(&identity, &HttpAuth::new("user", "password"))
///     .await?;
/// println!("key at {}", material.private_key_file.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CertificateProvisioner {
    config: ClientConfig,
    http: reqwest::Client,
    store: KeyMaterialStore,
    converter: CredentialConverter,
}

impl CertificateProvisioner {
    /// Create a provisioner.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS configuration fails.
    pub fn new(config: ClientConfig, converter: CredentialConverter) -> Result<Self> {
        let http = build_http_client(&config, None)?;
        let store = KeyMaterialStore::from_config(&config);

        Ok(Self {
            config,
            http,
            store,
            converter,
        })
    }

    /// The store the provisioner writes into.
    pub fn store(&self) -> &KeyMaterialStore {
        &self.store
    }

    /// Fetch the device's certificate bundle and materialize its key files.
    ///
    /// # Errors
    ///
    /// - [`TelemetryError::Config`] if `identity.device_id` is empty
    /// - [`TelemetryError::IdentityService`] if the service does not answer 200
    /// - [`TelemetryError::MalformedBundle`] if the body is not `{secret, pem}`
    /// - any error of [`CredentialConverter::convert`]
    pub async fn provision(
        &self,
        identity: &DeviceIdentity,
        credentials: &HttpAuth,
    ) -> Result<KeyMaterial> {
        let bundle = self.fetch_bundle(&identity.device_id, credentials).await?;

        let certificate_file = self.store.write_certificate(bundle.pem.as_bytes())?;
        tracing::info!("Certificate downloaded to {}", certificate_file.display());

        let key_file = self.store.private_key_path(&identity.device_alternate_id);
        self.converter
            .convert(&certificate_file, &bundle.secret, &key_file)
            .await
    }

    /// Request the certificate bundle for a device.
    pub async fn fetch_bundle(
        &self,
        device_id: &str,
        credentials: &HttpAuth,
    ) -> Result<CredentialBundle> {
        if device_id.is_empty() {
            return Err(TelemetryError::config("device ID must not be empty"));
        }

        let url = self.config.certificate_url(device_id)?;
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, basic_auth_header(credentials))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Identity service returned {}", status.as_u16());
            return Err(TelemetryError::identity_service(status.as_u16(), message));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| TelemetryError::malformed_bundle(e.to_string()))
    }
}

fn basic_auth_header(auth: &HttpAuth) -> String {
    let credentials = BASE64_STANDARD.encode(format!("{}:{}", auth.username, auth.password));
    format!("Basic {}", credentials)
}
