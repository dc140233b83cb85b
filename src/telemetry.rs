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

//! Measurement delivery over mutual TLS.

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::tls::{build_http_client, ClientIdentity};
use crate::types::{DeliveryOutcome, DeviceIdentity, KeyMaterial, Measurement};

/// Client for the ingestion service's measures endpoint.
///
/// The client never provisions; it requires key material on disk.
///
/// # Example
///
/// ```no_run
/// use iot_measure_client::{ClientConfig, DeviceIdentity, KeyMaterialStore, TelemetryClient};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::builder()
///     .instance("tenant.example.com")?
///     .build()?;
///
/// let identity = DeviceIdentity::new("42", "D1", "S1", "C1");
/// let material = KeyMaterialStore::from_config(&config).key_material("D1");
/// let client = TelemetryClient::new(config, &material)?;
///
/// let outcome = client
///     .post(&identity, &identity.measurement(vec![json!("21.5")]))
///     .await?;
/// println!("{:?}", outcome);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TelemetryClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl TelemetryClient {
    /// Create a client that authenticates with the given key material.
    ///
    /// # Errors
    ///
    /// Returns an error if the files cannot be read or do not hold a
    /// certificate and a plaintext private key.
    pub fn new(config: ClientConfig, material: &KeyMaterial) -> Result<Self> {
        let identity =
            ClientIdentity::from_files(&material.certificate_file, &material.private_key_file)?;
        Self::with_identity(config, &identity)
    }

    /// Create a client from an in-memory identity.
    pub fn with_identity(config: ClientConfig, identity: &ClientIdentity) -> Result<Self> {
        let http = build_http_client(&config, Some(identity))?;
        Ok(Self { config, http })
    }

    /// Post one measurement.
    ///
    /// Returns [`DeliveryOutcome::Delivered`] on HTTP 200 and
    /// [`DeliveryOutcome::RetryableFailure`] on any other status or a
    /// timeout.
    ///
    /// # Errors
    ///
    /// Any other transport failure is returned as
    /// [`TelemetryError::Http`](crate::TelemetryError::Http); it usually
    /// points at a bad certificate or endpoint and is not retried.
    pub async fn post(
        &self,
        identity: &DeviceIdentity,
        measurement: &Measurement,
    ) -> Result<DeliveryOutcome> {
        let url = self.config.measures_url(&identity.device_alternate_id)?;
        let body = serde_json::to_vec(measurement)?;
        tracing::debug!("POST {}", url);

        let response = match self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!("Delivery timed out after {:?}", self.config.timeout);
                return Ok(DeliveryOutcome::timed_out());
            }
            Err(e) => return Err(e.into()),
        };

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(DeliveryOutcome::Delivered);
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if e.is_timeout() => return Ok(DeliveryOutcome::timed_out()),
            Err(e) => return Err(e.into()),
        };
        tracing::warn!("Ingestion service returned {}: {}", status.as_u16(), text);

        Ok(DeliveryOutcome::rejected(status.as_u16(), text))
    }
}
