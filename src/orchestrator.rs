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

//! Provision-then-deliver workflow.
//!
//! ```text
//! Start -> (key file absent -> Provisioning ->) Delivering -> Done
//! ```
//!
//! Delivery is retried at a fixed interval, without an attempt limit,
//! until the ingestion service accepts the measurement or a fatal error
//! occurs. If the shutdown future completes first, the device's key file
//! is removed so the next run provisions afresh.

use std::future::Future;

use crate::config::ClientConfig;
use crate::convert::CredentialConverter;
use crate::error::{Result, TelemetryError};
use crate::provision::CertificateProvisioner;
use crate::store::KeyMaterialStore;
use crate::telemetry::TelemetryClient;
use crate::types::{DeliveryOutcome, DeviceIdentity, KeyMaterial, Measurement, RunOutcome};

/// Sequences provisioning and delivery for one measurement.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: ClientConfig,
    store: KeyMaterialStore,
    converter: CredentialConverter,
}

impl Orchestrator {
    /// Create an orchestrator.
    pub fn new(config: ClientConfig, converter: CredentialConverter) -> Self {
        let store = KeyMaterialStore::from_config(&config);
        Self {
            config,
            store,
            converter,
        }
    }

    /// The key material store in use.
    pub fn store(&self) -> &KeyMaterialStore {
        &self.store
    }

    /// Ensure key material exists, then deliver `measurement`.
    ///
    /// `shutdown` is polled alongside every network call, conversion and
    /// retry sleep. When it completes, the device's key file is deleted and
    /// [`RunOutcome::Interrupted`] is returned.
    pub async fn run<F>(
        &self,
        identity: &DeviceIdentity,
        measurement: &Measurement,
        shutdown: F,
    ) -> Result<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Interrupted, removing key file");
                self.store.remove(&identity.device_alternate_id)?;
                Ok(RunOutcome::Interrupted)
            }
            result = self.provision_and_deliver(identity, measurement) => {
                result.map(|attempts| RunOutcome::Delivered { attempts })
            }
        }
    }

    async fn provision_and_deliver(
        &self,
        identity: &DeviceIdentity,
        measurement: &Measurement,
    ) -> Result<u32> {
        let material = self.ensure_key_material(identity).await?;
        let client = TelemetryClient::new(self.config.clone(), &material)?;
        self.deliver(&client, identity, measurement).await
    }

    /// Return the device's key material, provisioning it if the key file is absent.
    pub async fn ensure_key_material(&self, identity: &DeviceIdentity) -> Result<KeyMaterial> {
        let alternate_id = &identity.device_alternate_id;
        if self.store.exists(alternate_id) {
            tracing::debug!("Using existing key file for {}", alternate_id);
            return Ok(self.store.key_material(alternate_id));
        }

        tracing::info!("Key file not found, provisioning device {}", identity.device_id);
        let credentials = self.config.http_auth.as_ref().ok_or_else(|| {
            TelemetryError::config("identity service credentials are required to provision")
        })?;

        CertificateProvisioner::new(self.config.clone(), self.converter.clone())?
            .provision(identity, credentials)
            .await
    }

    /// Post `measurement` until it is delivered, returning the number of attempts.
    pub async fn deliver(
        &self,
        client: &TelemetryClient,
        identity: &DeviceIdentity,
        measurement: &Measurement,
    ) -> Result<u32> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match client.post(identity, measurement).await? {
                DeliveryOutcome::Delivered => {
                    tracing::info!("Measurement delivered after {} attempt(s)", attempts);
                    return Ok(attempts);
                }
                DeliveryOutcome::RetryableFailure { status, .. } => {
                    tracing::debug!(
                        "Attempt {} failed ({}), retrying in {:?}",
                        attempts,
                        status.map_or_else(|| "timeout".to_string(), |s| s.to_string()),
                        self.config.retry_interval
                    );
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }
}
