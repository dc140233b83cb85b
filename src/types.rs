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

//! Device, credential and measurement types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifiers of the device, sensor and capability a measurement belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device ID used by the identity service.
    pub device_id: String,

    /// Alternate device ID used by the ingestion service and in the key file name.
    pub device_alternate_id: String,

    /// Alternate sensor ID.
    pub sensor_alternate_id: String,

    /// Alternate capability ID.
    pub capability_alternate_id: String,
}

impl DeviceIdentity {
    /// Create a new device identity.
    pub fn new(
        device_id: impl Into<String>,
        device_alternate_id: impl Into<String>,
        sensor_alternate_id: impl Into<String>,
        capability_alternate_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_alternate_id: device_alternate_id.into(),
            sensor_alternate_id: sensor_alternate_id.into(),
            capability_alternate_id: capability_alternate_id.into(),
        }
    }

    /// Build the measurement payload for this device from the given values.
    pub fn measurement(&self, measures: Vec<Value>) -> Measurement {
        Measurement {
            capability_alternate_id: self.capability_alternate_id.clone(),
            sensor_alternate_id: self.sensor_alternate_id.clone(),
            measures,
        }
    }
}

/// Password-protected certificate bundle issued by the identity service.
///
/// Lives only in memory between retrieval and conversion.
#[derive(Clone, Deserialize)]
pub struct CredentialBundle {
    /// Passphrase protecting the private key in `pem`.
    pub secret: String,

    /// Encrypted private key followed by the device certificate.
    pub pem: String,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("secret", &"<redacted>")
            .field("pem", &format_args!("{} bytes", self.pem.len()))
            .finish()
    }
}

/// On-disk certificate and decrypted private key for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Certificate file as issued (encrypted key plus certificate chain).
    pub certificate_file: PathBuf,

    /// Unencrypted private key file.
    pub private_key_file: PathBuf,
}

/// A single measurement message for the ingestion service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    /// Alternate capability ID.
    pub capability_alternate_id: String,

    /// Alternate sensor ID.
    pub sensor_alternate_id: String,

    /// Measured values, in order.
    pub measures: Vec<Value>,
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The ingestion service accepted the measurement (HTTP 200).
    Delivered,

    /// The attempt failed in a way that is worth retrying.
    RetryableFailure {
        /// HTTP status, or `None` when the request timed out.
        status: Option<u16>,
        /// Response body, if any.
        body: String,
    },
}

impl DeliveryOutcome {
    /// Create a retryable failure for a non-200 response.
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::RetryableFailure {
            status: Some(status),
            body: body.into(),
        }
    }

    /// Create a retryable failure for a timed-out request.
    pub fn timed_out() -> Self {
        Self::RetryableFailure {
            status: None,
            body: String::new(),
        }
    }

    /// Returns true if the measurement was delivered.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Final result of an orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The measurement was delivered after `attempts` posts.
    Delivered {
        /// Number of delivery attempts, including the successful one.
        attempts: u32,
    },

    /// The run was interrupted and the device key was removed.
    Interrupted,
}
