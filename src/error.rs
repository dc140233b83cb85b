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

//! Error types for certificate provisioning and measurement delivery.
//!
//! Every variant here is fatal for the invocation. Transient delivery
//! failures (timeouts, non-200 ingestion responses) are not errors; they
//! are reported as [`DeliveryOutcome::RetryableFailure`] and retried.
//!
//! [`DeliveryOutcome::RetryableFailure`]: crate::types::DeliveryOutcome::RetryableFailure

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`TelemetryError`].
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur while provisioning credentials or delivering measurements.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS configuration error (client identity, trust anchors).
    #[error("TLS error: {0}")]
    Tls(String),

    /// Network or protocol failure other than a timeout.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The identity service refused to issue a certificate.
    #[error("Identity service error {status}: {message}")]
    IdentityService {
        /// HTTP status code.
        status: u16,
        /// Response body returned by the service.
        message: String,
    },

    /// The identity service answered 200 with a body that is not a credential bundle.
    #[error("Malformed credential bundle: {0}")]
    MalformedBundle(String),

    /// The key conversion engine did not confirm a successful conversion.
    #[error("Error during conversion: {0}")]
    Conversion(String),

    /// The certificate file needed for conversion is not on disk.
    #[error("Certificate '{}' not found", .0.display())]
    MissingCertificate(PathBuf),

    /// Invalid PEM data.
    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelemetryError {
    /// Create a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a TLS error with the given message.
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create an identity service error with status and message.
    pub fn identity_service(status: u16, message: impl Into<String>) -> Self {
        Self::IdentityService {
            status,
            message: message.into(),
        }
    }

    /// Create a malformed bundle error.
    pub fn malformed_bundle(msg: impl Into<String>) -> Self {
        Self::MalformedBundle(msg.into())
    }

    /// Create a conversion error.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion(msg.into())
    }

    /// Create an invalid PEM error.
    pub fn invalid_pem(msg: impl Into<String>) -> Self {
        Self::InvalidPem(msg.into())
    }

    /// Returns true if the error stems from configuration or credentials
    /// rather than from the network path to the ingestion service.
    pub fn is_fatal_config(&self) -> bool {
        !matches!(self, Self::Http(_))
    }

    /// Process exit status for this error.
    ///
    /// Identity service refusals exit with the HTTP status code; everything
    /// else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::IdentityService { status, .. } => i32::from(*status),
            _ => 1,
        }
    }
}
