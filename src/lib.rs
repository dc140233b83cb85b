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

//! # iot-measure-client
//!
//! Provisions a device client certificate from an IoT instance's identity
//! service and delivers measurements to its REST gateway over mutual TLS.
//!
//! ## Workflow
//!
//! 1. If the device's key file (`certificate{alternate_id}.key`) is missing,
//!    the [`CertificateProvisioner`] downloads the password-protected
//!    certificate bundle, stores it as `cert.pem` and decrypts the key with
//!    a [`convert::KeyConverter`].
//! 2. The [`TelemetryClient`] posts the measurement, presenting the
//!    certificate and decrypted key for TLS client authentication.
//! 3. The [`Orchestrator`] retries timeouts and non-200 answers at a fixed
//!    interval until the measurement is accepted, and removes the key file
//!    if the run is interrupted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use iot_measure_client::{ClientConfig, DeviceIdentity, Orchestrator, RunOutcome};
//! use iot_measure_client::convert::CredentialConverter;
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .instance("tenant.example.com")?
//!         .http_auth("user", "password")
//!         .build()?;
//!
//!     let identity = DeviceIdentity::new("42", "D1", "S1", "C1");
//!     let measurement = identity.measurement(vec![json!("21.5")]);
//!
//!     let orchestrator = Orchestrator::new(config, CredentialConverter::native());
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!
//!     match orchestrator.run(&identity, &measurement, shutdown).await? {
//!         RunOutcome::Delivered { attempts } => println!("delivered after {} attempts", attempts),
//!         RunOutcome::Interrupted => println!("interrupted"),
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod convert;
pub mod error;
pub mod orchestrator;
pub mod provision;
pub mod store;
pub mod telemetry;
pub mod tls;
pub mod types;

pub use config::{ClientConfig, ClientConfigBuilder, FileConfig, HttpAuth, TrustAnchors};
pub use convert::{CredentialConverter, KeyConverter};
pub use error::{Result, TelemetryError};
pub use orchestrator::Orchestrator;
pub use provision::CertificateProvisioner;
pub use store::KeyMaterialStore;
pub use telemetry::TelemetryClient;
pub use tls::ClientIdentity;
pub use types::{
    CredentialBundle, DeliveryOutcome, DeviceIdentity, KeyMaterial, Measurement, RunOutcome,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent string for HTTP requests.
pub const USER_AGENT: &str = concat!("iot-measure-client/", env!("CARGO_PKG_VERSION"));
