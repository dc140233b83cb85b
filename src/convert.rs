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

//! Conversion of the password-protected device key into a plaintext key.
//!
//! The identity service hands out the private key encrypted with a one-time
//! passphrase. TLS client authentication needs it decrypted, so the key is
//! run through a [`KeyConverter`] engine once after provisioning.
//!
//! Two engines are provided:
//!
//! - [`OpensslKeyConverter`]: in-process, via the `openssl` crate (default)
//! - [`OpensslCommandConverter`]: runs the `openssl rsa` command
//!
//! Both report a diagnostic line the way `openssl rsa` does. A conversion
//! only counts as successful when that line is exactly [`SUCCESS_MARKER`].
//!
//! # Example
//!
//! ```no_run
//! use iot_measure_client::convert::CredentialConverter;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let converter = CredentialConverter::native();
//! let material = converter
//!     .convert(Path::new("cert.pem"), "passphrase", Path::new("certificateD1.key"))
//!     .await?;
//! println!("key written to {}", material.private_key_file.display());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use openssl::rsa::Rsa;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Result, TelemetryError};
use crate::store::write_atomic;
use crate::tls::parse_pem_private_key;
use crate::types::KeyMaterial;

/// Diagnostic reported by an engine after converting an RSA key.
pub const SUCCESS_MARKER: &str = "writing RSA key";

/// Environment variable carrying the passphrase to the `openssl` child process.
const PASSPHRASE_ENV: &str = "IOT_MEASURE_KEY_PASSPHRASE";

/// Output of a [`KeyConverter`].
#[derive(Clone)]
pub struct ConvertedKey {
    /// Unencrypted private key, PEM-encoded. Empty when the conversion failed.
    pub pem: Vec<u8>,

    /// Diagnostic line reported by the engine.
    pub diagnostic: String,
}

impl ConvertedKey {
    /// Returns true if the engine reported the success marker.
    pub fn is_success(&self) -> bool {
        self.diagnostic.trim() == SUCCESS_MARKER
    }
}

impl std::fmt::Debug for ConvertedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvertedKey")
            .field("pem", &format_args!("{} bytes", self.pem.len()))
            .field("diagnostic", &self.diagnostic)
            .finish()
    }
}

/// Engine that decrypts a password-protected private key.
#[async_trait]
pub trait KeyConverter: Send + Sync {
    /// Decrypt the first private key in `encrypted_pem` with `passphrase`.
    ///
    /// A key that cannot be decrypted is reported through
    /// [`ConvertedKey::diagnostic`]; `Err` is reserved for failures of the
    /// engine itself.
    async fn convert(&self, encrypted_pem: &[u8], passphrase: &str) -> Result<ConvertedKey>;

    /// Short engine name for logging.
    fn name(&self) -> &'static str;
}

/// In-process engine backed by the `openssl` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpensslKeyConverter;

impl OpensslKeyConverter {
    /// Create a new in-process converter.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KeyConverter for OpensslKeyConverter {
    async fn convert(&self, encrypted_pem: &[u8], passphrase: &str) -> Result<ConvertedKey> {
        let converted = Rsa::private_key_from_pem_passphrase(encrypted_pem, passphrase.as_bytes())
            .and_then(|rsa| rsa.private_key_to_pem());

        Ok(match converted {
            Ok(pem) => ConvertedKey {
                pem,
                diagnostic: SUCCESS_MARKER.to_string(),
            },
            Err(stack) => ConvertedKey {
                pem: Vec::new(),
                diagnostic: format!("unable to load private key: {}", stack),
            },
        })
    }

    fn name(&self) -> &'static str {
        "openssl"
    }
}

/// Engine that runs `openssl rsa` as a child process.
///
/// The key is passed on stdin and the passphrase through the child's
/// environment, so neither shows up in the process list.
#[derive(Debug, Clone)]
pub struct OpensslCommandConverter {
    program: PathBuf,
}

impl Default for OpensslCommandConverter {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl OpensslCommandConverter {
    /// Use the given `openssl` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl KeyConverter for OpensslCommandConverter {
    async fn convert(&self, encrypted_pem: &[u8], passphrase: &str) -> Result<ConvertedKey> {
        tracing::debug!("Running {} rsa", self.program.display());

        let mut child = Command::new(&self.program)
            .args(["rsa", "-passin"])
            .arg(format!("env:{}", PASSPHRASE_ENV))
            .env(PASSPHRASE_ENV, passphrase)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TelemetryError::conversion(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TelemetryError::conversion("openssl stdin unavailable"))?;
        stdin.write_all(encrypted_pem).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;

        Ok(ConvertedKey {
            pem: output.stdout,
            diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "openssl-cli"
    }
}

/// Turns the issued certificate file into a plaintext key file.
#[derive(Clone)]
pub struct CredentialConverter {
    engine: Arc<dyn KeyConverter>,
}

impl std::fmt::Debug for CredentialConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConverter")
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl CredentialConverter {
    /// Create a converter using the given engine.
    pub fn new(engine: impl KeyConverter + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    /// Create a converter using the in-process engine.
    pub fn native() -> Self {
        Self::new(OpensslKeyConverter::new())
    }

    /// Decrypt the key in `certificate_file` and write it to `output_key_file`.
    ///
    /// The certificate file is left in place.
    ///
    /// # Errors
    ///
    /// - [`TelemetryError::MissingCertificate`] if `certificate_file` does not exist
    /// - [`TelemetryError::Conversion`] if the engine does not report
    ///   [`SUCCESS_MARKER`] or its output is not a private key; no key file
    ///   is written in that case
    pub async fn convert(
        &self,
        certificate_file: &Path,
        passphrase: &str,
        output_key_file: &Path,
    ) -> Result<KeyMaterial> {
        if !certificate_file.is_file() {
            return Err(TelemetryError::MissingCertificate(
                certificate_file.to_path_buf(),
            ));
        }

        tracing::debug!(
            "Converting {} with {}",
            certificate_file.display(),
            self.engine.name()
        );

        let encrypted = tokio::fs::read(certificate_file).await?;
        let converted = self.engine.convert(&encrypted, passphrase).await?;

        if !converted.is_success() {
            tracing::error!("{} conversion failed", self.engine.name());
            return Err(TelemetryError::conversion(converted.diagnostic));
        }

        parse_pem_private_key(&converted.pem).map_err(|e| {
            TelemetryError::conversion(format!("engine output is not a private key: {}", e))
        })?;

        write_atomic(output_key_file, &converted.pem)?;
        tracing::info!("Conversion to key file {} successful", output_key_file.display());

        Ok(KeyMaterial {
            certificate_file: certificate_file.to_path_buf(),
            private_key_file: output_key_file.to_path_buf(),
        })
    }
}
