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

//! On-disk certificate and key storage.
//!
//! The certificate file has a fixed name; the decrypted key file is named
//! after the device's alternate ID (`certificate{alternate_id}.key`). Both
//! live in the configured working directory and survive across runs.
//!
//! Writes go through a temporary file in the same directory that is
//! renamed into place, so a concurrent reader never sees a partial file and
//! an interrupted write leaves nothing behind.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::types::KeyMaterial;

/// Path resolution, presence checks and atomic persistence for key material.
#[derive(Debug, Clone)]
pub struct KeyMaterialStore {
    dir: PathBuf,
    certificate_file_name: String,
}

impl KeyMaterialStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, certificate_file_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            certificate_file_name: certificate_file_name.into(),
        }
    }

    /// Create a store from the client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.work_dir, &config.certificate_file_name)
    }

    /// Directory holding the files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the certificate file.
    pub fn certificate_path(&self) -> PathBuf {
        self.dir.join(&self.certificate_file_name)
    }

    /// Path of the decrypted key file for a device.
    pub fn private_key_path(&self, device_alternate_id: &str) -> PathBuf {
        self.dir.join(format!("certificate{}.key", device_alternate_id))
    }

    /// Both paths for a device.
    pub fn key_material(&self, device_alternate_id: &str) -> KeyMaterial {
        KeyMaterial {
            certificate_file: self.certificate_path(),
            private_key_file: self.private_key_path(device_alternate_id),
        }
    }

    /// Returns true iff the device's key file is present and non-empty.
    pub fn exists(&self, device_alternate_id: &str) -> bool {
        fs::metadata(self.private_key_path(device_alternate_id))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Delete the device's key file, forcing provisioning on the next run.
    ///
    /// A missing file is not an error.
    pub fn remove(&self, device_alternate_id: &str) -> Result<()> {
        let path = self.private_key_path(device_alternate_id);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!("Removed key file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the certificate file as issued, replacing any previous one.
    pub fn write_certificate(&self, pem: &[u8]) -> Result<PathBuf> {
        let path = self.certificate_path();
        write_atomic(&path, pem)?;
        Ok(path)
    }

    /// Write the decrypted key file for a device.
    pub fn write_private_key(&self, device_alternate_id: &str, pem: &[u8]) -> Result<PathBuf> {
        let path = self.private_key_path(device_alternate_id);
        write_atomic(&path, pem)?;
        Ok(path)
    }
}

/// Write `data` to `path` through a temporary sibling file and rename it
/// into place. The file is readable by its owner only.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    set_owner_only(tmp.path())?;
    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

fn set_owner_only(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
