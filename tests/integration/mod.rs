//! Integration test utilities and helpers
//!
//! Mock IoT instance setup and runtime-generated device credentials.

mod mtls_test;

use std::path::Path;
use std::time::Duration;

use iot_measure_client::{ClientConfig, KeyMaterial, KeyMaterialStore};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DEVICE_ID: &str = "1001";
pub const DEVICE_ALTERNATE_ID: &str = "D1";
pub const SENSOR_ALTERNATE_ID: &str = "S1";
pub const CAPABILITY_ALTERNATE_ID: &str = "C1";
pub const SECRET: &str = "p@ss";

pub fn certificate_path(device_id: &str) -> String {
    format!(
        "/iot/core/api/v1/devices/{}/authentications/clientCertificate/pem",
        device_id
    )
}

pub fn measures_path(device_alternate_id: &str) -> String {
    format!("/iot/gateway/rest/measures/{}", device_alternate_id)
}

/// Mock IoT instance serving both the identity and the ingestion endpoints
pub struct MockIotServer {
    server: MockServer,
}

impl MockIotServer {
    /// Start a new mock instance
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL of the mock instance
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// The inner MockServer, for custom mocks
    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    /// Client configuration pointing at this instance, storing files in `dir`
    pub fn config(&self, dir: &Path) -> ClientConfig {
        ClientConfig::builder()
            .instance(self.url())
            .expect("Valid URL")
            .http_auth("user", "pass")
            .work_dir(dir)
            .timeout(Duration::from_secs(5))
            .retry_interval(Duration::from_millis(10))
            .build()
            .expect("Valid config")
    }

    /// Serve a credential bundle for the device
    pub async fn mock_certificate_bundle(&self, device_id: &str, pem: &str, secret: &str) {
        Mock::given(method("GET"))
            .and(path(certificate_path(device_id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "secret": secret, "pem": pem })),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer the certificate endpoint with an arbitrary status and body
    pub async fn mock_certificate_response(&self, device_id: &str, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path(certificate_path(device_id)))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Answer the measures endpoint with `status`, at most `times` times if given
    pub async fn mock_measures(&self, device_alternate_id: &str, status: u16, times: Option<u64>) {
        let mut mock = Mock::given(method("POST"))
            .and(path(measures_path(device_alternate_id)))
            .respond_with(ResponseTemplate::new(status).set_body_string(format!("status {}", status)));
        if let Some(n) = times {
            mock = mock.up_to_n_times(n);
        }
        mock.mount(&self.server).await;
    }

    /// Number of requests received on `request_path`
    pub async fn request_count(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }
}

/// Test fixture helpers
pub mod fixtures {
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::symm::Cipher;
    use openssl::x509::{X509Builder, X509NameBuilder};

    /// Device credentials as the identity service would issue them
    pub struct DeviceCredentials {
        /// Encrypted private key followed by the certificate
        pub issued_pem: String,
        /// The same private key, unencrypted
        pub plain_key_pem: Vec<u8>,
    }

    /// Generate an RSA key and self-signed certificate for `common_name`
    pub fn device_credentials(common_name: &str, secret: &str) -> DeviceCredentials {
        let rsa = Rsa::generate(2048).expect("RSA key generation");
        let plain_key_pem = rsa.private_key_to_pem().expect("PEM encoding");
        let encrypted_key_pem = rsa
            .private_key_to_pem_passphrase(Cipher::aes_256_cbc(), secret.as_bytes())
            .expect("PEM encryption");

        let pkey = PKey::from_rsa(rsa).expect("PKey");
        let cert_pem = self_signed(&pkey, common_name);

        let mut issued_pem = String::from_utf8(encrypted_key_pem).unwrap();
        issued_pem.push_str(std::str::from_utf8(&cert_pem).unwrap());

        DeviceCredentials {
            issued_pem,
            plain_key_pem,
        }
    }

    /// Certificate and PKCS#8 key for a TLS test server
    pub fn server_identity() -> (Vec<u8>, Vec<u8>) {
        let pkey = PKey::from_rsa(Rsa::generate(2048).expect("RSA key generation")).unwrap();
        let key_pem = pkey.private_key_to_pem_pkcs8().expect("PEM encoding");
        (self_signed(&pkey, "localhost"), key_pem)
    }

    fn self_signed(pkey: &PKey<Private>, common_name: &str) -> Vec<u8> {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder.sign(pkey, MessageDigest::sha256()).unwrap();
        builder.build().to_pem().unwrap()
    }
}

/// Put already-provisioned key material for `device_alternate_id` into `dir`
pub fn install_key_material(
    dir: &Path,
    device_alternate_id: &str,
    credentials: &fixtures::DeviceCredentials,
) -> KeyMaterial {
    let store = KeyMaterialStore::new(dir, "cert.pem");
    store
        .write_certificate(credentials.issued_pem.as_bytes())
        .expect("write certificate");
    store
        .write_private_key(device_alternate_id, &credentials.plain_key_pem)
        .expect("write key");
    store.key_material(device_alternate_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let mock_server = MockIotServer::start().await;
        assert!(mock_server.url().starts_with("http://"));
    }

    #[test]
    fn test_fixture_contains_key_and_certificate() {
        let credentials = fixtures::device_credentials("D1", SECRET);
        assert!(credentials.issued_pem.contains("ENCRYPTED"));
        assert!(credentials.issued_pem.contains("-----BEGIN CERTIFICATE-----"));
    }
}
