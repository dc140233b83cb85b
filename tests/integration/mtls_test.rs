//! Delivery against a TLS server that requires a client certificate

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use iot_measure_client::tls::{
    build_http_client, certificate_blocks, parse_pem_certificates, parse_pem_private_key,
};
use iot_measure_client::{ClientConfig, DeliveryOutcome, DeviceIdentity, TelemetryClient};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    DigitallySignedStruct, DistinguishedName, ServerConfig, ServerConnection, SignatureScheme,
    StreamOwned,
};
use serde_json::json;
use tempfile::tempdir;

use crate::integration::{
    fixtures, install_key_material, CAPABILITY_ALTERNATE_ID, DEVICE_ALTERNATE_ID, DEVICE_ID,
    SECRET, SENSOR_ALTERNATE_ID,
};

type Presented = Arc<Mutex<Option<Vec<u8>>>>;

/// Requires a client certificate and records it; the chain itself is not checked.
#[derive(Debug)]
struct RecordingVerifier {
    provider: Arc<CryptoProvider>,
    presented: Presented,
}

impl ClientCertVerifier for RecordingVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        *self.presented.lock().unwrap() = Some(end_entity.to_vec());
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Serve a single HTTPS request with 200, returning the port and the raw request.
fn spawn_server(presented: Presented) -> (u16, JoinHandle<Option<Vec<u8>>>) {
    let (cert_pem, key_pem) = fixtures::server_identity();
    let certs = parse_pem_certificates(&cert_pem).unwrap();
    let key = parse_pem_private_key(&key_pem).unwrap();

    let provider = Arc::new(ring::default_provider());
    let verifier = RecordingVerifier {
        provider: provider.clone(),
        presented,
    };
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(certs, key)
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().ok()?;
        let conn = ServerConnection::new(Arc::new(config)).ok()?;
        let mut stream = StreamOwned::new(conn, tcp);

        let request = read_request(&mut stream).ok()?;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .ok()?;
        stream.conn.send_close_notify();
        let _ = stream.flush();
        Some(request)
    });

    (port, handle)
}

fn read_request(stream: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(request);
        }
        request.extend_from_slice(&chunk[..n]);

        if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= end + 4 + body_len {
                return Ok(request);
            }
        }
    }
}

fn config(port: u16, dir: &std::path::Path) -> ClientConfig {
    ClientConfig::builder()
        .instance(format!("https://127.0.0.1:{}", port))
        .unwrap()
        .trust_any_insecure()
        .work_dir(dir)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_device_certificate_is_presented() {
    let dir = tempdir().unwrap();
    let device = fixtures::device_credentials(DEVICE_ALTERNATE_ID, SECRET);
    let material = install_key_material(dir.path(), DEVICE_ALTERNATE_ID, &device);

    let presented = Presented::default();
    let (port, server) = spawn_server(presented.clone());

    let client = TelemetryClient::new(config(port, dir.path()), &material).unwrap();
    let identity = DeviceIdentity::new(
        DEVICE_ID,
        DEVICE_ALTERNATE_ID,
        SENSOR_ALTERNATE_ID,
        CAPABILITY_ALTERNATE_ID,
    );
    let outcome = client
        .post(&identity, &identity.measurement(vec![json!("21.5")]))
        .await
        .expect("Post failed");

    assert_eq!(outcome, DeliveryOutcome::Delivered);

    let request = server.join().unwrap().expect("server saw no request");
    let request = String::from_utf8_lossy(&request);
    assert!(request.starts_with("POST /iot/gateway/rest/measures/D1 "));
    assert!(request.contains("\"measures\":[\"21.5\"]"));

    let expected = parse_pem_certificates(certificate_blocks(&device.issued_pem).as_bytes())
        .unwrap()
        .remove(0);
    let presented = presented.lock().unwrap().clone();
    assert_eq!(presented.as_deref(), Some(expected.as_ref()));
}

#[tokio::test]
async fn test_handshake_fails_without_client_certificate() {
    let dir = tempdir().unwrap();
    let presented = Presented::default();
    let (port, server) = spawn_server(presented.clone());

    let config = config(port, dir.path());
    let http = build_http_client(&config, None).unwrap();
    let url = config.measures_url(DEVICE_ALTERNATE_ID).unwrap();

    let result = http.post(url).body("{}").send().await;

    assert!(result.is_err(), "expected TLS failure, got {:?}", result);
    assert!(server.join().unwrap().is_none());
    assert!(presented.lock().unwrap().is_none());
}
