//! Shared test infrastructure for integration tests
//!
//! Spawns a real `s3_core` binary against a scratch storage root and
//! seeds it with a deterministic access/secret key pair so an
//! `aws-sdk-s3` client can sign requests it will actually accept.

#![allow(dead_code)]

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;

/// Port counter to avoid conflicts between tests run in the same process.
static PORT_COUNTER: AtomicU16 = AtomicU16::new(19000);

/// Seed credentials every `TestServer` is started with.
pub const ACCESS_KEY: &str = "AKIATESTACCESSKEY0001";
pub const SECRET_KEY: &str = "testSecretKeyUsedOnlyByIntegrationTests0001";

/// Test server wrapper that spawns a real `s3_core` binary as a subprocess.
pub struct TestServer {
    process: Child,
    port: u16,
    _storage_root: TempDir,
}

impl TestServer {
    /// Start a server bound to a fresh scratch storage root.
    pub async fn start() -> Self {
        let port = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
        let storage_root = TempDir::new().expect("failed to create temp storage root");

        let process = Command::new(env!("CARGO_BIN_EXE_s3_core"))
            .env("S3_CORE_LISTEN_ADDR", format!("127.0.0.1:{port}"))
            .env("S3_CORE_STORAGE_ROOT", storage_root.path())
            .env("MINIO_ACCESS_KEY", ACCESS_KEY)
            .env("MINIO_SECRET_KEY", SECRET_KEY)
            .env("RUST_LOG", "s3_core=warn")
            .spawn()
            .expect("failed to start s3_core server");

        let mut server = Self {
            process,
            port,
            _storage_root: storage_root,
        };
        server.wait_ready().await;
        server
    }

    async fn wait_ready(&mut self) {
        let addr = format!("127.0.0.1:{}", self.port);
        for _ in 0..150 {
            if std::net::TcpStream::connect(&addr).is_ok() {
                sleep(Duration::from_millis(50)).await;
                return;
            }

            if let Ok(Some(status)) = self.process.try_wait() {
                panic!("server exited before becoming ready: {status}");
            }

            sleep(Duration::from_millis(100)).await;
        }

        let _ = self.process.kill();
        panic!("timed out waiting for server on {addr}");
    }

    /// Create an S3 client configured to sign against this server's seeded
    /// credentials.
    pub async fn client(&self) -> Client {
        let credentials = Credentials::new(ACCESS_KEY, SECRET_KEY, None, None, "test");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(self.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Client::from_conf(config)
    }

    /// Create an S3 client signing with the wrong secret key, to exercise
    /// auth failure paths.
    pub async fn client_with_bad_credentials(&self) -> Client {
        let credentials = Credentials::new(ACCESS_KEY, "wrong-secret-key-entirely", None, None, "test");

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(self.endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Client::from_conf(config)
    }

    /// Get the HTTP endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.process.kill();
    }
}

/// Generate deterministic binary data of the given size.
pub fn generate_bytes(size: usize, seed: u64) -> Vec<u8> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    data
}

/// Minimal SigV4 signer for `error_test.rs`'s raw-`reqwest` assertions,
/// where `aws-sdk-s3` parses error bodies into modeled errors instead of
/// handing back the raw XML we want to inspect. Covers only what those
/// tests need: empty-body GET/HEAD/POST requests with no query string
/// beyond what's passed in.
pub mod sigv4 {
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};

    type HmacSha256 = Hmac<Sha256>;

    const EMPTY_BODY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Returns `(Authorization, x-amz-date, x-amz-content-sha256)` header
    /// values for a request with an empty body.
    pub fn sign_empty_body(
        access_key: &str,
        secret_key: &str,
        method: &str,
        uri_path: &str,
        raw_query: &str,
        host: &str,
    ) -> (String, String, String) {
        let amz_date = "20240101T000000Z";
        let date_stamp = "20240101";
        let region = "us-east-1";
        let service = "s3";

        let canonical_headers = format!("host:{host}\nx-amz-content-sha256:{EMPTY_BODY_SHA256}\nx-amz-date:{amz_date}\n");
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{method}\n{uri_path}\n{raw_query}\n{canonical_headers}\n{signed_headers}\n{EMPTY_BODY_SHA256}"
        );
        let scope = format!("{date_stamp}/{region}/{service}/aws4_request");
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, region.as_bytes());
        let k_service = hmac_sha256(&k_region, service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={access_key}/{scope}, SignedHeaders={signed_headers}, Signature={signature}"
        );
        (authorization, amz_date.to_string(), EMPTY_BODY_SHA256.to_string())
    }
}
