#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use acme2::{
    clock::FakeClock,
    nonce::RetryPolicy,
    probe::{ChallengeProbe, ProbeError},
    storage::Storage,
    SessionBuilder,
};
use mockito::{Mock, Server};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    x509::{X509NameBuilder, X509},
};
use tracing_subscriber::EnvFilter;

pub const TEST_RSA_BITS: u32 = 2048;

/// 只回覆預先設定結果、並記錄被查詢內容的預檢器。
#[derive(Debug)]
pub struct ScriptedProbe {
    ready: bool,
    pub checks: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn ready() -> Self {
        Self {
            ready: true,
            checks: Mutex::new(Vec::new()),
        }
    }

    pub fn never_ready() -> Self {
        Self {
            ready: false,
            checks: Mutex::new(Vec::new()),
        }
    }
}

impl ChallengeProbe for ScriptedProbe {
    fn check_http(&self, domain: &str, token: &str, expected: &str) -> Result<bool, ProbeError> {
        self.checks
            .lock()
            .unwrap()
            .push(format!("http {domain} {token} {expected}"));
        Ok(self.ready)
    }

    fn check_dns(&self, domain: &str, expected: &str) -> Result<bool, ProbeError> {
        self.checks
            .lock()
            .unwrap()
            .push(format!("dns {domain} {expected}"));
        Ok(self.ready)
    }
}

/// 目錄與 nonce 端點。
pub fn mock_directory(server: &mut Server) -> (Mock, Mock) {
    let base = server.url();
    let directory = server
        .mock("GET", "/directory")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"newAccount":"{b}/new-acct","newNonce":"{b}/new-nonce","newOrder":"{b}/new-order","keyChange":"{b}/key-change","revokeCert":"{b}/revoke-cert","meta":{{"termsOfService":"{b}/tos"}}}}"#,
            b = base
        ))
        .create();
    let nonce = server
        .mock("HEAD", "/new-nonce")
        .with_status(200)
        .with_header("Replay-Nonce", "test-nonce")
        .expect_at_least(1)
        .create();
    (directory, nonce)
}

/// 以 201 建立帳戶 `/acct/1`。
pub fn mock_new_account(server: &mut Server) -> Mock {
    server
        .mock("POST", "/new-acct")
        .match_header("content-type", "application/jose+json")
        .with_status(201)
        .with_header("Location", &format!("{}/acct/1", server.url()))
        .with_body(r#"{"status":"valid","contact":["mailto:admin@example.com"],"createdAt":"2024-01-01T00:00:00Z","initialIp":"127.0.0.1","key":{"kty":"RSA"}}"#)
        .create()
}

/// 以 `RUST_LOG` 控制測試輸出的日誌。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn builder(server: &Server, storage: Arc<dyn Storage>, clock: Arc<FakeClock>) -> SessionBuilder {
    init_tracing();
    acme2::Session::builder()
        .directory_url(format!("{}/directory", server.url()))
        .emails(["admin@example.com"])
        .storage(storage)
        .clock(clock)
        .nonce_retry(RetryPolicy::new(std::time::Duration::from_secs(1), 2))
        .rsa_key_bits(TEST_RSA_BITS)
}

/// 自簽 EC 憑證（PEM），有效期間為 `[not_before, not_after]`（Unix 秒）。
pub fn self_signed_pem(cn: &str, not_before: i64, not_after: i64) -> String {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&BigNum::from_u32(7).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(not_before).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(not_after).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
}
