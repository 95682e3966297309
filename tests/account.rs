mod common;

use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use acme2::{
    account::{Account, AccountStatus, ACCOUNT_PRIVATE_KEY, ACCOUNT_PUBLIC_KEY},
    clock::FakeClock,
    jws::Jws,
    key_pair::KeyPair,
    session::BAD_NONCE_RETRIES,
    storage::{MemStorage, Storage, StorageError},
    AccountError,
};
use common::{builder, mock_directory, mock_new_account, TEST_RSA_BITS};
use serde_json::Value;

const BAD_NONCE: &str =
    r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has an invalid anti-replay nonce"}"#;

/// 外層以舊金鑰的 `kid` 簽署，payload 為新金鑰以 `jwk` 簽署、不含 nonce 的 `{account, oldKey}`。
fn is_key_rollover(body: &str, account_url: &str, old_jwk: &Value) -> bool {
    let Ok(outer) = serde_json::from_str::<Jws>(body) else {
        return false;
    };
    let (Ok(outer_header), Ok(inner)) = (outer.protected_header(), outer.decode_payload::<Jws>())
    else {
        return false;
    };
    let (Ok(inner_header), Ok(inner_payload)) =
        (inner.protected_header(), inner.decode_payload::<Value>())
    else {
        return false;
    };
    let Some(new_jwk) = inner_header.jwk.and_then(|jwk| serde_json::to_value(jwk).ok()) else {
        return false;
    };

    outer_header.kid.as_deref() == Some(account_url)
        && outer_header.jwk.is_none()
        && outer_header.nonce.is_some()
        && inner_header.kid.is_none()
        && inner_header.nonce.is_none()
        && inner_header.url == outer_header.url
        && inner_payload["account"] == account_url
        && &inner_payload["oldKey"] == old_jwk
        && &new_jwk != old_jwk
}

#[test]
fn test_account_lifecycle() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let new_account = mock_new_account(&mut server);
    let account_object = server
        .mock("POST", "/acct/1")
        .with_status(200)
        .with_body(r#"{"status":"valid","contact":["mailto:ops@example.com"],"orders":"https://ca/acct/1/orders"}"#)
        .expect(3)
        .create();

    let storage = Arc::new(MemStorage::new());
    let account = builder(&server, storage.clone(), Arc::new(FakeClock::new()))
        .connect()
        .unwrap();
    new_account.assert();

    let account_url = format!("{}/acct/1", server.url());
    let old_jwk = serde_json::to_value(account.key_pair().unwrap().jwk().unwrap()).unwrap();
    let key_change = server
        .mock("POST", "/key-change")
        .match_request(move |request| {
            request
                .utf8_lossy_body()
                .is_ok_and(|body| is_key_rollover(&body, &account_url, &old_jwk))
        })
        .with_status(200)
        .with_body(r#"{"status":"valid"}"#)
        .create();

    assert_eq!(
        account.account_url().unwrap(),
        format!("{}/acct/1", server.url())
    );
    assert!(storage.exists(ACCOUNT_PRIVATE_KEY).unwrap());
    assert!(storage.exists(ACCOUNT_PUBLIC_KEY).unwrap());
    assert_eq!(
        account.resource().unwrap().initial_ip.as_deref(),
        Some("127.0.0.1")
    );

    let resource = account.get_account().unwrap();
    assert_eq!(resource.status, Some(AccountStatus::Valid));

    let resource = account
        .update_account_contact(&["ops@example.com", " ", "ops@example.com"])
        .unwrap();
    assert_eq!(resource.contact, vec!["mailto:ops@example.com"]);
    assert_eq!(
        resource.orders.as_deref(),
        Some("https://ca/acct/1/orders")
    );

    let old_thumbprint = account.thumbprint().unwrap();
    let old_pem = storage.read_file(ACCOUNT_PRIVATE_KEY).unwrap();
    account.update_account_key().unwrap();
    key_change.assert();
    assert_ne!(account.thumbprint().unwrap(), old_thumbprint);
    assert_ne!(storage.read_file(ACCOUNT_PRIVATE_KEY).unwrap(), old_pem);

    account.deactivate_account().unwrap();
    account_object.assert();
    assert!(!storage.exists(ACCOUNT_PRIVATE_KEY).unwrap());
    assert!(!storage.exists(ACCOUNT_PUBLIC_KEY).unwrap());
}

#[test]
fn test_init_uses_stored_key() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let lookup = server
        .mock("POST", "/new-acct")
        .with_status(200)
        .with_header("Location", &format!("{}/acct/9", server.url()))
        .with_body(r#"{"status":"valid"}"#)
        .create();
    let account_object = server
        .mock("POST", "/acct/9")
        .with_status(200)
        .with_body(r#"{"status":"valid","contact":[]}"#)
        .create();

    let storage = Arc::new(MemStorage::new());
    let key_pair = KeyPair::generate_rsa(TEST_RSA_BITS).unwrap();
    key_pair
        .store(storage.as_ref(), ACCOUNT_PRIVATE_KEY, ACCOUNT_PUBLIC_KEY)
        .unwrap();

    let account = builder(&server, storage, Arc::new(FakeClock::new()))
        .connect()
        .unwrap();

    lookup.assert();
    account_object.assert();
    assert_eq!(
        account.thumbprint().unwrap(),
        key_pair.thumbprint().unwrap()
    );
    assert_eq!(
        account.account_url().unwrap(),
        format!("{}/acct/9", server.url())
    );
}

#[test]
fn test_partial_key_material_is_replaced() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let new_account = mock_new_account(&mut server);

    let storage = Arc::new(MemStorage::new());
    storage
        .write_file(ACCOUNT_PRIVATE_KEY, b"orphaned private key")
        .unwrap();

    let session = builder(&server, storage.clone(), Arc::new(FakeClock::new()))
        .build()
        .unwrap();
    let account = Account::init(session).unwrap();

    new_account.assert();
    let stored = KeyPair::from_storage(storage.as_ref(), ACCOUNT_PRIVATE_KEY).unwrap();
    assert_eq!(
        stored.thumbprint().unwrap(),
        account.thumbprint().unwrap()
    );
}

#[test]
fn test_rejected_registration_carries_ca_body() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let _new_account = server
        .mock("POST", "/new-acct")
        .with_status(400)
        .with_body(r#"{"type":"urn:ietf:params:acme:error:invalidContact","detail":"bad"}"#)
        .create();

    let storage = Arc::new(MemStorage::new());
    let err = builder(&server, storage.clone(), Arc::new(FakeClock::new()))
        .connect()
        .unwrap_err();

    match err {
        AccountError::RequestErrorDetailed { status, body, .. } => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("invalidContact"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!storage.exists(ACCOUNT_PRIVATE_KEY).unwrap());
}

#[test]
fn test_bad_nonce_is_retried_with_new_signature() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let bad_nonce = server
        .mock("POST", "/new-acct")
        .with_status(400)
        .with_header("content-type", "application/problem+json")
        .with_body(BAD_NONCE)
        .expect(1)
        .create();
    let new_account = mock_new_account(&mut server);

    let account = builder(&server, Arc::new(MemStorage::new()), Arc::new(FakeClock::new()))
        .connect()
        .unwrap();

    bad_nonce.assert();
    new_account.assert();
    assert_eq!(
        account.account_url().unwrap(),
        format!("{}/acct/1", server.url())
    );
}

#[test]
fn test_bad_nonce_retries_are_bounded() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let bad_nonce = server
        .mock("POST", "/new-acct")
        .with_status(400)
        .with_body(BAD_NONCE)
        .expect(BAD_NONCE_RETRIES as usize + 1)
        .create();

    let err = builder(&server, Arc::new(MemStorage::new()), Arc::new(FakeClock::new()))
        .connect()
        .unwrap_err();

    bad_nonce.assert();
    match err {
        AccountError::RequestErrorDetailed { status, body, .. } => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("badNonce"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// 可在指定時機讓帳戶公鑰寫入失敗的存儲。
#[derive(Debug, Default)]
struct FailingPublicKeyStorage {
    inner: MemStorage,
    fail: AtomicBool,
}

impl Storage for FailingPublicKeyStorage {
    fn create_dir_all(&self, key: &str) -> Result<(), StorageError> {
        self.inner.create_dir_all(key)
    }

    fn read_file(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read_file(key)
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if key == ACCOUNT_PUBLIC_KEY && self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("disk full")));
        }
        self.inner.write_file(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key)
    }

    fn is_dir(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.is_dir(key)
    }

    fn path_of(&self, key: &str) -> Option<PathBuf> {
        self.inner.path_of(key)
    }
}

#[test]
fn test_rotated_key_is_used_even_if_storing_fails() {
    let mut server = mockito::Server::new();
    let _dir = mock_directory(&mut server);
    let _new_account = mock_new_account(&mut server);

    let storage = Arc::new(FailingPublicKeyStorage::default());
    let account = builder(&server, storage.clone(), Arc::new(FakeClock::new()))
        .connect()
        .unwrap();
    let key_change = server
        .mock("POST", "/key-change")
        .with_status(200)
        .with_body(r#"{"status":"valid"}"#)
        .create();

    let old_thumbprint = account.thumbprint().unwrap();
    storage.fail.store(true, Ordering::SeqCst);
    let err = account.update_account_key().unwrap_err();

    key_change.assert();
    assert!(matches!(err, AccountError::KeyError(_)));
    let new_thumbprint = account.thumbprint().unwrap();
    assert_ne!(new_thumbprint, old_thumbprint);
    let stored = KeyPair::from_storage(storage.as_ref(), ACCOUNT_PRIVATE_KEY).unwrap();
    assert_eq!(stored.thumbprint().unwrap(), new_thumbprint);
}
