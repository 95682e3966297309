//! 模塊提供與 ACME 帳戶管理相關的功能：建立、查詢、更新聯絡資訊、金鑰輪替與停用。

use std::sync::{Arc, Mutex, OnceLock, RwLock};

use reqwest::{blocking::Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    jws::{Jws, JwsError, JwsSigner},
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    payload::{
        ContactUpdatePayload, DeactivatePayload, EmptyPayload, ExistingAccountPayload,
        KeyChangePayload, NewAccountPayload, PayloadT,
    },
    session::{Rejection, Session, SessionError},
    storage::StorageError,
};

/// 錯誤類型，用於描述在處理 ACME 帳戶相關操作時可能發生的各類錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Request header error: {0}")]
    RequestHeaderError(#[from] reqwest::header::ToStrError),
    #[error("Request failed: {status:?}, {headers:?}, {body:?}")]
    RequestErrorDetailed {
        status: StatusCode,
        headers: reqwest::header::HeaderMap,
        body: String,
    },
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("JWS error: {0}")]
    JwsError(#[from] JwsError),
    #[error("Key error: {0}")]
    KeyError(#[from] KeyError),
    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),
    #[error("Lock poisoned")]
    LockPoisoned,
}

impl From<Rejection> for AccountError {
    fn from(rejection: Rejection) -> Self {
        AccountError::RequestErrorDetailed {
            status: rejection.status,
            headers: rejection.headers,
            body: rejection.body,
        }
    }
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AccountError`].
pub type Result<T> = std::result::Result<T, AccountError>;

/// 帳戶私鑰在存儲中的位置。
pub const ACCOUNT_PRIVATE_KEY: &str = "account/private.pem";
/// 帳戶公鑰在存儲中的位置。
pub const ACCOUNT_PUBLIC_KEY: &str = "account/public.pem";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Pending,
    Valid,
    Deactivated,
    Revoked,
}

/// CA 回傳的帳戶資訊。只保留已知欄位，其餘欄位在反序列化時捨棄。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountResource {
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(rename = "initialIp", default)]
    pub initial_ip: Option<String>,
    #[serde(default)]
    pub orders: Option<String>,
}

impl AccountResource {
    /// 以 `other` 中有值的欄位覆寫自身。
    fn merge(&mut self, other: AccountResource) {
        if other.status.is_some() {
            self.status = other.status;
        }
        if !other.contact.is_empty() {
            self.contact = other.contact;
        }
        if other.created_at.is_some() {
            self.created_at = other.created_at;
        }
        if other.initial_ip.is_some() {
            self.initial_ip = other.initial_ip;
        }
        if other.orders.is_some() {
            self.orders = other.orders;
        }
    }
}

/// 去除空白與空值、去重並排序。
pub fn normalize_emails<S: AsRef<str>>(emails: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = emails
        .iter()
        .map(|e| e.as_ref().trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// ACME 帳戶。
///
/// 帳戶 URL 只查詢一次後快取；金鑰輪替期間其他請求仍可讀取舊金鑰，
/// 直到 CA 接受新金鑰後才替換。
#[derive(Debug)]
pub struct Account {
    session: Arc<Session>,
    url: OnceLock<String>,
    key_pair: RwLock<KeyPair>,
    resource: RwLock<AccountResource>,
    rotation: Mutex<()>,
}

impl Account {
    /// 載入或建立帳戶。
    ///
    /// 存儲中同時存在帳戶私鑰與公鑰時，以該金鑰取得既有帳戶；
    /// 否則清除殘缺的金鑰檔並建立新帳戶。
    ///
    /// # Errors
    ///
    /// 返回 [`AccountError`] 當存儲、簽名或 CA 請求失敗時。
    pub fn init(session: Arc<Session>) -> Result<Self> {
        let storage = session.storage();
        if storage.exists(ACCOUNT_PRIVATE_KEY)? && storage.exists(ACCOUNT_PUBLIC_KEY)? {
            let key_pair = KeyPair::from_storage(storage, ACCOUNT_PRIVATE_KEY)?;
            let account = Self::with_key(session, key_pair);
            account.get_account()?;
            info!(url = account.url.get().map(String::as_str), "Loaded existing account");
            return Ok(account);
        }

        storage.remove(ACCOUNT_PRIVATE_KEY)?;
        storage.remove(ACCOUNT_PUBLIC_KEY)?;
        Self::create_account(session)
    }

    fn with_key(session: Arc<Session>, key_pair: KeyPair) -> Self {
        Self {
            session,
            url: OnceLock::new(),
            key_pair: RwLock::new(key_pair),
            resource: RwLock::new(AccountResource::default()),
            rotation: Mutex::new(()),
        }
    }

    /// 以新的 RSA 金鑰註冊帳戶，並同意服務條款。成功後才寫入金鑰檔。
    pub fn create_account(session: Arc<Session>) -> Result<Self> {
        let key_pair = session.generate_key(KeyAlgorithm::Rsa)?;
        let url = session.directory().new_account.clone();

        let payload = NewAccountPayload::new(session.emails());
        let response = session.post_signed::<AccountError>(&url, || {
            Ok(session.signer().sign_with_jwk(&url, &payload, &key_pair)?)
        })?;

        if response.status() != StatusCode::CREATED {
            return Err(rejected(response));
        }
        let account_url = location(&response)?;

        key_pair.store(session.storage(), ACCOUNT_PRIVATE_KEY, ACCOUNT_PUBLIC_KEY)?;

        let account = Self::with_key(session, key_pair);
        let _ = account.url.set(account_url.clone());
        account.populate_from(response)?;

        info!(url = %account_url, "Created ACME account");
        Ok(account)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// 帳戶 URL。尚未知道時以 `onlyReturnExisting` 向 CA 查詢一次並快取。
    pub fn account_url(&self) -> Result<String> {
        if let Some(url) = self.url.get() {
            return Ok(url.clone());
        }

        let new_account = &self.session.directory().new_account;
        let response = self.session.post_signed::<AccountError>(new_account, || {
            let key_pair = self.read_key()?;
            Ok(self.session.signer().sign_with_jwk(
                new_account,
                &ExistingAccountPayload::default(),
                &key_pair,
            )?)
        })?;

        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }
        let url = location(&response)?;
        debug!(url, "Looked up account URL");

        Ok(self.url.get_or_init(|| url).clone())
    }

    /// 取得帳戶資訊並更新本地狀態。
    pub fn get_account(&self) -> Result<AccountResource> {
        let url = self.account_url()?;
        self.post_to_account(&url, &EmptyPayload::default())
    }

    /// 以新的聯絡信箱取代目前的設定。
    pub fn update_account_contact<S: AsRef<str>>(&self, emails: &[S]) -> Result<AccountResource> {
        let url = self.account_url()?;
        let resource =
            self.post_to_account(&url, &ContactUpdatePayload::new(&normalize_emails(emails)))?;
        info!(url, "Updated account contact");
        Ok(resource)
    }

    /// 輪替帳戶金鑰。
    ///
    /// 內層 JWS 由新金鑰以 `jwk` 形式簽署 `{account, oldKey}`，外層由舊金鑰以 `kid`
    /// 形式簽署。CA 回應 200 之後先替換記憶體中的金鑰，再寫入存儲；
    /// 寫入失敗時回傳錯誤，但記憶體中的新金鑰仍然有效。
    pub fn update_account_key(&self) -> Result<()> {
        let _rotation = self.rotation.lock().map_err(|_| AccountError::LockPoisoned)?;

        let url = self.account_url()?;
        let key_change = &self.session.directory().key_change;
        let new_key = self.session.generate_key(KeyAlgorithm::Rsa)?;

        let inner = JwsSigner::sign_inner_with_jwk(
            key_change,
            &KeyChangePayload::new(&url, self.read_key()?.jwk()?),
            &new_key,
        )?;
        let response = self.session.post_signed::<AccountError>(key_change, || {
            let old_key = self.read_key()?;
            Ok(self
                .session
                .signer()
                .sign_with_kid(key_change, &url, &inner, &old_key)?)
        })?;

        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }

        let stored = {
            let mut key_pair = self.key_pair.write().map_err(|_| AccountError::LockPoisoned)?;
            *key_pair = new_key;
            key_pair.store(
                self.session.storage(),
                ACCOUNT_PRIVATE_KEY,
                ACCOUNT_PUBLIC_KEY,
            )
        };
        if let Err(err) = stored {
            error!(url, error = %err, "CA accepted the new account key but storing it failed");
            return Err(err.into());
        }

        if let Err(err) = self.populate_from(response) {
            warn!(error = %err, "Key change response was not an account object");
        }
        info!(url, "Rotated account key");
        Ok(())
    }

    /// 停用帳戶，成功後刪除存儲中的帳戶金鑰。
    pub fn deactivate_account(&self) -> Result<AccountResource> {
        let url = self.account_url()?;
        let resource = self.post_to_account(&url, &DeactivatePayload::default())?;

        let storage = self.session.storage();
        storage.remove(ACCOUNT_PRIVATE_KEY)?;
        storage.remove(ACCOUNT_PUBLIC_KEY)?;

        info!(url, "Deactivated account");
        Ok(resource)
    }

    /// 目前已知的帳戶資訊。
    pub fn resource(&self) -> Result<AccountResource> {
        Ok(self
            .resource
            .read()
            .map_err(|_| AccountError::LockPoisoned)?
            .clone())
    }

    /// 帳戶金鑰的 RFC 7638 縮影。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.read_key()?.thumbprint()?)
    }

    /// 目前帳戶金鑰的複本。
    pub fn key_pair(&self) -> Result<KeyPair> {
        Ok(self.read_key()?.clone())
    }

    /// 以帳戶金鑰及帳戶 URL（`kid`）簽署請求。
    pub fn sign_with_kid<P: PayloadT>(&self, url: &str, payload: &P) -> Result<Jws> {
        let kid = self.account_url()?;
        let key_pair = self.read_key()?;
        Ok(self
            .session
            .signer()
            .sign_with_kid(url, &kid, payload, &key_pair)?)
    }

    fn read_key(&self) -> Result<std::sync::RwLockReadGuard<'_, KeyPair>> {
        self.key_pair.read().map_err(|_| AccountError::LockPoisoned)
    }

    fn post_to_account<P: PayloadT>(&self, url: &str, payload: &P) -> Result<AccountResource> {
        let response = self
            .session
            .post_signed(url, || self.sign_with_kid(url, payload))?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }
        self.populate_from(response)
    }

    fn populate_from(&self, response: Response) -> Result<AccountResource> {
        let update: AccountResource = serde_json::from_str(&response.text()?)?;
        let mut resource = self
            .resource
            .write()
            .map_err(|_| AccountError::LockPoisoned)?;
        resource.merge(update);
        Ok(resource.clone())
    }
}

fn location(response: &Response) -> Result<String> {
    Ok(response
        .headers()
        .get("Location")
        .ok_or_else(|| AccountError::RequestErrorDetailed {
            status: response.status(),
            headers: response.headers().clone(),
            body: "Location header not found".to_string(),
        })?
        .to_str()?
        .to_string())
}

fn rejected(response: Response) -> AccountError {
    let status = response.status();
    let headers = response.headers().clone();
    match response.text() {
        Ok(body) => AccountError::RequestErrorDetailed {
            status,
            headers,
            body,
        },
        Err(err) => AccountError::RequestError(err),
    }
}
