//! 工作階段：一次 ACME 互動所共用的 HTTP 客戶端、目錄、nonce 來源、時鐘與存儲。

use std::{env, fmt, path::PathBuf, sync::Arc};

use reqwest::{
    blocking::{Client, Response},
    header::{HeaderMap, CONTENT_TYPE},
    StatusCode,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::{normalize_emails, Account, AccountError},
    clock::{Clock, SystemClock},
    directory::{Directory, DirectoryError},
    jws::{Jws, JwsError, JwsSigner},
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    nonce::{Nonce, RetryPolicy},
    probe::{ChallengeProbe, WebProbe},
    storage::{FileStorage, Storage, StorageError},
};

/// 收到 `badNonce` 後以新 nonce 重新簽名的次數上限。
pub const BAD_NONCE_RETRIES: u32 = 3;

/// CA 以 4xx/5xx 拒絕、且本文已被讀取的回應。各模組將其轉為自己的
/// `RequestErrorDetailed`。
#[derive(Debug)]
pub struct Rejection {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Rejection {
    /// RFC 8555 §6.5：CA 以 400 與 `urn:ietf:params:acme:error:badNonce` 拒絕過期或重複的 nonce。
    pub fn is_bad_nonce(&self) -> bool {
        self.status == StatusCode::BAD_REQUEST
            && serde_json::from_str::<serde_json::Value>(&self.body)
                .ok()
                .and_then(|problem| problem.get("type")?.as_str().map(str::to_owned))
                .is_some_and(|kind| kind.ends_with(":badNonce"))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// 已解析目錄的工作階段。可在多個執行緒間以 `&Session` 或 `Arc<Session>` 共用。
pub struct Session {
    client: Client,
    directory: Directory,
    nonce: Nonce,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn ChallengeProbe>,
    storage: Arc<dyn Storage>,
    emails: Vec<String>,
    rsa_key_bits: u32,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("directory", &self.directory)
            .field("emails", &self.emails)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    pub fn probe(&self) -> &dyn ChallengeProbe {
        &*self.probe
    }

    pub fn storage(&self) -> &dyn Storage {
        &*self.storage
    }

    /// 已去除空值、去重並排序的聯絡信箱。
    pub fn emails(&self) -> &[String] {
        &self.emails
    }

    /// 每次簽名都向 new-nonce 取得新 nonce 的簽名器。
    pub fn signer(&self) -> JwsSigner<'_> {
        JwsSigner::new(&self.nonce, self.retry, &*self.clock)
    }

    /// 產生新的帳戶或憑證金鑰；RSA 使用設定的長度。
    pub fn generate_key(&self, algorithm: KeyAlgorithm) -> Result<KeyPair, KeyError> {
        match algorithm {
            KeyAlgorithm::Rsa => KeyPair::generate_rsa(self.rsa_key_bits),
            KeyAlgorithm::Ec => KeyPair::generate(algorithm),
        }
    }

    /// 以 `application/jose+json` 送出已簽名的請求。
    fn post_jose(&self, url: &str, body: String) -> reqwest::Result<Response> {
        debug!(url, "POST");
        self.client
            .post(url)
            .header(CONTENT_TYPE, "application/jose+json")
            .body(body)
            .send()
    }

    /// 簽名並送出請求；CA 回覆 `badNonce` 時以 `sign` 重新簽名（取得新 nonce）後重送，
    /// 最多 [`BAD_NONCE_RETRIES`] 次。其他 4xx/5xx 以 [`Rejection`] 回傳。
    pub(crate) fn post_signed<E>(
        &self,
        url: &str,
        mut sign: impl FnMut() -> Result<Jws, E>,
    ) -> Result<Response, E>
    where
        E: From<reqwest::Error> + From<JwsError> + From<Rejection>,
    {
        let mut retries = 0;
        loop {
            let body = sign()?.to_json()?;
            let response = self.post_jose(url, body)?;
            let status = response.status();
            if !(status.is_client_error() || status.is_server_error()) {
                return Ok(response);
            }

            let headers = response.headers().clone();
            let rejection = Rejection {
                status,
                headers,
                body: response.text()?,
            };
            if !rejection.is_bad_nonce() || retries >= BAD_NONCE_RETRIES {
                return Err(rejection.into());
            }
            retries += 1;
            warn!(url, retries, "CA rejected nonce, signing again");
        }
    }

    /// 未驗證的 GET（訂單、授權、憑證下載）。
    pub(crate) fn get(&self, url: &str) -> reqwest::Result<Response> {
        debug!(url, "GET");
        self.client.get(url).send()
    }
}

/// 用於構建 [`Session`] 的構造器，採用 builder 模式。
///
/// 預設值：
/// - 目錄：Let's Encrypt 正式環境（`staging(true)` 切換至測試環境，`directory_url` 可直接指定）
/// - 存儲路徑：`$HOME/.local/share/acme2`
/// - User-Agent：`acme2/<版本>`
/// - nonce 重試：[`RetryPolicy::default`]
/// - RSA 金鑰長度：4096
pub struct SessionBuilder {
    emails: Vec<String>,
    storage_path: PathBuf,
    staging: bool,
    directory_url: Option<String>,
    user_agent: String,
    nonce_retry: RetryPolicy,
    rsa_key_bits: u32,
    clock: Option<Arc<dyn Clock>>,
    probe: Option<Arc<dyn ChallengeProbe>>,
    storage: Option<Arc<dyn Storage>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        SessionBuilder {
            emails: Vec::new(),
            storage_path: default_storage_path(),
            staging: false,
            directory_url: None,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            nonce_retry: RetryPolicy::default(),
            rsa_key_bits: KeyPair::RSA_BITS,
            clock: None,
            probe: None,
            storage: None,
        }
    }

    /// 帳戶聯絡信箱。空字串會被忽略，重複值只保留一個。
    pub fn emails<I, S>(mut self, emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.emails = emails.into_iter().map(Into::into).collect();
        self
    }

    /// 以此路徑建立 [`FileStorage`]。若已透過 [`SessionBuilder::storage`] 指定存儲則忽略。
    pub fn storage_path(mut self, storage_path: impl Into<PathBuf>) -> Self {
        self.storage_path = storage_path.into();
        self
    }

    pub fn staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    /// 直接指定目錄 URL，優先於 `staging`。
    pub fn directory_url(mut self, url: impl Into<String>) -> Self {
        self.directory_url = Some(url.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn nonce_retry(mut self, policy: RetryPolicy) -> Self {
        self.nonce_retry = policy;
        self
    }

    pub fn rsa_key_bits(mut self, bits: u32) -> Self {
        self.rsa_key_bits = bits;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ChallengeProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// 建立 HTTP 客戶端並解析目錄。
    ///
    /// # Errors
    ///
    /// 目錄無法取得或格式不符時回傳 [`SessionError::Directory`]。
    pub fn build(self) -> Result<Arc<Session>, SessionError> {
        let client = Client::builder().user_agent(&self.user_agent).build()?;

        let directory = match &self.directory_url {
            Some(url) => Directory::fetch(&client, url)?,
            None => Directory::resolve(&client, self.staging)?,
        };

        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(FileStorage::open(&self.storage_path)?),
        };
        let probe: Arc<dyn ChallengeProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(WebProbe::new(client.clone())),
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        info!(new_account = %directory.new_account, "Resolved ACME directory");

        Ok(Arc::new(Session {
            nonce: Nonce::new(client.clone(), &directory.new_nonce),
            client,
            directory,
            retry: self.nonce_retry,
            clock,
            probe,
            storage,
            emails: normalize_emails(&self.emails),
            rsa_key_bits: self.rsa_key_bits,
        }))
    }

    /// [`SessionBuilder::build`] 之後接著以 [`Account::init`] 載入或建立帳戶。
    pub fn connect(self) -> Result<Account, AccountError> {
        let session = self.build()?;
        Account::init(session)
    }
}

/// 根據當前環境返回預設的存儲路徑：`$HOME/.local/share/<crate 名稱>`。
fn default_storage_path() -> PathBuf {
    let app_name = env!("CARGO_PKG_NAME");
    let base_dir = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/lib"));

    base_dir.join(".local/share").join(app_name)
}
