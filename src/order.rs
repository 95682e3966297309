//! 訂單管理：建立或接續訂單、產生待完成的挑戰、送出 CSR、下載與撤銷憑證。
//!
//! 每張訂單以「域名清單指紋 + 金鑰演算法」定位，相關檔案存放於
//! `{fingerprint}/{rsa|ec}/` 之下，因此同一組域名可以同時持有 RSA 與 EC 兩張憑證。

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use openssl::hash::{hash, MessageDigest};
use reqwest::{blocking::Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::{Account, AccountError},
    authorization::{Authorization, AuthorizationError, AuthorizationStatus},
    base64::Base64,
    certificate::{extract_certificate, Certificate, CertificateError},
    challenge::{ChallengeCredential, ChallengeStatus, ChallengeType, PendingChallenge},
    clock::Poller,
    csr::{pem_to_der, Csr, CsrError},
    jws::JwsError,
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    payload::{FinalizeOrderPayload, Identifier, NewOrderPayload, RevokePayload},
    session::{Rejection, Session},
    storage::StorageError,
};

/// 定義所有訂單操作可能產生的錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request header error: {0}")]
    RequestHeaderError(#[from] reqwest::header::ToStrError),
    #[error("Request failed: {status:?}, {headers:?}, {body:?}")]
    RequestErrorDetailed {
        status: StatusCode,
        headers: reqwest::header::HeaderMap,
        body: String,
    },
    #[error("Serde JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Key pair error: {0}")]
    KeyPair(#[from] KeyError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("Order request contains no domains")]
    NoDomains,
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("No usable challenge for {domain} (requested {challenge_type:?})")]
    ChallengeNotOffered {
        domain: String,
        challenge_type: Option<ChallengeType>,
    },
    #[error("Order {url} became invalid")]
    OrderInvalid { url: String },
    #[error("Order {url} did not reach {expected:?} within {timeout:?}")]
    StatusTimeout {
        url: String,
        expected: OrderStatus,
        timeout: Duration,
    },
}

impl OrderError {
    /// 傳輸錯誤與驗證逾時可以重試；CA 判定失敗與前置條件錯誤則不行。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Authorization(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<Rejection> for OrderError {
    fn from(rejection: Rejection) -> Self {
        OrderError::RequestErrorDetailed {
            status: rejection.status,
            headers: rejection.headers,
            body: rejection.body,
        }
    }
}

type Result<T> = std::result::Result<T, OrderError>;

/// 等待訂單狀態變化的輪詢間隔。
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

const PRIVATE_KEY: &str = "private.pem";
const PUBLIC_KEY: &str = "public.pem";
const CSR_FILE: &str = "certificate.csr";
const CERTIFICATE_FILE: &str = "certificate.crt";
const FULL_CHAIN_FILE: &str = "certificate-fullchained.crt";
const ORDER_FILE: &str = "ORDER";
const DOMAIN_FILE: &str = "DOMAIN";

const NAMESPACE_FILES: [&str; 6] = [
    PRIVATE_KEY,
    PUBLIC_KEY,
    CSR_FILE,
    CERTIFICATE_FILE,
    FULL_CHAIN_FILE,
    ORDER_FILE,
];

/// 訂單狀態：`pending → ready → processing → valid`，`invalid` 為終結狀態。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// 建立訂單的參數：每個域名使用的挑戰類型、憑證金鑰演算法，以及是否捨棄既有訂單。
///
/// ```
/// # use acme2::{order::OrderRequest, key_pair::KeyAlgorithm};
/// let request = OrderRequest::new()
///     .http(["example.com", "www.example.com"])
///     .dns(["*.example.com"])
///     .algorithm(KeyAlgorithm::Ec);
/// assert_eq!(request.domains(), ["*.example.com", "example.com", "www.example.com"]);
/// ```
#[derive(Debug, Clone)]
pub struct OrderRequest {
    challenge_types: BTreeMap<String, ChallengeType>,
    algorithm: KeyAlgorithm,
    generate_new: bool,
}

impl Default for OrderRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderRequest {
    pub fn new() -> Self {
        Self {
            challenge_types: BTreeMap::new(),
            algorithm: KeyAlgorithm::Rsa,
            generate_new: false,
        }
    }

    /// 以 HTTP-01 驗證這些域名。
    pub fn http<I, S>(self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_challenge(ChallengeType::Http01, domains)
    }

    /// 以 DNS-01 驗證這些域名，萬用字元域名只能使用此方式。
    pub fn dns<I, S>(self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_challenge(ChallengeType::Dns01, domains)
    }

    fn with_challenge<I, S>(mut self, challenge_type: ChallengeType, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for domain in domains {
            let domain = domain.as_ref().trim();
            if !domain.is_empty() {
                self.challenge_types
                    .insert(domain.to_string(), challenge_type);
            }
        }
        self
    }

    pub fn algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// 為 `true` 時刪除此命名空間下的所有檔案並建立新訂單。
    pub fn generate_new(mut self, generate_new: bool) -> Self {
        self.generate_new = generate_new;
        self
    }

    /// 已去除空白、去重並排序的域名清單。
    pub fn domains(&self) -> Vec<String> {
        self.challenge_types.keys().cloned().collect()
    }
}

/// 域名清單的指紋：`md5(domains.join(","))` 的十六進位字串中第 11 到 19 個字元。
///
/// 呼叫端須先將域名排序並去重，指紋才會與輸入順序無關。
pub fn fingerprint<S: AsRef<str>>(domains: &[S]) -> Result<String> {
    let joined = domains
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",");
    let digest = hash(MessageDigest::md5(), joined.as_bytes()).map_err(KeyError::from)?;
    Ok(hex::encode(&*digest)[11..19].to_string())
}

/// 存儲中的一個檔案：存儲鍵與（檔案系統存儲時的）實際路徑。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub path: Option<PathBuf>,
}

/// 簽發完成後的檔案位置與有效期間。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFiles {
    pub private_key: StoredFile,
    pub public_key: StoredFile,
    pub certificate: StoredFile,
    pub certificate_full_chained: StoredFile,
    pub valid_from_timestamp: i64,
    pub valid_to_timestamp: i64,
}

/// CA 回傳的訂單物件中本 crate 使用的欄位。
#[derive(Debug, Deserialize)]
struct OrderResource {
    status: OrderStatus,
    #[serde(default)]
    expires: Option<String>,
    #[serde(default)]
    identifiers: Vec<Identifier>,
    #[serde(default)]
    authorizations: Vec<String>,
    finalize: String,
    #[serde(default)]
    certificate: Option<String>,
}

/// 一張 ACME 訂單。
#[derive(Debug)]
pub struct Order<'a> {
    account: &'a Account,
    url: String,
    domains: Vec<String>,
    challenge_types: BTreeMap<String, ChallengeType>,
    algorithm: KeyAlgorithm,
    fingerprint: String,
    namespace: String,
    status: OrderStatus,
    expires: Option<String>,
    identifiers: Vec<Identifier>,
    authorization_urls: Vec<String>,
    finalize: String,
    certificate: Option<String>,
    authorizations: Vec<Authorization>,
}

impl<'a> Order<'a> {
    /// 開啟訂單。
    ///
    /// `generate_new` 為 `true` 時清除命名空間並建立新訂單；否則從 `ORDER` 快取接續。
    /// 沒有快取，或快取中的訂單已 `invalid` 時，改為建立新訂單。
    ///
    /// # Errors
    ///
    /// 域名清單為空時回傳 [`OrderError::NoDomains`]；CA 拒絕請求時回傳
    /// [`OrderError::RequestErrorDetailed`]。
    pub fn open(account: &'a Account, request: OrderRequest) -> Result<Self> {
        let domains = request.domains();
        if domains.is_empty() {
            return Err(OrderError::NoDomains);
        }
        let fingerprint = fingerprint(&domains)?;
        let namespace = format!("{}/{}", fingerprint, request.algorithm.as_str());

        let mut order = Self {
            account,
            url: String::new(),
            domains,
            challenge_types: request.challenge_types,
            algorithm: request.algorithm,
            fingerprint,
            namespace,
            status: OrderStatus::Pending,
            expires: None,
            identifiers: Vec::new(),
            authorization_urls: Vec::new(),
            finalize: String::new(),
            certificate: None,
            authorizations: Vec::new(),
        };

        if request.generate_new {
            order.clear()?;
            order.create_order()?;
        } else {
            order.resume()?;
        }

        order.session().storage().write_file(
            &format!("{}/{}", order.fingerprint, DOMAIN_FILE),
            order.domains.join("\r\n").as_bytes(),
        )?;
        Ok(order)
    }

    fn session(&self) -> &'a Session {
        self.account.session()
    }

    fn key(&self, file: &str) -> String {
        format!("{}/{}", self.namespace, file)
    }

    fn stored(&self, file: &str) -> StoredFile {
        let key = self.key(file);
        StoredFile {
            path: self.session().storage().path_of(&key),
            key,
        }
    }

    fn clear(&self) -> Result<()> {
        let storage = self.session().storage();
        for file in NAMESPACE_FILES {
            storage.remove(&self.key(file))?;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let cached_url = self
            .read_cache()?
            .get("orderUrl")
            .and_then(Value::as_str)
            .map(str::to_string);

        let Some(url) = cached_url else {
            info!(namespace = %self.namespace, "No cached order, creating a new one");
            return self.create_order();
        };

        self.url = url;
        self.get_order(true)?;

        if self.status == OrderStatus::Invalid {
            warn!(url = %self.url, "Cached order is invalid, creating a new one");
            self.clear()?;
            return self.create_order();
        }

        info!(url = %self.url, status = ?self.status, "Resumed order");
        Ok(())
    }

    /// 向 new-order 送出新訂單，並快取訂單 URL。
    pub fn create_order(&mut self) -> Result<()> {
        let session = self.session();
        let new_order = &session.directory().new_order;

        let payload = NewOrderPayload::new(&self.domains);
        let response = session.post_signed::<OrderError>(new_order, || {
            Ok(self.account.sign_with_kid(new_order, &payload)?)
        })?;

        if response.status() != StatusCode::CREATED {
            return Err(rejected(response));
        }
        self.url = response
            .headers()
            .get("Location")
            .ok_or_else(|| OrderError::RequestErrorDetailed {
                status: response.status(),
                headers: response.headers().clone(),
                body: "Location header not found".to_string(),
            })?
            .to_str()?
            .to_string();

        let mut cache = Map::new();
        cache.insert("orderUrl".to_string(), Value::String(self.url.clone()));
        self.write_cache(&cache)?;

        self.populate(serde_json::from_str(&response.text()?)?);
        self.load_authorizations()?;

        info!(url = %self.url, domains = ?self.domains, "Created order");
        Ok(())
    }

    /// 重新取得訂單狀態；`refresh_authorizations` 為 `true` 時一併重新取得授權。
    pub fn get_order(&mut self, refresh_authorizations: bool) -> Result<()> {
        let response = self.session().get(&self.url)?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }
        self.populate(serde_json::from_str(&response.text()?)?);
        debug!(url = %self.url, status = ?self.status, "Fetched order");

        if refresh_authorizations {
            self.load_authorizations()?;
        }
        Ok(())
    }

    fn populate(&mut self, resource: OrderResource) {
        self.status = resource.status;
        self.expires = resource.expires;
        self.identifiers = resource.identifiers;
        self.authorization_urls = resource.authorizations;
        self.finalize = resource.finalize;
        self.certificate = resource.certificate;
    }

    fn load_authorizations(&mut self) -> Result<()> {
        let session = self.session();
        self.authorizations = self
            .authorization_urls
            .iter()
            .map(|url| Authorization::fetch(session, url))
            .collect::<std::result::Result<_, _>>()?;
        Ok(())
    }

    /// 列出尚待完成的挑戰與需要發佈的驗證資料。所有授權都有效時回傳空清單。
    ///
    /// # Errors
    ///
    /// 某個待驗證域名沒有設定挑戰類型，或 CA 未提供該類型時回傳
    /// [`OrderError::ChallengeNotOffered`]。
    pub fn pending_challenges(&self) -> Result<Vec<PendingChallenge>> {
        if self.is_all_authorization_valid() {
            return Ok(Vec::new());
        }

        let thumbprint = self.account.thumbprint()?;
        let mut pending = Vec::new();

        for (index, authorization) in self.authorizations.iter().enumerate() {
            if authorization.status != AuthorizationStatus::Pending {
                continue;
            }

            let not_offered =
                |challenge_type: Option<ChallengeType>| OrderError::ChallengeNotOffered {
                    domain: authorization.domain.clone(),
                    challenge_type,
                };

            let challenge_type = *self
                .challenge_types
                .get(&authorization.domain)
                .ok_or_else(|| not_offered(None))?;
            let challenge = authorization
                .challenge(challenge_type)
                .ok_or_else(|| not_offered(Some(challenge_type)))?;

            if challenge.status != ChallengeStatus::Pending {
                continue;
            }

            let credential = ChallengeCredential::new(
                challenge_type,
                &authorization.identifier.value,
                &challenge.token,
                &thumbprint,
            )
            .ok_or_else(|| not_offered(Some(challenge_type)))?;

            pending.push(PendingChallenge {
                challenge_type,
                credential,
                authorization_index: index,
            });
        }

        Ok(pending)
    }

    /// 驗證第 `index` 個授權，完成後重新取得訂單狀態。
    pub(crate) fn verify_authorization(
        &mut self,
        index: usize,
        challenge_type: ChallengeType,
        local_timeout: u64,
        ca_timeout: u64,
    ) -> Result<()> {
        let account = self.account;
        let authorization = self.authorizations.get_mut(index).ok_or_else(|| {
            OrderError::Precondition(format!("Authorization #{} is not part of this order", index))
        })?;
        authorization.verify(
            account.session(),
            account,
            challenge_type,
            local_timeout,
            ca_timeout,
        )?;
        self.get_order(false)
    }

    /// 送出 CSR、等待簽發並下載憑證。
    ///
    /// `csr` 為 PEM 格式；未提供時使用快取的 `certificate.csr`，沒有快取則以訂單金鑰產生。
    /// 已送出過 CSR 的訂單會直接等待簽發。
    ///
    /// # Errors
    ///
    /// 仍有授權未生效時回傳 [`OrderError::Precondition`]；訂單變為 `invalid` 時回傳
    /// [`OrderError::OrderInvalid`]。
    pub fn certificate_file(&mut self, csr: Option<&str>) -> Result<CertificateFiles> {
        if !self.is_all_authorization_valid() {
            return Err(OrderError::Precondition(
                "There are still some authorizations that are not valid".to_string(),
            ));
        }

        if !self.is_order_finalized() {
            self.wait_status(OrderStatus::Ready)?;
            let csr_pem = match csr {
                Some(csr) => csr.to_string(),
                None => self.csr()?,
            };
            self.finalize_order(&csr_pem)?;
        }
        self.wait_status(OrderStatus::Valid)?;

        let certificate_url = self.certificate.clone().ok_or_else(|| {
            OrderError::Precondition(format!("Order {} has no certificate URL", self.url))
        })?;
        let response = self.session().get(&certificate_url)?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }
        let extracted =
            extract_certificate(&response.text()?).ok_or(CertificateError::NoCertificate)?;

        let storage = self.session().storage();
        storage.write_file(
            &self.key(CERTIFICATE_FILE),
            extracted.certificate.as_bytes(),
        )?;
        storage.write_file(
            &self.key(FULL_CHAIN_FILE),
            extracted.certificate_full_chained.as_bytes(),
        )?;

        let validity = Certificate::new(&extracted.certificate)?.validity()?;
        let mut cache = self.read_cache()?;
        if let Value::Object(fields) = serde_json::to_value(&validity)? {
            cache.extend(fields);
        }
        self.write_cache(&cache)?;

        info!(
            url = %self.url,
            valid_to = %validity.valid_to_time,
            "Certificate issued"
        );

        Ok(CertificateFiles {
            private_key: self.stored(PRIVATE_KEY),
            public_key: self.stored(PUBLIC_KEY),
            certificate: self.stored(CERTIFICATE_FILE),
            certificate_full_chained: self.stored(FULL_CHAIN_FILE),
            valid_from_timestamp: validity.valid_from_timestamp,
            valid_to_timestamp: validity.valid_to_timestamp,
        })
    }

    /// 以訂單自己的金鑰撤銷已下載的憑證。`reason` 為 RFC 5280 撤銷原因代碼。
    ///
    /// # Errors
    ///
    /// 訂單不是 `valid` 或憑證檔不存在時回傳 [`OrderError::Precondition`]，不會送出任何請求。
    pub fn revoke_certificate(&self, reason: u8) -> Result<()> {
        if self.status != OrderStatus::Valid {
            return Err(OrderError::Precondition(format!(
                "Cannot revoke certificate of order in status {:?}",
                self.status
            )));
        }

        let storage = self.session().storage();
        let certificate_key = self.key(CERTIFICATE_FILE);
        if !storage.exists(&certificate_key)? {
            return Err(OrderError::Precondition(format!(
                "Certificate file {} is missing",
                certificate_key
            )));
        }
        let private_key = self.key(PRIVATE_KEY);
        if !storage.exists(&private_key)? {
            return Err(OrderError::Precondition(format!(
                "Order key {} is missing",
                private_key
            )));
        }

        let der = Certificate::new(&storage.read_to_string(&certificate_key)?)?.to_der()?;
        let key_pair = KeyPair::from_storage(storage, &private_key)?;

        let session = self.session();
        let revoke_cert = &session.directory().revoke_cert;
        let payload = RevokePayload::new(&Base64::new(der), reason);
        let response = session.post_signed::<OrderError>(revoke_cert, || {
            Ok(session.signer().sign_with_jwk(revoke_cert, &payload, &key_pair)?)
        })?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }

        info!(url = %self.url, reason, "Certificate revoked");
        Ok(())
    }

    /// 授權清單非空且每一個都是 `valid`。
    pub fn is_all_authorization_valid(&self) -> bool {
        !self.authorizations.is_empty()
            && self
                .authorizations
                .iter()
                .all(|a| a.status == AuthorizationStatus::Valid)
    }

    /// 訂單已送出 CSR（`processing` 或 `valid`）。
    pub fn is_order_finalized(&self) -> bool {
        matches!(self.status, OrderStatus::Processing | OrderStatus::Valid)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `{fingerprint}/{rsa|ec}`
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn expires(&self) -> Option<&str> {
        self.expires.as_deref()
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn authorizations(&self) -> &[Authorization] {
        &self.authorizations
    }

    pub fn certificate_url(&self) -> Option<&str> {
        self.certificate.as_deref()
    }

    fn wait_status(&mut self, expected: OrderStatus) -> Result<()> {
        let session = self.session();
        let url = self.url.clone();

        Poller::unbounded(session.clock(), POLL_INTERVAL).run(
            |attempt| -> Result<Option<()>> {
                if attempt > 0 {
                    self.get_order(false)?;
                }
                debug!(url = %self.url, status = ?self.status, ?expected, attempt, "Waiting for order status");
                if self.status == OrderStatus::Invalid {
                    return Err(OrderError::OrderInvalid {
                        url: self.url.clone(),
                    });
                }
                Ok((self.status == expected).then_some(()))
            },
            |timeout| OrderError::StatusTimeout {
                url,
                expected,
                timeout,
            },
        )
    }

    fn finalize_order(&mut self, csr_pem: &str) -> Result<()> {
        let der = pem_to_der(csr_pem.as_bytes())?;
        let payload = FinalizeOrderPayload::new(&Base64::new(der));
        let response = self.session().post_signed::<OrderError>(&self.finalize, || {
            Ok(self.account.sign_with_kid(&self.finalize, &payload)?)
        })?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }

        self.populate(serde_json::from_str(&response.text()?)?);
        self.load_authorizations()?;
        info!(url = %self.url, status = ?self.status, "Order finalized");
        Ok(())
    }

    /// 快取的 CSR；不存在時以訂單識別項與訂單金鑰產生並寫入。
    fn csr(&self) -> Result<String> {
        let storage = self.session().storage();
        let csr_key = self.key(CSR_FILE);
        if storage.exists(&csr_key)? {
            return Ok(storage.read_to_string(&csr_key)?);
        }

        let domains: Vec<&str> = self
            .identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect();
        let pem = Csr::new(domains)
            .build(&self.order_key()?)?
            .to_pem()
            .map_err(CsrError::from)?;
        storage.write_file(&csr_key, &pem)?;
        debug!(key = %csr_key, "Generated CSR");

        Ok(String::from_utf8_lossy(&pem).into_owned())
    }

    /// 訂單金鑰；私鑰或公鑰檔缺少時重新產生並寫入。
    fn order_key(&self) -> Result<KeyPair> {
        let storage = self.session().storage();
        let private_key = self.key(PRIVATE_KEY);
        let public_key = self.key(PUBLIC_KEY);

        if storage.exists(&private_key)? && storage.exists(&public_key)? {
            return Ok(KeyPair::from_storage(storage, &private_key)?);
        }
        let key_pair = self.session().generate_key(self.algorithm)?;
        key_pair.store(storage, &private_key, &public_key)?;
        Ok(key_pair)
    }

    fn read_cache(&self) -> Result<Map<String, Value>> {
        let storage = self.session().storage();
        let key = self.key(ORDER_FILE);
        if !storage.exists(&key)? {
            return Ok(Map::new());
        }
        match serde_json::from_str(&storage.read_to_string(&key)?)? {
            Value::Object(fields) => Ok(fields),
            _ => Ok(Map::new()),
        }
    }

    fn write_cache(&self, cache: &Map<String, Value>) -> Result<()> {
        let json = serde_json::to_string(cache)?;
        self.session()
            .storage()
            .write_file(&self.key(ORDER_FILE), json.as_bytes())?;
        Ok(())
    }
}

fn rejected(response: Response) -> OrderError {
    let status = response.status();
    let headers = response.headers().clone();
    match response.text() {
        Ok(body) => OrderError::RequestErrorDetailed {
            status,
            headers,
            body,
        },
        Err(err) => OrderError::Request(err),
    }
}
