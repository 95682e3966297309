use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{base64::Base64, jwk::Jwk};

/// 載荷驗證失敗或序列化失敗時的錯誤。
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, PayloadError>;

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 該 trait 要求實作者能夠序列化、反序列化，並提供轉換成 JSON 字串與 Base64 表示的功能，
/// 同時必須實作自定義的驗證邏輯。簽名前一律先呼叫 [`PayloadT::validate`]。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 將載荷先轉換成 JSON 字串，再包裝為 [`Base64`]。
    fn to_base64(&self) -> Result<Base64> {
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<()>;
}

fn invalid(reason: &str) -> PayloadError {
    PayloadError::Invalid(reason.to_string())
}

/// 將電子郵件轉為 `mailto:` 聯絡資訊，已帶前綴者不重複補上。
fn to_contacts(emails: &[String]) -> Vec<String> {
    emails
        .iter()
        .map(|email| {
            if email.starts_with("mailto:") {
                email.clone()
            } else {
                format!("mailto:{}", email)
            }
        })
        .collect()
}

fn validate_contacts(contact: &[String]) -> Result<()> {
    if contact
        .iter()
        .any(|c| c.trim_start_matches("mailto:").trim().is_empty())
    {
        return Err(invalid("Contact email cannot be empty"));
    }
    Ok(())
}

/// 建立新帳號所需的載荷資料。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewAccountPayload {
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立已同意服務條款的新帳號載荷，每個電子郵件會補足 `mailto:` 前綴。
    pub fn new(emails: &[String]) -> Self {
        NewAccountPayload {
            contact: to_contacts(emails),
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<()> {
        if !self.terms_of_service_agreed {
            return Err(invalid("Terms of service must be agreed"));
        }
        validate_contacts(&self.contact)
    }
}

/// 以帳戶金鑰查詢既有帳戶 URL 的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct ExistingAccountPayload {
    #[serde(rename = "onlyReturnExisting")]
    only_return_existing: bool,
}

impl Default for ExistingAccountPayload {
    fn default() -> Self {
        Self {
            only_return_existing: true,
        }
    }
}

impl PayloadT for ExistingAccountPayload {
    fn validate(&self) -> Result<()> {
        if !self.only_return_existing {
            return Err(invalid("onlyReturnExisting must be true"));
        }
        Ok(())
    }
}

/// 空物件 `{}`，用於讀取帳戶資訊與觸發挑戰驗證以外的空請求。
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct EmptyPayload {}

impl PayloadT for EmptyPayload {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 更新帳戶聯絡資訊的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct ContactUpdatePayload {
    contact: Vec<String>,
}

impl ContactUpdatePayload {
    pub fn new(emails: &[String]) -> Self {
        Self {
            contact: to_contacts(emails),
        }
    }
}

impl PayloadT for ContactUpdatePayload {
    fn validate(&self) -> Result<()> {
        validate_contacts(&self.contact)
    }
}

/// 停用帳戶的載荷：`{"status":"deactivated"}`。
#[derive(Debug, Serialize, Deserialize)]
pub struct DeactivatePayload {
    status: String,
}

impl Default for DeactivatePayload {
    fn default() -> Self {
        Self {
            status: "deactivated".to_string(),
        }
    }
}

impl PayloadT for DeactivatePayload {
    fn validate(&self) -> Result<()> {
        if self.status != "deactivated" {
            return Err(invalid("status must be 'deactivated'"));
        }
        Ok(())
    }
}

/// 金鑰輪替內層 JWS 的載荷：帳戶 URL 與舊金鑰。
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyChangePayload {
    pub account: String,
    #[serde(rename = "oldKey")]
    pub old_key: Jwk,
}

impl KeyChangePayload {
    pub fn new(account: impl Into<String>, old_key: Jwk) -> Self {
        Self {
            account: account.into(),
            old_key,
        }
    }
}

impl PayloadT for KeyChangePayload {
    fn validate(&self) -> Result<()> {
        if self.account.is_empty() {
            return Err(invalid("Account URL is required"));
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱等資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            type_: "dns".to_string(),
            value: value.into(),
        }
    }
}

/// 表示建立新訂單時所需的載荷資料。
///
/// `notBefore` 與 `notAfter` 固定送出空字串，由 CA 決定有效期間。
#[derive(Debug, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
    #[serde(rename = "notBefore")]
    pub not_before: String,
    #[serde(rename = "notAfter")]
    pub not_after: String,
}

impl NewOrderPayload {
    /// 為每個域名建立一個 `"dns"` 類型的識別項。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let identifiers = domains
            .iter()
            .map(|domain| Identifier::dns(domain.as_ref()))
            .collect();

        NewOrderPayload {
            identifiers,
            not_before: String::new(),
            not_after: String::new(),
        }
    }
}

impl PayloadT for NewOrderPayload {
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<()> {
        if self.identifiers.is_empty() {
            return Err(invalid("At least one identifier is required"));
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err(invalid("Identifier type must be 'dns'"));
            }
            if identifier.value.is_empty() {
                return Err(invalid("Identifier value cannot be empty"));
            }
        }
        Ok(())
    }
}

/// 通知 CA 開始驗證挑戰的載荷。
#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponsePayload {
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengeResponsePayload {
    pub fn new(key_authorization: impl Into<String>) -> Self {
        Self {
            key_authorization: key_authorization.into(),
        }
    }
}

impl PayloadT for ChallengeResponsePayload {
    fn validate(&self) -> Result<()> {
        if !self.key_authorization.contains('.') {
            return Err(invalid("keyAuthorization must be 'token.thumbprint'"));
        }
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料：DER 格式 CSR 的 base64url 編碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &Base64) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: csr_der.base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<()> {
        if self.csr_b64_str.is_empty() {
            return Err(invalid("CSR cannot be empty"));
        }
        Ok(())
    }
}

/// 撤銷憑證的載荷：DER 格式憑證的 base64url 編碼與撤銷原因代碼。
#[derive(Debug, Serialize, Deserialize)]
pub struct RevokePayload {
    certificate: String,
    reason: u8,
}

impl RevokePayload {
    pub fn new(certificate_der: &Base64, reason: u8) -> Self {
        Self {
            certificate: certificate_der.base64_url(),
            reason,
        }
    }
}

impl PayloadT for RevokePayload {
    /// RFC 5280 的原因代碼為 0–10，其中 7 未使用。
    fn validate(&self) -> Result<()> {
        if self.reason > 10 || self.reason == 7 {
            return Err(invalid("Unsupported revocation reason code"));
        }
        if self.certificate.is_empty() {
            return Err(invalid("Certificate cannot be empty"));
        }
        Ok(())
    }
}
