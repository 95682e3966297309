use crate::{
    base64::Base64,
    jwk::Jwk,
    key_pair::KeyAlgorithm,
    nonce::{NonceError, NonceT},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Nonce 相關錯誤
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 簽名者的身分：新帳戶、查詢與撤銷使用完整公鑰，其餘請求使用帳戶 URL。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIdentity {
    Jwk(Jwk),
    Kid(String),
}

/// 用於生成保護頭（Protected Header）的結構體。
///
/// `nonce` 為 `None` 時產生的頭部不含 nonce 欄位，僅用於金鑰輪替的內層 JWS。
pub struct Protection<'a> {
    nonce: Option<&'a dyn NonceT>,
    alg: KeyAlgorithm,
    identity: KeyIdentity,
}

/// 表示數字簽章保護頭部的資料結構。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法（`RS256` 或 `ES256`）
    pub alg: String,
    /// 用於防止重放攻擊的隨機數
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// 請求目標 URL
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    /// 將 [`ProtectedHeader`] 序列化後包裝為 [`Base64`]。
    ///
    /// # Errors
    ///
    /// 如果序列化過程中發生錯誤，將返回 [`ProtectionError::Serialization`]。
    pub fn to_base64(&self) -> Result<Base64> {
        let json_str = serde_json::to_string(self)?;
        Ok(Base64::new(json_str.as_bytes()))
    }
}

impl<'a> Protection<'a> {
    /// 建立一個會向 `nonce` 取得新隨機數的 [`Protection`]。
    pub fn new(nonce: &'a dyn NonceT, alg: KeyAlgorithm, identity: KeyIdentity) -> Self {
        Self {
            nonce: Some(nonce),
            alg,
            identity,
        }
    }

    /// 建立不帶 nonce 的 [`Protection`]。
    pub fn without_nonce(alg: KeyAlgorithm, identity: KeyIdentity) -> Self {
        Self {
            nonce: None,
            alg,
            identity,
        }
    }

    /// 根據目前設定的參數生成一個 [`ProtectedHeader`]。
    ///
    /// 每次呼叫都會重新取得 nonce。
    ///
    /// # Errors
    ///
    /// 若取得 nonce 失敗，則返回 [`ProtectionError::Nonce`]。
    pub fn create_header(&self, url: impl Into<String>) -> Result<ProtectedHeader> {
        let nonce = self.nonce.map(|source| source.get()).transpose()?;

        let (jwk, kid) = match &self.identity {
            KeyIdentity::Jwk(jwk) => (Some(jwk.clone()), None),
            KeyIdentity::Kid(kid) => (None, Some(kid.clone())),
        };

        Ok(ProtectedHeader {
            alg: self.alg.jws_alg().to_string(),
            nonce,
            url: url.into(),
            jwk,
            kid,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{jwk::EcJwk, nonce::MockNonce};

    use super::*;

    fn sample_jwk() -> Jwk {
        Jwk::Ec(EcJwk {
            crv: "P-256".into(),
            x: "x".into(),
            y: "y".into(),
        })
    }

    #[test]
    fn test_alg_follows_key_algorithm() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let kid = KeyIdentity::Kid("k".into());

        let rsa = Protection::new(&nonce, KeyAlgorithm::Rsa, kid.clone()).create_header("u")?;
        assert_eq!(rsa.alg, "RS256");
        let ec = Protection::new(&nonce, KeyAlgorithm::Ec, kid).create_header("u")?;
        assert_eq!(ec.alg, "ES256");
        Ok(())
    }

    #[test]
    fn test_jwk_handling() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let header = Protection::new(&nonce, KeyAlgorithm::Ec, KeyIdentity::Jwk(sample_jwk()))
            .create_header("https://example.com")?;

        assert_eq!(header.jwk, Some(sample_jwk()));
        assert!(header.kid.is_none());
        Ok(())
    }

    #[test]
    fn test_kid_handling() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let header = Protection::new(
            &nonce,
            KeyAlgorithm::Rsa,
            KeyIdentity::Kid("https://ca/acct/1".into()),
        )
        .create_header("https://example.com")?;

        assert_eq!(header.kid.as_deref(), Some("https://ca/acct/1"));
        assert!(header.jwk.is_none());
        Ok(())
    }

    #[test]
    fn test_header_serialization() -> Result<()> {
        let nonce = MockNonce::new("test-nonce");
        let header = Protection::new(&nonce, KeyAlgorithm::Ec, KeyIdentity::Kid("k".into()))
            .create_header("https://example.com")?;

        let json = serde_json::to_string(&header)?;
        assert!(json.contains("\"nonce\":\"test-nonce\""));
        assert!(json.contains("\"url\":\"https://example.com\""));
        assert!(json.contains("\"alg\":\"ES256\""));
        assert!(!json.contains("jwk"));
        Ok(())
    }

    #[test]
    fn test_header_without_nonce_omits_field() -> Result<()> {
        let header = Protection::without_nonce(KeyAlgorithm::Rsa, KeyIdentity::Jwk(sample_jwk()))
            .create_header("https://example.com/key-change")?;
        let json = serde_json::to_string(&header)?;
        assert!(!json.contains("nonce"));
        assert!(json.contains("\"kty\":\"EC\""));
        Ok(())
    }
}
