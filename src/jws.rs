//! 此模組提供 JSON Web Signature (JWS) 的信封結構與簽名器。
//!
//! [`JwsSigner`] 負責兩種 ACME 請求：帶完整公鑰的 JWK 形式（建立帳戶、查詢帳戶、
//! 撤銷憑證）與帶帳戶 URL 的 KID 形式（其餘所有已驗證請求）。每次簽名前都會向
//! new-nonce 端點取得新的 nonce。

use std::result;

use openssl::pkey::{PKey, Public};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::{Base64, DecodeError},
    clock::Clock,
    key_pair::{KeyAlgorithm, KeyError, KeyPair},
    nonce::{NonceT, RetryPolicy, RetryingNonce},
    payload::{PayloadError, PayloadT},
    protection::{KeyIdentity, ProtectedHeader, Protection, ProtectionError},
    signature::{create_signature, verify_signature, SignatureError},
};

/// 表示一個 JSON Web Signature (JWS) 物件，三個欄位皆為 base64url（無填充）字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    /// 對應 JWS 中的 "protected" 欄位，包含已編碼的 header 資訊。
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] DecodeError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Unsupported JWS algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

type Result<T> = result::Result<T, JwsError>;

impl Jws {
    /// 由已編碼的三個部分組成 `Jws`。
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串，作為 `application/jose+json` 請求本文。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 解碼 protected header。
    pub fn protected_header(&self) -> Result<ProtectedHeader> {
        let raw = Base64::from_url(&self.header)?;
        Ok(serde_json::from_slice(raw.as_bytes())?)
    }

    /// 解碼 payload 為指定型別。
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let raw = Base64::from_url(&self.payload)?;
        Ok(serde_json::from_slice(raw.as_bytes())?)
    }

    /// 以公鑰驗證簽名；演算法取自 protected header 的 `alg`。
    pub fn verify(&self, pub_key: &PKey<Public>) -> Result<bool> {
        let header = self.protected_header()?;
        let algorithm = match header.alg.as_str() {
            "RS256" => KeyAlgorithm::Rsa,
            "ES256" => KeyAlgorithm::Ec,
            other => return Err(JwsError::UnsupportedAlgorithm(other.to_string())),
        };
        let signature = Base64::from_url(&self.signature)?;

        Ok(verify_signature(
            algorithm,
            &self.header,
            &self.payload,
            signature.as_bytes(),
            pub_key,
        )?)
    }
}

/// 金鑰輪替時，內層 JWS 作為外層請求的載荷。
impl PayloadT for Jws {
    fn validate(&self) -> result::Result<(), PayloadError> {
        if self.header.is_empty() || self.signature.is_empty() {
            return Err(PayloadError::Invalid("Nested JWS is incomplete".into()));
        }
        Ok(())
    }
}

/// 為 ACME 請求產生 JWS 的簽名器。
pub struct JwsSigner<'a> {
    nonce: RetryingNonce<'a>,
}

impl<'a> JwsSigner<'a> {
    pub fn new(nonce: &'a dyn NonceT, retry: RetryPolicy, clock: &'a dyn Clock) -> Self {
        Self {
            nonce: RetryingNonce::new(nonce, retry, clock),
        }
    }

    /// 以完整公鑰（`jwk`）簽署請求。
    pub fn sign_with_jwk<P: PayloadT>(&self, url: &str, payload: &P, key: &KeyPair) -> Result<Jws> {
        let protection = Protection::new(&self.nonce, key.algorithm, KeyIdentity::Jwk(key.jwk()?));
        sign(&protection, url, payload, key)
    }

    /// 以帳戶 URL（`kid`）簽署請求。
    pub fn sign_with_kid<P: PayloadT>(
        &self,
        url: &str,
        kid: &str,
        payload: &P,
        key: &KeyPair,
    ) -> Result<Jws> {
        let protection = Protection::new(
            &self.nonce,
            key.algorithm,
            KeyIdentity::Kid(kid.to_string()),
        );
        sign(&protection, url, payload, key)
    }

    /// 金鑰輪替的內層 JWS：以新金鑰的 `jwk` 簽署，且不含 nonce。
    pub fn sign_inner_with_jwk<P: PayloadT>(url: &str, payload: &P, key: &KeyPair) -> Result<Jws> {
        let protection = Protection::without_nonce(key.algorithm, KeyIdentity::Jwk(key.jwk()?));
        sign(&protection, url, payload, key)
    }
}

fn sign<P: PayloadT>(
    protection: &Protection<'_>,
    url: &str,
    payload: &P,
    key: &KeyPair,
) -> Result<Jws> {
    payload.validate()?;

    let header_b64 = protection.create_header(url)?.to_base64()?;
    let payload_b64 = payload.to_base64()?;
    let signature_b64 = create_signature(&header_b64, &payload_b64, key)?;

    Ok(Jws::new(&header_b64, &payload_b64, &signature_b64))
}
