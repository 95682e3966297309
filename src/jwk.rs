use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
    pkey::Id,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::{base64::encode_url, key_pair::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的金鑰類型。
    #[error("Unsupported key type: {0:?}")]
    UnsupportedKeyType(Id),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，支援 RSA 與 P-256 EC 公鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 公鑰參數（皆為 base64url）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub e: String,
    pub n: String,
}

/// EC 公鑰參數（皆為 base64url，座標補齊至曲線長度）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    /// P-256 座標的位元組長度。
    const P256_COORDINATE_LEN: i32 = 32;

    /// 根據給定的金鑰對建立對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let key = &key_pair.pub_key;
        match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    e: encode_url(rsa.e().to_vec()),
                    n: encode_url(rsa.n().to_vec()),
                }))
            }
            Id::EC => {
                let ec = key.ec_key()?;
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;

                Ok(Jwk::Ec(EcJwk {
                    crv: "P-256".to_string(),
                    x: encode_url(x.to_vec_padded(Self::P256_COORDINATE_LEN)?),
                    y: encode_url(y.to_vec_padded(Self::P256_COORDINATE_LEN)?),
                }))
            }
            other => Err(JwkError::UnsupportedKeyType(other)),
        }
    }

    /// RFC 7638 所需的最小標準化 JSON：只含必要成員，且依字典序排列、無空白。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let canonical = match self {
            Jwk::Rsa(jwk) => json!({ "e": jwk.e, "kty": "RSA", "n": jwk.n }),
            Jwk::Ec(jwk) => json!({ "crv": jwk.crv, "kty": "EC", "x": jwk.x, "y": jwk.y }),
        };
        Ok(serde_json::to_string(&canonical)?)
    }

    /// 標準化 JSON 的 SHA-256 雜湊，以 base64url 編碼。
    pub fn thumbprint(&self) -> Result<String, JwkError> {
        Ok(encode_url(sha256(self.to_acme_json()?.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::{KeyAlgorithm, KeyPair};

    #[test]
    fn test_rfc7638_example_thumbprint() {
        // RFC 7638 §3.1
        let jwk = Jwk::Rsa(RsaJwk {
            e: "AQAB".into(),
            n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw".into(),
        });
        assert_eq!(
            jwk.thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_canonical_member_order() {
        let key = KeyPair::generate(KeyAlgorithm::Ec).unwrap();
        let json = Jwk::new(&key).unwrap().to_acme_json().unwrap();
        assert!(json.starts_with("{\"crv\":\"P-256\",\"kty\":\"EC\",\"x\":\""));
        assert!(!json.contains(' '));
    }

    #[test]
    fn test_header_serialization_is_tagged() {
        let key = KeyPair::generate(KeyAlgorithm::Ec).unwrap();
        let value = serde_json::to_value(Jwk::new(&key).unwrap()).unwrap();
        assert_eq!(value["kty"], "EC");
        assert_eq!(value["crv"], "P-256");
    }
}
