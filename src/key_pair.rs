use std::fmt;

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    jwk::{Jwk, JwkError},
    storage::{Storage, StorageError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、存儲與 JWK 相關錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Key generation failed for {algorithm}: {source}")]
    Generation {
        algorithm: KeyAlgorithm,
        source: ErrorStack,
    },
    #[error("JWK error: {0}")]
    JwkError(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 金鑰演算法。帳戶金鑰固定為 RSA；憑證金鑰可選 RSA 或 EC。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
}

impl KeyAlgorithm {
    /// 存儲命名空間使用的小寫名稱。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ec => "ec",
        }
    }

    /// 此演算法在 JWS protected header 中的 `alg` 值。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::Rsa => "RS256",
            Self::Ec => "ES256",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一組非對稱金鑰對。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 金鑰演算法。
    pub algorithm: KeyAlgorithm,
    /// 私鑰。
    pub pri_key: PKey<Private>,
    /// 由私鑰派生的公鑰。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// RSA 金鑰長度。
    pub const RSA_BITS: u32 = 4096;
    /// EC 金鑰使用的具名曲線（prime256v1）。
    pub const EC_CURVE: Nid = Nid::X9_62_PRIME256V1;

    /// 依演算法產生新的金鑰對：RSA-4096 或 EC P-256。
    ///
    /// # 錯誤
    ///
    /// OpenSSL 拒絕參數時回傳 [`KeyError::Generation`]。
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Rsa => Self::generate_rsa(Self::RSA_BITS),
            KeyAlgorithm::Ec => {
                let pri_key = EcGroup::from_curve_name(Self::EC_CURVE)
                    .and_then(|group| EcKey::generate(&group))
                    .and_then(PKey::from_ec_key)
                    .map_err(|source| KeyError::Generation { algorithm, source })?;
                Self::from_private(pri_key)
            }
        }
    }

    /// 以指定長度產生 RSA 金鑰對。
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        let pri_key = Rsa::generate(bits)
            .and_then(PKey::from_rsa)
            .map_err(|source| KeyError::Generation {
                algorithm: KeyAlgorithm::Rsa,
                source,
            })?;
        Self::from_private(pri_key)
    }

    fn from_private(pri_key: PKey<Private>) -> Result<Self> {
        let algorithm = match pri_key.id() {
            Id::RSA => KeyAlgorithm::Rsa,
            Id::EC => KeyAlgorithm::Ec,
            other => return Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        };
        let pub_key = PKey::public_key_from_der(&pri_key.public_key_to_der()?)?;

        Ok(Self {
            algorithm,
            pri_key,
            pub_key,
        })
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰對，演算法由金鑰本身判斷。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        Self::from_private(PKey::private_key_from_pem(pri_key_pem)?)
    }

    /// 從存儲讀取 PEM 私鑰。
    pub fn from_storage(storage: &dyn Storage, path: &str) -> Result<Self> {
        let pem = storage.read_file(path)?;
        Self::from_pem(&pem)
    }

    /// 將私鑰（PKCS#8 PEM）與公鑰（PEM）寫入存儲。
    pub fn store(&self, storage: &dyn Storage, private_path: &str, public_path: &str) -> Result<()> {
        storage.write_file(private_path, &self.private_key_pem()?)?;
        storage.write_file(public_path, &self.public_key_pem()?)?;
        Ok(())
    }

    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    pub fn public_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pub_key.public_key_to_pem()?)
    }

    /// 此金鑰的 JWK 表示。
    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::new(self)?)
    }

    /// 計算 RFC 7638 縮影（thumbprint）：標準化 JWK 的 SHA-256，以 base64url 回傳。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint()?)
    }
}
