use std::fmt;

use openssl::sha::sha256;
use serde::{Deserialize, Serialize};

use crate::{
    base64::encode_url,
    order::{Order, OrderError},
};

/// 表示 ACME 挑戰的類型。只支援 `http-01` 與 `dns-01`，其他類型會被解析為 [`ChallengeType::Other`] 並忽略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(other, rename = "other")]
    Other,
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示 ACME 挑戰的狀態，用來追蹤挑戰進展。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 判斷該狀態是否為終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// 授權中的一個挑戰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub url: String,
    pub status: ChallengeStatus,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
}

impl Challenge {
    /// `token + "." + thumbprint`
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        key_authorization(&self.token, thumbprint)
    }
}

pub fn key_authorization(token: &str, thumbprint: &str) -> String {
    format!("{}.{}", token, thumbprint)
}

/// 根據 key authorization 計算 DNS TXT 記錄值：SHA-256 後以 base64url 編碼。
pub fn dns_txt_value(key_authorization: &str) -> String {
    encode_url(sha256(key_authorization.as_bytes()))
}

/// 使用者需要發佈的驗證資料。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeCredential {
    /// 將 `file_content` 放在 `http://{identifier}/.well-known/acme-challenge/{file_name}`。
    Http {
        identifier: String,
        file_name: String,
        file_content: String,
    },
    /// 在 `_acme-challenge.{identifier}` 新增內容為 `dns_content` 的 TXT 記錄。
    Dns {
        identifier: String,
        dns_content: String,
    },
}

impl ChallengeCredential {
    /// 依挑戰類型建立驗證資料；不支援的類型回傳 `None`。
    pub fn new(
        challenge_type: ChallengeType,
        identifier: &str,
        token: &str,
        thumbprint: &str,
    ) -> Option<Self> {
        let content = key_authorization(token, thumbprint);
        match challenge_type {
            ChallengeType::Http01 => Some(Self::Http {
                identifier: identifier.to_string(),
                file_name: token.to_string(),
                file_content: content,
            }),
            ChallengeType::Dns01 => Some(Self::Dns {
                identifier: identifier.to_string(),
                dns_content: dns_txt_value(&content),
            }),
            ChallengeType::Other => None,
        }
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Http { identifier, .. } | Self::Dns { identifier, .. } => identifier,
        }
    }
}

/// 尚待完成的挑戰：類型、驗證資料與所屬授權在訂單中的位置。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub challenge_type: ChallengeType,
    pub credential: ChallengeCredential,
    pub(crate) authorization_index: usize,
}

impl PendingChallenge {
    /// 在驗證資料發佈後呼叫：先做本地預檢，再通知 CA 並等待結果。
    ///
    /// 訂單的所有授權都已有效時直接返回。逾時參數以秒為單位，0 表示不設上限。
    pub fn verify(
        &self,
        order: &mut Order<'_>,
        local_timeout: u64,
        ca_timeout: u64,
    ) -> Result<(), OrderError> {
        if order.is_all_authorization_valid() {
            return Ok(());
        }
        order.verify_authorization(
            self.authorization_index,
            self.challenge_type,
            local_timeout,
            ca_timeout,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenges_tolerates_unknown_types() {
        let json = r#"[
            {"type": "http-01", "url": "https://ca/chall/1", "status": "pending", "token": "tok"},
            {"type": "tls-alpn-01", "url": "https://ca/chall/2", "status": "pending", "token": "tok"},
            {"type": "dns-01", "url": "https://ca/chall/3", "status": "valid", "token": "tok",
             "validated": "2024-01-01T00:00:00Z"}
        ]"#;
        let challenges: Vec<Challenge> = serde_json::from_str(json).unwrap();

        assert_eq!(challenges[0].challenge_type, ChallengeType::Http01);
        assert_eq!(challenges[1].challenge_type, ChallengeType::Other);
        assert_eq!(challenges[2].status, ChallengeStatus::Valid);
        assert_eq!(challenges[0].key_authorization("thumb"), "tok.thumb");
    }

    #[test]
    fn test_http_credential() {
        let cred = ChallengeCredential::new(ChallengeType::Http01, "example.com", "tok", "thumb");
        assert_eq!(
            cred,
            Some(ChallengeCredential::Http {
                identifier: "example.com".into(),
                file_name: "tok".into(),
                file_content: "tok.thumb".into(),
            })
        );
    }

    #[test]
    fn test_dns_credential_is_hashed_key_authorization() {
        let Some(ChallengeCredential::Dns { dns_content, .. }) =
            ChallengeCredential::new(ChallengeType::Dns01, "example.com", "tok", "thumb")
        else {
            panic!("expected dns credential");
        };
        assert_eq!(dns_content, encode_url(sha256(b"tok.thumb")));
        assert_eq!(dns_content.len(), 43);
        assert!(ChallengeCredential::new(ChallengeType::Other, "e", "t", "p").is_none());
    }
}
