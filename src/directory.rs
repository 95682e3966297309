use reqwest::{blocking::Client, header::CONTENT_TYPE, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Let's Encrypt 正式環境的目錄 URL。
pub const LETSENCRYPT_PRODUCTION_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt 測試環境的目錄 URL。
pub const LETSENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// JSON 解析錯誤，包含缺少必要的端點欄位。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected status code {status} from directory {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("Directory {url} responded with non-JSON content type {content_type:?}")]
    NotJson { url: String, content_type: String },
}

type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// ACME 目錄：各項操作的端點 URL。一個工作階段內不會改變。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// 帳戶金鑰輪替。
    #[serde(rename = "keyChange")]
    pub key_change: String,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
}

impl Directory {
    /// 依 `use_staging` 選擇 Let's Encrypt 的測試或正式環境並取得目錄。
    pub fn resolve(client: &Client, use_staging: bool) -> DirectoryResult<Self> {
        let url = if use_staging {
            LETSENCRYPT_STAGING_DIRECTORY
        } else {
            LETSENCRYPT_PRODUCTION_DIRECTORY
        };
        Self::fetch(client, url)
    }

    /// 對目錄 URL 發送一次 GET 請求並解析。不做重試。
    ///
    /// # 錯誤
    ///
    /// - 狀態碼不是 200 時回傳 [`DirectoryError::UnexpectedStatus`]。
    /// - `Content-Type` 不是 JSON 時回傳 [`DirectoryError::NotJson`]。
    /// - 缺少任何一個端點時回傳 [`DirectoryError::Json`]。
    pub fn fetch(client: &Client, url: &str) -> DirectoryResult<Self> {
        debug!(url, "Fetching ACME directory");
        let response = client.get(url).send()?;

        if response.status() != StatusCode::OK {
            return Err(DirectoryError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("json") {
            return Err(DirectoryError::NotJson {
                url: url.to_string(),
                content_type,
            });
        }

        let body = response.bytes()?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "keyChange": "https://ca/acme/key-change",
        "meta": {"termsOfService": "https://ca/terms"},
        "newAccount": "https://ca/acme/new-acct",
        "newNonce": "https://ca/acme/new-nonce",
        "newOrder": "https://ca/acme/new-order",
        "revokeCert": "https://ca/acme/revoke-cert"
    }"#;

    #[test]
    fn test_fetch_directory() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/directory")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(BODY)
            .create();

        let dir = Directory::fetch(&Client::new(), &format!("{}/directory", server.url())).unwrap();
        assert_eq!(dir.new_nonce, "https://ca/acme/new-nonce");
        assert_eq!(dir.key_change, "https://ca/acme/key-change");
    }

    #[test]
    fn test_rejects_non_json_and_bad_status() {
        let mut server = mockito::Server::new();
        let _html = server
            .mock("GET", "/html")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(BODY)
            .create();
        let _down = server.mock("GET", "/down").with_status(503).create();

        let client = Client::new();
        assert!(matches!(
            Directory::fetch(&client, &format!("{}/html", server.url())),
            Err(DirectoryError::NotJson { .. })
        ));
        assert!(matches!(
            Directory::fetch(&client, &format!("{}/down", server.url())),
            Err(DirectoryError::UnexpectedStatus { status: 503, .. })
        ));
    }

    #[test]
    fn test_missing_endpoint_is_an_error() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/partial")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"newNonce": "n", "newAccount": "a"}"#)
            .create();

        let result = Directory::fetch(&Client::new(), &format!("{}/partial", server.url()));
        assert!(matches!(result, Err(DirectoryError::Json(_))));
    }
}
