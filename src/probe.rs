//! 本地預檢：在通知 CA 之前，先確認驗證資料已經可以從外部讀到。

use std::fmt;

use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// 預設的 DNS-over-HTTPS（JSON）解析服務。
pub const DEFAULT_DOH_RESOLVER: &str = "https://dns.google/resolve";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Malformed resolver response from {url}: {source}")]
    MalformedResolverResponse {
        url: String,
        source: reqwest::Error,
    },
}

/// 檢查 HTTP-01 檔案與 DNS-01 TXT 記錄是否已生效。
///
/// 回傳 `Ok(false)` 表示「尚未生效」，呼叫端會稍後重試。
pub trait ChallengeProbe: Send + Sync + fmt::Debug {
    fn check_http(&self, domain: &str, token: &str, expected: &str) -> Result<bool, ProbeError>;

    /// `domain` 可帶 `*.` 前綴，查詢時會去除。
    fn check_dns(&self, domain: &str, expected: &str) -> Result<bool, ProbeError>;
}

/// 以實際網路請求進行預檢的實作。
#[derive(Debug, Clone)]
pub struct WebProbe {
    client: Client,
    resolver_url: String,
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    data: String,
}

impl WebProbe {
    pub fn new(client: Client) -> Self {
        Self::with_resolver(client, DEFAULT_DOH_RESOLVER)
    }

    pub fn with_resolver(client: Client, resolver_url: impl Into<String>) -> Self {
        Self {
            client,
            resolver_url: resolver_url.into(),
        }
    }
}

impl ChallengeProbe for WebProbe {
    fn check_http(&self, domain: &str, token: &str, expected: &str) -> Result<bool, ProbeError> {
        let url = format!("http://{}/.well-known/acme-challenge/{}", domain, token);
        let body = match self.client.get(&url).send().and_then(|r| r.error_for_status()) {
            Ok(response) => response.text().unwrap_or_default(),
            Err(err) => {
                debug!(url, error = %err, "HTTP challenge file not reachable yet");
                return Ok(false);
            }
        };
        Ok(body.trim() == expected)
    }

    fn check_dns(&self, domain: &str, expected: &str) -> Result<bool, ProbeError> {
        let name = format!("_acme-challenge.{}", domain.trim_start_matches("*."));
        let response = match self
            .client
            .get(&self.resolver_url)
            .query(&[("name", name.as_str()), ("type", "TXT")])
            .header("Accept", "application/dns-json")
            .send()
        {
            Ok(response) if response.status() == StatusCode::OK => response,
            Ok(response) => {
                debug!(name, status = response.status().as_u16(), "Resolver refused query");
                return Ok(false);
            }
            Err(err) => {
                debug!(name, error = %err, "Resolver not reachable");
                return Ok(false);
            }
        };

        let parsed: DohResponse =
            response
                .json()
                .map_err(|source| ProbeError::MalformedResolverResponse {
                    url: self.resolver_url.clone(),
                    source,
                })?;

        Ok(parsed
            .answer
            .iter()
            .any(|record| record.data.trim_matches('"') == expected))
    }
}
