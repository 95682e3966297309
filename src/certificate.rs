use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    x509::X509,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Invalid certificate timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("No PEM certificate block found in response")]
    NoCertificate,
}

type Result<T> = std::result::Result<T, CertificateError>;

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// 從 CA 回傳的憑證鏈中取出的 PEM 內容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedCertificate {
    /// 第一個 PEM 區塊（終端實體憑證）。
    pub certificate: String,
    /// 所有 PEM 區塊，各自去除前後空白後以 `\n` 串接。
    pub certificate_full_chained: String,
}

/// 從任意文字中擷取所有 `CERTIFICATE` PEM 區塊；找不到時回傳 `None`。
pub fn extract_certificate(body: &str) -> Option<ExtractedCertificate> {
    let mut blocks = Vec::new();
    let mut rest = body;

    while let Some(start) = rest.find(PEM_BEGIN) {
        let after_begin = &rest[start..];
        let Some(end) = after_begin.find(PEM_END) else {
            break;
        };
        let block_end = end + PEM_END.len();
        blocks.push(after_begin[..block_end].trim());
        rest = &after_begin[block_end..];
    }

    let certificate = blocks.first()?.to_string();
    Some(ExtractedCertificate {
        certificate,
        certificate_full_chained: blocks.join("\n"),
    })
}

/// 憑證有效期間，序列化欄位與訂單快取 `ORDER` 中的鍵名一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValidity {
    #[serde(rename = "validFromTimestamp")]
    pub valid_from_timestamp: i64,
    #[serde(rename = "validToTimestamp")]
    pub valid_to_timestamp: i64,
    /// `Y-m-d H:i:s`（UTC）
    #[serde(rename = "validFromTime")]
    pub valid_from_time: String,
    #[serde(rename = "validToTime")]
    pub valid_to_time: String,
}

impl CertificateValidity {
    const TIME_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

    fn from_timestamps(from: i64, to: i64) -> Result<Self> {
        let format = |ts: i64| -> Result<String> {
            DateTime::<Utc>::from_timestamp(ts, 0)
                .map(|dt| dt.format(Self::TIME_FORMAT).to_string())
                .ok_or(CertificateError::InvalidTimestamp(ts))
        };

        Ok(Self {
            valid_from_timestamp: from,
            valid_to_timestamp: to,
            valid_from_time: format(from)?,
            valid_to_time: format(to)?,
        })
    }
}

/// X.509 證書封裝結構，提供有效期間讀取與續約檢查功能
pub struct Certificate {
    pub cert: X509,
}

impl Certificate {
    /// 根據 PEM 格式字串解析 X.509 證書。
    pub fn new(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes())?;
        Ok(Certificate { cert })
    }

    /// DER 編碼，供撤銷請求使用。
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.cert.to_der()?)
    }

    /// 讀取 `notBefore` 與 `notAfter`。
    pub fn validity(&self) -> Result<CertificateValidity> {
        CertificateValidity::from_timestamps(
            unix_timestamp(self.cert.not_before())?,
            unix_timestamp(self.cert.not_after())?,
        )
    }

    /// 判斷證書是否應該進行續約：剩餘有效時間不足 `threshold_days` 天（或已過期）時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let now = Asn1Time::from_unix(Utc::now().timestamp())?;
        let diff = now.diff(self.cert.not_after())?;
        let remaining_seconds = diff.days as i64 * 86400 + diff.secs as i64;
        let threshold_seconds = threshold_days as i64 * 86400;

        debug!(remaining_seconds, threshold_seconds, "Checked certificate expiry");

        Ok(remaining_seconds < threshold_seconds)
    }
}

fn unix_timestamp(time: &Asn1TimeRef) -> Result<i64> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    Ok(diff.days as i64 * 86400 + diff.secs as i64)
}
