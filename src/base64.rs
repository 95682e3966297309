//! ACME 線上格式使用的 base64url（無填充）編碼。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;

/// Base64 解碼失敗時的錯誤類型。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid base64url input: {0}")]
    Invalid(#[from] base64::DecodeError),
}

/// 包裝一段原始位元組，並提供 ACME 所需的 base64url 表示。
///
/// # 示例
///
/// ```
/// # use acme2::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    raw: Vec<u8>,
}

impl Base64 {
    /// 根據任何可轉換為位元組切片的輸入建立實例。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            raw: input.as_ref().to_vec(),
        }
    }

    /// 從 base64url 字串（可帶或不帶填充）還原原始位元組。
    ///
    /// # 錯誤
    ///
    /// 輸入含有非 base64url 字元時回傳 [`DecodeError`]。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let raw = URL_SAFE_NO_PAD.decode(url_encoded.trim_end_matches('='))?;
        Ok(Self { raw })
    }

    /// 回傳 base64url（無填充）編碼字串。
    pub fn base64_url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.raw)
    }

    /// 回傳原始位元組。
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.raw
    }
}

/// 直接將位元組編碼為 base64url 字串的便捷函式。
pub fn encode_url<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_safe_encoding_has_no_padding() {
        let encoded = Base64::new([0xFB, 0xFF]).base64_url();
        assert_eq!(encoded, "-_8");
        assert!(!encoded.contains('='));
    }

    #[test]
    fn test_different_lengths() {
        assert_eq!(Base64::new("a").base64_url(), "YQ");
        assert_eq!(Base64::new("ab").base64_url(), "YWI");
        assert_eq!(Base64::new("abc").base64_url(), "YWJj");
    }

    #[test]
    fn test_from_url_accepts_padding() {
        let b64 = Base64::from_url("SGVsbG8sIFdvcmxkIQ==").unwrap();
        assert_eq!(b64.as_bytes(), b"Hello, World!");
    }

    #[test]
    fn test_invalid_char() {
        assert!(Base64::from_url("SGVs$bG8").is_err());
    }
}
