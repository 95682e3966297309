use std::time::Duration;

use reqwest::{blocking::Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::clock::Clock;

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// new-nonce 端點回應了非 200 的狀態碼。
    #[error("Unexpected status code from new-nonce endpoint: {0}")]
    UnexpectedStatus(u16),
    /// 當回應中缺少 `Replay-Nonce` 標頭（或為空值）時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    /// 當標頭值無法轉換成字串時回傳此錯誤。
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::ToStrError),
    /// 已達重試上限。
    #[error("Failed to obtain a nonce after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<NonceError>,
    },
}

/// 定義取得 Nonce 的行為。
pub trait NonceT {
    /// 嘗試取得 Nonce，回傳包含 Nonce 字串或錯誤的 `Result`。
    fn get(&self) -> Result<String, NonceError>;
}

/// 透過 HTTP `HEAD` 請求取得 `Replay-Nonce` 的實作。每次呼叫都重新請求，不做快取。
#[derive(Debug, Clone)]
pub struct Nonce {
    client: Client,
    url: String,
}

impl Nonce {
    /// 以共用的 HTTP 客戶端與 new-nonce URL 建立實例。
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Nonce {
            client,
            url: url.into(),
        }
    }
}

impl NonceT for Nonce {
    fn get(&self) -> Result<String, NonceError> {
        let response = self.client.head(&self.url).send()?;

        if response.status() != StatusCode::OK {
            return Err(NonceError::UnexpectedStatus(response.status().as_u16()));
        }

        match response.headers().get("Replay-Nonce") {
            Some(nonce) => {
                let nonce = nonce.to_str()?.trim();
                if nonce.is_empty() {
                    return Err(NonceError::NoNonceHeader);
                }
                debug!(url = %self.url, "Fetched replay nonce");
                Ok(nonce.to_string())
            }
            None => Err(NonceError::NoNonceHeader),
        }
    }
}

/// 模擬 Nonce 實作，通常用於測試環境中提供固定的 Nonce 值。
#[derive(Debug, Clone)]
pub struct MockNonce {
    value: String,
}

impl MockNonce {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl NonceT for MockNonce {
    fn get(&self) -> Result<String, NonceError> {
        Ok(self.value.clone())
    }
}

/// 取得 nonce 失敗時的重試策略。
///
/// 預設每 60 秒重試一次，最多嘗試 10 次；[`RetryPolicy::unbounded`] 則永不放棄。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// 失敗後持續重試，直到成功為止。
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }
}

/// 為任意 [`NonceT`] 加上重試行為的包裝。
pub struct RetryingNonce<'a> {
    inner: &'a dyn NonceT,
    policy: RetryPolicy,
    clock: &'a dyn Clock,
}

impl<'a> RetryingNonce<'a> {
    pub fn new(inner: &'a dyn NonceT, policy: RetryPolicy, clock: &'a dyn Clock) -> Self {
        Self {
            inner,
            policy,
            clock,
        }
    }
}

impl NonceT for RetryingNonce<'_> {
    fn get(&self) -> Result<String, NonceError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.inner.get() {
                Ok(nonce) => return Ok(nonce),
                Err(err) => {
                    if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(NonceError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    warn!(
                        attempt = attempts,
                        error = %err,
                        retry_in = ?self.policy.interval,
                        "Failed to fetch nonce, retrying"
                    );
                    self.clock.sleep(self.policy.interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::clock::FakeClock;

    /// 前 `failures` 次呼叫失敗，之後回傳固定值。
    struct FlakyNonce {
        failures: u32,
        calls: Cell<u32>,
    }

    impl NonceT for FlakyNonce {
        fn get(&self) -> Result<String, NonceError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n < self.failures {
                Err(NonceError::NoNonceHeader)
            } else {
                Ok("fresh".into())
            }
        }
    }

    #[test]
    fn test_mock_nonce() {
        let nonce = MockNonce::new("test-nonce-123");
        assert_eq!(nonce.get().unwrap(), "test-nonce-123");
    }

    #[test]
    fn test_retry_until_success() {
        let clock = FakeClock::new();
        let flaky = FlakyNonce {
            failures: 2,
            calls: Cell::new(0),
        };
        let retrying = RetryingNonce::new(&flaky, RetryPolicy::default(), &clock);

        assert_eq!(retrying.get().unwrap(), "fresh");
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(120));
    }

    #[test]
    fn test_retries_exhausted() {
        let clock = FakeClock::new();
        let flaky = FlakyNonce {
            failures: u32::MAX,
            calls: Cell::new(0),
        };
        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        let err = RetryingNonce::new(&flaky, policy, &clock).get().unwrap_err();

        assert!(matches!(err, NonceError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(flaky.calls.get(), 3);
        assert_eq!(clock.sleeps(), 2);
    }

    #[test]
    fn test_http_nonce_requires_header() {
        let mut server = mockito::Server::new();
        let ok = server
            .mock("HEAD", "/new-nonce")
            .with_status(200)
            .with_header("Replay-Nonce", "abc")
            .create();
        let nonce = Nonce::new(Client::new(), format!("{}/new-nonce", server.url()));
        assert_eq!(nonce.get().unwrap(), "abc");
        ok.assert();

        let _missing = server.mock("HEAD", "/bare").with_status(200).create();
        let nonce = Nonce::new(Client::new(), format!("{}/bare", server.url()));
        assert!(matches!(nonce.get(), Err(NonceError::NoNonceHeader)));
    }
}
