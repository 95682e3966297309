use std::time::Duration;

use reqwest::{blocking::Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    account::{Account, AccountError},
    challenge::{dns_txt_value, Challenge, ChallengeStatus, ChallengeType},
    clock::Poller,
    jws::JwsError,
    payload::{ChallengeResponsePayload, Identifier},
    probe::ProbeError,
    session::{Rejection, Session},
};

/// 輪詢授權與本地預檢的間隔。
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// 授權與挑戰驗證過程中的錯誤。
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Account error: {0}")]
    Account(#[from] AccountError),
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),
    #[error("Request failed: {status:?}, {headers:?}, {body:?}")]
    RequestErrorDetailed {
        status: StatusCode,
        headers: reqwest::header::HeaderMap,
        body: String,
    },
    #[error("Authorization for {domain} does not offer a {challenge_type} challenge")]
    ChallengeNotFound {
        domain: String,
        challenge_type: ChallengeType,
    },
    #[error("Verify `{domain}` via {challenge_type} locally timed out after {timeout:?}")]
    LocalVerificationTimeout {
        domain: String,
        challenge_type: ChallengeType,
        timeout: Duration,
    },
    #[error("Verify `{domain}` via {challenge_type} at the CA timed out after {timeout:?}")]
    CaVerificationTimeout {
        domain: String,
        challenge_type: ChallengeType,
        timeout: Duration,
    },
    #[error("Verify `{domain}` via {challenge_type} failed, the authorization status became {status:?}")]
    ChallengeFailed {
        domain: String,
        challenge_type: ChallengeType,
        status: AuthorizationStatus,
    },
}

impl AuthorizationError {
    /// 逾時與傳輸錯誤可以重試；CA 判定失敗則不行。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Request(_) | Self::LocalVerificationTimeout { .. } | Self::CaVerificationTimeout { .. }
        )
    }
}

impl From<Rejection> for AuthorizationError {
    fn from(rejection: Rejection) -> Self {
        AuthorizationError::RequestErrorDetailed {
            status: rejection.status,
            headers: rejection.headers,
            body: rejection.body,
        }
    }
}

type Result<T> = std::result::Result<T, AuthorizationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Expired,
    Revoked,
    Deactivated,
}

/// CA 回傳的授權物件中本 crate 會使用的欄位，其餘欄位忽略。
#[derive(Debug, Deserialize)]
struct AuthorizationResource {
    identifier: Identifier,
    status: AuthorizationStatus,
    #[serde(default)]
    expires: Option<String>,
    #[serde(default)]
    challenges: Vec<Challenge>,
    #[serde(default)]
    wildcard: bool,
}

/// 訂單中某一個識別項的授權。
#[derive(Debug, Clone)]
pub struct Authorization {
    pub url: String,
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    pub expires: Option<String>,
    pub challenges: Vec<Challenge>,
    pub wildcard: bool,
    /// 萬用字元授權為 `*.` 加上識別項，否則即識別項本身。
    pub domain: String,
}

impl Authorization {
    /// 以 GET 取得授權，預期狀態碼 200。
    pub fn fetch(session: &Session, url: &str) -> Result<Self> {
        let resource = Self::load(session, url)?;
        let mut authorization = Self {
            url: url.to_string(),
            identifier: resource.identifier.clone(),
            status: resource.status,
            expires: None,
            challenges: Vec::new(),
            wildcard: false,
            domain: String::new(),
        };
        authorization.populate(resource);
        Ok(authorization)
    }

    /// 重新取得授權並更新狀態。
    pub fn refresh(&mut self, session: &Session) -> Result<()> {
        let resource = Self::load(session, &self.url)?;
        self.populate(resource);
        Ok(())
    }

    fn load(session: &Session, url: &str) -> Result<AuthorizationResource> {
        let response = session.get(url)?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }
        Ok(serde_json::from_str(&response.text()?)?)
    }

    fn populate(&mut self, resource: AuthorizationResource) {
        self.identifier = resource.identifier;
        self.status = resource.status;
        self.expires = resource.expires;
        self.challenges = resource.challenges;
        self.wildcard = resource.wildcard;
        self.domain = if self.wildcard {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        };
    }

    /// 取得指定類型的挑戰。
    pub fn challenge(&self, challenge_type: ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type)
    }

    /// 驗證此授權：本地預檢、通知 CA、等待 CA 結果。
    ///
    /// 授權或挑戰不是 `pending` 時直接返回。逾時以秒為單位，0 表示不設上限。
    pub fn verify(
        &mut self,
        session: &Session,
        account: &Account,
        challenge_type: ChallengeType,
        local_timeout: u64,
        ca_timeout: u64,
    ) -> Result<()> {
        // 只有 HTTP-01 與 DNS-01 有本地預檢方式
        if challenge_type == ChallengeType::Other {
            return Err(self.not_found(challenge_type));
        }
        let challenge = self
            .challenge(challenge_type)
            .cloned()
            .ok_or_else(|| self.not_found(challenge_type))?;

        if self.status != AuthorizationStatus::Pending
            || challenge.status != ChallengeStatus::Pending
        {
            debug!(domain = %self.domain, status = ?self.status, "Authorization not pending, skipping");
            return Ok(());
        }

        let key_authorization = challenge.key_authorization(&account.thumbprint()?);

        self.verify_locally(session, challenge_type, &challenge, &key_authorization, local_timeout)?;

        let payload = ChallengeResponsePayload::new(&key_authorization);
        let response = session.post_signed::<AuthorizationError>(&challenge.url, || {
            Ok(account.sign_with_kid(&challenge.url, &payload)?)
        })?;
        if response.status() != StatusCode::OK {
            return Err(rejected(response));
        }
        info!(domain = %self.domain, %challenge_type, "Challenge submitted to CA");

        self.verify_ca(session, challenge_type, ca_timeout)
    }

    fn not_found(&self, challenge_type: ChallengeType) -> AuthorizationError {
        AuthorizationError::ChallengeNotFound {
            domain: self.domain.clone(),
            challenge_type,
        }
    }

    fn verify_locally(
        &self,
        session: &Session,
        challenge_type: ChallengeType,
        challenge: &Challenge,
        key_authorization: &str,
        timeout_secs: u64,
    ) -> Result<()> {
        let domain = &self.identifier.value;
        let dns_content = dns_txt_value(key_authorization);

        Poller::new(session.clock(), POLL_INTERVAL, timeout_secs).run(
            |attempt| -> Result<Option<()>> {
                debug!(domain = %domain, %challenge_type, attempt, "Local pre-check");
                let ready = match challenge_type {
                    ChallengeType::Http01 => {
                        session
                            .probe()
                            .check_http(domain, &challenge.token, key_authorization)?
                    }
                    ChallengeType::Dns01 => session.probe().check_dns(domain, &dns_content)?,
                    ChallengeType::Other => return Err(self.not_found(challenge_type)),
                };
                Ok(ready.then_some(()))
            },
            |timeout| AuthorizationError::LocalVerificationTimeout {
                domain: self.domain.clone(),
                challenge_type,
                timeout,
            },
        )
    }

    fn verify_ca(
        &mut self,
        session: &Session,
        challenge_type: ChallengeType,
        timeout_secs: u64,
    ) -> Result<()> {
        let domain = self.domain.clone();

        Poller::new(session.clock(), POLL_INTERVAL, timeout_secs).run_after_sleep(
            |attempt| -> Result<Option<()>> {
                self.refresh(session)?;
                debug!(domain = %self.domain, status = ?self.status, attempt, "Polling authorization");
                Ok((self.status != AuthorizationStatus::Pending).then_some(()))
            },
            |timeout| AuthorizationError::CaVerificationTimeout {
                domain: domain.clone(),
                challenge_type,
                timeout,
            },
        )?;

        if self.status != AuthorizationStatus::Valid {
            return Err(AuthorizationError::ChallengeFailed {
                domain,
                challenge_type,
                status: self.status,
            });
        }
        info!(domain = %self.domain, "Authorization valid");
        Ok(())
    }
}

fn rejected(response: Response) -> AuthorizationError {
    let status = response.status();
    let headers = response.headers().clone();
    match response.text() {
        Ok(body) => AuthorizationError::RequestErrorDetailed {
            status,
            headers,
            body,
        },
        Err(err) => AuthorizationError::Request(err),
    }
}
