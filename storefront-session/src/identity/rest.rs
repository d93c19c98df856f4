use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex as FeedLock;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use super::{BearerToken, Identity, IdentityEvent, IdentityFeed, IdentityProvider};
use crate::error::CredentialError;

// Refresh tokens 5 minutes before they actually expire
const EXPIRY_BUFFER: Duration = Duration::minutes(5);
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Identity provider backed by a secure-token exchange endpoint.
///
/// The provider holds a long-lived refresh token and trades it for short-lived
/// id tokens on demand.
pub struct RestIdentityProvider {
    http_client: Client,
    token_url: String,
    api_key: String,
    credential: Mutex<Option<Credential>>,
    feed: FeedLock<IdentityFeed>,
}

struct Credential {
    identity: Identity,
    refresh_token: SecretString,
    id_token: SecretString,
    expires_at: DateTime<Utc>,
}

impl Credential {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now() + EXPIRY_BUFFER
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: ExpiresIn,
    user_id: String,
}

/// The endpoint sends `expires_in` as a decimal string; accept a number too
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Result<i64, CredentialError> {
        match self {
            Self::Seconds(s) => Ok(*s),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| CredentialError::Provider(format!("invalid expires_in: {}", s))),
        }
    }

    /// Absolute expiry measured from `now`
    fn deadline(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, CredentialError> {
        let seconds = self.seconds()?;
        Duration::try_seconds(seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| CredentialError::Provider(format!("expires_in out of range: {}", seconds)))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl ErrorResponse {
    fn message(body: &str) -> String {
        serde_json::from_str::<ErrorResponse>(body)
            .ok()
            .and_then(|e| e.error)
            .and_then(|e| e.message)
            .unwrap_or_else(|| body.trim().to_string())
    }
}

impl RestIdentityProvider {
    pub fn new(
        token_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let http_client = Client::builder().timeout(HTTP_TIMEOUT).build()?;

        Ok(Self {
            http_client,
            token_url: token_url.into(),
            api_key: api_key.into(),
            credential: Mutex::new(None),
            feed: FeedLock::new(IdentityFeed::default()),
        })
    }

    /// Exchange a refresh token and publish the resulting identity
    pub async fn sign_in_with_refresh_token(
        &self,
        refresh_token: SecretString,
    ) -> Result<Identity, CredentialError> {
        let credential = self.exchange(&refresh_token).await?;
        let identity = credential.identity.clone();

        *self.credential.lock().await = Some(credential);
        tracing::info!(uid = %identity.uid, "Signed in with refresh token");
        self.feed.lock().publish(Some(identity.clone()));

        Ok(identity)
    }

    async fn exchange(&self, refresh_token: &SecretString) -> Result<Credential, CredentialError> {
        let req = RefreshRequest {
            grant_type: "refresh_token",
            refresh_token: refresh_token.expose_secret(),
        };

        let resp = self
            .http_client
            .post(&self.token_url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = ErrorResponse::message(&body);
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    CredentialError::Revoked(message)
                }
                _ => CredentialError::Provider(format!("({}) {}", status, message)),
            });
        }

        let resp = resp.json::<RefreshResponse>().await?;
        let expires_at = resp.expires_in.deadline(Utc::now())?;

        Ok(Credential {
            identity: Identity::new(resp.user_id),
            refresh_token: SecretString::from(resp.refresh_token),
            id_token: SecretString::from(resp.id_token),
            expires_at,
        })
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<IdentityEvent> {
        self.feed.lock().subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.feed.lock().current()
    }

    async fn id_token(&self, force_refresh: bool) -> Result<BearerToken, CredentialError> {
        let mut guard = self.credential.lock().await;
        let credential = guard.as_mut().ok_or(CredentialError::NoIdentity)?;

        if !force_refresh && !credential.is_expired() {
            return Ok(BearerToken::new(credential.id_token.expose_secret()));
        }

        tracing::debug!(uid = %credential.identity.uid, force_refresh, "Refreshing id token");
        let fresh = self.exchange(&credential.refresh_token).await?;
        if fresh.identity.uid != credential.identity.uid {
            return Err(CredentialError::Provider(
                "token endpoint returned a different user".to_string(),
            ));
        }

        credential.refresh_token = fresh.refresh_token;
        credential.id_token = fresh.id_token;
        credential.expires_at = fresh.expires_at;
        Ok(BearerToken::new(credential.id_token.expose_secret()))
    }

    async fn sign_out(&self) {
        let previous = self.credential.lock().await.take();
        if let Some(credential) = previous {
            tracing::info!(uid = %credential.identity.uid, "Signed out");
        }
        self.feed.lock().publish(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_and_numeric_expiry() {
        let resp: RefreshResponse = serde_json::from_str(
            r#"{"id_token":"a","refresh_token":"b","expires_in":"3600","user_id":"uid-1"}"#,
        )
        .unwrap();
        assert_eq!(resp.expires_in.seconds().unwrap(), 3600);

        let resp: RefreshResponse = serde_json::from_str(
            r#"{"id_token":"a","refresh_token":"b","expires_in":60,"user_id":"uid-1"}"#,
        )
        .unwrap();
        assert_eq!(resp.expires_in.seconds().unwrap(), 60);
    }

    #[test]
    fn out_of_range_expiry_is_a_provider_error() {
        let now = Utc::now();
        assert_eq!(
            ExpiresIn::Seconds(3600).deadline(now).unwrap(),
            now + Duration::hours(1)
        );

        let err = ExpiresIn::Seconds(i64::MAX).deadline(now).unwrap_err();
        assert!(matches!(err, CredentialError::Provider(_)));

        let err = ExpiresIn::Text("99999999999999999".to_string())
            .deadline(now)
            .unwrap_err();
        assert!(matches!(err, CredentialError::Provider(_)));
    }

    #[test]
    fn extracts_provider_error_message() {
        let body = r#"{"error":{"code":400,"message":"TOKEN_EXPIRED"}}"#;
        assert_eq!(ErrorResponse::message(body), "TOKEN_EXPIRED");
        assert_eq!(ErrorResponse::message("Bad gateway\n"), "Bad gateway");
    }

    #[test]
    fn credential_expires_within_buffer() {
        let credential = |expires_at| Credential {
            identity: Identity::new("uid-1"),
            refresh_token: SecretString::from("r".to_string()),
            id_token: SecretString::from("i".to_string()),
            expires_at,
        };

        assert!(credential(Utc::now() + Duration::minutes(4)).is_expired());
        assert!(!credential(Utc::now() + Duration::minutes(30)).is_expired());
    }

    #[tokio::test]
    async fn id_token_without_sign_in_is_no_identity() {
        let provider = RestIdentityProvider::new("http://localhost:1/token", "key").unwrap();
        let err = provider.id_token(false).await.unwrap_err();
        assert!(matches!(err, CredentialError::NoIdentity));
    }

    #[tokio::test]
    async fn sign_out_publishes_none() {
        let provider = RestIdentityProvider::new("http://localhost:1/token", "key").unwrap();
        let mut rx = provider.subscribe();
        assert_eq!(rx.recv().await.unwrap(), None);

        provider.sign_out().await;
        assert_eq!(rx.recv().await.unwrap(), None);
        assert!(provider.current_identity().is_none());
    }
}
