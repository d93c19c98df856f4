mod rest;

pub use rest::RestIdentityProvider;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

use crate::error::CredentialError;

/// External identity reference. Owned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// `None` means the user signed out.
pub type IdentityEvent = Option<Identity>;

/// Short-lived bearer credential issued by the identity provider.
pub struct BearerToken(SecretString);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn as_secret(&self) -> &SecretString {
        &self.0
    }

    /// Owned copy for requests that carry their own credential
    pub fn to_secret(&self) -> SecretString {
        SecretString::from(self.expose().to_string())
    }
}

impl Clone for BearerToken {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

impl From<SecretString> for BearerToken {
    fn from(secret: SecretString) -> Self {
        Self(secret)
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Stream of identity transitions. The current state is delivered first.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<IdentityEvent>;

    fn current_identity(&self) -> Option<Identity>;

    /// Returns the freshest token for the signed-in identity, refreshing it when
    /// it is close to expiry or when `force_refresh` is set.
    async fn id_token(&self, force_refresh: bool) -> Result<BearerToken, CredentialError>;

    async fn sign_out(&self);
}

/// Fan-out of identity transitions to every subscriber.
#[derive(Default)]
pub struct IdentityFeed {
    current: Option<Identity>,
    subscribers: Vec<mpsc::UnboundedSender<IdentityEvent>>,
}

impl IdentityFeed {
    pub fn current(&self) -> Option<Identity> {
        self.current.clone()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<IdentityEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, so this cannot fail
        let _ = tx.send(self.current.clone());
        self.subscribers.push(tx);
        rx
    }

    /// Record the new state and notify subscribers, dropping closed ones
    pub fn publish(&mut self, event: IdentityEvent) {
        self.current = event;
        let current = &self.current;
        self.subscribers.retain(|tx| tx.send(current.clone()).is_ok());
    }
}
