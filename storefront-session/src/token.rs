use std::sync::Arc;

use parking_lot::Mutex;
use storefront_api::{Authorized, Client};

use crate::error::CredentialError;
use crate::identity::{BearerToken, IdentityProvider};

/// Supplies a live bearer credential to outbound API calls.
///
/// The supplier only caches and forwards what the identity provider issues. It
/// is primed by the session coordinator once a session becomes active and
/// cleared on sign-out, and it never signs anyone out itself.
pub struct TokenSupplier {
    provider: Arc<dyn IdentityProvider>,
    client: Arc<Client>,
    cache: Mutex<Option<BearerToken>>,
}

impl TokenSupplier {
    pub fn new(provider: Arc<dyn IdentityProvider>, client: Arc<Client>) -> Self {
        Self {
            provider,
            client,
            cache: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Fetch a token from the provider without touching the cache
    pub async fn fetch(&self, force_refresh: bool) -> Result<BearerToken, CredentialError> {
        self.provider.id_token(force_refresh).await
    }

    /// Fetch the freshest token and, when a session is active, sync it into the
    /// cache and the client's default header.
    pub async fn current_token(&self, force_refresh: bool) -> Result<BearerToken, CredentialError> {
        let token = self.fetch(force_refresh).await?;

        let mut cache = self.cache.lock();
        // A clear() that raced the fetch wins
        if cache.is_some() {
            self.client.set_bearer(token.as_secret());
            *cache = Some(token.clone());
        }
        Ok(token)
    }

    /// Pair a request with the current credential.
    ///
    /// Without an active session the request goes out unauthenticated.
    pub async fn attach<R>(&self, request: R) -> Result<Authorized<R>, CredentialError> {
        if !self.is_primed() {
            return Ok(Authorized::unauthenticated(request));
        }
        let token = self.current_token(false).await?;
        Ok(Authorized::bearer(request, token.to_secret()))
    }

    /// Refresh the default header and hand out the shared client.
    ///
    /// On a failed fetch the header is removed and the client is still returned.
    pub async fn authenticated_client(&self) -> Arc<Client> {
        if self.is_primed() {
            if let Err(e) = self.current_token(false).await {
                tracing::warn!(error = %e, "Could not refresh bearer token, sending unauthenticated");
                self.client.clear_bearer();
            }
        }
        self.client.clone()
    }

    pub fn prime(&self, token: BearerToken) {
        let mut cache = self.cache.lock();
        self.client.set_bearer(token.as_secret());
        *cache = Some(token);
    }

    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        *cache = None;
        self.client.clear_bearer();
    }

    pub fn is_primed(&self) -> bool {
        self.cache.lock().is_some()
    }
}
