pub mod endpoints;
mod error;
mod macros;
pub mod repositories;

pub use crate::error::{ErrorDetail, StorefrontApiError};
pub use tower_api_client::StatusCode;

use repositories::*;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, PoisonError, RwLock};
use tower_api_client::{Client as ApiClient, Request as ApiRequest};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// Shared REST client for the storefront backend.
///
/// Requests sent through [`Client::send`] carry the default `Authorization`
/// header, which the session layer keeps in sync with the live bearer token.
/// [`Client::send_authorized`] uses the credential attached to the request instead.
pub struct Client {
    base_url: String,
    default: RwLock<DefaultClient>,
}

struct DefaultClient {
    inner: Arc<ApiClient>,
    authenticated: bool,
}

impl DefaultClient {
    fn anonymous(base_url: &str) -> Self {
        Self {
            inner: Arc::new(ApiClient::new(base_url)),
            authenticated: false,
        }
    }
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let default = RwLock::new(DefaultClient::anonymous(base_url.as_str()));
        Self { base_url, default }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the default bearer header used by [`Client::send`]
    pub fn set_bearer(&self, token: &SecretString) {
        let inner = ApiClient::new(self.base_url.as_str()).bearer_auth(token.expose_secret());
        let mut default = self.default.write().unwrap_or_else(PoisonError::into_inner);
        *default = DefaultClient {
            inner: Arc::new(inner),
            authenticated: true,
        };
    }

    /// Remove the default bearer header
    pub fn clear_bearer(&self) {
        let mut default = self.default.write().unwrap_or_else(PoisonError::into_inner);
        *default = DefaultClient::anonymous(self.base_url.as_str());
    }

    pub fn has_bearer(&self) -> bool {
        self.default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .authenticated
    }

    pub async fn send<R>(&self, request: R) -> Result<R::Response, StorefrontApiError>
    where
        R: ApiRequest,
    {
        // Clone the handle so the lock is not held across the await
        let inner = self
            .default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .inner
            .clone();
        inner.send(request).await.map_err(From::from)
    }

    pub async fn send_authorized<R>(
        &self,
        request: Authorized<R>,
    ) -> Result<R::Response, StorefrontApiError>
    where
        R: ApiRequest,
    {
        let Authorized { request, bearer } = request;
        let client = match bearer {
            Some(token) => ApiClient::new(self.base_url.as_str()).bearer_auth(token.expose_secret()),
            None => ApiClient::new(self.base_url.as_str()),
        };
        client.send(request).await.map_err(From::from)
    }
}

/// A request paired with the bearer credential it should be sent with.
///
/// `bearer == None` means the request goes out unauthenticated.
#[derive(Debug)]
pub struct Authorized<R> {
    request: R,
    bearer: Option<SecretString>,
}

impl<R> Authorized<R> {
    pub fn new(request: R, bearer: Option<SecretString>) -> Self {
        Self { request, bearer }
    }

    pub fn bearer(request: R, token: SecretString) -> Self {
        Self::new(request, Some(token))
    }

    pub fn unauthenticated(request: R) -> Self {
        Self::new(request, None)
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer.is_some()
    }

    pub fn token(&self) -> Option<&SecretString> {
        self.bearer.as_ref()
    }

    pub fn request(&self) -> &R {
        &self.request
    }

    pub fn into_inner(self) -> R {
        self.request
    }
}

pub struct Request;

impl Request {
    pub fn auth() -> AuthRepository {
        AuthRepository::new()
    }

    pub fn users() -> UserRepository {
        UserRepository::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_follows_set_and_clear() {
        let client = Client::new(DEFAULT_BASE_URL);
        assert!(!client.has_bearer());

        client.set_bearer(&SecretString::from("token-1".to_string()));
        assert!(client.has_bearer());

        client.clear_bearer();
        assert!(!client.has_bearer());
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn authorized_tracks_credential() {
        let req = Authorized::unauthenticated(Request::users().me());
        assert!(!req.is_authenticated());

        let req = Authorized::bearer(req.into_inner(), SecretString::from("t".to_string()));
        assert!(req.is_authenticated());
    }
}
