use std::sync::Arc;

use async_trait::async_trait;
use storefront_api::endpoints::auth::RegisterUser;
use storefront_api::endpoints::users::{AppUser, UpdateCurrentUser};
use storefront_api::{Authorized, Client, Request, StorefrontApiError};

use crate::error::{AuthError, ResolutionError};
use crate::identity::{BearerToken, Identity};
use crate::token::TokenSupplier;

/// Backend operations the session layer depends on.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn current_user(&self, token: &BearerToken) -> Result<AppUser, StorefrontApiError>;

    async fn register(&self, request: Authorized<RegisterUser>)
        -> Result<AppUser, StorefrontApiError>;

    async fn update_current_user(
        &self,
        request: Authorized<UpdateCurrentUser>,
    ) -> Result<AppUser, StorefrontApiError>;
}

/// [`ProfileSource`] over the storefront REST API
pub struct ApiProfileSource {
    client: Arc<Client>,
}

impl ApiProfileSource {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProfileSource for ApiProfileSource {
    async fn current_user(&self, token: &BearerToken) -> Result<AppUser, StorefrontApiError> {
        let req = Authorized::bearer(Request::users().me(), token.to_secret());
        self.client.send_authorized(req).await
    }

    async fn register(
        &self,
        request: Authorized<RegisterUser>,
    ) -> Result<AppUser, StorefrontApiError> {
        self.client.send_authorized(request).await
    }

    async fn update_current_user(
        &self,
        request: Authorized<UpdateCurrentUser>,
    ) -> Result<AppUser, StorefrontApiError> {
        self.client.send_authorized(request).await
    }
}

/// A profile together with the token that fetched it
#[derive(Debug, Clone)]
pub struct Resolved {
    pub profile: AppUser,
    pub token: BearerToken,
}

/// Turns an identity into an application profile.
pub struct SessionResolver {
    tokens: Arc<TokenSupplier>,
    profiles: Arc<dyn ProfileSource>,
}

impl SessionResolver {
    pub fn new(tokens: Arc<TokenSupplier>, profiles: Arc<dyn ProfileSource>) -> Self {
        Self { tokens, profiles }
    }

    /// One round trip, no retries. Does not require an active session.
    pub async fn resolve(&self, identity: &Identity) -> Result<Resolved, ResolutionError> {
        let token = self.tokens.fetch(false).await?;
        let profile = self.profiles.current_user(&token).await?;

        if !profile.uid.is_empty() && profile.uid != identity.uid {
            tracing::debug!(
                uid = %identity.uid,
                profile_uid = %profile.uid,
                "Profile uid differs from identity"
            );
        }

        Ok(Resolved { profile, token })
    }

    /// Link a new identity to a backend profile
    pub async fn register(&self, form: RegisterUser) -> Result<AppUser, AuthError> {
        form.validate().map_err(AuthError::Validation)?;
        let request = self.tokens.attach(form).await?;
        Ok(self.profiles.register(request).await?)
    }

    pub async fn update_profile(&self, update: UpdateCurrentUser) -> Result<AppUser, AuthError> {
        let request = self.tokens.attach(update).await?;
        if !request.is_authenticated() {
            return Err(AuthError::NoSession);
        }
        Ok(self.profiles.update_current_user(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{sample_user, MockIdentityProvider, MockProfileSource};
    use secrecy::SecretString;
    use storefront_api::endpoints::Role;
    use storefront_api::{StatusCode, DEFAULT_BASE_URL};

    struct Fixture {
        provider: Arc<MockIdentityProvider>,
        profiles: Arc<MockProfileSource>,
        tokens: Arc<TokenSupplier>,
        resolver: SessionResolver,
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(MockIdentityProvider::new());
        let profiles = Arc::new(MockProfileSource::new());
        let client = Arc::new(Client::new(DEFAULT_BASE_URL));
        let tokens = Arc::new(TokenSupplier::new(provider.clone(), client));
        let resolver = SessionResolver::new(tokens.clone(), profiles.clone());
        Fixture {
            provider,
            profiles,
            tokens,
            resolver,
        }
    }

    #[tokio::test]
    async fn resolves_profile_for_identity() {
        let f = fixture();
        f.profiles.insert(sample_user("uid-1", Role::Admin));
        let identity = f.provider.sign_in("uid-1");

        let resolved = f.resolver.resolve(&identity).await.unwrap();
        assert_eq!(resolved.profile.role, Role::Admin);
        assert!(resolved.token.expose().starts_with("token-uid-1-"));
        // Resolution has no side effect on the supplier
        assert!(!f.tokens.is_primed());
    }

    #[tokio::test]
    async fn rejected_lookup_is_unauthorized() {
        let f = fixture();
        f.profiles.reject("uid-1", StatusCode::UNAUTHORIZED);
        let identity = f.provider.sign_in("uid-1");

        let err = f.resolver.resolve(&identity).await.unwrap_err();
        assert!(matches!(err, ResolutionError::Unauthorized { status: 401 }));
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let f = fixture();
        let identity = f.provider.sign_in("uid-1");

        let err = f.resolver.resolve(&identity).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
        assert_eq!(f.profiles.lookups(), 1);
    }

    #[tokio::test]
    async fn register_validates_before_calling_backend() {
        let f = fixture();
        let form = RegisterUser::new("uid-1", "a@b.c", SecretString::from("123".to_string()));

        let err = f.resolver.register(form).await.unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(f.profiles.registrations(), 0);
    }

    #[tokio::test]
    async fn register_creates_profile() {
        let f = fixture();
        let form = RegisterUser::new("uid-1", "a@b.c", SecretString::from("123456".to_string()))
            .first_name("Ada");

        let user = f.resolver.register(form).await.unwrap();
        assert_eq!(user.uid, "uid-1");
        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.role, Role::User);
        assert_eq!(f.profiles.registrations(), 1);
    }

    #[tokio::test]
    async fn update_requires_active_session() {
        let f = fixture();
        let err = f
            .resolver
            .update_profile(UpdateCurrentUser::new().first_name("Ada"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoSession));
    }
}
