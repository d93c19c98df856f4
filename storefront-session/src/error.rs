use std::time::Duration;

use storefront_api::StorefrontApiError;
use thiserror::Error;

/// Coarse classification shared by every error in this crate.
///
/// A token the identity provider refuses to issue and a 401 from the backend
/// both land in `Unauthorized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthorized,
    NotFound,
    Network,
    Timeout,
    Rejected,
    Other,
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No signed-in identity")]
    NoIdentity,

    #[error("Identity provider refused to issue a token: {0}")]
    Revoked(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CredentialError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoIdentity | Self::Revoked(_) => FailureKind::Unauthorized,
            Self::Provider(_) => FailureKind::Other,
            Self::Http(e) if e.is_timeout() => FailureKind::Timeout,
            Self::Http(_) => FailureKind::Network,
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Profile lookup rejected the credential ({status})")]
    Unauthorized { status: u16 },

    #[error("No profile exists for this identity")]
    NotFound,

    #[error("Could not obtain a token: {0}")]
    Credential(#[from] CredentialError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error: {0}")]
    Api(String),
}

impl ResolutionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unauthorized { .. } => FailureKind::Unauthorized,
            Self::NotFound => FailureKind::NotFound,
            Self::Credential(e) => e.kind(),
            Self::Network(_) => FailureKind::Network,
            Self::Api(_) => FailureKind::Other,
        }
    }
}

impl From<StorefrontApiError> for ResolutionError {
    fn from(err: StorefrontApiError) -> Self {
        match err.status() {
            Some(status) if err.is_unauthorized() => Self::Unauthorized {
                status: status.as_u16(),
            },
            Some(_) if err.is_not_found() => Self::NotFound,
            Some(_) => Self::Api(err.to_string()),
            None => Self::Network(err.to_string()),
        }
    }
}

/// Failures of the realtime connection. All of them are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handshake rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection dropped: {0}")]
    Dropped(String),

    #[error("Could not obtain a handshake token: {0}")]
    Credential(String),
}

impl ConnectionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Rejected(_) => FailureKind::Rejected,
            Self::Transport(_) | Self::Dropped(_) => FailureKind::Network,
            Self::Credential(_) => FailureKind::Unauthorized,
        }
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Session resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("API error: {0}")]
    Api(#[from] StorefrontApiError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No active session")]
    NoSession,

    #[error("Session coordinator has stopped")]
    CoordinatorStopped,
}

impl AuthError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Credential(e) => e.kind(),
            Self::Resolution(e) => e.kind(),
            Self::Api(e) if e.is_unauthorized() => FailureKind::Unauthorized,
            Self::Api(e) if e.is_not_found() => FailureKind::NotFound,
            Self::Api(e) if e.status().is_none() => FailureKind::Network,
            Self::NoSession => FailureKind::Unauthorized,
            _ => FailureKind::Other,
        }
    }
}

impl From<config::ConfigError> for AuthError {
    fn from(err: config::ConfigError) -> Self {
        AuthError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_api::{ErrorDetail, StatusCode};

    fn api_error(status: StatusCode) -> StorefrontApiError {
        StorefrontApiError::Api(status, ErrorDetail::default())
    }

    #[test]
    fn revoked_credential_is_classified_like_a_401() {
        let revoked = CredentialError::Revoked("TOKEN_EXPIRED".into()).kind();
        let rejected = AuthError::from(api_error(StatusCode::UNAUTHORIZED)).kind();
        assert_eq!(revoked, FailureKind::Unauthorized);
        assert_eq!(revoked, rejected);
    }

    #[test]
    fn maps_backend_statuses_onto_resolution_errors() {
        let err = ResolutionError::from(api_error(StatusCode::UNAUTHORIZED));
        assert!(matches!(err, ResolutionError::Unauthorized { status: 401 }));

        let err = ResolutionError::from(api_error(StatusCode::FORBIDDEN));
        assert!(matches!(err, ResolutionError::Unauthorized { status: 403 }));

        let err = ResolutionError::from(api_error(StatusCode::NOT_FOUND));
        assert_eq!(err.kind(), FailureKind::NotFound);

        let err = ResolutionError::from(api_error(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(matches!(err, ResolutionError::Api(_)));
        assert_eq!(err.kind(), FailureKind::Other);
    }

    #[test]
    fn credential_failure_during_resolution_keeps_its_kind() {
        let err = ResolutionError::from(CredentialError::NoIdentity);
        assert_eq!(err.kind(), FailureKind::Unauthorized);
    }

    #[test]
    fn connection_errors_are_classified() {
        let err = ConnectionError::Timeout(Duration::from_secs(10));
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert_eq!(err.to_string(), "Handshake timed out after 10s");
        assert_eq!(
            ConnectionError::Dropped("eof".into()).kind(),
            FailureKind::Network
        );
    }
}
