// Session lifecycle and realtime connection management for the storefront client
pub mod access;
pub mod config;
pub mod connection;
pub mod coordinator;
mod error;
pub mod identity;
pub mod resolver;
pub mod session;
pub mod token;

// Always expose testing module (integration tests need it)
pub mod testing;

pub use config::Settings;
pub use connection::{
    ConnectionManager, ConnectionOptions, ConnectionSnapshot, ConnectionState, ConnectionView,
    WsTransport,
};
pub use coordinator::{SessionCoordinator, SessionHandle};
pub use error::{AuthError, ConnectionError, CredentialError, FailureKind, ResolutionError};
pub use identity::{BearerToken, Identity, IdentityProvider, RestIdentityProvider};
pub use resolver::{ApiProfileSource, ProfileSource, SessionResolver};
pub use session::{Generation, Session, SessionSnapshot, SessionStatus, SessionTicket};
pub use token::TokenSupplier;
