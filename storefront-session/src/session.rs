use std::fmt::Display;

use storefront_api::endpoints::users::AppUser;

use crate::identity::Identity;

/// Monotonic session epoch. Bumped on every sign-in of a different identity and
/// on every sign-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Generation {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Resolving,
    Active,
    /// Resolution failed; a forced sign-out is in flight
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub generation: Generation,
    pub identity: Identity,
    pub profile: Option<AppUser>,
    pub status: SessionStatus,
}

impl Session {
    pub fn resolving(generation: Generation, identity: Identity) -> Self {
        Self {
            generation,
            identity,
            profile: None,
            status: SessionStatus::Resolving,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn ticket(&self) -> SessionTicket {
        SessionTicket {
            generation: self.generation,
            uid: self.identity.uid.clone(),
        }
    }
}

/// What the connection manager needs to know about a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub generation: Generation,
    pub uid: String,
}

/// Read-only view of the session published to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// True until the first identity event has been handled
    pub loading: bool,
    pub session: Option<Session>,
}

impl SessionSnapshot {
    pub fn initial() -> Self {
        Self {
            loading: true,
            session: None,
        }
    }

    pub fn profile(&self) -> Option<&AppUser> {
        self.session.as_ref().and_then(|s| s.profile.as_ref())
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    pub fn active_ticket(&self) -> Option<SessionTicket> {
        self.session
            .as_ref()
            .filter(|s| s.is_active())
            .map(Session::ticket)
    }

    pub fn is_signed_out(&self) -> bool {
        !self.loading && self.session.is_none()
    }
}
