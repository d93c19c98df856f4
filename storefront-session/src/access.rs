use storefront_api::endpoints::users::AppUser;
use storefront_api::endpoints::Role;

use crate::session::{SessionSnapshot, SessionStatus};

pub const LOGIN_PATH: &str = "/login";
pub const ADMIN_LANDING_PATH: &str = "/admin/dashboard";
pub const USER_LANDING_PATH: &str = "/products";

/// Outcome of checking a session against a protected area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No identity event has been handled yet
    Loading,
    SignedOut,
    /// Signed in, profile not resolved (yet)
    ProfilePending,
    Allowed,
    Forbidden,
}

/// `allowed` empty means any signed-in role may enter.
pub fn authorize(snapshot: &SessionSnapshot, allowed: &[Role]) -> Access {
    if snapshot.loading {
        return Access::Loading;
    }
    let Some(session) = &snapshot.session else {
        return Access::SignedOut;
    };
    match (&session.profile, session.status) {
        (_, SessionStatus::Invalid) => Access::SignedOut,
        (Some(profile), SessionStatus::Active) => {
            if allowed.is_empty() || allowed.contains(&profile.role) {
                Access::Allowed
            } else {
                Access::Forbidden
            }
        }
        _ => Access::ProfilePending,
    }
}

pub fn landing_path(profile: &AppUser) -> &'static str {
    match profile.role {
        Role::Admin | Role::Seller => ADMIN_LANDING_PATH,
        Role::User => USER_LANDING_PATH,
    }
}

pub fn login_path() -> &'static str {
    LOGIN_PATH
}
