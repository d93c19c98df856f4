use storefront_api::endpoints::users::AppUser;
use tokio::sync::oneshot;

use crate::error::{AuthError, ResolutionError};
use crate::resolver::Resolved;
use crate::session::Generation;

/// Completions reported back to the coordinator by its background tasks
#[derive(Debug)]
pub enum CoordinatorEvent {
    ResolutionFinished {
        generation: Generation,
        result: Result<Resolved, ResolutionError>,
    },
    ForcedSignOutFinished {
        generation: Generation,
    },
}

/// Requests from [`SessionHandle`](super::SessionHandle)
#[derive(Debug)]
pub enum Command {
    ReplaceProfile {
        profile: AppUser,
        reply: oneshot::Sender<Result<(), AuthError>>,
    },
    Shutdown,
}
