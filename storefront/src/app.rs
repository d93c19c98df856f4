use anyhow::{anyhow, Result};
use std::sync::Arc;
use storefront_api::Client;
use storefront_session::access::{landing_path, login_path};
use storefront_session::{
    ApiProfileSource, ConnectionManager, ConnectionSnapshot, RestIdentityProvider,
    SessionCoordinator, SessionHandle, SessionResolver, SessionSnapshot, SessionStatus, Settings,
    TokenSupplier, WsTransport,
};
use tokio::task::JoinHandle;

use crate::logging::init_logging;

pub struct App {
    settings: Settings,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub async fn run(&self) -> Result<()> {
        let log = init_logging()?;
        tracing::info!(log = %log.path.display(), "storefront starting");

        self.settings
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;
        tracing::debug!(settings = ?self.settings, "Loaded settings");

        let identity = &self.settings.identity;
        let provider = Arc::new(RestIdentityProvider::new(
            identity.token_url.clone(),
            identity.api_key.clone(),
        )?);
        let (handle, coordinator) = self.init(provider.clone());

        match identity.refresh_token() {
            Some(refresh_token) => {
                if let Err(e) = provider.sign_in_with_refresh_token(refresh_token).await {
                    tracing::error!(error = %e, kind = ?e.kind(), "Sign-in failed");
                }
            }
            None => tracing::info!("No refresh token configured, staying signed out"),
        }

        let mut sessions = handle.subscribe();
        let mut connection = handle.connection().subscribe();

        tracing::info!("Entering main event loop");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, exiting event loop");
                    break;
                }
                changed = sessions.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Session coordinator stopped");
                        break;
                    }
                    let snapshot = sessions.borrow_and_update().clone();
                    tracing::info!(route = route_for(&snapshot), "Session: {}", describe_session(&snapshot));
                }
                changed = connection.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = connection.borrow_and_update().clone();
                    tracing::info!("Realtime: {}", describe_connection(&snapshot));
                }
            }
        }

        tracing::info!("Cleaning up application");
        self.exit(&handle, coordinator).await;

        Ok(())
    }

    fn init(&self, provider: Arc<RestIdentityProvider>) -> (SessionHandle, JoinHandle<()>) {
        let client = Arc::new(Client::new(self.settings.api.base_url.as_str()));
        let tokens = Arc::new(TokenSupplier::new(provider.clone(), client.clone()));
        let resolver = Arc::new(SessionResolver::new(
            tokens.clone(),
            Arc::new(ApiProfileSource::new(client)),
        ));

        let transport = Arc::new(WsTransport::new(self.settings.realtime.url.as_str()));
        let connections =
            ConnectionManager::new(transport, tokens.clone(), self.settings.connection_options());

        SessionCoordinator::new(provider, resolver, tokens, connections).spawn()
    }

    async fn exit(&self, handle: &SessionHandle, coordinator: JoinHandle<()>) {
        handle.shutdown();
        if let Err(e) = coordinator.await {
            tracing::error!(error = %e, "Session coordinator task failed");
        }
    }
}

/// Where the UI would send the user for this session state
fn route_for(snapshot: &SessionSnapshot) -> &'static str {
    if snapshot.loading {
        return "/";
    }
    match &snapshot.session {
        None => login_path(),
        Some(session) => match (&session.profile, session.status) {
            (_, SessionStatus::Invalid) => login_path(),
            (Some(profile), SessionStatus::Active) => landing_path(profile),
            _ => "/",
        },
    }
}

fn describe_session(snapshot: &SessionSnapshot) -> String {
    if snapshot.loading {
        return "loading".to_string();
    }
    match &snapshot.session {
        None => "signed out".to_string(),
        Some(session) => match (session.status, &session.profile) {
            (SessionStatus::Active, Some(profile)) => format!(
                "{} ({}) signed in, generation {}",
                profile.display_name(),
                profile.role,
                session.generation
            ),
            (SessionStatus::Invalid, _) => {
                format!("profile for {} rejected, signing out", session.identity.uid)
            }
            _ => format!("resolving profile for {}", session.identity.uid),
        },
    }
}

fn describe_connection(snapshot: &ConnectionSnapshot) -> String {
    match &snapshot.last_error {
        Some(e) => format!("{} (attempt {}, last error: {})", snapshot.state, snapshot.attempt, e),
        None => format!("{} (attempt {})", snapshot.state, snapshot.attempt),
    }
}
