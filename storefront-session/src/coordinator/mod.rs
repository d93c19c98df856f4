mod events;
mod tasks;

pub use events::{Command, CoordinatorEvent};
pub use tasks::{BackgroundTaskManager, TaskKey};

use std::sync::Arc;

use storefront_api::endpoints::auth::RegisterUser;
use storefront_api::endpoints::users::{AppUser, UpdateCurrentUser};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionManager, ConnectionView};
use crate::error::{AuthError, ResolutionError};
use crate::identity::{Identity, IdentityEvent, IdentityProvider};
use crate::resolver::{Resolved, SessionResolver};
use crate::session::{Generation, Session, SessionSnapshot, SessionStatus};
use crate::token::TokenSupplier;

/// Serializes every session transition on a single task.
///
/// Identity events, background completions and handle commands all funnel into
/// one `select!` loop, which is the only place the session is mutated.
pub struct SessionCoordinator {
    provider: Arc<dyn IdentityProvider>,
    resolver: Arc<SessionResolver>,
    tokens: Arc<TokenSupplier>,
    connections: ConnectionManager,
}

impl SessionCoordinator {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        resolver: Arc<SessionResolver>,
        tokens: Arc<TokenSupplier>,
        connections: ConnectionManager,
    ) -> Self {
        Self {
            provider,
            resolver,
            tokens,
            connections,
        }
    }

    /// Start the event loop
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::initial());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        // Subscribe before spawning so the initial state is not missed
        let identities = self.provider.subscribe();

        let handle = SessionHandle {
            state_rx,
            commands: commands_tx,
            connections: self.connections.clone(),
            resolver: self.resolver.clone(),
            provider: self.provider.clone(),
        };

        let event_loop = EventLoop {
            provider: self.provider,
            resolver: self.resolver,
            tokens: self.tokens,
            connections: self.connections,
            snapshot: SessionSnapshot::initial(),
            generation: Generation::default(),
            state_tx,
            events_tx,
            tasks: BackgroundTaskManager::new(),
        };
        let task = tokio::spawn(event_loop.run(identities, events_rx, commands_rx));

        (handle, task)
    }
}

struct EventLoop {
    provider: Arc<dyn IdentityProvider>,
    resolver: Arc<SessionResolver>,
    tokens: Arc<TokenSupplier>,
    connections: ConnectionManager,
    snapshot: SessionSnapshot,
    generation: Generation,
    state_tx: watch::Sender<SessionSnapshot>,
    events_tx: mpsc::UnboundedSender<CoordinatorEvent>,
    tasks: BackgroundTaskManager,
}

impl EventLoop {
    async fn run(
        mut self,
        mut identities: mpsc::UnboundedReceiver<IdentityEvent>,
        mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        tracing::info!("Session coordinator started");

        loop {
            tokio::select! {
                identity = identities.recv() => match identity {
                    Some(identity) => self.on_identity(identity),
                    None => {
                        tracing::warn!("Identity provider closed its feed");
                        break;
                    }
                },
                Some(event) = events.recv() => self.on_event(event),
                command = commands.recv() => match command {
                    Some(Command::ReplaceProfile { profile, reply }) => {
                        let _ = reply.send(self.replace_profile(profile));
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        tracing::info!("Session coordinator shutting down");
        self.tasks.cancel_all();
        self.connections.shutdown();
    }

    fn publish(&self) {
        let next = &self.snapshot;
        self.state_tx.send_if_modified(|current| {
            if current == next {
                return false;
            }
            *current = next.clone();
            true
        });
    }

    fn on_identity(&mut self, identity: IdentityEvent) {
        self.snapshot.loading = false;
        match identity {
            Some(identity) => self.sign_in(identity),
            None => self.sign_out(),
        }
        self.publish();
    }

    fn sign_in(&mut self, identity: Identity) {
        if let Some(session) = &self.snapshot.session {
            let unchanged = session.identity.uid == identity.uid
                && matches!(session.status, SessionStatus::Active | SessionStatus::Resolving);
            if unchanged {
                tracing::debug!(uid = %identity.uid, generation = %session.generation, "Identity unchanged");
                return;
            }
        }

        self.generation = self.generation.next();
        let generation = self.generation;
        // A pending forced sign-out belongs to the previous identity
        self.tasks.cancel(TaskKey::ForcedSignOut);
        if self.snapshot.session.is_some() {
            self.connections.close();
        }
        self.tokens.clear();

        tracing::info!(%generation, uid = %identity.uid, "Resolving session");
        self.snapshot.session = Some(Session::resolving(generation, identity.clone()));

        let resolver = self.resolver.clone();
        let events = self.events_tx.clone();
        self.tasks.spawn(TaskKey::Resolve, async move {
            let result = resolver.resolve(&identity).await;
            let _ = events.send(CoordinatorEvent::ResolutionFinished { generation, result });
        });
    }

    fn sign_out(&mut self) {
        let Some(session) = self.snapshot.session.take() else {
            return;
        };

        self.generation = self.generation.next();
        tracing::info!(uid = %session.identity.uid, generation = %self.generation, "Signed out");
        self.tasks.cancel(TaskKey::Resolve);
        self.connections.close();
        self.tokens.clear();
    }

    fn on_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::ResolutionFinished { generation, result } => {
                self.on_resolution(generation, result)
            }
            CoordinatorEvent::ForcedSignOutFinished { generation } => {
                if generation != self.generation {
                    tracing::debug!(%generation, current = %self.generation, "Stale forced sign-out");
                    return;
                }
                tracing::info!(%generation, "Forced sign-out finished");
                self.snapshot.session = None;
                self.tokens.clear();
                self.publish();
            }
        }
    }

    fn on_resolution(&mut self, generation: Generation, result: Result<Resolved, ResolutionError>) {
        let resolving = self
            .snapshot
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation && s.status == SessionStatus::Resolving);
        if generation != self.generation || !resolving {
            tracing::debug!(%generation, current = %self.generation, "Discarding stale resolution");
            return;
        }

        match result {
            Ok(Resolved { profile, token }) => {
                self.tokens.prime(token);

                let Some(session) = self.snapshot.session.as_mut() else {
                    return;
                };
                tracing::info!(%generation, uid = %session.identity.uid, role = %profile.role, "Session active");
                session.profile = Some(profile);
                session.status = SessionStatus::Active;
                let ticket = session.ticket();

                self.publish();
                self.connections.open(&ticket);
            }
            Err(e) => {
                tracing::warn!(%generation, error = %e, kind = ?e.kind(), "Session resolution failed, signing out");
                let Some(session) = self.snapshot.session.as_mut() else {
                    return;
                };
                session.status = SessionStatus::Invalid;
                let uid = session.identity.uid.clone();
                self.publish();

                let provider = self.provider.clone();
                let events = self.events_tx.clone();
                self.tasks.spawn(TaskKey::ForcedSignOut, async move {
                    // Provider sign-out is global; leave a newer identity alone
                    let still_current = provider
                        .current_identity()
                        .is_some_and(|identity| identity.uid == uid);
                    if !still_current {
                        tracing::debug!(%generation, %uid, "Identity already replaced, skipping forced sign-out");
                        return;
                    }
                    provider.sign_out().await;
                    let _ = events.send(CoordinatorEvent::ForcedSignOutFinished { generation });
                });
            }
        }
    }

    fn replace_profile(&mut self, profile: AppUser) -> Result<(), AuthError> {
        let session = self
            .snapshot
            .session
            .as_mut()
            .filter(|s| s.is_active())
            .ok_or(AuthError::NoSession)?;

        if !profile.uid.is_empty() && profile.uid != session.identity.uid {
            return Err(AuthError::Validation(
                "profile belongs to a different identity".to_string(),
            ));
        }

        tracing::debug!(generation = %session.generation, "Replacing profile");
        session.profile = Some(profile);
        self.publish();
        Ok(())
    }
}

/// Read-only projection of the session plus a narrow command surface.
#[derive(Clone)]
pub struct SessionHandle {
    state_rx: watch::Receiver<SessionSnapshot>,
    commands: mpsc::UnboundedSender<Command>,
    connections: ConnectionManager,
    resolver: Arc<SessionResolver>,
    provider: Arc<dyn IdentityProvider>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    pub fn connection(&self) -> ConnectionView {
        self.connections.view()
    }

    /// Ask for the realtime connection of the active session.
    ///
    /// Returns `false` when no session is active.
    pub fn ensure_connected(&self) -> bool {
        match self.snapshot().active_ticket() {
            Some(ticket) => {
                self.connections.open(&ticket);
                true
            }
            None => false,
        }
    }

    pub async fn replace_profile(&self, profile: AppUser) -> Result<(), AuthError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ReplaceProfile { profile, reply })
            .map_err(|_| AuthError::CoordinatorStopped)?;
        rx.await.map_err(|_| AuthError::CoordinatorStopped)?
    }

    /// Register the profile for a freshly created identity.
    ///
    /// The new profile replaces the current one when its session is active.
    pub async fn register(&self, form: RegisterUser) -> Result<AppUser, AuthError> {
        let user = self.resolver.register(form).await?;
        match self.replace_profile(user.clone()).await {
            Ok(()) | Err(AuthError::NoSession) => Ok(user),
            Err(e) => Err(e),
        }
    }

    pub async fn update_profile(&self, update: UpdateCurrentUser) -> Result<AppUser, AuthError> {
        let user = self.resolver.update_profile(update).await?;
        self.replace_profile(user.clone()).await?;
        Ok(user)
    }

    /// User-initiated sign-out. The session is cleared once the provider
    /// reports the transition.
    pub async fn sign_out(&self) {
        self.provider.sign_out().await;
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Wait until the session satisfies `f`. `None` once the coordinator is gone.
    pub async fn wait_for<F>(&self, mut f: F) -> Option<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|s| f(s)).await.ok().map(|s| s.clone())
    }
}
