//! Test doubles for the identity provider, backend and realtime transport, and a
//! harness that wires them into a running coordinator.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use storefront_api::endpoints::auth::RegisterUser;
use storefront_api::endpoints::users::{AppUser, UpdateCurrentUser};
use storefront_api::endpoints::{AccountStatus, Role, UserId};
use storefront_api::{Authorized, Client, ErrorDetail, StatusCode, StorefrontApiError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{
    link, ConnectionManager, ConnectionOptions, ConnectionSnapshot, Link, LinkHandle, Transport,
};
use crate::coordinator::{SessionCoordinator, SessionHandle};
use crate::error::{ConnectionError, CredentialError};
use crate::identity::{BearerToken, Identity, IdentityEvent, IdentityFeed, IdentityProvider};
use crate::resolver::{ProfileSource, SessionResolver};
use crate::session::SessionSnapshot;
use crate::token::TokenSupplier;

const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub fn sample_user(uid: &str, role: Role) -> AppUser {
    AppUser {
        id: UserId::from(1),
        uid: uid.to_string(),
        email: format!("{}@example.com", uid),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        role,
        status: AccountStatus::Active,
    }
}

/// Identity provider driven by the test.
///
/// Tokens are issued as `token-{uid}-{n}` so backends can tell who is calling.
#[derive(Default)]
pub struct MockIdentityProvider {
    feed: Mutex<IdentityFeed>,
    issued: AtomicUsize,
    token_requests: AtomicUsize,
    sign_outs: AtomicUsize,
    revoked: AtomicBool,
}

impl MockIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, uid: &str) -> Identity {
        let identity = Identity::new(uid).with_email(format!("{}@example.com", uid));
        self.revoked.store(false, Ordering::SeqCst);
        self.feed.lock().publish(Some(identity.clone()));
        identity
    }

    /// Report the signed-out state without counting a sign-out call
    pub fn clear(&self) {
        self.feed.lock().publish(None);
    }

    /// Publish the current state again
    pub fn reemit(&self) {
        let mut feed = self.feed.lock();
        let current = feed.current();
        feed.publish(current);
    }

    /// Refuse every token request until the next sign-in
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<IdentityEvent> {
        self.feed.lock().subscribe()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.feed.lock().current()
    }

    async fn id_token(&self, _force_refresh: bool) -> Result<BearerToken, CredentialError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        if self.revoked.load(Ordering::SeqCst) {
            return Err(CredentialError::Revoked("TOKEN_EXPIRED".to_string()));
        }
        let identity = self.current_identity().ok_or(CredentialError::NoIdentity)?;
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(BearerToken::new(format!("token-{}-{}", identity.uid, n)))
    }

    async fn sign_out(&self) {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.feed.lock().publish(None);
    }
}

/// In-memory backend keyed by the uid encoded in mock tokens
#[derive(Default)]
pub struct MockProfileSource {
    users: Mutex<HashMap<String, AppUser>>,
    rejections: Mutex<HashMap<String, StatusCode>>,
    delay: Mutex<Duration>,
    next_id: AtomicI64,
    lookups: AtomicUsize,
    registrations: AtomicUsize,
}

impl MockProfileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: AppUser) {
        self.users.lock().insert(user.uid.clone(), user);
    }

    /// Answer profile lookups for `uid` with `status`
    pub fn reject(&self, uid: &str, status: StatusCode) {
        self.rejections.lock().insert(uid.to_string(), status);
    }

    /// Delay every profile lookup
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    fn caller(token: &str) -> Option<&str> {
        token
            .strip_prefix("token-")
            .and_then(|rest| rest.rsplit_once('-'))
            .map(|(uid, _)| uid)
    }

    fn error(status: StatusCode, message: &str) -> StorefrontApiError {
        StorefrontApiError::Api(
            status,
            ErrorDetail {
                error: Some(message.to_string()),
                message: None,
            },
        )
    }
}

#[async_trait]
impl ProfileSource for MockProfileSource {
    async fn current_user(&self, token: &BearerToken) -> Result<AppUser, StorefrontApiError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let uid = Self::caller(token.expose())
            .ok_or_else(|| Self::error(StatusCode::UNAUTHORIZED, "Invalid token"))?;
        if let Some(status) = self.rejections.lock().get(uid) {
            return Err(Self::error(*status, "Rejected"));
        }
        self.users
            .lock()
            .get(uid)
            .cloned()
            .ok_or_else(|| Self::error(StatusCode::NOT_FOUND, "User not found"))
    }

    async fn register(
        &self,
        request: Authorized<RegisterUser>,
    ) -> Result<AppUser, StorefrontApiError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let form = request.into_inner();
        let (first_name, last_name) = form.full_name();

        let user = AppUser {
            id: UserId::from(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
            uid: form.uid().to_string(),
            email: form.email().to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            role: Role::User,
            status: AccountStatus::Active,
        };
        self.insert(user.clone());
        Ok(user)
    }

    async fn update_current_user(
        &self,
        request: Authorized<UpdateCurrentUser>,
    ) -> Result<AppUser, StorefrontApiError> {
        let uid = request
            .token()
            .and_then(|t| Self::caller(t.expose_secret()).map(str::to_string))
            .ok_or_else(|| Self::error(StatusCode::UNAUTHORIZED, "Missing token"))?;

        let body = serde_json::to_value(request.request())
            .map_err(|e| Self::error(StatusCode::BAD_REQUEST, &e.to_string()))?;
        let text = |key: &str| body.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let mut users = self.users.lock();
        let user = users
            .get_mut(&uid)
            .ok_or_else(|| Self::error(StatusCode::NOT_FOUND, "User not found"))?;
        if let Some(first_name) = text("firstName") {
            user.first_name = first_name;
        }
        if let Some(last_name) = text("lastName") {
            user.last_name = last_name;
        }
        Ok(user.clone())
    }
}

/// Scripted outcome of one handshake
#[derive(Debug, Clone)]
pub enum Script {
    Accept,
    AcceptAfter(Duration),
    Fail(ConnectionError),
    FailAfter(Duration, ConnectionError),
    /// Never completes; only the handshake timeout ends it
    Hang,
}

/// Transport that records handshakes and lets tests drop live links.
///
/// Unscripted handshakes succeed immediately.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Script>>,
    handles: Mutex<Vec<LinkHandle>>,
    tokens: Mutex<Vec<String>>,
    connects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, outcome: Script) {
        self.script.lock().push_back(outcome);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_token(&self) -> Option<String> {
        self.tokens.lock().last().cloned()
    }

    /// Links the manager has not asked to disconnect
    pub fn live_links(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_shutdown_requested());
        handles.len()
    }

    /// Simulate the server dropping the newest live link
    pub fn drop_latest(&self, reason: &str) -> bool {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_shutdown_requested());
        match handles.pop() {
            Some(handle) => {
                handle.report_dropped(reason);
                true
            }
            None => false,
        }
    }

    fn accept(&self) -> Link {
        let (link, handle) = link();
        self.handles.lock().push(handle);
        link
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, token: &BearerToken) -> Result<Link, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().push(token.expose().to_string());

        let outcome = self.script.lock().pop_front().unwrap_or(Script::Accept);
        match outcome {
            Script::Accept => Ok(self.accept()),
            Script::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept())
            }
            Script::Fail(e) => Err(e),
            Script::FailAfter(delay, e) => {
                tokio::time::sleep(delay).await;
                Err(e)
            }
            Script::Hang => std::future::pending().await,
        }
    }
}

/// A running coordinator wired against the mocks
pub struct TestSession {
    pub provider: Arc<MockIdentityProvider>,
    pub profiles: Arc<MockProfileSource>,
    pub transport: Arc<MockTransport>,
    pub tokens: Arc<TokenSupplier>,
    pub connections: ConnectionManager,
    pub handle: SessionHandle,
    task: JoinHandle<()>,
}

impl TestSession {
    pub fn start() -> Self {
        Self::with_options(ConnectionOptions::default())
    }

    pub fn with_options(options: ConnectionOptions) -> Self {
        let provider = Arc::new(MockIdentityProvider::new());
        let profiles = Arc::new(MockProfileSource::new());
        let transport = Arc::new(MockTransport::new());

        let client = Arc::new(Client::new(storefront_api::DEFAULT_BASE_URL));
        let tokens = Arc::new(TokenSupplier::new(provider.clone(), client));
        let resolver = Arc::new(SessionResolver::new(tokens.clone(), profiles.clone()));
        let connections = ConnectionManager::new(transport.clone(), tokens.clone(), options);

        let coordinator =
            SessionCoordinator::new(provider.clone(), resolver, tokens.clone(), connections.clone());
        let (handle, task) = coordinator.spawn();

        Self {
            provider,
            profiles,
            transport,
            tokens,
            connections,
            handle,
            task,
        }
    }

    pub async fn wait_for_session<F>(&self, f: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        tokio::time::timeout(WAIT_LIMIT, self.handle.wait_for(f))
            .await
            .expect("timed out waiting for session state")
            .expect("coordinator stopped")
    }

    pub async fn wait_for_connection<F>(&self, f: F) -> ConnectionSnapshot
    where
        F: FnMut(&ConnectionSnapshot) -> bool,
    {
        tokio::time::timeout(WAIT_LIMIT, self.handle.connection().wait_for(f))
            .await
            .expect("timed out waiting for connection state")
            .expect("connection manager dropped")
    }

    /// Let spawned work run until every task is idle
    pub async fn settle(&self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        let _ = self.task.await;
    }
}
