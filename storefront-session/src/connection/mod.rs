mod retry;
mod stomp;
mod transport;
mod ws;

pub use retry::{Backoff, RetryPolicy, DEFAULT_RETRY_DELAY};
pub use transport::{link, Link, LinkHandle, Transport};
pub use ws::{WsTransport, DEFAULT_REALTIME_URL};

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;
use crate::session::{Generation, SessionTicket};
use crate::token::TokenSupplier;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Retrying,
    Closed,
}

impl ConnectionState {
    /// States that hold or are about to hold a live link
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Retrying)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Retrying => "retrying",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Attempts made since the last successful handshake or `open`
    pub attempt: u32,
    pub last_error: Option<ConnectionError>,
    pub generation: Option<Generation>,
}

impl ConnectionSnapshot {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            last_error: None,
            generation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub handshake_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Owner of the single realtime connection.
///
/// Cheap to clone; every clone drives the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenSupplier>,
    options: ConnectionOptions,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionSnapshot>,
    root: CancellationToken,
}

struct Inner {
    state: ConnectionState,
    attempt: u32,
    last_error: Option<ConnectionError>,
    generation: Option<Generation>,
    /// Highest generation that has been closed; older tickets are refused
    retired: Option<Generation>,
    /// Cancelled when the current generation is torn down
    cancel: CancellationToken,
    /// Disconnects the live link, if any
    disconnect: Option<CancellationToken>,
}

impl Inner {
    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state,
            attempt: self.attempt,
            last_error: self.last_error.clone(),
            generation: self.generation,
        }
    }

    fn is_current(&self, generation: Generation, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled() && self.generation == Some(generation)
    }

    fn teardown(&mut self) {
        self.cancel.cancel();
        if let Some(disconnect) = self.disconnect.take() {
            disconnect.cancel();
        }
    }
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenSupplier>,
        options: ConnectionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionSnapshot::idle());
        let root = CancellationToken::new();
        let inner = Inner {
            state: ConnectionState::Idle,
            attempt: 0,
            last_error: None,
            generation: None,
            retired: None,
            cancel: root.child_token(),
            disconnect: None,
        };

        Self {
            shared: Arc::new(Shared {
                transport,
                tokens,
                options,
                inner: Mutex::new(inner),
                state_tx,
                root,
            }),
        }
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.state_tx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.state_tx.subscribe()
    }

    pub fn view(&self) -> ConnectionView {
        ConnectionView {
            rx: self.subscribe(),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.shared.options
    }

    /// Connect on behalf of a session.
    ///
    /// A no-op while a link for the same generation is being established, is
    /// live, or is waiting to retry. A different generation replaces the old
    /// link.
    pub fn open(&self, ticket: &SessionTicket) {
        let shared = &self.shared;
        if shared.root.is_cancelled() {
            tracing::debug!(generation = %ticket.generation, "Ignoring open after shutdown");
            return;
        }

        let mut inner = shared.inner.lock();
        let retired = inner.retired.is_some_and(|retired| ticket.generation <= retired);
        let superseded = inner.generation.is_some_and(|current| ticket.generation < current);
        if retired || superseded {
            tracing::debug!(generation = %ticket.generation, "Ignoring open for retired generation");
            return;
        }
        if inner.generation == Some(ticket.generation) && inner.state.is_live() {
            return;
        }
        if let Some(previous) = inner.generation.filter(|_| inner.state.is_live()) {
            tracing::info!(%previous, next = %ticket.generation, "Replacing realtime connection");
            inner.teardown();
            inner.retired = inner.retired.max(Some(previous));
        }

        tracing::info!(generation = %ticket.generation, uid = %ticket.uid, "Opening realtime connection");
        inner.generation = Some(ticket.generation);
        inner.cancel = shared.root.child_token();
        inner.attempt = 0;
        inner.last_error = None;
        self.begin_attempt_locked(&mut inner, ticket.generation);
    }

    /// Tear the connection down and publish `Closed`.
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock();
        if inner.state == ConnectionState::Closed && inner.generation.is_none() {
            return;
        }

        inner.teardown();
        inner.retired = inner.retired.max(inner.generation);
        if let Some(generation) = inner.generation.take() {
            tracing::info!(%generation, "Closing realtime connection");
        }
        inner.state = ConnectionState::Closed;
        inner.attempt = 0;
        self.publish_locked(&inner);
    }

    /// Close and refuse further work. Called at process exit.
    pub fn shutdown(&self) {
        self.shared.root.cancel();
        self.close();
    }

    fn publish_locked(&self, inner: &Inner) {
        self.shared.state_tx.send_replace(inner.snapshot());
    }

    fn begin_attempt_locked(&self, inner: &mut Inner, generation: Generation) {
        inner.state = ConnectionState::Connecting;
        inner.attempt += 1;
        tracing::debug!(%generation, attempt = inner.attempt, "Connecting");
        self.publish_locked(inner);

        let manager = self.clone();
        let cancel = inner.cancel.clone();
        tokio::spawn(async move {
            let result = manager.handshake().await;
            manager.finish_attempt(generation, cancel, result);
        });
    }

    /// One handshake, bounded by the handshake timeout. Runs to completion even
    /// if the generation is retired meanwhile.
    async fn handshake(&self) -> Result<Link, ConnectionError> {
        let shared = &self.shared;
        let timeout = shared.options.handshake_timeout;

        let attempt = async {
            let token = shared
                .tokens
                .current_token(true)
                .await
                .map_err(|e| ConnectionError::Credential(e.to_string()))?;
            shared.transport.connect(&token).await
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        }
    }

    fn finish_attempt(
        &self,
        generation: Generation,
        cancel: CancellationToken,
        result: Result<Link, ConnectionError>,
    ) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_current(generation, &cancel) {
            // A stale link is dropped here, which disconnects it
            tracing::debug!(%generation, ok = result.is_ok(), "Discarding stale handshake result");
            return;
        }

        match result {
            Ok(link) => {
                tracing::info!(%generation, attempt = inner.attempt, "Realtime connection established");
                inner.state = ConnectionState::Connected;
                inner.attempt = 0;
                inner.last_error = None;
                inner.disconnect = Some(link.disconnect_token());
                self.publish_locked(&inner);

                let manager = self.clone();
                tokio::spawn(async move { manager.watch_link(generation, cancel, link).await });
            }
            Err(e) => {
                tracing::warn!(%generation, attempt = inner.attempt, error = %e, "Realtime handshake failed");
                self.schedule_retry_locked(&mut inner, generation, cancel, e);
            }
        }
    }

    async fn watch_link(&self, generation: Generation, cancel: CancellationToken, mut link: Link) {
        let reason = tokio::select! {
            _ = cancel.cancelled() => return,
            reason = link.closed() => reason,
        };

        let mut inner = self.shared.inner.lock();
        if !inner.is_current(generation, &cancel) || inner.state != ConnectionState::Connected {
            return;
        }
        tracing::warn!(%generation, %reason, "Realtime connection dropped");
        inner.disconnect = None;
        inner.attempt = 0;
        self.schedule_retry_locked(&mut inner, generation, cancel, ConnectionError::Dropped(reason));
    }

    fn schedule_retry_locked(
        &self,
        inner: &mut Inner,
        generation: Generation,
        cancel: CancellationToken,
        error: ConnectionError,
    ) {
        inner.last_error = Some(error);

        let Some(delay) = self.shared.options.retry.delay_for(inner.attempt.max(1)) else {
            tracing::warn!(%generation, attempts = inner.attempt, "Retry budget exhausted, giving up");
            inner.state = ConnectionState::Closed;
            inner.cancel.cancel();
            self.publish_locked(inner);
            return;
        };

        inner.state = ConnectionState::Retrying;
        tracing::debug!(%generation, ?delay, "Scheduling reconnect");
        self.publish_locked(inner);

        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => manager.retry_due(generation, cancel),
            }
        });
    }

    fn retry_due(&self, generation: Generation, cancel: CancellationToken) {
        let mut inner = self.shared.inner.lock();
        if !inner.is_current(generation, &cancel) || inner.state != ConnectionState::Retrying {
            return;
        }
        self.begin_attempt_locked(&mut inner, generation);
    }
}

/// Read-only view of the connection
#[derive(Clone)]
pub struct ConnectionView {
    rx: watch::Receiver<ConnectionSnapshot>,
}

impl ConnectionView {
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.rx.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.rx.clone()
    }

    /// Wait until the connection satisfies `f`. `None` if the manager is gone.
    pub async fn wait_for<F>(&self, mut f: F) -> Option<ConnectionSnapshot>
    where
        F: FnMut(&ConnectionSnapshot) -> bool,
    {
        let mut rx = self.rx.clone();
        rx.wait_for(|s| f(s)).await.ok().map(|s| s.clone())
    }
}
