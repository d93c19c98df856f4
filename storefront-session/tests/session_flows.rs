use std::sync::Arc;
use std::time::Duration;

use storefront_api::endpoints::users::UpdateCurrentUser;
use storefront_api::endpoints::Role;
use storefront_api::{Client, StatusCode, DEFAULT_BASE_URL};
use storefront_session::connection::{Backoff, RetryPolicy, DEFAULT_HANDSHAKE_TIMEOUT};
use storefront_session::testing::{sample_user, MockIdentityProvider, MockTransport, Script, TestSession};
use storefront_session::{
    AuthError, BearerToken, ConnectionError, ConnectionManager, ConnectionOptions, ConnectionState,
    Generation, IdentityProvider, SessionStatus, SessionTicket, TokenSupplier,
};

fn is_active(uid: &'static str) -> impl FnMut(&storefront_session::SessionSnapshot) -> bool {
    move |s| {
        s.session
            .as_ref()
            .is_some_and(|s| s.status == SessionStatus::Active && s.identity.uid == uid)
    }
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_connects_once_profile_resolves() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));

    t.provider.sign_in("alice");
    let snapshot = t.wait_for_session(is_active("alice")).await;
    assert_eq!(snapshot.profile().unwrap().email, "alice@example.com");
    assert!(!snapshot.loading);

    let connection = t
        .wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert_eq!(
        connection.generation,
        snapshot.session.as_ref().map(|s| s.generation)
    );
    assert_eq!(t.transport.connect_count(), 1);
    assert!(t.tokens.is_primed());
    assert!(t.tokens.client().has_bearer());

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_profile_forces_sign_out_without_connecting() {
    let t = TestSession::start();
    t.profiles.reject("mallory", StatusCode::UNAUTHORIZED);

    t.provider.sign_in("mallory");
    let provider = t.provider.clone();
    let snapshot = t
        .wait_for_session(|s| s.is_signed_out() && provider.sign_out_calls() == 1)
        .await;

    assert!(snapshot.profile().is_none());
    assert_eq!(t.profiles.lookups(), 1);
    assert_eq!(t.transport.connect_count(), 0);
    assert_eq!(t.connections.snapshot().generation, None);
    assert_ne!(t.connections.state(), ConnectionState::Connected);
    assert!(!t.tokens.is_primed());

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_retries_after_fixed_delay() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));
    t.transport.script(Script::Hang);

    t.provider.sign_in("alice");
    t.wait_for_session(is_active("alice")).await;
    let started = tokio::time::Instant::now();

    let retrying = t
        .wait_for_connection(|c| c.state == ConnectionState::Retrying)
        .await;
    assert_eq!(
        retrying.last_error,
        Some(ConnectionError::Timeout(Duration::from_secs(10)))
    );

    let connected = t
        .wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(connected.last_error, None);
    assert_eq!(t.transport.connect_count(), 2);
    assert_eq!(t.transport.live_links(), 1);

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_during_handshake_discards_result() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));
    t.transport.script(Script::AcceptAfter(Duration::from_secs(5)));

    t.provider.sign_in("alice");
    t.wait_for_connection(|c| c.state == ConnectionState::Connecting)
        .await;

    t.handle.sign_out().await;
    t.wait_for_connection(|c| c.state == ConnectionState::Closed)
        .await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(t.connections.state(), ConnectionState::Closed);
    assert_eq!(t.transport.connect_count(), 1);
    assert_eq!(t.transport.live_links(), 0);
    assert!(t.handle.snapshot().is_signed_out());

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_observers_share_one_connection() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));
    t.transport.script(Script::AcceptAfter(Duration::from_secs(2)));

    t.provider.sign_in("alice");
    t.wait_for_session(is_active("alice")).await;

    let observers: Vec<_> = (0..4)
        .map(|_| {
            let handle = t.handle.clone();
            tokio::spawn(async move { handle.ensure_connected() })
        })
        .collect();
    for observer in observers {
        assert!(observer.await.unwrap());
    }

    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert_eq!(t.transport.connect_count(), 1);
    assert_eq!(t.transport.live_links(), 1);

    t.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_open_creates_single_link() {
    let provider = Arc::new(MockIdentityProvider::new());
    provider.sign_in("alice");
    let client = Arc::new(Client::new(DEFAULT_BASE_URL));
    let tokens = Arc::new(TokenSupplier::new(provider, client));
    tokens.prime(BearerToken::new("seed"));

    let transport = Arc::new(MockTransport::new());
    transport.script(Script::AcceptAfter(Duration::from_millis(50)));
    let manager = ConnectionManager::new(transport.clone(), tokens, ConnectionOptions::default());

    let ticket = SessionTicket {
        generation: Generation::from(1),
        uid: "alice".to_string(),
    };
    let barrier = Arc::new(tokio::sync::Barrier::new(8));
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let ticket = ticket.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                manager.open(&ticket);
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    manager
        .view()
        .wait_for(|c| c.state == ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.live_links(), 1);
    manager.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_before_resolution_publishes_no_profile() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));
    t.profiles.set_delay(Duration::from_secs(5));

    t.provider.sign_in("alice");
    t.wait_for_session(|s| s.status() == Some(SessionStatus::Resolving))
        .await;

    t.handle.sign_out().await;
    t.wait_for_session(|s| !s.loading && s.session.is_none())
        .await;

    let mut sessions = t.handle.subscribe();
    sessions.borrow_and_update();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(!sessions.has_changed().unwrap());
    assert!(t.handle.snapshot().profile().is_none());
    assert_eq!(t.connections.state(), ConnectionState::Closed);
    assert_eq!(t.transport.connect_count(), 0);
    assert!(!t.tokens.is_primed());

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_identity_opens_no_second_connection() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));

    t.provider.sign_in("alice");
    let first = t.wait_for_session(is_active("alice")).await;
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;

    t.provider.reemit();
    t.provider.sign_in("alice");
    t.settle().await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(t.handle.snapshot(), first);
    assert_eq!(t.profiles.lookups(), 1);
    assert_eq!(t.transport.connect_count(), 1);
    assert_eq!(t.connections.state(), ConnectionState::Connected);

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_identity_while_resolving_resolves_once() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));
    t.profiles.set_delay(Duration::from_secs(3));

    t.provider.sign_in("alice");
    t.wait_for_session(|s| s.status() == Some(SessionStatus::Resolving))
        .await;
    t.provider.reemit();

    t.wait_for_session(is_active("alice")).await;
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert_eq!(t.profiles.lookups(), 1);
    assert_eq!(t.transport.connect_count(), 1);

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_at_most_one_live_link_across_identity_changes() {
    let t = TestSession::start();
    for uid in ["alice", "bob"] {
        t.profiles.insert(sample_user(uid, Role::User));
    }
    t.profiles.set_delay(Duration::from_millis(500));
    t.transport.script(Script::AcceptAfter(Duration::from_secs(1)));
    t.transport.script(Script::AcceptAfter(Duration::from_secs(3)));

    let steps: [Option<&str>; 6] = [
        Some("alice"),
        Some("bob"),
        None,
        Some("alice"),
        Some("bob"),
        Some("alice"),
    ];
    for step in steps {
        match step {
            Some(uid) => {
                t.provider.sign_in(uid);
            }
            None => t.provider.clear(),
        }
        t.settle().await;
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(t.transport.live_links() <= 1);
    }

    let snapshot = t.wait_for_session(is_active("alice")).await;
    let connected = t
        .wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert_eq!(
        connected.generation,
        snapshot.session.as_ref().map(|s| s.generation)
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(t.transport.live_links(), 1);
    assert!(t.transport.last_token().unwrap().starts_with("token-alice-"));

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_keep_session() {
    let options = ConnectionOptions {
        handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        retry: RetryPolicy {
            backoff: Backoff::Fixed(Duration::from_secs(1)),
            max_attempts: Some(3),
        },
    };
    let t = TestSession::with_options(options);
    t.profiles.insert(sample_user("alice", Role::User));
    for _ in 0..3 {
        t.transport
            .script(Script::Fail(ConnectionError::Rejected("HTTP 503".into())));
    }

    t.provider.sign_in("alice");
    let closed = t
        .wait_for_connection(|c| c.state == ConnectionState::Closed)
        .await;
    assert!(matches!(closed.last_error, Some(ConnectionError::Rejected(_))));
    assert_eq!(t.transport.connect_count(), 3);

    // Connection failures never end the session
    assert!(t.handle.snapshot().active_ticket().is_some());
    assert_eq!(t.provider.sign_out_calls(), 0);

    assert!(t.handle.ensure_connected());
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert_eq!(t.transport.connect_count(), 4);

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_link_reconnects() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));

    t.provider.sign_in("alice");
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;

    assert!(t.transport.drop_latest("server restart"));
    let retrying = t
        .wait_for_connection(|c| c.state == ConnectionState::Retrying)
        .await;
    assert_eq!(
        retrying.last_error,
        Some(ConnectionError::Dropped("server restart".into()))
    );

    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;
    assert_eq!(t.transport.connect_count(), 2);
    assert_eq!(t.transport.live_links(), 1);

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_identity_switch_replaces_connection() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));
    t.profiles.insert(sample_user("bob", Role::Admin));

    t.provider.sign_in("alice");
    let alice = t.wait_for_session(is_active("alice")).await;
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;

    t.provider.sign_in("bob");
    let bob = t.wait_for_session(is_active("bob")).await;
    let bob_generation = bob.session.as_ref().map(|s| s.generation);
    assert!(bob_generation > alice.session.as_ref().map(|s| s.generation));
    assert_eq!(bob.profile().unwrap().role, Role::Admin);

    t.wait_for_connection(|c| c.state == ConnectionState::Connected && c.generation == bob_generation)
        .await;
    assert_eq!(t.transport.connect_count(), 2);
    assert_eq!(t.transport.live_links(), 1);
    assert!(t.transport.last_token().unwrap().starts_with("token-bob-"));

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_profile_update_replaces_published_profile() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));

    t.provider.sign_in("alice");
    t.wait_for_session(is_active("alice")).await;

    let updated = t
        .handle
        .update_profile(UpdateCurrentUser::new().first_name("Alicia"))
        .await
        .unwrap();
    assert_eq!(updated.first_name, "Alicia");

    let snapshot = t
        .wait_for_session(|s| s.profile().is_some_and(|p| p.first_name == "Alicia"))
        .await;
    assert_eq!(snapshot.status(), Some(SessionStatus::Active));

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_replace_profile_requires_active_session() {
    let t = TestSession::start();
    t.wait_for_session(|s| !s.loading).await;

    let err = t
        .handle
        .replace_profile(sample_user("alice", Role::User))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NoSession));
    assert!(!t.handle.ensure_connected());

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_connection() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));

    t.provider.sign_in("alice");
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;

    let connections = t.connections.clone();
    let transport = t.transport.clone();
    t.stop().await;

    assert_eq!(connections.state(), ConnectionState::Closed);
    assert_eq!(transport.live_links(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_identity_survives_pending_forced_sign_out() {
    let t = TestSession::start();
    t.profiles.reject("mallory", StatusCode::UNAUTHORIZED);
    t.profiles.insert(sample_user("bob", Role::User));

    t.provider.sign_in("mallory");
    t.wait_for_session(|s| s.status() == Some(SessionStatus::Invalid))
        .await;

    // Bob takes over before mallory's forced sign-out has run
    t.provider.sign_in("bob");
    t.wait_for_session(is_active("bob")).await;

    t.settle().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = t.handle.snapshot();
    assert_eq!(snapshot.session.as_ref().map(|s| s.identity.uid.as_str()), Some("bob"));
    assert_eq!(snapshot.status(), Some(SessionStatus::Active));
    assert_eq!(t.provider.current_identity().map(|i| i.uid), Some("bob".to_string()));
    assert_eq!(
        t.connections.snapshot().generation,
        snapshot.session.as_ref().map(|s| s.generation)
    );

    t.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_refused_token_on_reconnect_retries_without_sign_out() {
    let t = TestSession::start();
    t.profiles.insert(sample_user("alice", Role::User));

    t.provider.sign_in("alice");
    t.wait_for_session(is_active("alice")).await;
    t.wait_for_connection(|c| c.state == ConnectionState::Connected)
        .await;

    t.provider.revoke();
    assert!(t.transport.drop_latest("server restart"));

    let retrying = t
        .wait_for_connection(|c| {
            c.state == ConnectionState::Retrying
                && matches!(c.last_error, Some(ConnectionError::Credential(_)))
        })
        .await;
    assert!(retrying.generation.is_some());
    // The refused handshake never reached the transport
    assert_eq!(t.transport.connect_count(), 1);
    assert_eq!(t.provider.sign_out_calls(), 0);
    assert_eq!(t.handle.snapshot().status(), Some(SessionStatus::Active));

    t.stop().await;
}
