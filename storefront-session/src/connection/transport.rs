use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectionError;
use crate::identity::BearerToken;

/// Opens the realtime link. Implementations resolve once the handshake has been
/// acknowledged.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, token: &BearerToken) -> Result<Link, ConnectionError>;
}

/// Create the two ends of a live connection.
///
/// The manager keeps the [`Link`]; the transport drives the [`LinkHandle`].
pub fn link() -> (Link, LinkHandle) {
    let shutdown = CancellationToken::new();
    let (dropped_tx, dropped_rx) = oneshot::channel();

    let link = Link {
        shutdown: shutdown.clone(),
        dropped: Some(dropped_rx),
    };
    let handle = LinkHandle {
        shutdown,
        dropped: dropped_tx,
    };
    (link, handle)
}

/// Manager side of a live connection. Dropping it disconnects.
#[derive(Debug)]
pub struct Link {
    shutdown: CancellationToken,
    dropped: Option<oneshot::Receiver<String>>,
}

impl Link {
    /// Ask the transport to disconnect
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Resolves with a reason once the remote side drops the connection.
    pub async fn closed(&mut self) -> String {
        let Some(dropped) = self.dropped.take() else {
            return "link already observed closed".to_string();
        };
        dropped
            .await
            .unwrap_or_else(|_| "transport went away".to_string())
    }

    pub(crate) fn disconnect_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Transport side of a live connection
#[derive(Debug)]
pub struct LinkHandle {
    shutdown: CancellationToken,
    dropped: oneshot::Sender<String>,
}

impl LinkHandle {
    /// Resolves once the manager wants the connection gone
    pub async fn shutdown_requested(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Report that the remote side dropped the connection
    pub fn report_dropped(self, reason: impl Into<String>) {
        // The manager may have already let go of the link
        let _ = self.dropped.send(reason.into());
    }
}
