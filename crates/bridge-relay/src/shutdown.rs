//! Shutdown coordination.
//!
//! A [`ShutdownSignal`] fires at most once no matter how many signals
//! arrive. The accept loop watches it to stop accepting; sessions are
//! cancelled separately once the drain window has passed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    token: CancellationToken,
}

/// One-shot shutdown trigger shared by the signal watcher and the engine.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger shutdown. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        let first = !self.inner.fired.swap(true, Ordering::AcqRel);
        if first {
            self.inner.token.cancel();
        }
        first
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Resolves once shutdown has been fired.
    pub async fn fired(&self) {
        self.inner.token.cancelled().await
    }
}

/// Fire `shutdown` on SIGHUP, SIGINT, SIGTERM or SIGQUIT.
///
/// Keeps listening after the first signal so that repeats are absorbed
/// instead of killing the process mid-drain.
#[cfg(unix)]
pub async fn watch_os_signals(shutdown: ShutdownSignal) {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    fn install(name: &'static str, kind: SignalKind) -> Option<Signal> {
        signal(kind)
            .map_err(|e| warn!(signal = name, error = %e, "failed to install signal handler"))
            .ok()
    }

    // A missing handler never resolves.
    async fn recv(sig: &mut Option<Signal>) {
        if let Some(sig) = sig {
            if sig.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }

    let mut hangup = install("SIGHUP", SignalKind::hangup());
    let mut interrupt = install("SIGINT", SignalKind::interrupt());
    let mut terminate = install("SIGTERM", SignalKind::terminate());
    let mut quit = install("SIGQUIT", SignalKind::quit());

    loop {
        let name = tokio::select! {
            _ = recv(&mut hangup) => "SIGHUP",
            _ = recv(&mut interrupt) => "SIGINT",
            _ = recv(&mut terminate) => "SIGTERM",
            _ = recv(&mut quit) => "SIGQUIT",
        };
        if shutdown.fire() {
            info!(signal = name, "shutdown signal received");
        } else {
            debug!(signal = name, "shutdown already in progress");
        }
    }
}

/// Fire `shutdown` on Ctrl+C.
#[cfg(not(unix))]
pub async fn watch_os_signals(shutdown: ShutdownSignal) {
    loop {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {e}");
            return;
        }
        if shutdown.fire() {
            info!(signal = "ctrl-c", "shutdown signal received");
        } else {
            debug!(signal = "ctrl-c", "shutdown already in progress");
        }
    }
}
