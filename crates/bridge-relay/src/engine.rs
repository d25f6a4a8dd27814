//! The accept loop.
//!
//! Accepts inbound connections until shutdown fires, spawning one relay
//! session per connection. Transient accept errors are retried with a
//! doubling delay; a closed listener or too many failures in a row end the
//! loop with an error. After the loop, in-flight sessions get a drain window
//! before they are cancelled.

use std::sync::Arc;
use std::time::Duration;

use bridge_core::defaults::{
    DEFAULT_ACCEPT_INITIAL_BACKOFF_MS, DEFAULT_ACCEPT_MAX_BACKOFF_MS,
    DEFAULT_ACCEPT_MAX_CONSECUTIVE_FAILURES, DEFAULT_CANCEL_GRACE_MS, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_DRAIN_TIMEOUT_SECS,
};
use bridge_core::io::CopyOptions;
use bridge_transport::{TransportDialer, TransportListener, TransportStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::RelayError;
use crate::session::{self, SessionContext};
use crate::shutdown::ShutdownSignal;
use crate::tracker::SessionTracker;

/// Retry policy for failed accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptBackoff {
    pub initial: Duration,
    pub max: Duration,
    /// Failures in a row that end the loop.
    pub max_consecutive_failures: u32,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(DEFAULT_ACCEPT_INITIAL_BACKOFF_MS),
            max: Duration::from_millis(DEFAULT_ACCEPT_MAX_BACKOFF_MS),
            max_consecutive_failures: DEFAULT_ACCEPT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Running state of [`AcceptBackoff`].
struct Backoff {
    policy: AcceptBackoff,
    failures: u32,
    next: Duration,
}

impl Backoff {
    fn new(policy: AcceptBackoff) -> Self {
        Self {
            policy,
            failures: 0,
            next: policy.initial,
        }
    }

    fn reset(&mut self) {
        self.failures = 0;
        self.next = self.policy.initial;
    }

    /// Record a failure. Returns the delay before the next attempt, or
    /// `None` once the failure budget is used up.
    fn fail(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_consecutive_failures {
            return None;
        }
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.policy.max);
        Some(delay)
    }
}

/// Settings of the accept loop and its sessions.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub copy: CopyOptions,
    pub connect_timeout: Duration,
    /// How long sessions may keep running after shutdown.
    pub drain_timeout: Duration,
    /// How long cancelled sessions get to close their connections.
    pub cancel_grace: Duration,
    pub backoff: AcceptBackoff,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            copy: CopyOptions::default(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            cancel_grace: Duration::from_millis(DEFAULT_CANCEL_GRACE_MS),
            backoff: AcceptBackoff::default(),
        }
    }
}

/// Accept connections from `listener` and relay each one to `remote` over
/// `dialer` until `shutdown` fires.
///
/// Returns `Ok` after a requested shutdown and an error when accepting
/// became impossible. The listener is closed exactly once before returning.
pub async fn serve<L, D>(
    mut listener: L,
    dialer: D,
    remote: String,
    options: EngineOptions,
    shutdown: ShutdownSignal,
) -> Result<(), RelayError>
where
    L: TransportListener,
    D: TransportDialer,
{
    let tracker = SessionTracker::new();
    let sessions = CancellationToken::new();
    let ctx = Arc::new(SessionContext {
        copy: options.copy,
        connect_timeout: options.connect_timeout,
        cancel: sessions.clone(),
    });
    let remote: Arc<str> = remote.into();
    let mut backoff = Backoff::new(options.backoff);
    let mut next_id: u64 = 0;

    let result = loop {
        debug!("waiting for inbound connection");
        tokio::select! {
            biased;
            _ = shutdown.fired() => {
                info!("shutdown requested, no longer accepting");
                break Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    backoff.reset();
                    next_id += 1;
                    let peer = stream.peer();
                    info!(session = next_id, peer = %peer, "accepted connection");

                    let guard = tracker.track();
                    let dialer = dialer.clone();
                    let ctx = Arc::clone(&ctx);
                    let remote = Arc::clone(&remote);
                    tokio::spawn(
                        async move {
                            let _guard = guard;
                            if let Err(e) = session::handle(stream, &dialer, &remote, &ctx).await {
                                warn!(error = %e, error_kind = e.error_kind(), "session failed");
                            }
                        }
                        .instrument(info_span!("session", id = next_id, peer = %peer)),
                    );
                }
                Err(e) => {
                    if shutdown.is_fired() {
                        break Ok(());
                    }
                    if e.is_closed() {
                        error!("listener closed while still accepting");
                        break Err(RelayError::ListenerClosed);
                    }
                    match backoff.fail() {
                        Some(delay) => {
                            warn!(
                                error = %e,
                                failures = backoff.failures,
                                delay = ?delay,
                                "accept failed, retrying"
                            );
                            tokio::select! {
                                biased;
                                _ = shutdown.fired() => break Ok(()),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => {
                            error!(error = %e, failures = backoff.failures, "accept keeps failing, giving up");
                            break Err(RelayError::AcceptExhausted {
                                failures: backoff.failures,
                                source: e,
                            });
                        }
                    }
                }
            }
        }
    };

    listener.close();
    let drain_timeout = if result.is_ok() {
        options.drain_timeout
    } else {
        Duration::ZERO
    };
    drain(&tracker, &sessions, drain_timeout, options.cancel_grace).await;

    result
}

/// Let running sessions finish for `drain_timeout`, then cancel the rest and
/// give them `grace` to close their connections.
async fn drain(
    tracker: &SessionTracker,
    sessions: &CancellationToken,
    drain_timeout: Duration,
    grace: Duration,
) {
    let active = tracker.count();
    if active == 0 {
        return;
    }

    if !drain_timeout.is_zero() {
        info!(active, drain_timeout_secs = drain_timeout.as_secs(), "waiting for sessions to finish");
        if tracker.wait_for_zero(drain_timeout).await {
            info!("all sessions finished");
            return;
        }
    }

    warn!(remaining = tracker.count(), "cancelling remaining sessions");
    sessions.cancel();
    if !tracker.wait_for_zero(grace).await {
        warn!(remaining = tracker.count(), "sessions still closing at exit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_consecutive_failures: u32) -> AcceptBackoff {
        AcceptBackoff {
            initial: Duration::from_millis(5),
            max: Duration::from_millis(20),
            max_consecutive_failures,
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(policy(10));
        let delays: Vec<_> = (0..4).map(|_| backoff.fail().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(20),
            ]
        );
    }

    #[test]
    fn test_backoff_gives_up_and_resets() {
        let mut backoff = Backoff::new(policy(3));
        assert!(backoff.fail().is_some());
        assert!(backoff.fail().is_some());
        assert!(backoff.fail().is_none());

        backoff.reset();
        assert_eq!(backoff.fail(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_backoff_saturates_on_huge_delays() {
        let mut backoff = Backoff::new(AcceptBackoff {
            initial: Duration::MAX / 2 + Duration::from_secs(1),
            max: Duration::MAX,
            max_consecutive_failures: 4,
        });
        backoff.fail().unwrap();
        assert_eq!(backoff.fail(), Some(Duration::MAX));
        assert_eq!(backoff.fail(), Some(Duration::MAX));
    }

    #[test]
    fn test_single_failure_budget() {
        let mut backoff = Backoff::new(policy(1));
        assert!(backoff.fail().is_none());
    }
}
