//! One relay session: dial the remote, copy both ways, close both ends.

use std::time::Duration;

use bridge_core::io::{CopyOptions, DirectionEnd, DirectionReport, PairReport, RelayMetrics, copy_pair};
use bridge_transport::{TransportDialer, TransportStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::RelayError;

/// Settings shared by every session of an accept loop.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub copy: CopyOptions,
    pub connect_timeout: Duration,
    /// Cancelled when the drain window after shutdown has elapsed.
    pub cancel: CancellationToken,
}

/// Logs every forwarded chunk at trace level.
struct ChunkTrace;

impl RelayMetrics for ChunkTrace {
    fn record_upstream(&self, bytes: u64) {
        trace!(bytes, "forwarded to remote");
    }

    fn record_downstream(&self, bytes: u64) {
        trace!(bytes, "forwarded to local");
    }
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The local side stopped sending.
    LocalClosed,
    /// The remote side stopped sending.
    RemoteClosed,
    /// A read or write failed.
    Failed,
    /// Cancelled after the shutdown drain window.
    Cancelled,
}

impl SessionEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::LocalClosed => "local closed",
            SessionEnd::RemoteClosed => "remote closed",
            SessionEnd::Failed => "io error",
            SessionEnd::Cancelled => "cancelled",
        }
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub local: String,
    pub remote: String,
    pub upstream_bytes: u64,
    pub downstream_bytes: u64,
    pub end: SessionEnd,
}

impl SessionReport {
    fn new(local: String, remote: String, pair: &PairReport) -> Self {
        let failed = |d: &Option<DirectionReport>| d.as_ref().is_some_and(DirectionReport::is_error);
        let end = if pair.cancelled {
            SessionEnd::Cancelled
        } else if failed(&pair.upstream) || failed(&pair.downstream) {
            SessionEnd::Failed
        } else if pair.upstream.is_some() {
            SessionEnd::LocalClosed
        } else {
            SessionEnd::RemoteClosed
        };

        Self {
            local,
            remote,
            upstream_bytes: pair.upstream_bytes,
            downstream_bytes: pair.downstream_bytes,
            end,
        }
    }
}

fn log_direction(direction: &'static str, report: Option<&DirectionReport>) {
    let Some(report) = report else {
        return;
    };
    match &report.end {
        DirectionEnd::Eof => debug!(direction, bytes = report.bytes, "end of stream"),
        DirectionEnd::ReadFailed(e) => {
            warn!(direction, bytes = report.bytes, error = %e, "read failed")
        }
        DirectionEnd::WriteFailed(e) => {
            warn!(direction, bytes = report.bytes, error = %e, "write failed")
        }
    }
}

/// An inbound connection paired with its outbound connection.
///
/// Owns both streams; running the session consumes it, so each stream is
/// closed exactly once.
pub struct RelaySession<I, O> {
    inbound: I,
    outbound: O,
}

impl<I, O> RelaySession<I, O>
where
    I: TransportStream,
    O: TransportStream,
{
    pub fn new(inbound: I, outbound: O) -> Self {
        Self { inbound, outbound }
    }

    /// Copy until the session ends, then close both streams.
    pub async fn run(mut self, options: CopyOptions, cancel: &CancellationToken) -> SessionReport {
        let local = self.inbound.peer();
        let remote = self.outbound.peer();
        info!(local = %local, remote = %remote, "tunneling");

        let pair = copy_pair(
            &mut self.inbound,
            &mut self.outbound,
            options,
            cancel.cancelled(),
            &ChunkTrace,
        )
        .await;
        log_direction("upstream", pair.upstream.as_ref());
        log_direction("downstream", pair.downstream.as_ref());

        self.close().await;
        SessionReport::new(local, remote, &pair)
    }

    async fn close(mut self) {
        let (inbound, outbound) = tokio::join!(self.inbound.close(), self.outbound.close());
        if let Err(e) = inbound {
            debug!(error = %e, "closing local connection failed");
        }
        if let Err(e) = outbound {
            debug!(error = %e, "closing remote connection failed");
        }
    }
}

/// Relay one accepted connection to `remote`.
///
/// On dial failure the inbound connection is closed and the error returned;
/// nothing else is affected.
pub async fn handle<S, D>(
    mut inbound: S,
    dialer: &D,
    remote: &str,
    ctx: &SessionContext,
) -> Result<SessionReport, RelayError>
where
    S: TransportStream,
    D: TransportDialer,
{
    debug!(remote = %remote, "connecting to remote");
    let dialed = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(RelayError::Cancelled),
        result = tokio::time::timeout(ctx.connect_timeout, dialer.dial(remote)) => match result {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(RelayError::Dial { addr: remote.to_string(), source }),
            Err(_) => Err(RelayError::DialTimeout(remote.to_string())),
        },
    };

    let outbound = match dialed {
        Ok(stream) => stream,
        Err(e) => {
            let _ = inbound.close().await;
            return Err(e);
        }
    };

    let report = RelaySession::new(inbound, outbound)
        .run(ctx.copy, &ctx.cancel)
        .await;
    info!(
        local = %report.local,
        remote = %report.remote,
        upstream_bytes = report.upstream_bytes,
        downstream_bytes = report.downstream_bytes,
        reason = report.end.as_str(),
        "session closed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_transport::{MemoryNetwork, TransportListener};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn ctx() -> SessionContext {
        SessionContext {
            copy: CopyOptions {
                buffer_size: 4096,
                half_close: false,
            },
            connect_timeout: Duration::from_secs(2),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_dial_failure_closes_inbound() {
        let network = MemoryNetwork::new();
        let mut front = network.listen("front").unwrap();
        let mut client = network.dialer().dial("front").await.unwrap();
        let inbound = front.accept().await.unwrap();

        let err = handle(inbound, &network.dialer(), "missing", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Dial { .. }));

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_relays_until_local_closes() {
        let network = MemoryNetwork::new();
        let mut front = network.listen("front").unwrap();
        let mut back = network.listen("back").unwrap();
        let mut client = network.dialer().dial("front").await.unwrap();
        let inbound = front.accept().await.unwrap();

        let dialer = network.dialer();
        let session = tokio::spawn(async move { handle(inbound, &dialer, "back", &ctx()).await });

        let mut target = back.accept().await.unwrap();
        client.write_all(b"hello").await.unwrap();
        client.shutdown().await.unwrap();

        let mut got = Vec::new();
        target.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"hello");

        let report = session.await.unwrap().unwrap();
        assert_eq!(report.upstream_bytes, 5);
        assert_eq!(report.end, SessionEnd::LocalClosed);
    }

    #[tokio::test]
    async fn test_cancel_before_dial_completes() {
        let network = MemoryNetwork::new();
        let mut front = network.listen("front").unwrap();
        let _client = network.dialer().dial("front").await.unwrap();
        let inbound = front.accept().await.unwrap();

        let ctx = ctx();
        ctx.cancel.cancel();
        let err = handle(inbound, &network.dialer(), "back", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
    }

    #[test]
    fn test_report_end_reason() {
        let pair = PairReport {
            downstream: Some(DirectionReport {
                bytes: 3,
                end: DirectionEnd::Eof,
            }),
            downstream_bytes: 3,
            ..Default::default()
        };
        let report = SessionReport::new("a".into(), "b".into(), &pair);
        assert_eq!(report.end, SessionEnd::RemoteClosed);
        assert_eq!(report.downstream_bytes, 3);

        let cancelled = PairReport {
            cancelled: true,
            ..Default::default()
        };
        let report = SessionReport::new("a".into(), "b".into(), &cancelled);
        assert_eq!(report.end, SessionEnd::Cancelled);
    }
}
