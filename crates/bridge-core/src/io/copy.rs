//! Bidirectional copy loop with per-direction reports.
//!
//! A relay session pairs a local connection with a remote one. This module
//! moves bytes between the two: the upstream direction reads `local` and
//! writes `remote`, the downstream direction reads `remote` and writes
//! `local`. Both directions are driven as independent futures within a single
//! task, so back-pressure on one direction never stalls the other.
//!
//! Metrics recording is abstracted via the `RelayMetrics` trait, allowing the
//! caller to count bytes per chunk without the copy loop knowing about it.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::defaults::{DEFAULT_HALF_CLOSE, DEFAULT_RELAY_BUFFER_SIZE};

/// Trait for recording relay metrics.
///
/// Called once per forwarded chunk, after the chunk was written and flushed.
pub trait RelayMetrics {
    /// Record bytes moved from the local side to the remote side.
    fn record_upstream(&self, bytes: u64);
    /// Record bytes moved from the remote side to the local side.
    fn record_downstream(&self, bytes: u64);
}

/// No-op metrics implementation for cases where metrics aren't needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl RelayMetrics for NoOpMetrics {
    #[inline]
    fn record_upstream(&self, _bytes: u64) {}
    #[inline]
    fn record_downstream(&self, _bytes: u64) {}
}

/// Tuning knobs for [`copy_pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Size of the reusable buffer of each direction. Values below 1 are
    /// treated as 1.
    pub buffer_size: usize,
    /// Forward end-of-stream as a write shutdown and keep the session open
    /// until both directions finished. When off, the pair returns as soon as
    /// either direction stops.
    pub half_close: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_RELAY_BUFFER_SIZE,
            half_close: DEFAULT_HALF_CLOSE,
        }
    }
}

/// Why a copy direction stopped.
#[derive(Debug)]
pub enum DirectionEnd {
    /// The reader reported end-of-stream. Not an error.
    Eof,
    /// Reading failed.
    ReadFailed(io::Error),
    /// Writing or flushing failed.
    WriteFailed(io::Error),
}

/// Outcome of one finished copy direction.
#[derive(Debug)]
pub struct DirectionReport {
    /// Bytes written to the destination.
    pub bytes: u64,
    /// Reason the direction stopped.
    pub end: DirectionEnd,
}

impl DirectionReport {
    /// Returns `true` if the direction stopped because of an I/O error.
    pub fn is_error(&self) -> bool {
        !matches!(self.end, DirectionEnd::Eof)
    }
}

/// Outcome of a whole [`copy_pair`] run.
///
/// A direction report is `None` when that direction was still running when
/// the pair returned (the other direction ended first, or cancellation fired).
#[derive(Debug, Default)]
pub struct PairReport {
    pub upstream: Option<DirectionReport>,
    pub downstream: Option<DirectionReport>,
    /// Bytes moved local → remote, including an unfinished direction.
    pub upstream_bytes: u64,
    /// Bytes moved remote → local, including an unfinished direction.
    pub downstream_bytes: u64,
    /// The cancellation future completed before the copy settled.
    pub cancelled: bool,
}

impl PairReport {
    fn settled(&self) -> bool {
        let failed = |d: &Option<DirectionReport>| d.as_ref().is_some_and(DirectionReport::is_error);
        (self.upstream.is_some() && self.downstream.is_some())
            || failed(&self.upstream)
            || failed(&self.downstream)
    }
}

/// One-directional copy: read → write_all → flush, until EOF or error.
async fn copy_direction<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    buffer_size: usize,
    forward_eof: bool,
    moved: &AtomicU64,
    on_chunk: F,
) -> DirectionReport
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: Fn(u64),
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    let end = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break DirectionEnd::Eof,
            Ok(n) => n,
            Err(e) => break DirectionEnd::ReadFailed(e),
        };
        // A short read is forwarded as-is, never coalesced with the next one.
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break DirectionEnd::WriteFailed(e);
        }
        if let Err(e) = writer.flush().await {
            break DirectionEnd::WriteFailed(e);
        }
        total += n as u64;
        moved.fetch_add(n as u64, Ordering::Relaxed);
        on_chunk(n as u64);
    };

    if forward_eof && matches!(end, DirectionEnd::Eof) {
        // The destination may already be gone; nothing left to report.
        let _ = writer.shutdown().await;
    }

    DirectionReport { bytes: total, end }
}

/// Copy bytes between `local` and `remote` in both directions.
///
/// Returns when either direction stops (or, with `half_close`, when both
/// finished or one failed), or as soon as `cancelled` completes. The
/// direction still running at that point is dropped; the caller owns both
/// connections and is expected to close them afterwards.
///
/// # Arguments
///
/// * `local` - The inbound connection (accepted by the listener)
/// * `remote` - The outbound connection (opened by the dialer)
/// * `options` - Buffer size and half-close behaviour
/// * `cancelled` - Future that completes when the session must stop
/// * `metrics` - Metrics recorder for tracking bytes transferred
pub async fn copy_pair<A, B, C, M>(
    local: &mut A,
    remote: &mut B,
    options: CopyOptions,
    cancelled: C,
    metrics: &M,
) -> PairReport
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    C: Future<Output = ()>,
    M: RelayMetrics,
{
    let (mut local_r, mut local_w) = tokio::io::split(local);
    let (mut remote_r, mut remote_w) = tokio::io::split(remote);

    let up_bytes = AtomicU64::new(0);
    let down_bytes = AtomicU64::new(0);

    let upstream = copy_direction(
        &mut local_r,
        &mut remote_w,
        options.buffer_size,
        options.half_close,
        &up_bytes,
        |n| metrics.record_upstream(n),
    );
    let downstream = copy_direction(
        &mut remote_r,
        &mut local_w,
        options.buffer_size,
        options.half_close,
        &down_bytes,
        |n| metrics.record_downstream(n),
    );
    tokio::pin!(upstream);
    tokio::pin!(downstream);
    tokio::pin!(cancelled);

    let mut report = PairReport::default();
    loop {
        tokio::select! {
            done = &mut upstream, if report.upstream.is_none() => {
                report.upstream = Some(done);
            }
            done = &mut downstream, if report.downstream.is_none() => {
                report.downstream = Some(done);
            }
            _ = &mut cancelled => {
                report.cancelled = true;
                break;
            }
        }

        if !options.half_close || report.settled() {
            break;
        }
    }

    report.upstream_bytes = up_bytes.load(Ordering::Relaxed);
    report.downstream_bytes = down_bytes.load(Ordering::Relaxed);
    report
}
