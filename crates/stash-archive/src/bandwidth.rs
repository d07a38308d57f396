//! Byte counting for pipeline transfers.

use futures::TryStreamExt;
use stash_core::BodyStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    bytes: AtomicU64,
    chunks: AtomicU64,
}

/// Pass-through counter for bytes moving through a body stream.
///
/// Clones share the same counters, so one clone can wrap a stream that is
/// handed off while another reads the totals afterwards.
#[derive(Debug, Clone, Default)]
pub struct BandwidthTracker {
    counters: Arc<Counters>,
}

impl BandwidthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a stream so every chunk is counted as it is forwarded.
    pub fn track(&self, stream: BodyStream) -> BodyStream {
        let tracker = self.clone();
        Box::pin(stream.inspect_ok(move |chunk| tracker.record(chunk.len() as u64)))
    }

    /// Record one forwarded chunk.
    pub fn record(&self, bytes: u64) {
        self.counters.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.counters.chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_bytes(&self) -> u64 {
        self.counters.bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            chunks: self.counters.chunks.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time view of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSnapshot {
    pub bytes: u64,
    pub chunks: u64,
}
