//! Deduplication of alerts by timestamp.
//!
//! Two rules are used by the workers:
//!
//! - [`HighWaterMark`]: forward only events newer than the newest one seen
//!   (stream and push workers).
//! - [`RecentlySeen`]: forward only events whose key is not among the last
//!   `capacity` keys (poll worker, and the optional cross-transport layer).
//!
//! [`Forwarder`] applies the cross-transport layer, if any, and hands the
//! event to the sink.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use mailbell_core::{AlertEvent, AlertSink, WorkerKind};
use tracing::{debug, trace};

/// Bounded set of recently seen dedup keys; the oldest key is evicted first.
#[derive(Debug)]
pub struct RecentlySeen {
    capacity: usize,
    order: VecDeque<u64>,
    keys: HashSet<u64>,
}

impl RecentlySeen {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            keys: HashSet::with_capacity(capacity + 1),
        }
    }

    /// Record `key`. Returns false if it was already present.
    pub fn insert(&mut self, key: u64) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, key: u64) -> bool {
        self.keys.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A [`RecentlySeen`] shared between tasks.
pub type SharedRecent = Arc<Mutex<RecentlySeen>>;

pub fn shared_recent(capacity: usize) -> SharedRecent {
    Arc::new(Mutex::new(RecentlySeen::new(capacity)))
}

/// Newest timestamp processed so far.
#[derive(Debug)]
pub struct HighWaterMark(AtomicU64);

impl HighWaterMark {
    /// Start below every real timestamp.
    pub fn new() -> Self {
        Self(AtomicU64::new(f64::NEG_INFINITY.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }

    /// Raise the mark to `timestamp` if it is newer. Returns whether it was.
    pub fn advance(&self, timestamp: f64) -> bool {
        if timestamp.is_nan() {
            return false;
        }
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (timestamp > f64::from_bits(current)).then_some(timestamp.to_bits())
            })
            .is_ok()
    }
}

impl Default for HighWaterMark {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands confirmed alerts to the sink, once across transports when a shared
/// set is configured.
#[derive(Clone)]
pub struct Forwarder {
    worker: WorkerKind,
    sink: Arc<dyn AlertSink>,
    shared: Option<SharedRecent>,
}

impl Forwarder {
    pub fn new(worker: WorkerKind, sink: Arc<dyn AlertSink>, shared: Option<SharedRecent>) -> Self {
        Self {
            worker,
            sink,
            shared,
        }
    }

    /// Forward `event`. Returns false if another transport already delivered it.
    pub async fn forward(&self, event: AlertEvent) -> bool {
        if let Some(shared) = &self.shared {
            let fresh = shared
                .lock()
                .map(|mut seen| seen.insert(event.dedup_key()))
                .unwrap_or(true);
            if !fresh {
                debug!(worker = %self.worker, timestamp = event.timestamp, "already delivered by another transport");
                return false;
            }
        }

        trace!(worker = %self.worker, subject = %event.subject, "forwarding alert");
        self.sink.handle(event).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recently_seen_rejects_duplicates() {
        let mut seen = RecentlySeen::new(100);
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_recently_seen_never_exceeds_capacity() {
        let mut seen = RecentlySeen::new(100);
        for key in 0..250u64 {
            seen.insert(key);
            assert!(seen.len() <= 100);
        }
        assert_eq!(seen.len(), 100);
        // Oldest evicted first.
        assert!(!seen.contains(149));
        assert!(seen.contains(150));
        assert!(seen.contains(249));
        // An evicted key is new again.
        assert!(seen.insert(0));
    }

    #[test]
    fn test_high_water_mark() {
        let mark = HighWaterMark::new();
        assert!(mark.advance(1000.0));
        assert!(!mark.advance(1000.0));
        assert!(!mark.advance(999.5));
        assert!(mark.advance(1000.5));
        assert!(!mark.advance(f64::NAN));
        assert_eq!(mark.get(), 1000.5);
    }
}
