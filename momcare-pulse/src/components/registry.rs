//! The subscriber registry and the sink capability subscribers implement.

use crate::common::{Bpm, SubscriptionId};
use crate::error::SinkError;
use slotmap::SlotMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A consumer of fanned-out samples.
///
/// `deliver` must not block or call back into the hub: the notifier calls
/// it for every subscriber in turn while holding the hub lock. An error is
/// logged by the notifier and never stops delivery to the remaining
/// subscribers.
pub trait BpmSink: Send + Sync {
    fn deliver(&self, bpm: Bpm) -> Result<(), SinkError>;
}

impl<F> BpmSink for F
where
    F: Fn(Bpm) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(&self, bpm: Bpm) -> Result<(), SinkError> {
        self(bpm)
    }
}

/// A sink that forwards samples into a bounded channel.
///
/// This is what a streaming HTTP response subscribes with: the response
/// body drains the receiving end.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bpm>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bpm>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl BpmSink for ChannelSink {
    fn deliver(&self, bpm: Bpm) -> Result<(), SinkError> {
        self.tx.try_send(bpm).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Lagging,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

struct Subscription {
    /// Registration order; slot indices are reused and cannot provide it.
    seq: u64,
    sink: Arc<dyn BpmSink>,
}

/// Tracks live subscriptions by handle.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: SlotMap<SubscriptionId, Subscription>,
    next_seq: u64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink and returns the handle that removes it.
    pub fn insert(&mut self, sink: Arc<dyn BpmSink>) -> SubscriptionId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(Subscription { seq, sink })
    }

    /// Removes a subscription.
    ///
    /// Returns `true` if the handle was live. Stale or foreign handles are a no-op.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the current subscribers in registration order.
    ///
    /// The snapshot owns its sinks, so it stays valid after the registry
    /// lock is released and is unaffected by later subscribes.
    pub fn snapshot(&self) -> Vec<(SubscriptionId, Arc<dyn BpmSink>)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(id, sub)| (sub.seq, id, sub.sink.clone()))
            .collect();
        entries.sort_unstable_by_key(|(seq, _, _)| *seq);
        entries
            .into_iter()
            .map(|(_, id, sink)| (id, sink))
            .collect()
    }
}
