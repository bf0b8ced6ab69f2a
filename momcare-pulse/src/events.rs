//! Defines the hub's internal event bus payloads.
//!
//! These are observability events, not the sample fan-out itself: samples
//! reach subscribers through their sinks. Anything that wants to log or
//! display what the hub is doing subscribes here instead.

use crate::common::{Bpm, SourceKind, SubscriptionId};
use chrono::{DateTime, Utc};

/// Events describing what the hub and its sample source are doing.
#[derive(Debug, Clone)]
pub enum PulseEvent {
    /// A sample source variant began producing values.
    SourceStarted { kind: SourceKind },
    /// The hardware source failed and the simulator took over.
    SourceFellBack { reason: String },
    /// The source runner exited after a shutdown signal.
    SourceStopped,
    /// A raw sample differed from the latest value and was fanned out.
    SampleAccepted {
        bpm: Bpm,
        delivered: usize,
        failed: usize,
    },
    SubscriberAdded { id: SubscriptionId },
    SubscriberRemoved { id: SubscriptionId },
    /// An alert was handed to the dispatcher and delivered.
    AlertDispatched {
        recipient: String,
        bpm: Bpm,
        at: DateTime<Utc>,
    },
    /// A high sample was seen but the recipient is still cooling down.
    AlertSuppressed { recipient: String, bpm: Bpm },
    /// Dispatch was attempted and failed; the cooldown is still consumed.
    AlertFailed { recipient: String, reason: String },
}
