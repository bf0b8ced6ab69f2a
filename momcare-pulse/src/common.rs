//! Contains common, primitive types shared across the pulse hub.
//!
//! Heart-rate samples and subscription handles get distinct types so that a
//! raw `u32` or an index can never be passed where the other is expected.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Uniquely and safely identifies one live subscription in the hub.
    ///
    /// Handles are returned by `PulseHub::subscribe`. A handle that has been
    /// removed is never confused with a newer subscription occupying the
    /// same slot, so unsubscribing twice is a harmless no-op.
    pub struct SubscriptionId;
}

/// A heart-rate sample in beats per minute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Bpm(pub u32);

impl Bpm {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for Bpm {
    fn from(value: u32) -> Self {
        Bpm(value)
    }
}

impl fmt::Display for Bpm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which variant of the sample source is currently producing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Serial,
    Simulated,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Serial => f.write_str("serial"),
            SourceKind::Simulated => f.write_str("simulated"),
        }
    }
}
