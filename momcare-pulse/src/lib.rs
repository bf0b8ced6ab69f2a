//! # Pulse
//!
//! Live heart-rate distribution for the MomCare app.
//!
//! A single sample source (a serial heart-rate sensor, or a random-walk
//! simulator when no sensor is attached) feeds a `PulseHub`. The hub keeps
//! the latest reading, fans every change out to the open subscriptions, and
//! decides when an elevated reading should alert a recipient.
//!
//! ## Core Concepts
//!
//! - **Latest value**: the most recent sample, readable at any time.
//! - **Subscriptions**: `BpmSink`s registered by handle. Each change is
//!   delivered once to every subscription, in registration order; a failing
//!   sink never blocks the others.
//! - **No redundant notifications**: a sample equal to the latest value is
//!   dropped without notifying anyone.
//! - **Threshold alerting**: a reading above the threshold alerts a
//!   recipient at most once per cooldown window.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use pulse::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PulseConfig::default();
//!     let directory = Arc::new(InMemoryDirectory::from_config(&config.recipients));
//!     let mailer = Arc::new(DirectoryMailer::new(directory.clone(), config.alert.sender.clone()));
//!     let hub = PulseHub::new(config, mailer);
//!
//!     let _id = hub
//!         .subscribe(Arc::new(|bpm: Bpm| -> Result<(), SinkError> {
//!             println!("BPM is now {}", bpm);
//!             Ok(())
//!         }))
//!         .await;
//!
//!     hub.run(pulse::api::router(AppState { hub: hub.clone(), directory })).await
//! }
//! ```

pub const SERVICE_NAME: &str = "MomCare Pulse";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod api;
pub mod common;
pub mod components;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod mailer;

/// A prelude module for easy importing of the most common pulse types.
pub mod prelude {
    pub use crate::api::AppState;
    pub use crate::common::{Bpm, SourceKind, SubscriptionId};
    pub use crate::components::alert::{
        AlertDecision, AlertDispatcher, AlertOutcome, AlertPolicy, HighBpmAlert,
    };
    pub use crate::components::registry::{BpmSink, ChannelSink};
    pub use crate::config::PulseConfig;
    pub use crate::directory::{InMemoryDirectory, RecipientDirectory};
    pub use crate::engine::{FanOut, PulseHub, SubscriptionGuard};
    pub use crate::error::{DispatchError, SinkError, SourceError};
    pub use crate::events::PulseEvent;
    pub use crate::mailer::DirectoryMailer;
}
