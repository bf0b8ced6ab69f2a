//! Threshold alerting with a per-recipient cooldown.
//!
//! The decision is "decide and stamp": a dispatch attempt stamps the
//! recipient's cooldown record before the dispatcher runs, and a failed
//! delivery does not give the slot back.

use crate::common::Bpm;
use crate::config::AlertConfig;
use crate::error::DispatchError;
use crate::events::PulseEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// The threshold and cooldown an alert decision is made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    pub threshold: Bpm,
    pub cooldown: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::from_config(&AlertConfig::default())
    }
}

/// What the policy decided for one sample and recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// The sample is at or below the threshold.
    Clear,
    /// The sample is high and the recipient is eligible; the record was stamped.
    Dispatch,
    /// The sample is high but an alert went out less than a cooldown ago.
    Suppressed { remaining: Duration },
}

impl AlertDecision {
    /// Whether the alert condition held, independent of suppression.
    pub fn is_alert(&self) -> bool {
        !matches!(self, AlertDecision::Clear)
    }
}

/// When each recipient was last alerted.
///
/// Entries are never evicted.
#[derive(Debug, Default)]
pub struct CooldownRecord {
    last_sent: HashMap<String, DateTime<Utc>>,
}

impl CooldownRecord {
    pub fn last_sent(&self, recipient: &str) -> Option<DateTime<Utc>> {
        self.last_sent.get(recipient).copied()
    }

    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}

impl AlertPolicy {
    pub fn from_config(config: &AlertConfig) -> Self {
        Self {
            threshold: config.threshold,
            cooldown: config.cooldown(),
        }
    }

    pub fn is_high(&self, bpm: Bpm) -> bool {
        bpm > self.threshold
    }

    /// Decides whether `bpm` warrants an alert for `recipient` at `now`,
    /// stamping `record` when it does.
    pub fn decide(
        &self,
        record: &mut CooldownRecord,
        recipient: &str,
        bpm: Bpm,
        now: DateTime<Utc>,
    ) -> AlertDecision {
        if !self.is_high(bpm) {
            return AlertDecision::Clear;
        }
        if let Some(last) = record.last_sent(recipient) {
            // A clock that stepped backwards counts as no time elapsed.
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.cooldown {
                return AlertDecision::Suppressed {
                    remaining: self.cooldown - elapsed,
                };
            }
        }
        record.last_sent.insert(recipient.to_string(), now);
        AlertDecision::Dispatch
    }
}

/// A high-BPM alert handed to a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighBpmAlert {
    pub recipient: String,
    pub bpm: Bpm,
    pub threshold: Bpm,
    pub at: DateTime<Utc>,
}

/// Delivers alerts to an external channel such as email.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &HighBpmAlert) -> Result<(), DispatchError>;
}

/// The result of checking one sample for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertOutcome {
    pub bpm: Bpm,
    pub decision: AlertDecision,
    /// Set when a dispatch was attempted and failed.
    pub delivery_error: Option<String>,
}

impl AlertOutcome {
    pub fn is_alert(&self) -> bool {
        self.decision.is_alert()
    }
}

/// Applies an `AlertPolicy` per recipient and drives the dispatcher.
pub struct AlertMonitor {
    policy: AlertPolicy,
    record: Mutex<CooldownRecord>,
    dispatcher: Arc<dyn AlertDispatcher>,
    events: broadcast::Sender<PulseEvent>,
}

impl AlertMonitor {
    pub fn new(
        policy: AlertPolicy,
        dispatcher: Arc<dyn AlertDispatcher>,
        events: broadcast::Sender<PulseEvent>,
    ) -> Self {
        Self {
            policy,
            record: Mutex::new(CooldownRecord::default()),
            dispatcher,
            events,
        }
    }

    pub fn policy(&self) -> AlertPolicy {
        self.policy
    }

    /// Checks `bpm` for `recipient` against the wall clock.
    pub async fn check(&self, recipient: &str, bpm: Bpm) -> AlertOutcome {
        self.check_at(recipient, bpm, Utc::now()).await
    }

    /// Checks `bpm` for `recipient` as of `now`.
    ///
    /// Dispatch failures are logged and reported in the outcome, never
    /// returned as errors.
    pub async fn check_at(&self, recipient: &str, bpm: Bpm, now: DateTime<Utc>) -> AlertOutcome {
        let decision = {
            let mut record = self.record.lock().await;
            self.policy.decide(&mut record, recipient, bpm, now)
        };

        let mut delivery_error = None;
        match decision {
            AlertDecision::Clear => {}
            AlertDecision::Suppressed { remaining } => {
                info!(
                    "Skipping alert for {} at {} BPM; cooldown has {}s left.",
                    recipient,
                    bpm,
                    remaining.as_secs()
                );
                self.events
                    .send(PulseEvent::AlertSuppressed {
                        recipient: recipient.to_string(),
                        bpm,
                    })
                    .ok();
            }
            AlertDecision::Dispatch => {
                let alert = HighBpmAlert {
                    recipient: recipient.to_string(),
                    bpm,
                    threshold: self.policy.threshold,
                    at: now,
                };
                match self.dispatcher.dispatch(&alert).await {
                    Ok(()) => {
                        info!("High heart rate alert sent to {} ({} BPM).", recipient, bpm);
                        self.events
                            .send(PulseEvent::AlertDispatched {
                                recipient: alert.recipient,
                                bpm,
                                at: now,
                            })
                            .ok();
                    }
                    Err(e) => {
                        warn!("Alert dispatch to {} failed: {}", recipient, e);
                        self.events
                            .send(PulseEvent::AlertFailed {
                                recipient: alert.recipient,
                                reason: e.to_string(),
                            })
                            .ok();
                        delivery_error = Some(e.to_string());
                    }
                }
            }
        }

        AlertOutcome {
            bpm,
            decision,
            delivery_error,
        }
    }

    /// When `recipient` was last alerted, if ever.
    pub async fn last_alerted(&self, recipient: &str) -> Option<DateTime<Utc>> {
        self.record.lock().await.last_sent(recipient)
    }
}
