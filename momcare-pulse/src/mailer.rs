//! Renders high-BPM alerts and hands them to an outbox.
//!
//! Actual mail transport is outside this crate. `DirectoryMailer` resolves
//! the recipient, renders the message, logs it and keeps the most recent
//! messages in memory, then records the reading in the recipient's medical
//! history.

use crate::components::alert::{AlertDispatcher, HighBpmAlert};
use crate::directory::{MedicalEvent, MedicalEventKind, Recipient, RecipientDirectory};
use crate::error::DispatchError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const ALERT_SUBJECT: &str = "MomCare - High Heartbeat Alert";

const OUTBOX_CAPACITY: usize = 128;

/// A rendered alert email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Renders the plain-text alert for `recipient`.
pub fn render_alert(alert: &HighBpmAlert, recipient: &Recipient, sender: &str) -> AlertMessage {
    let body = format!(
        "Hello {name},\n\n\
         We've detected an elevated heartbeat reading in your recent monitoring:\n\n\
         \x20 Current BPM: {bpm}\n\
         \x20 Threshold: {threshold} BPM\n\n\
         While this could be normal due to activity or other factors, we recommend:\n\
         \x20 - Take a few minutes to sit down and rest\n\
         \x20 - Take slow, deep breaths\n\
         \x20 - Stay hydrated\n\
         \x20 - Contact your healthcare provider if the high heartbeat persists \
         or if you experience any discomfort\n\n\
         This is an automated alert from your MomCare app, sent {at}.\n",
        name = recipient.name,
        bpm = alert.bpm,
        threshold = alert.threshold,
        at = alert.at.format("%Y-%m-%d %H:%M UTC"),
    );
    AlertMessage {
        from: sender.to_string(),
        to: recipient.email.clone(),
        subject: ALERT_SUBJECT.to_string(),
        body,
    }
}

pub struct DirectoryMailer {
    directory: Arc<dyn RecipientDirectory>,
    sender: String,
    outbox: Mutex<VecDeque<AlertMessage>>,
}

impl DirectoryMailer {
    pub fn new(directory: Arc<dyn RecipientDirectory>, sender: impl Into<String>) -> Self {
        Self {
            directory,
            sender: sender.into(),
            outbox: Mutex::new(VecDeque::new()),
        }
    }

    /// Most recently sent messages, oldest first.
    pub async fn sent(&self) -> Vec<AlertMessage> {
        self.outbox.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl AlertDispatcher for DirectoryMailer {
    async fn dispatch(&self, alert: &HighBpmAlert) -> Result<(), DispatchError> {
        let recipient = self
            .directory
            .find(&alert.recipient)
            .await
            .ok_or_else(|| DispatchError::UnknownRecipient(alert.recipient.clone()))?;

        let message = render_alert(alert, &recipient, &self.sender);
        info!(
            "Sending '{}' from {} to {} ({} BPM).",
            message.subject, message.from, message.to, alert.bpm
        );
        {
            let mut outbox = self.outbox.lock().await;
            if outbox.len() == OUTBOX_CAPACITY {
                outbox.pop_front();
            }
            outbox.push_back(message);
        }

        let event = MedicalEvent {
            kind: MedicalEventKind::HighBpm,
            value: alert.bpm,
            timestamp: alert.at,
        };
        if !self.directory.record_event(&recipient.email, event).await {
            warn!("Recipient {} vanished before history was recorded.", recipient.email);
        }
        Ok(())
    }
}
