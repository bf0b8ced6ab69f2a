//! Recipient lookup and medical history.
//!
//! Alert dispatch needs a display name for the recipient and records each
//! high reading against them. The trait is the seam a database-backed
//! directory plugs into; `InMemoryDirectory` serves configured recipients.

use crate::common::Bpm;
use crate::config::RecipientConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A person who can receive alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

/// The kind of entry in a recipient's medical history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalEventKind {
    HighBpm,
}

/// One entry in a recipient's medical history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MedicalEvent {
    #[serde(rename = "type")]
    pub kind: MedicalEventKind,
    pub value: Bpm,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn find(&self, email: &str) -> Option<Recipient>;

    /// Appends to the recipient's history. Returns `false` if the recipient is unknown.
    async fn record_event(&self, email: &str, event: MedicalEvent) -> bool;

    /// Returns the recipient's history, oldest first, or `None` if the recipient is unknown.
    async fn history(&self, email: &str) -> Option<Vec<MedicalEvent>>;
}

struct Entry {
    recipient: Recipient,
    history: Vec<MedicalEvent>,
}

/// A directory held in process memory; history is lost on restart.
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<String, Entry>>,
}

/// Emails compare case-insensitively and without surrounding whitespace.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(recipients: &[RecipientConfig]) -> Self {
        let entries = recipients
            .iter()
            .map(|r| {
                let email = normalize_email(&r.email);
                let entry = Entry {
                    recipient: Recipient {
                        email: email.clone(),
                        name: r.name.clone(),
                    },
                    history: Vec::new(),
                };
                (email, entry)
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Adds or replaces a recipient, keeping any existing history.
    pub async fn upsert(&self, email: &str, name: &str) {
        let email = normalize_email(email);
        let mut entries = self.entries.write().await;
        let entry = entries.entry(email.clone()).or_insert_with(|| Entry {
            recipient: Recipient {
                email: email.clone(),
                name: String::new(),
            },
            history: Vec::new(),
        });
        entry.recipient.name = name.to_string();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryDirectory {
    async fn find(&self, email: &str) -> Option<Recipient> {
        self.entries
            .read()
            .await
            .get(&normalize_email(email))
            .map(|e| e.recipient.clone())
    }

    async fn record_event(&self, email: &str, event: MedicalEvent) -> bool {
        match self.entries.write().await.get_mut(&normalize_email(email)) {
            Some(entry) => {
                entry.history.push(event);
                true
            }
            None => false,
        }
    }

    async fn history(&self, email: &str) -> Option<Vec<MedicalEvent>> {
        self.entries
            .read()
            .await
            .get(&normalize_email(email))
            .map(|e| e.history.clone())
    }
}
