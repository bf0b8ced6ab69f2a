//! The hub that owns the latest value, the subscriber registry and alerting.

use crate::common::{Bpm, SourceKind, SubscriptionId};
use crate::components::alert::{AlertDispatcher, AlertMonitor, AlertOutcome, AlertPolicy};
use crate::components::latest::LatestValue;
use crate::components::registry::{BpmSink, SubscriberRegistry};
use crate::components::source::SourceRunner;
use crate::config::PulseConfig;
use crate::error::SinkError;
use crate::events::PulseEvent;
use anyhow::Context;
use axum::Router;
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// The latest value and the registry share one lock so that "compare,
/// update, snapshot" in `ingest` and "register, read initial value" in
/// `subscribe_with_latest` never interleave.
struct HubState {
    latest: LatestValue,
    registry: SubscriberRegistry,
}

/// Counts from one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

/// A point-in-time view of the hub for status endpoints.
#[derive(Debug, Clone)]
pub struct HubStatus {
    pub latest: Option<Bpm>,
    pub subscribers: usize,
    pub source: Option<SourceKind>,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// The heart-rate distribution hub.
///
/// One hub is created at process start and handed to the sample source,
/// the HTTP layer and anything else that reads or streams samples. It is
/// cheap to clone; clones share all state.
#[derive(Clone)]
pub struct PulseHub {
    config: Arc<PulseConfig>,
    state: Arc<RwLock<HubState>>,
    source_kind: Arc<RwLock<Option<SourceKind>>>,
    alerts: Arc<AlertMonitor>,
    event_sender: broadcast::Sender<PulseEvent>,
    started_at: DateTime<Utc>,
}

// Core implementation block for internal logic.
impl PulseHub {
    /// Creates a hub whose alerts go through `dispatcher`.
    pub fn new(config: PulseConfig, dispatcher: Arc<dyn AlertDispatcher>) -> Self {
        let (event_sender, _) = broadcast::channel(256);
        let alerts = AlertMonitor::new(
            AlertPolicy::from_config(&config.alert),
            dispatcher,
            event_sender.clone(),
        );
        let state = HubState {
            latest: LatestValue::new(config.source.initial_latest()),
            registry: SubscriberRegistry::new(),
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(state)),
            source_kind: Arc::new(RwLock::new(None)),
            alerts: Arc::new(alerts),
            event_sender,
            started_at: Utc::now(),
        }
    }

    /// Starts the sample source and serves `app` until Ctrl+C.
    ///
    /// On shutdown every open stream is closed so the server can drain.
    pub async fn run(&self, app: Router) -> anyhow::Result<()> {
        info!("PulseHub starting up...");
        let (shutdown_tx, _) = broadcast::channel(1);

        let source = SourceRunner::new(self.clone(), self.config.source.clone());
        let source_shutdown_rx = shutdown_tx.subscribe();
        let source_task = tokio::spawn(async move { source.run(source_shutdown_rx).await });

        let listener = TcpListener::bind(&self.config.server.bind)
            .await
            .with_context(|| format!("failed to bind {}", self.config.server.bind))?;
        info!(
            "Serving heart-rate API on http://{}. Press Ctrl+C to shut down.",
            listener.local_addr()?
        );

        let hub = self.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for the shutdown signal: {}", e);
                }
                info!("Shutdown signal received. Closing open streams...");
                hub.disconnect_all().await;
            })
            .await
            .context("HTTP server failed")?;

        if shutdown_tx.send(()).is_err() {
            warn!("Sample source had already stopped before shutdown.");
        }
        source_task.await.ok();
        info!("PulseHub has shut down.");
        Ok(())
    }

    fn deliver(&self, snapshot: Vec<(SubscriptionId, Arc<dyn BpmSink>)>, bpm: Bpm) -> FanOut {
        let mut fan_out = FanOut::default();
        for (id, sink) in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| sink.deliver(bpm)))
                .unwrap_or_else(|_| Err(SinkError::Other("subscriber panicked".to_string())));
            match result {
                Ok(()) => fan_out.delivered += 1,
                Err(e) => {
                    warn!("Error in BPM subscriber {:?}: {}", id, e);
                    fan_out.failed += 1;
                }
            }
        }
        fan_out
    }

    pub(crate) async fn set_source_kind(&self, kind: Option<SourceKind>) {
        *self.source_kind.write().await = kind;
    }

    pub(crate) fn emit(&self, event: PulseEvent) {
        self.event_sender.send(event).ok();
    }

    /// Drops every subscription, which ends the streams draining them.
    pub async fn disconnect_all(&self) {
        let removed: Vec<SubscriptionId> = {
            let mut state = self.state.write().await;
            let ids: Vec<_> = state.registry.snapshot().into_iter().map(|(id, _)| id).collect();
            for id in &ids {
                state.registry.remove(*id);
            }
            ids
        };
        for id in removed {
            self.emit(PulseEvent::SubscriberRemoved { id });
        }
    }
}

// Public API implementation block.
impl PulseHub {
    pub fn config(&self) -> &PulseConfig {
        &self.config
    }

    /// Returns the latest sample, or `None` if nothing has been produced yet.
    pub async fn latest(&self) -> Option<Bpm> {
        self.state.read().await.latest.get()
    }

    /// Feeds one raw sample from the source.
    ///
    /// If it differs from the latest value the store is updated and every
    /// current subscriber is notified. Returns `true` if a notification
    /// happened. Equal consecutive samples produce nothing.
    pub async fn ingest(&self, raw: Bpm) -> bool {
        let fan_out = {
            let mut state = self.state.write().await;
            if !state.latest.replace_if_changed(raw) {
                return false;
            }
            debug!("BPM: {}", raw);
            // Sinks never block, and delivering under the lock keeps fan-outs
            // from concurrent producers in the same order as the store updates.
            let snapshot = state.registry.snapshot();
            self.deliver(snapshot, raw)
        };
        self.emit(PulseEvent::SampleAccepted {
            bpm: raw,
            delivered: fan_out.delivered,
            failed: fan_out.failed,
        });
        true
    }

    /// Delivers `bpm` to a snapshot of the current subscribers, in
    /// registration order, without touching the latest value.
    ///
    /// A failing subscriber is logged and skipped; it stays registered.
    pub async fn notify(&self, bpm: Bpm) -> FanOut {
        let snapshot = self.state.read().await.registry.snapshot();
        self.deliver(snapshot, bpm)
    }

    /// Registers a sink and returns its handle.
    pub async fn subscribe(&self, sink: Arc<dyn BpmSink>) -> SubscriptionId {
        self.subscribe_with_latest(sink).await.0
    }

    /// Registers a sink and returns its handle together with the latest
    /// value as of registration.
    ///
    /// Every later change reaches the sink exactly once; the returned value
    /// is never also delivered through it.
    pub async fn subscribe_with_latest(
        &self,
        sink: Arc<dyn BpmSink>,
    ) -> (SubscriptionId, Option<Bpm>) {
        let (id, latest) = {
            let mut state = self.state.write().await;
            (state.registry.insert(sink), state.latest.get())
        };
        self.emit(PulseEvent::SubscriberAdded { id });
        (id, latest)
    }

    /// Removes a subscription.
    ///
    /// Returns `true` if it was found and removed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let was_removed = self.state.write().await.registry.remove(id);
        if was_removed {
            self.emit(PulseEvent::SubscriberRemoved { id });
        }
        was_removed
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    /// Runs threshold alerting for `recipient` against the latest value.
    ///
    /// Returns `None` when no sample is available yet.
    pub async fn check_high_bpm(&self, recipient: &str) -> Option<AlertOutcome> {
        let bpm = self.latest().await?;
        Some(self.alerts.check(recipient, bpm).await)
    }

    pub fn alerts(&self) -> &AlertMonitor {
        &self.alerts
    }

    pub async fn status(&self) -> HubStatus {
        let (latest, subscribers) = {
            let state = self.state.read().await;
            (state.latest.get(), state.registry.len())
        };
        HubStatus {
            latest,
            subscribers,
            source: *self.source_kind.read().await,
            started_at: self.started_at,
            timestamp: Utc::now(),
        }
    }

    /// Subscribes to the `PulseEvent` stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PulseEvent> {
        self.event_sender.subscribe()
    }
}

/// Removes a subscription when dropped.
///
/// Streaming responses hold one of these so that a client disconnect,
/// which drops the response body, also ends the subscription.
pub struct SubscriptionGuard {
    hub: PulseHub,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub fn new(hub: PulseHub, id: SubscriptionId) -> Self {
        Self { hub, id }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    hub.unsubscribe(id).await;
                });
            }
            Err(_) => warn!("Subscription {:?} dropped outside a runtime; not removed.", id),
        }
    }
}
