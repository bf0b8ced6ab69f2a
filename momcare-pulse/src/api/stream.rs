//! The server-sent event stream of BPM changes.

use crate::common::Bpm;
use crate::components::registry::ChannelSink;
use crate::engine::{PulseHub, SubscriptionGuard};
use axum::response::sse::Event;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Formats one sample as an SSE `data:` event carrying `{"bpm": n}`.
pub fn bpm_event(bpm: Bpm) -> Event {
    Event::default().data(serde_json::json!({ "bpm": bpm }).to_string())
}

/// One client's view of the hub: the value at connect time, then every change.
///
/// Dropping the stream (the client disconnected, or the server is shutting
/// down) drops its guard, which removes the subscription.
pub struct BpmEventStream {
    initial: Option<Bpm>,
    rx: mpsc::Receiver<Bpm>,
    guard: SubscriptionGuard,
}

impl BpmEventStream {
    /// Subscribes a new stream to `hub`.
    pub async fn open(hub: &PulseHub, buffer: usize) -> Self {
        let (sink, rx) = ChannelSink::channel(buffer);
        let (id, initial) = hub.subscribe_with_latest(Arc::new(sink)).await;
        Self {
            initial,
            rx,
            guard: SubscriptionGuard::new(hub.clone(), id),
        }
    }

    pub fn subscription(&self) -> crate::common::SubscriptionId {
        self.guard.id()
    }
}

impl Stream for BpmEventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(bpm) = self.initial.take() {
            return Poll::Ready(Some(Ok(bpm_event(bpm))));
        }
        self.rx
            .poll_recv(cx)
            .map(|next| next.map(|bpm| Ok(bpm_event(bpm))))
    }
}
