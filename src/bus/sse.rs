//! Optional `axum` SSE adapter (§4.B expansion), mirroring the shape of the
//! teacher's `control::stream` handler. Purely additive: `EventBus` itself
//! has no axum dependency, this module just turns a subscription into a
//! `Stream` an axum handler can return.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio::sync::mpsc;

use super::{EventBus, Subscriber, SubscriberError, SubscriberId};

struct ChannelSubscriber {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn send_frame(&self, frame: String) -> Result<(), SubscriberError> {
        self.tx.send(frame).await.map_err(|_| SubscriberError::Closed)
    }
}

struct UnsubscribeOnDrop {
    bus: Arc<EventBus>,
    id: SubscriberId,
}

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// Subscribe to `bus` and expose the subscription as a plain frame stream.
/// The subscription is dropped (unregistering it from the bus) when the
/// returned stream is.
pub fn subscribe_stream(bus: Arc<EventBus>, buffer: usize) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    let (tx, mut rx) = mpsc::channel::<String>(buffer);
    let id = bus.subscribe(Arc::new(ChannelSubscriber { tx }));
    let guard = UnsubscribeOnDrop { bus, id };

    async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = rx.recv().await {
            yield Ok(Event::default().data(frame));
        }
    }
}

/// Subscribe to `bus` and expose the subscription as an SSE stream suitable
/// for an axum handler to return directly.
pub fn sse_stream(bus: Arc<EventBus>, buffer: usize) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    Sse::new(subscribe_stream(bus, buffer)).keep_alive(KeepAlive::default())
}
