//! Multi-subscriber `EventBus` for pipeline events.
//!
//! Every subscriber owns an unbounded channel, so delivery is lossless and
//! preserves dispatch order per subscriber. A slow subscriber never causes
//! another one to miss events.

use crate::event::PipelineEvent;
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Filter = Arc<dyn Fn(&PipelineEvent) -> bool + Send + Sync>;

struct Subscriber {
    filter: Option<Filter>,
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

#[derive(Default)]
struct Shared {
    subscribers: Mutex<Vec<Subscriber>>,
    closed: AtomicBool,
}

impl Shared {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("subscribers", &self.subscribers().len())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Multi-subscriber event bus.
///
/// Events dispatched through any [`EventSender`] are fanned out to every
/// subscriber whose filter accepts them.
#[derive(Debug, Default)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a sender for dispatching events onto the bus.
    ///
    /// Returns `None` if the bus has been shut down.
    #[must_use]
    pub fn sender(&self) -> Option<EventSender> {
        if self.shared.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(EventSender {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Shut down the event bus.
    ///
    /// Existing subscribers drain what was already delivered and then observe
    /// the end of their stream. Safe to call multiple times.
    pub fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.subscribers().clear();
    }

    /// Subscribe to every event dispatched after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        self.register(None)
    }

    /// Subscribe to the events matching `predicate`.
    ///
    /// ```rust,ignore
    /// let results = bus.subscribe_where(PipelineEvent::is_result);
    /// ```
    #[must_use]
    pub fn subscribe_where<F>(&self, predicate: F) -> EventReceiver
    where
        F: Fn(&PipelineEvent) -> bool + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(predicate)))
    }

    fn register(&self, filter: Option<Filter>) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.shared.closed.load(Ordering::Acquire) {
            self.shared.subscribers().push(Subscriber { filter, tx });
        }
        EventReceiver { inner: rx }
    }

    /// Get the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.shared.subscribers();
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

/// Sender handle for dispatching events onto an [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl EventSender {
    /// Dispatch an event to every matching subscriber.
    ///
    /// Having no subscribers is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the bus has been shut down.
    pub fn dispatch(&self, event: PipelineEvent) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        let mut subscribers = self.shared.subscribers();
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter() {
            let accepted = subscriber.filter.as_ref().is_none_or(|f| f(&event));
            if accepted {
                let _ = subscriber.tx.send(event.clone());
            }
        }
        Ok(())
    }

    /// Check if the bus has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Receiver handle for events from an [`EventBus`].
#[derive(Debug)]
pub struct EventReceiver {
    inner: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus has been shut down (or every sender and the
    /// bus are gone) and all delivered events were consumed.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.inner.recv().await
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.inner.try_recv().ok()
    }

    /// Drain every event that is immediately available.
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Convert into a live, order-preserving stream of events.
    pub fn into_stream(self) -> impl Stream<Item = PipelineEvent> + Send + Unpin {
        Box::pin(futures::stream::unfold(self, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        }))
    }
}

/// Error returned when dispatching to a closed bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The event bus has been closed.
    Closed,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "event bus is closed"),
        }
    }
}

impl std::error::Error for SendError {}
