//! Publish/subscribe registry for search notifications.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError, RwLock};

use crate::schema::NasEvent;

/// Callback invoked for every published event.
pub type EventCallback = Box<dyn Fn(&NasEvent) + Send + Sync>;

/// Fan-out of events to channel subscribers and registered callbacks.
///
/// Delivery is asynchronous for channel subscribers. Events of one sector
/// are published in generation order; no ordering holds across sectors.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<NasEvent>>>,
    callbacks: RwLock<Vec<EventCallback>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> Receiver<NasEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Register a callback, run on the publishing thread.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&NasEvent) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    pub fn publish(&self, event: NasEvent) {
        for callback in self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            callback(&event);
        }

        // Dropped receivers unsubscribe themselves
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
