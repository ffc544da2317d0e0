//! Pub/sub bus between the playback core and whatever displays it.
//!
//! `emit()` calls subscribers synchronously on the emitting thread (for the
//! controller that is the scheduler thread) and also queues the event, so a
//! UI loop can `poll()` and handle events on its own thread instead.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::warn;

/// Queue length that triggers eviction of the oldest half
const MAX_QUEUE_SIZE: usize = 512;

/// Anything that can travel on the bus
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

pub type BoxedEvent = Box<dyn Event>;

/// Cloneable handle; clones share subscribers and queue
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, Vec<Callback>>>>,
    queue: Arc<Mutex<Vec<BoxedEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every future event of type `E`
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Invoke subscribers, then queue for `poll()`
    pub fn emit<E: Event + Clone>(&self, event: E) {
        // Clone the list so callbacks may subscribe without deadlocking
        let callbacks = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .cloned();
        for cb in callbacks.iter().flatten() {
            cb(&event);
        }

        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict);
            queue.drain(0..evict);
        }
        queue.push(Box::new(event));
    }

    /// Take every event queued since the last poll
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

/// Downcast a polled event.
///
/// Derefs to `dyn Event` first: calling `as_any()` on the box itself would hit
/// the blanket impl for `Box<dyn Event>` and never match.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Tick(usize);

    #[derive(Clone, Debug)]
    struct Other;

    #[test]
    fn test_subscribers_called_and_queued() {
        let bus = EventBus::new();
        let total = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&total);
        bus.subscribe::<Tick, _>(move |e| {
            t.fetch_add(e.0, Ordering::SeqCst);
        });

        bus.emit(Tick(3));
        bus.emit(Other);
        bus.emit(Tick(4));
        assert_eq!(total.load(Ordering::SeqCst), 7);

        let events = bus.poll();
        assert_eq!(events.len(), 3);
        assert_eq!(downcast_event::<Tick>(&events[0]).map(|e| e.0), Some(3));
        assert!(downcast_event::<Tick>(&events[1]).is_none());
        assert_eq!(bus.queue_len(), 0);
    }

    #[test]
    fn test_queue_eviction() {
        let bus = EventBus::new();
        for i in 0..MAX_QUEUE_SIZE + 1 {
            bus.emit(Tick(i));
        }
        let events = bus.poll();
        assert_eq!(events.len(), MAX_QUEUE_SIZE / 2 + 1);
        assert_eq!(downcast_event::<Tick>(events.last().unwrap()).map(|e| e.0), Some(MAX_QUEUE_SIZE));
    }

    #[test]
    fn test_subscriber_may_subscribe_from_callback() {
        let bus = EventBus::new();
        let inner = bus.clone();
        bus.subscribe::<Tick, _>(move |_| inner.subscribe::<Other, _>(|_| {}));
        bus.emit(Tick(1));
        assert_eq!(bus.queue_len(), 1);
    }
}
