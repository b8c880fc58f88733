//! Progress and options broadcast bus
//!
//! A running filter talks to its observers through two independent registries:
//! progress events from the background run, and readiness notifications from
//! option edits. Delivery is synchronous and ordered by registration on the
//! emitting thread. A listener that panics is logged and skipped; the remaining
//! listeners still receive the event.

use crate::store::Handle;
use crate::lineage::ListId;
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

/// Everything a run reports to its observers
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started,
    Updated {
        message: String,
        current: usize,
        total: usize,
    },
    Warning {
        cause: String,
    },
    Exception {
        cause: String,
    },
    Cancelled,
    Completed {
        result: CompletedList,
    },
}

/// The list a successful run attached to the lineage tree
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedList {
    pub id: ListId,
    pub parent: ListId,
    pub name: String,
    pub member_count: usize,
    pub backing: Handle,
}

impl ProgressEvent {
    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Exception { .. } | ProgressEvent::Cancelled | ProgressEvent::Completed { .. }
        )
    }
}

pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

pub trait OptionsListener: Send + Sync {
    /// Called after every option change with the re-evaluated readiness
    fn on_options_changed(&self, ready: bool);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

impl<F> OptionsListener for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_options_changed(&self, ready: bool) {
        self(ready)
    }
}

struct Registry<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Registry<L> {
    fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, listener: Arc<L>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    fn remove(&self, listener: &Arc<L>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Snapshot so listeners may (un)subscribe from inside a callback
    fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn deliver(&self, registry: &str, mut call: impl FnMut(&L)) {
        for (index, listener) in self.snapshot().iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| call(&**listener))).is_err() {
                tracing::error!("{} listener #{} panicked; continuing delivery", registry, index);
            }
        }
    }
}

enum Target {
    Progress(Arc<dyn ProgressListener>),
    Options(Arc<dyn OptionsListener>),
}

/// Registration token; dropping it keeps the listener registered
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    bus: Weak<Registries>,
    target: Target,
}

impl Subscription {
    /// Remove the listener from its registry
    pub fn unsubscribe(self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        match &self.target {
            Target::Progress(l) => bus.progress.remove(l),
            Target::Options(l) => bus.options.remove(l),
        }
    }
}

struct Registries {
    progress: Registry<dyn ProgressListener>,
    options: Registry<dyn OptionsListener>,
}

/// The two listener registries of one filter task
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Registries>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Registries {
                progress: Registry::new(),
                options: Registry::new(),
            }),
        }
    }

    /// Register a progress listener; registering the same `Arc` again is a no-op
    pub fn add_progress_listener(&self, listener: Arc<dyn ProgressListener>) -> Subscription {
        self.inner.progress.add(listener.clone());
        Subscription {
            bus: Arc::downgrade(&self.inner),
            target: Target::Progress(listener),
        }
    }

    /// Register an options listener; registering the same `Arc` again is a no-op
    pub fn add_options_listener(&self, listener: Arc<dyn OptionsListener>) -> Subscription {
        self.inner.options.add(listener.clone());
        Subscription {
            bus: Arc::downgrade(&self.inner),
            target: Target::Options(listener),
        }
    }

    pub fn progress_listeners(&self) -> usize {
        self.inner.progress.len()
    }

    pub fn options_listeners(&self) -> usize {
        self.inner.options.len()
    }

    pub fn emit_progress(&self, event: &ProgressEvent) {
        tracing::trace!("Progress event: {:?}", event);
        self.inner
            .progress
            .deliver("progress", |listener| listener.on_progress(event));
    }

    pub fn emit_options(&self, ready: bool) {
        self.inner
            .options
            .deliver("options", |listener| listener.on_options_changed(ready));
    }
}

/// Progress listener that forwards events into a channel
pub struct ChannelListener {
    sender: Sender<ProgressEvent>,
}

impl ProgressListener for ChannelListener {
    fn on_progress(&self, event: &ProgressEvent) {
        // A dropped receiver only means nobody is watching any more
        let _ = self.sender.send(event.clone());
    }
}

/// Listener plus the receiving end of its channel
pub fn channel_listener() -> (Arc<ChannelListener>, Receiver<ProgressEvent>) {
    let (sender, receiver) = unbounded();
    (Arc::new(ChannelListener { sender }), receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registration_is_idempotent() {
        let bus = Broadcaster::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let listener: Arc<dyn ProgressListener> = Arc::new(move |_: &ProgressEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = bus.add_progress_listener(listener.clone());
        let _second = bus.add_progress_listener(listener.clone());
        assert_eq!(bus.progress_listeners(), 1);

        bus.emit_progress(&ProgressEvent::Started);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        first.unsubscribe();
        assert_eq!(bus.progress_listeners(), 0);
        bus.emit_progress(&ProgressEvent::Started);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_follows_registration_order() {
        let bus = Broadcaster::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            let _ = bus.add_options_listener(Arc::new(move |ready: bool| {
                seen.lock().unwrap().push(format!("{tag}:{ready}"));
            }));
        }
        bus.emit_options(true);
        assert_eq!(*seen.lock().unwrap(), vec!["a:true", "b:true", "c:true"]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = Broadcaster::new();
        let _ = bus.add_progress_listener(Arc::new(|_: &ProgressEvent| panic!("observer bug")));
        let (listener, receiver) = channel_listener();
        let _ = bus.add_progress_listener(listener);

        bus.emit_progress(&ProgressEvent::Cancelled);
        assert_eq!(receiver.try_recv().unwrap(), ProgressEvent::Cancelled);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ProgressEvent::Cancelled.is_terminal());
        assert!(ProgressEvent::Exception { cause: "x".into() }.is_terminal());
        assert!(!ProgressEvent::Started.is_terminal());
        assert!(!ProgressEvent::Warning { cause: "x".into() }.is_terminal());
    }
}
