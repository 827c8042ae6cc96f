//! Context events and observer subscriptions
//!
//! Binding changes are reported as [`ContextEvent`]s. Synchronous listeners
//! run inline with the change; observers are notified through a per-context
//! dispatcher task so the emitting call never waits on them. Notifications
//! for one context are delivered in the order they were emitted.

use crate::binding::Binding;
use crate::filter::BindingFilter;
use crate::{Context, Result, ValueOrPromise};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

#[cfg(feature = "logging")]
use tracing::{debug, error, trace};

/// Kind of registry change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextEventType {
    Bind,
    Unbind,
}

impl fmt::Display for ContextEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextEventType::Bind => f.write_str("bind"),
            ContextEventType::Unbind => f.write_str("unbind"),
        }
    }
}

/// A binding was added to or removed from `context`
#[derive(Clone)]
pub struct ContextEvent {
    pub event_type: ContextEventType,
    pub binding: Arc<Binding>,
    /// The context whose registry changed
    pub context: Context,
}

impl fmt::Debug for ContextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEvent")
            .field("event_type", &self.event_type)
            .field("key", &self.binding.key())
            .field("context", &self.context.name())
            .finish()
    }
}

/// Synchronous callback for context events
pub type ContextEventListener = Arc<dyn Fn(&ContextEvent) + Send + Sync>;

/// Receives bind/unbind events of a context and its ancestors.
///
/// `observe` may return a pending value; the dispatcher awaits it before
/// delivering the next event.
pub trait ContextObserver: Send + Sync {
    /// Only events for matching bindings are delivered; `None` means all
    fn filter(&self) -> Option<BindingFilter> {
        None
    }

    fn observe(&self, event: &ContextEvent) -> Result<ValueOrPromise<()>>;
}

impl<F> ContextObserver for F
where
    F: Fn(&ContextEvent) -> Result<ValueOrPromise<()>> + Send + Sync,
{
    fn observe(&self, event: &ContextEvent) -> Result<ValueOrPromise<()>> {
        self(event)
    }
}

/// An observer wrapped with a filter
pub struct FilteredObserver<O> {
    filter: BindingFilter,
    observer: O,
}

impl<O: ContextObserver> FilteredObserver<O> {
    pub fn new(filter: BindingFilter, observer: O) -> Self {
        Self { filter, observer }
    }
}

impl<O: ContextObserver> ContextObserver for FilteredObserver<O> {
    fn filter(&self) -> Option<BindingFilter> {
        Some(Arc::clone(&self.filter))
    }

    fn observe(&self, event: &ContextEvent) -> Result<ValueOrPromise<()>> {
        self.observer.observe(event)
    }
}

struct Notification {
    event: ContextEvent,
    observers: Vec<Arc<dyn ContextObserver>>,
}

#[derive(Default)]
struct PendingCounter {
    count: AtomicUsize,
    idle: Notify,
}

impl PendingCounter {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let mut idle = std::pin::pin!(self.idle.notified());
            idle.as_mut().enable();
            if self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Observers and listeners of one context.
pub(crate) struct SubscriptionManager {
    context_name: String,
    next_id: AtomicU64,
    observers: RwLock<Vec<(u64, Arc<dyn ContextObserver>)>>,
    listeners: RwLock<Vec<(u64, ContextEventListener)>>,
    dispatcher: Mutex<Option<UnboundedSender<Notification>>>,
    pending: Arc<PendingCounter>,
}

impl SubscriptionManager {
    pub(crate) fn new(context_name: &str) -> Self {
        Self {
            context_name: context_name.to_string(),
            next_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
            dispatcher: Mutex::new(None),
            pending: Arc::new(PendingCounter::default()),
        }
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        observer: Arc<dyn ContextObserver>,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, observer));

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            context = %self.context_name,
            subscription = id,
            "Observer subscribed"
        );

        Subscription {
            manager: Arc::downgrade(self),
            id,
        }
    }

    pub(crate) fn unsubscribe(&self, observer: &Arc<dyn ContextObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(_, o)| !Arc::ptr_eq(o, observer));
        before != observers.len()
    }

    fn unsubscribe_id(&self, id: u64) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        before != observers.len()
    }

    pub(crate) fn is_subscribed(&self, observer: &Arc<dyn ContextObserver>) -> bool {
        self.observers
            .read()
            .iter()
            .any(|(_, o)| Arc::ptr_eq(o, observer))
    }

    pub(crate) fn add_listener(&self, listener: ContextEventListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver one event: listeners inline, observers queued.
    ///
    /// Observer filters run at delivery so that configuration applied to a
    /// binding right after `bind` (tags, value source) is visible to them.
    pub(crate) fn notify(&self, event: &ContextEvent) {
        let listeners: Vec<ContextEventListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }

        let observers: Vec<Arc<dyn ContextObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();
        if observers.is_empty() {
            return;
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "contexify",
            context = %self.context_name,
            event = %event.event_type,
            key = event.binding.key(),
            observers = observers.len(),
            "Queueing context event"
        );

        self.pending.start();
        let notification = Notification {
            event: event.clone(),
            observers,
        };
        if let Some(undelivered) = self.enqueue(notification) {
            deliver_blocking(undelivered);
            self.pending.done();
        }
    }

    /// Hand the notification to the dispatcher task, starting it on first
    /// use. Returns the notification back when no runtime is available.
    fn enqueue(&self, notification: Notification) -> Option<Notification> {
        let mut dispatcher = self.dispatcher.lock();
        let notification = match dispatcher.as_ref() {
            Some(sender) => match sender.send(notification) {
                Ok(()) => return None,
                Err(err) => err.0,
            },
            None => notification,
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Some(notification);
        };
        let (sender, receiver) = unbounded_channel();
        handle.spawn(dispatch(receiver, Arc::clone(&self.pending)));

        #[cfg(feature = "logging")]
        debug!(
            target: "contexify",
            context = %self.context_name,
            "Started observer dispatcher"
        );

        match sender.send(notification) {
            Ok(()) => {
                *dispatcher = Some(sender);
                None
            }
            Err(err) => Some(err.0),
        }
    }

    pub(crate) async fn wait_until_pending_notifications_done(&self) {
        self.pending.wait_idle().await;
    }

    /// Drop all subscriptions and stop the dispatcher once it drains
    pub(crate) fn close(&self) {
        self.observers.write().clear();
        self.listeners.write().clear();
        self.dispatcher.lock().take();
    }
}

fn accepts(observer: &Arc<dyn ContextObserver>, event: &ContextEvent) -> bool {
    observer.filter().is_none_or(|f| f(&event.binding))
}

async fn dispatch(mut receiver: UnboundedReceiver<Notification>, pending: Arc<PendingCounter>) {
    while let Some(notification) = receiver.recv().await {
        for observer in &notification.observers {
            if !accepts(observer, &notification.event) {
                continue;
            }
            let outcome = match observer.observe(&notification.event) {
                Ok(ValueOrPromise::Value(())) => Ok(()),
                Ok(ValueOrPromise::Promise(fut)) => fut.await,
                Err(err) => Err(err),
            };
            report(&notification.event, outcome);
        }
        pending.done();
    }
}

fn deliver_blocking(notification: Notification) {
    for observer in &notification.observers {
        if !accepts(observer, &notification.event) {
            continue;
        }
        let outcome = match observer.observe(&notification.event) {
            Ok(ValueOrPromise::Value(())) => Ok(()),
            Ok(ValueOrPromise::Promise(fut)) => futures::executor::block_on(fut),
            Err(err) => Err(err),
        };
        report(&notification.event, outcome);
    }
}

fn report(_event: &ContextEvent, _outcome: Result<()>) {
    #[cfg(feature = "logging")]
    if let Err(err) = &_outcome {
        error!(
            target: "contexify",
            context = _event.context.name(),
            event = %_event.event_type,
            key = _event.binding.key(),
            error = %err,
            "Context observer failed"
        );
    }
}

/// Handle returned by `Context::subscribe`
pub struct Subscription {
    manager: Weak<SubscriptionManager>,
    id: u64,
}

impl Subscription {
    /// Stop receiving events. Returns false if already unsubscribed.
    pub fn unsubscribe(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|m| m.unsubscribe_id(self.id))
    }

    /// Whether the subscription is no longer active
    pub fn closed(&self) -> bool {
        self.manager.upgrade().is_none_or(|m| {
            !m.observers.read().iter().any(|(id, _)| *id == self.id)
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("closed", &self.closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_observer(counter: Arc<AtomicU32>) -> Arc<dyn ContextObserver> {
        Arc::new(move |_: &ContextEvent| -> Result<ValueOrPromise<()>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ValueOrPromise::Value(()))
        })
    }

    #[test]
    fn test_notify_without_runtime_is_inline() {
        let ctx = Context::new("test");
        let counter = Arc::new(AtomicU32::new(0));
        let _sub = ctx.subscribe(counting_observer(Arc::clone(&counter))).unwrap();

        ctx.bind("foo").unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_for_dispatched_events() {
        let ctx = Context::new("test");
        let counter = Arc::new(AtomicU32::new(0));
        let _sub = ctx.subscribe(counting_observer(Arc::clone(&counter))).unwrap();

        ctx.bind("foo").unwrap();
        ctx.bind("bar").unwrap();
        ctx.wait_until_pending_notifications_done().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_by_handle() {
        let ctx = Context::new("test");
        let counter = Arc::new(AtomicU32::new(0));
        let sub = ctx.subscribe(counting_observer(Arc::clone(&counter))).unwrap();

        assert!(!sub.closed());
        assert!(sub.unsubscribe());
        assert!(sub.closed());
        assert!(!sub.unsubscribe());

        ctx.bind("foo").unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_filtered_observer() {
        let ctx = Context::new("test");
        let counter = Arc::new(AtomicU32::new(0));
        let hits = Arc::clone(&counter);
        let observer = FilteredObserver::new(
            crate::filter::filter_by_tag("controller"),
            move |_: &ContextEvent| -> Result<ValueOrPromise<()>> {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(ValueOrPromise::Value(()))
            },
        );
        let _sub = ctx.subscribe(Arc::new(observer)).unwrap();

        let untagged = Binding::bind("plain");
        ctx.add(untagged).unwrap();
        let tagged = Binding::bind("ctrl");
        tagged.tag("controller");
        ctx.add(tagged).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filtered_observer_sees_tags_set_after_bind() {
        let ctx = Context::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = FilteredObserver::new(
            crate::filter::filter_by_tag("controller"),
            move |event: &ContextEvent| -> Result<ValueOrPromise<()>> {
                sink.lock().push(event.binding.key().to_string());
                Ok(ValueOrPromise::Value(()))
            },
        );
        let _sub = ctx.subscribe(Arc::new(observer)).unwrap();

        ctx.bind("controllers.user")
            .unwrap()
            .to(1u8)
            .unwrap()
            .tag("controller");
        ctx.bind("repositories.user").unwrap().to(2u8).unwrap();
        ctx.wait_until_pending_notifications_done().await;

        assert_eq!(*seen.lock(), vec!["controllers.user".to_string()]);
    }
}
