use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::toast::{Toast, ToastId, ToastSpec};

type AddFn = Arc<dyn Fn(&Toast) + Send + Sync>;
type RemoveFn = Arc<dyn Fn(ToastId) + Send + Sync>;

#[derive(Clone)]
struct Listener {
    id: u64,
    alive: Arc<AtomicBool>,
    on_add: AddFn,
    on_remove: RemoveFn,
}

#[derive(Default)]
struct Registry {
    next_toast: AtomicU64,
    next_listener: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl Registry {
    fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, id: u64) {
        self.listeners().retain(|listener| listener.id != id);
    }
}

/// Process-local fan-out of transient notifications.
///
/// Delivery is synchronous and in subscription order. Listeners run outside the
/// registry lock, so a callback may publish, dismiss or unsubscribe.
#[derive(Clone, Default)]
pub struct NotificationBus {
    registry: Arc<Registry>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, spec: ToastSpec) -> ToastId {
        let id = ToastId::new(self.registry.next_toast.fetch_add(1, Ordering::Relaxed) + 1);
        let toast = spec.into_toast(id);
        tracing::debug!(toast = %id, kind = %toast.kind, title = %toast.title, "publishing toast");
        for listener in self.snapshot() {
            if listener.alive.load(Ordering::Acquire) {
                (listener.on_add)(&toast);
            }
        }
        id
    }

    /// Ask every surface to drop `id`; unknown ids are ignored by surfaces.
    pub fn dismiss(&self, id: ToastId) {
        for listener in self.snapshot() {
            if listener.alive.load(Ordering::Acquire) {
                (listener.on_remove)(id);
            }
        }
    }

    pub fn subscribe<A, R>(&self, on_add: A, on_remove: R) -> Subscription
    where
        A: Fn(&Toast) + Send + Sync + 'static,
        R: Fn(ToastId) + Send + Sync + 'static,
    {
        let id = self.registry.next_listener.fetch_add(1, Ordering::Relaxed);
        let alive = Arc::new(AtomicBool::new(true));
        self.registry.listeners().push(Listener {
            id,
            alive: alive.clone(),
            on_add: Arc::new(on_add),
            on_remove: Arc::new(on_remove),
        });
        Subscription {
            id,
            alive,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.listeners().len()
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.registry.listeners().clone()
    }
}

impl std::fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Disposer returned by [`NotificationBus::subscribe`]; dropping it unsubscribes.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    alive: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ToastKind;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Toast) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |toast: &Toast| {
            sink.lock().unwrap().push(toast.id.to_string())
        })
    }

    #[test]
    fn ids_are_monotonic_and_formatted() {
        let bus = NotificationBus::new();
        let first = bus.publish(ToastSpec::info("one"));
        let second = bus.publish(ToastSpec::info("two"));
        assert!(second > first);
        assert_eq!(first.to_string(), "toast-1");
        assert_eq!(second.to_string(), "toast-2");
    }

    #[test]
    fn fans_out_to_every_subscriber() {
        let bus = NotificationBus::new();
        let (left, on_left) = recorder();
        let (right, on_right) = recorder();
        let _a = bus.subscribe(on_left, |_| {});
        let _b = bus.subscribe(on_right, |_| {});

        bus.publish(ToastSpec::success("Saved").with_message("BUG-1 updated"));

        assert_eq!(*left.lock().unwrap(), vec!["toast-1"]);
        assert_eq!(*right.lock().unwrap(), vec!["toast-1"]);
    }

    #[test]
    fn dismiss_reaches_remove_listeners() {
        let bus = NotificationBus::new();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        let _sub = bus.subscribe(|_| {}, move |id| sink.lock().unwrap().push(id));

        let id = bus.publish(ToastSpec::error("Update failed"));
        bus.dismiss(id);

        assert_eq!(*removed.lock().unwrap(), vec![id]);
    }

    #[test]
    fn dropped_subscription_receives_nothing() {
        let bus = NotificationBus::new();
        let (log, on_add) = recorder();
        let sub = bus.subscribe(on_add, |_| {});
        sub.unsubscribe();

        bus.publish(ToastSpec::info("ignored"));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_during_fan_out_stops_later_delivery() {
        let bus = NotificationBus::new();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot = victim.clone();
        let _killer = bus.subscribe(
            move |_| {
                slot.lock().unwrap().take();
            },
            |_| {},
        );
        let (log, on_add) = recorder();
        *victim.lock().unwrap() = Some(bus.subscribe(on_add, |_| {}));

        bus.publish(ToastSpec::new(ToastKind::Warning, "first"));

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn listener_may_publish_reentrantly() {
        let bus = NotificationBus::new();
        let (log, on_add) = recorder();
        let _rec = bus.subscribe(on_add, |_| {});
        let inner = bus.clone();
        let _chain = bus.subscribe(
            move |toast| {
                if toast.title == "outer" {
                    inner.publish(ToastSpec::info("inner"));
                }
            },
            |_| {},
        );

        bus.publish(ToastSpec::info("outer"));

        assert_eq!(*log.lock().unwrap(), vec!["toast-1", "toast-2"]);
    }

    #[test]
    fn default_duration_and_sticky() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = bus.subscribe(move |t| sink.lock().unwrap().push(t.clone()), |_| {});

        bus.publish(ToastSpec::info("timed"));
        bus.publish(ToastSpec::info("pinned").sticky());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].duration, crate::notify::DEFAULT_TOAST_DURATION);
        assert!(!seen[0].is_sticky());
        assert!(seen[1].is_sticky());
    }
}
