use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::bus::{NotificationBus, Subscription};
use super::toast::{Toast, ToastId};

/// Time a leaving toast stays on screen while its exit plays.
pub const EXIT_GRACE: Duration = Duration::from_millis(300);

type Clock = Arc<dyn Fn() -> Instant + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastPhase {
    Shown,
    Leaving,
}

#[derive(Debug, Clone)]
struct Entry {
    toast: Toast,
    shown_at: Instant,
    dismissed_at: Option<Instant>,
}

impl Entry {
    /// Moment the exit starts, if it is scheduled at all.
    fn leaves_at(&self) -> Option<Instant> {
        let timed = (!self.toast.is_sticky()).then(|| self.shown_at + self.toast.duration);
        match (timed, self.dismissed_at) {
            (Some(timed), Some(dismissed)) => Some(timed.min(dismissed)),
            (timed, dismissed) => timed.or(dismissed),
        }
    }

    fn phase_at(&self, now: Instant) -> Option<ToastPhase> {
        match self.leaves_at() {
            None => Some(ToastPhase::Shown),
            Some(leaves) if now < leaves => Some(ToastPhase::Shown),
            Some(leaves) if now < leaves + EXIT_GRACE => Some(ToastPhase::Leaving),
            Some(_) => None,
        }
    }
}

/// Surface that mirrors the bus and applies the auto-dismiss timing.
///
/// Time is passed in explicitly so rendering loops and tests share one clock.
pub struct ToastTray {
    entries: Arc<Mutex<Vec<Entry>>>,
    _subscription: Subscription,
}

impl ToastTray {
    pub fn attach(bus: &NotificationBus) -> Self {
        Self::attach_with_clock(bus, Instant::now)
    }

    pub fn attach_with_clock<C>(bus: &NotificationBus, clock: C) -> Self
    where
        C: Fn() -> Instant + Send + Sync + 'static,
    {
        let clock: Clock = Arc::new(clock);
        let entries: Arc<Mutex<Vec<Entry>>> = Arc::default();

        let added = entries.clone();
        let add_clock = clock.clone();
        let removed = entries.clone();
        let subscription = bus.subscribe(
            move |toast| {
                lock(&added).push(Entry {
                    toast: toast.clone(),
                    shown_at: add_clock(),
                    dismissed_at: None,
                });
            },
            move |id| {
                let now = clock();
                if let Some(entry) = lock(&removed).iter_mut().find(|e| e.toast.id == id) {
                    entry.dismissed_at.get_or_insert(now);
                }
            },
        );

        Self {
            entries,
            _subscription: subscription,
        }
    }

    /// Toasts still on screen at `now`, oldest first.
    pub fn visible_at(&self, now: Instant) -> Vec<(Toast, ToastPhase)> {
        lock(&self.entries)
            .iter()
            .filter_map(|entry| entry.phase_at(now).map(|phase| (entry.toast.clone(), phase)))
            .collect()
    }

    pub fn contains_at(&self, id: ToastId, now: Instant) -> bool {
        lock(&self.entries)
            .iter()
            .any(|entry| entry.toast.id == id && entry.phase_at(now).is_some())
    }

    /// Drop entries whose exit has finished; returns what was removed.
    pub fn prune(&self, now: Instant) -> Vec<ToastId> {
        let mut entries = lock(&self.entries);
        let mut gone = Vec::new();
        entries.retain(|entry| {
            let keep = entry.phase_at(now).is_some();
            if !keep {
                gone.push(entry.toast.id);
            }
            keep
        });
        gone
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ToastTray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToastTray")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

fn lock(entries: &Mutex<Vec<Entry>>) -> MutexGuard<'_, Vec<Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ToastSpec;

    fn fixed_clock() -> (Instant, Arc<Mutex<Instant>>) {
        let base = Instant::now();
        (base, Arc::new(Mutex::new(base)))
    }

    fn tray_on(bus: &NotificationBus, now: &Arc<Mutex<Instant>>) -> ToastTray {
        let now = now.clone();
        ToastTray::attach_with_clock(bus, move || *now.lock().unwrap())
    }

    #[test]
    fn timed_toast_leaves_after_duration_plus_grace() {
        let bus = NotificationBus::new();
        let (base, clock) = fixed_clock();
        let tray = tray_on(&bus, &clock);

        let id = bus.publish(ToastSpec::success("Issue updated"));

        assert!(tray.contains_at(id, base + Duration::from_millis(4999)));
        assert_eq!(
            tray.visible_at(base + Duration::from_millis(5100))[0].1,
            ToastPhase::Leaving
        );
        assert!(!tray.contains_at(id, base + Duration::from_millis(5300)));
        assert_eq!(tray.prune(base + Duration::from_millis(5300)), vec![id]);
        assert!(tray.is_empty());
    }

    #[test]
    fn sticky_toast_stays_until_dismissed() {
        let bus = NotificationBus::new();
        let (base, clock) = fixed_clock();
        let tray = tray_on(&bus, &clock);

        let id = bus.publish(ToastSpec::error("Update failed").sticky());
        assert!(tray.contains_at(id, base + Duration::from_secs(3600)));

        *clock.lock().unwrap() = base + Duration::from_secs(10);
        bus.dismiss(id);

        let after = base + Duration::from_secs(10);
        assert_eq!(tray.visible_at(after)[0].1, ToastPhase::Leaving);
        assert!(!tray.contains_at(id, after + EXIT_GRACE));
    }

    #[test]
    fn dropping_tray_unsubscribes() {
        let bus = NotificationBus::new();
        let tray = ToastTray::attach(&bus);
        assert_eq!(bus.subscriber_count(), 1);
        drop(tray);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
