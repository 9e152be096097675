use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AccountsChanged,
    Disconnect,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AccountsChanged => "accountsChanged",
            EventKind::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    AccountsChanged(Vec<String>),
    Disconnect,
}

impl AdapterEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AdapterEvent::AccountsChanged(_) => EventKind::AccountsChanged,
            AdapterEvent::Disconnect => EventKind::Disconnect,
        }
    }
}

pub type Listener = Arc<dyn Fn(&AdapterEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Registry = HashMap<EventKind, Vec<(ListenerId, Listener)>>;

#[derive(Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerHandle {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, listener));
        ListenerHandle {
            kind,
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        remove_listener(&self.listeners, kind, id)
    }

    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut guard = self.listeners.lock();
        match kind {
            Some(kind) => {
                guard.remove(&kind);
            }
            None => guard.clear(),
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Calls every listener for the event's kind in registration order. A
    /// panicking listener is logged and skipped.
    pub fn emit(&self, event: &AdapterEvent) {
        let snapshot: Vec<(ListenerId, Listener)> = self
            .listeners
            .lock()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for (id, listener) in snapshot {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    event = %event.kind(),
                    listener = id.0,
                    "event bus: listener panicked"
                );
            }
        }
    }
}

fn remove_listener(registry: &Mutex<Registry>, kind: EventKind, id: ListenerId) -> bool {
    let mut guard = registry.lock();
    let Some(listeners) = guard.get_mut(&kind) else {
        return false;
    };
    let before = listeners.len();
    listeners.retain(|(existing, _)| *existing != id);
    before != listeners.len()
}

pub struct ListenerHandle {
    kind: EventKind,
    id: ListenerId,
    registry: Weak<Mutex<Registry>>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn remove(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => remove_listener(&registry, self.kind, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |event: &AdapterEvent| {
            log.lock().push(format!("{tag}:{}", event.kind()));
        })
    }

    #[test]
    fn emits_in_registration_order_per_kind() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::AccountsChanged, recorder(&log, "a"));
        bus.on(EventKind::Disconnect, recorder(&log, "d"));
        bus.on(EventKind::AccountsChanged, recorder(&log, "b"));

        bus.emit(&AdapterEvent::AccountsChanged(vec!["TA".into()]));
        bus.emit(&AdapterEvent::Disconnect);

        assert_eq!(
            *log.lock(),
            vec!["a:accountsChanged", "b:accountsChanged", "d:disconnect"]
        );
    }

    #[test]
    fn panicking_listener_does_not_stop_later_listeners() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(
            EventKind::Disconnect,
            Arc::new(|_event: &AdapterEvent| panic!("listener failure")),
        );
        bus.on(EventKind::Disconnect, recorder(&log, "after"));

        bus.emit(&AdapterEvent::Disconnect);

        assert_eq!(*log.lock(), vec!["after:disconnect"]);
    }

    #[test]
    fn handle_removes_only_its_listener_and_is_idempotent() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.on(EventKind::Disconnect, recorder(&log, "first"));
        let second = bus.on(EventKind::Disconnect, recorder(&log, "second"));

        assert!(first.remove());
        assert!(!first.remove());
        bus.emit(&AdapterEvent::Disconnect);
        assert_eq!(*log.lock(), vec!["second:disconnect"]);

        assert!(bus.off(EventKind::Disconnect, second.id()));
        assert!(!bus.off(EventKind::Disconnect, second.id()));
        assert_eq!(bus.listener_count(EventKind::Disconnect), 0);
    }

    #[test]
    fn remove_all_listeners_scopes_to_kind_or_everything() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::AccountsChanged, recorder(&log, "a"));
        bus.on(EventKind::Disconnect, recorder(&log, "d"));

        bus.remove_all_listeners(Some(EventKind::AccountsChanged));
        assert_eq!(bus.listener_count(EventKind::AccountsChanged), 0);
        assert_eq!(bus.listener_count(EventKind::Disconnect), 1);

        bus.remove_all_listeners(None);
        assert_eq!(bus.listener_count(EventKind::Disconnect), 0);
    }

    #[test]
    fn listener_may_deregister_itself_during_emit() {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

        let counter = Arc::clone(&calls);
        let own = Arc::clone(&slot);
        let handle = bus.on(
            EventKind::Disconnect,
            Arc::new(move |_event: &AdapterEvent| {
                *counter.lock() += 1;
                if let Some(handle) = own.lock().take() {
                    handle.remove();
                }
            }),
        );
        *slot.lock() = Some(handle);

        bus.emit(&AdapterEvent::Disconnect);
        bus.emit(&AdapterEvent::Disconnect);
        assert_eq!(*calls.lock(), 1);
    }
}
