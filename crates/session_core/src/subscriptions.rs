//! Modal subscriptions requested before the modal controller exists.
//!
//! Each record is `Pending` until the controller is attached, then `Active`
//! with the controller's unsubscribe function. The handle handed to the caller
//! works the same in both phases.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use parking_lot::Mutex;
use relay_integration::{ModalController, ModalEventCallback, ModalStateCallback, Unsubscribe};
use tracing::debug;

pub enum CachedCallback {
    State(ModalStateCallback),
    Events(ModalEventCallback),
}

enum Record {
    Pending(CachedCallback),
    /// Subscribing on the controller right now; `released` records an
    /// unsubscribe that arrived meanwhile.
    Activating {
        released: bool,
    },
    Active(Unsubscribe),
}

#[derive(Default)]
struct CacheState {
    controller: Option<Arc<dyn ModalController>>,
    records: Vec<(u64, Record)>,
}

#[derive(Default)]
pub struct SubscriptionCache {
    state: Arc<Mutex<CacheState>>,
    next_id: AtomicU64,
}

fn activate(controller: &Arc<dyn ModalController>, callback: CachedCallback) -> Unsubscribe {
    match callback {
        CachedCallback::State(callback) => controller.subscribe_state(callback),
        CachedCallback::Events(callback) => controller.subscribe_events(callback),
    }
}

fn finish_activation(state: &Mutex<CacheState>, id: u64, unsubscribe: Unsubscribe) {
    let mut guard = state.lock();
    let position = guard.records.iter().position(|(existing, _)| *existing == id);
    match position {
        Some(index) if matches!(guard.records[index].1, Record::Activating { released: false }) => {
            guard.records[index].1 = Record::Active(unsubscribe);
        }
        Some(index) => {
            guard.records.remove(index);
            drop(guard);
            unsubscribe();
        }
        None => {
            drop(guard);
            unsubscribe();
        }
    }
}

impl SubscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_modal_state(&self, callback: ModalStateCallback) -> SubscriptionHandle {
        self.subscribe(CachedCallback::State(callback))
    }

    pub fn subscribe_modal_events(&self, callback: ModalEventCallback) -> SubscriptionHandle {
        self.subscribe(CachedCallback::Events(callback))
    }

    fn subscribe(&self, callback: CachedCallback) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle {
            id,
            state: Arc::downgrade(&self.state),
        };

        let controller = {
            let mut guard = self.state.lock();
            match guard.controller.clone() {
                None => {
                    guard.records.push((id, Record::Pending(callback)));
                    return handle;
                }
                Some(controller) => {
                    guard
                        .records
                        .push((id, Record::Activating { released: false }));
                    controller
                }
            }
        };

        let unsubscribe = activate(&controller, callback);
        finish_activation(&self.state, id, unsubscribe);
        handle
    }

    /// Binds the controller and replays queued subscriptions in FIFO order.
    /// Only the first controller attached is used.
    pub fn attach(&self, controller: Arc<dyn ModalController>) {
        let pending = {
            let mut guard = self.state.lock();
            if guard.controller.is_some() {
                return;
            }
            guard.controller = Some(Arc::clone(&controller));

            let mut pending = Vec::new();
            for (id, record) in guard.records.iter_mut() {
                match std::mem::replace(record, Record::Activating { released: false }) {
                    Record::Pending(callback) => pending.push((*id, callback)),
                    other => *record = other,
                }
            }
            pending
        };

        debug!(replayed = pending.len(), "subscriptions: controller attached");
        for (id, callback) in pending {
            let unsubscribe = activate(&controller, callback);
            finish_activation(&self.state, id, unsubscribe);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().controller.is_some()
    }

    pub fn release_all(&self) -> usize {
        let records = std::mem::take(&mut self.state.lock().records);
        let released = records.len();
        for (_, record) in records {
            if let Record::Active(unsubscribe) = record {
                unsubscribe();
            }
        }
        released
    }

    pub fn pending_count(&self) -> usize {
        self.count(|record| matches!(record, Record::Pending(_)))
    }

    pub fn active_count(&self) -> usize {
        self.count(|record| matches!(record, Record::Active(_)))
    }

    fn count(&self, predicate: impl Fn(&Record) -> bool) -> usize {
        self.state
            .lock()
            .records
            .iter()
            .filter(|(_, record)| predicate(record))
            .count()
    }
}

pub struct SubscriptionHandle {
    id: u64,
    state: Weak<Mutex<CacheState>>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut guard = state.lock();
        let Some(index) = guard.records.iter().position(|(id, _)| *id == self.id) else {
            return;
        };

        if let Record::Activating { released } = &mut guard.records[index].1 {
            *released = true;
            return;
        }

        let (_, record) = guard.records.remove(index);
        drop(guard);
        if let Record::Active(unsubscribe) = record {
            unsubscribe();
        }
    }
}

#[cfg(test)]
#[path = "tests/subscriptions_tests.rs"]
mod tests;
