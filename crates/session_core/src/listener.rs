use std::sync::Arc;

use parking_lot::Mutex;
use relay_integration::SignClient;
use shared::{
    domain::{Namespaces, Session, Topic},
    protocol::{SessionDelete, SessionEvent, SessionUpdate},
};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    event_bus::{AdapterEvent, EventBus},
    session_store::SessionStore,
};

/// Incoming namespaces replace the re-fetched ones; every other field comes
/// from the transport's record.
pub fn merge_session_update(fetched: Session, namespaces: Option<Namespaces>) -> Session {
    match namespaces {
        Some(namespaces) => Session {
            namespaces,
            ..fetched
        },
        None => fetched,
    }
}

struct ListenerTask {
    topic: Topic,
    handle: JoinHandle<()>,
}

pub struct RemoteMutationListener {
    store: Arc<SessionStore>,
    bus: Arc<EventBus>,
    task: Mutex<Option<ListenerTask>>,
}

impl RemoteMutationListener {
    pub fn new(store: Arc<SessionStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            task: Mutex::new(None),
        }
    }

    /// `events` should be taken before the session is adopted so nothing the
    /// wallet pushes in between is lost. Replaces an earlier subscription.
    pub fn arm(
        &self,
        client: Arc<dyn SignClient>,
        events: broadcast::Receiver<SessionEvent>,
        topic: Topic,
    ) {
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let handle = tokio::spawn(run_listener(client, events, store, bus));

        let previous = self.task.lock().replace(ListenerTask {
            topic: topic.clone(),
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(previous = %previous.topic, %topic, "listener: replaced subscription");
        }
    }

    pub fn detach(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                let live = !task.handle.is_finished();
                task.handle.abort();
                live
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }
}

impl Drop for RemoteMutationListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.handle.abort();
        }
    }
}

async fn run_listener(
    client: Arc<dyn SignClient>,
    mut events: broadcast::Receiver<SessionEvent>,
    store: Arc<SessionStore>,
    bus: Arc<EventBus>,
) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::SessionUpdate(update)) => {
                apply_update(client.as_ref(), &store, &bus, update);
            }
            Ok(SessionEvent::SessionDelete(delete)) => {
                if apply_delete(&store, &bus, &delete) {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "listener: session event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

pub(crate) fn apply_update(
    client: &dyn SignClient,
    store: &SessionStore,
    bus: &EventBus,
    update: SessionUpdate,
) {
    if store.topic().as_ref() != Some(&update.topic) {
        debug!(topic = %update.topic, "listener: update for another session ignored");
        return;
    }

    // The wallet may delete right after updating; the delete will follow.
    let Some(fetched) = client.session(&update.topic) else {
        debug!(topic = %update.topic, "listener: update for a session the transport dropped");
        return;
    };

    let merged = merge_session_update(fetched, update.params.namespaces);
    match store.replace_if_topic(&update.topic, merged) {
        Ok(Some(replaced)) if replaced.accounts_changed() => {
            info!(
                topic = %update.topic,
                accounts = replaced.addresses.len(),
                "listener: accounts changed"
            );
            bus.emit(&AdapterEvent::AccountsChanged(replaced.addresses));
        }
        Ok(Some(_)) => {
            debug!(topic = %update.topic, "listener: update left accounts unchanged");
        }
        Ok(None) => {
            debug!(topic = %update.topic, "listener: session replaced while updating");
        }
        Err(err) => {
            warn!(topic = %update.topic, error = %err, "listener: update ignored");
        }
    }
}

/// Returns whether the current session was removed.
pub(crate) fn apply_delete(store: &SessionStore, bus: &EventBus, delete: &SessionDelete) -> bool {
    if store.clear_if_topic(&delete.topic).is_none() {
        debug!(topic = %delete.topic, "listener: delete for another session ignored");
        return false;
    }
    info!(topic = %delete.topic, "listener: wallet deleted session");
    bus.emit(&AdapterEvent::Disconnect);
    true
}

#[cfg(test)]
#[path = "tests/listener_tests.rs"]
mod tests;
