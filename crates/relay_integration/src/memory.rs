//! In-process loopback wallet and headless modal.
//!
//! `MemoryWallet` stands in for both the relay and the remote wallet: it keeps
//! the transport-side session records, answers sign requests and lets the
//! owner push session updates/deletes the way a real wallet would.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use shared::{
    domain::{Namespaces, Session, ThemeMode, Topic},
    error::{RelayError, RelayErrorCode},
    protocol::{
        ConnectParams, DisconnectReason, FindParams, ModalEvent, ModalState, SessionDelete,
        SessionEvent, SessionRequest, SessionUpdate, SessionUpdateParams, TRON_SIGN_MESSAGE,
        TRON_SIGN_TRANSACTION,
    },
};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::debug;

use crate::{
    ModalController, ModalEventCallback, ModalFactory, ModalOptions, ModalStateCallback,
    ProviderFactory, ProviderOptions, SignClient, Unsubscribe, UniversalProvider,
};

type Approval = oneshot::Sender<Result<Session, RelayError>>;

#[derive(Default)]
struct WalletState {
    sessions: Vec<Session>,
    requests: Vec<SessionRequest>,
    disconnects: Vec<(Topic, DisconnectReason)>,
    pending_approvals: VecDeque<Approval>,
    connect_params: Vec<ConnectParams>,
    auto_approve: Option<Session>,
    responses: HashMap<String, Result<Value, RelayError>>,
    disconnect_failure: Option<RelayError>,
    last_topic: Option<Topic>,
}

pub struct MemoryWallet {
    inner: Mutex<WalletState>,
    events: broadcast::Sender<SessionEvent>,
    pending_tx: watch::Sender<usize>,
}

impl MemoryWallet {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let (pending_tx, _) = watch::channel(0);
        Arc::new(Self {
            inner: Mutex::new(WalletState::default()),
            events,
            pending_tx,
        })
    }

    pub fn insert_session(&self, mut session: Session) {
        session.acknowledged = true;
        let mut guard = self.inner.lock();
        guard.last_topic = Some(session.topic.clone());
        guard.sessions.push(session);
    }

    pub fn set_auto_approve(&self, session: Option<Session>) {
        self.inner.lock().auto_approve = session;
    }

    pub fn set_response(&self, method: &str, response: Result<Value, RelayError>) {
        self.inner
            .lock()
            .responses
            .insert(method.to_string(), response);
    }

    pub fn fail_disconnects_with(&self, error: Option<RelayError>) {
        self.inner.lock().disconnect_failure = error;
    }

    pub fn pending_approvals(&self) -> usize {
        self.inner.lock().pending_approvals.len()
    }

    pub async fn wait_for_pending_approval(&self) {
        let mut pending = self.pending_tx.subscribe();
        let _ = pending.wait_for(|count| *count > 0).await;
    }

    /// Approves the oldest outstanding pairing. Returns `false` when nothing
    /// was pending or the requester already went away; the session is stored
    /// either way.
    pub fn approve_pending(&self, mut session: Session) -> bool {
        session.acknowledged = true;
        let approval = {
            let mut guard = self.inner.lock();
            guard.last_topic = Some(session.topic.clone());
            guard.sessions.push(session.clone());
            let approval = guard.pending_approvals.pop_front();
            self.pending_tx.send_replace(guard.pending_approvals.len());
            approval
        };
        match approval {
            Some(approval) => approval.send(Ok(session)).is_ok(),
            None => false,
        }
    }

    pub fn reject_pending(&self, error: RelayError) -> bool {
        let approval = {
            let mut guard = self.inner.lock();
            let approval = guard.pending_approvals.pop_front();
            self.pending_tx.send_replace(guard.pending_approvals.len());
            approval
        };
        match approval {
            Some(approval) => approval.send(Err(error)).is_ok(),
            None => false,
        }
    }

    pub fn update_session(&self, topic: &Topic, namespaces: Namespaces) {
        {
            let mut guard = self.inner.lock();
            if let Some(session) = guard.sessions.iter_mut().find(|s| &s.topic == topic) {
                session.namespaces = namespaces.clone();
            }
        }
        self.emit(SessionEvent::SessionUpdate(SessionUpdate {
            topic: topic.clone(),
            params: SessionUpdateParams {
                namespaces: Some(namespaces),
            },
        }));
    }

    pub fn delete_session(&self, topic: &Topic) {
        self.remove_record(topic);
        self.emit(SessionEvent::SessionDelete(SessionDelete {
            topic: topic.clone(),
        }));
    }

    pub fn remove_record(&self, topic: &Topic) {
        let mut guard = self.inner.lock();
        guard.sessions.retain(|session| &session.topic != topic);
        if guard.last_topic.as_ref() == Some(topic) {
            guard.last_topic = None;
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        // No receivers simply means no adapter is listening yet.
        let _ = self.events.send(event);
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.lock().sessions.clone()
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.inner.lock().requests.clone()
    }

    pub fn disconnects(&self) -> Vec<(Topic, DisconnectReason)> {
        self.inner.lock().disconnects.clone()
    }

    pub fn connect_params(&self) -> Vec<ConnectParams> {
        self.inner.lock().connect_params.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    async fn start_pairing(&self, params: ConnectParams) -> Result<Session, RelayError> {
        let rx = {
            let mut guard = self.inner.lock();
            guard.connect_params.push(params);
            if let Some(mut session) = guard.auto_approve.clone() {
                session.acknowledged = true;
                guard.last_topic = Some(session.topic.clone());
                guard.sessions.push(session.clone());
                return Ok(session);
            }
            let (tx, rx) = oneshot::channel();
            guard.pending_approvals.push_back(tx);
            self.pending_tx.send_replace(guard.pending_approvals.len());
            rx
        };

        rx.await
            .map_err(|_| RelayError::unavailable("pairing abandoned by wallet"))?
    }
}

#[async_trait]
impl SignClient for MemoryWallet {
    fn find(&self, params: &FindParams) -> Vec<Session> {
        self.inner
            .lock()
            .sessions
            .iter()
            .filter(|session| {
                session.acknowledged
                    && session.supports_chain(&params.chain_id)
                    && session.supports_methods(&params.methods)
            })
            .cloned()
            .collect()
    }

    async fn request(&self, request: SessionRequest) -> Result<Value, RelayError> {
        let configured = {
            let mut guard = self.inner.lock();
            if !guard.sessions.iter().any(|s| s.topic == request.topic) {
                return Err(RelayError::new(
                    RelayErrorCode::NoMatchingKey,
                    format!("no session for topic {}", request.topic),
                ));
            }
            guard.requests.push(request.clone());
            guard.responses.get(&request.request.method).cloned()
        };

        if let Some(response) = configured {
            return response;
        }

        match request.request.method.as_str() {
            TRON_SIGN_MESSAGE => Ok(json!({ "signature": "0xmemory-signature" })),
            TRON_SIGN_TRANSACTION => Ok(json!({
                "result": {
                    "signature": ["0xmemory-signature"],
                    "params": request.request.params,
                }
            })),
            other => Err(RelayError::new(
                RelayErrorCode::Unsupported,
                format!("method {other} is not supported by the memory wallet"),
            )),
        }
    }

    async fn disconnect(&self, topic: &Topic, reason: DisconnectReason) -> Result<(), RelayError> {
        let failure = {
            let mut guard = self.inner.lock();
            guard.disconnects.push((topic.clone(), reason));
            guard.disconnect_failure.clone()
        };
        if let Some(error) = failure {
            return Err(error);
        }
        self.remove_record(topic);
        Ok(())
    }

    fn session(&self, topic: &Topic) -> Option<Session> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|session| &session.topic == topic)
            .cloned()
    }

    fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

pub struct MemoryProvider {
    wallet: Arc<MemoryWallet>,
}

#[async_trait]
impl UniversalProvider for MemoryProvider {
    async fn connect(&self, params: ConnectParams) -> Result<Session, RelayError> {
        self.wallet.start_pairing(params).await
    }

    fn client(&self) -> Arc<dyn SignClient> {
        Arc::clone(&self.wallet) as Arc<dyn SignClient>
    }

    fn session_topic(&self) -> Option<Topic> {
        self.wallet.inner.lock().last_topic.clone()
    }
}

pub struct MemoryProviderFactory {
    wallet: Arc<MemoryWallet>,
    init_calls: AtomicUsize,
    failures_remaining: AtomicUsize,
    init_delay: Mutex<Option<Duration>>,
    last_options: Mutex<Option<ProviderOptions>>,
}

impl MemoryProviderFactory {
    pub fn new(wallet: Arc<MemoryWallet>) -> Arc<Self> {
        Arc::new(Self {
            wallet,
            init_calls: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            init_delay: Mutex::new(None),
            last_options: Mutex::new(None),
        })
    }

    /// The next `count` initializations fail with an unavailable relay.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn set_init_delay(&self, delay: Option<Duration>) {
        *self.init_delay.lock() = delay;
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ProviderOptions> {
        self.last_options.lock().clone()
    }
}

#[async_trait]
impl ProviderFactory for MemoryProviderFactory {
    async fn init(
        &self,
        options: ProviderOptions,
    ) -> Result<Arc<dyn UniversalProvider>, RelayError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        debug!(project_id = %options.project_id, "memory relay: init");
        *self.last_options.lock() = Some(options);

        let delay = *self.init_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if should_fail {
            return Err(RelayError::unavailable("relay handshake failed"));
        }

        Ok(Arc::new(MemoryProvider {
            wallet: Arc::clone(&self.wallet),
        }))
    }
}

enum Subscriber {
    State(ModalStateCallback),
    Event(ModalEventCallback),
}

/// Modal controller without a rendering surface. The owner drives user
/// actions such as closing the dialog.
pub struct HeadlessModal {
    state: watch::Sender<ModalState>,
    subscribers: Arc<Mutex<Vec<(u64, Subscriber)>>>,
    next_id: AtomicU64,
    theme_mode: Mutex<ThemeMode>,
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl HeadlessModal {
    fn new(theme_mode: ThemeMode) -> Arc<Self> {
        let (state, _) = watch::channel(ModalState::default());
        Arc::new(Self {
            state,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
            theme_mode: Mutex::new(theme_mode),
            open_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        })
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn theme_mode(&self) -> ThemeMode {
        *self.theme_mode.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub async fn wait_until_open(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|state| state.open).await;
    }

    pub fn simulate_user_close(&self) {
        self.set_open(false);
    }

    pub fn emit_event(&self, event: ModalEvent) {
        let callbacks: Vec<ModalEventCallback> = self
            .subscribers
            .lock()
            .iter()
            .filter_map(|(_, subscriber)| match subscriber {
                Subscriber::Event(callback) => Some(Arc::clone(callback)),
                Subscriber::State(_) => None,
            })
            .collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    fn set_open(&self, open: bool) {
        let mut next = self.state.borrow().clone();
        next.open = open;
        self.state.send_replace(next.clone());

        let callbacks: Vec<ModalStateCallback> = self
            .subscribers
            .lock()
            .iter()
            .filter_map(|(_, subscriber)| match subscriber {
                Subscriber::State(callback) => Some(Arc::clone(callback)),
                Subscriber::Event(_) => None,
            })
            .collect();
        for callback in callbacks {
            callback(&next);
        }
    }

    fn add_subscriber(&self, subscriber: Subscriber) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().push((id, subscriber));
        let subscribers = Arc::clone(&self.subscribers);
        Box::new(move || {
            subscribers.lock().retain(|(existing, _)| *existing != id);
        })
    }
}

#[async_trait]
impl ModalController for HeadlessModal {
    async fn open(&self) -> anyhow::Result<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.set_open(true);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_open() {
            self.set_open(false);
        }
        Ok(())
    }

    fn subscribe_state(&self, callback: ModalStateCallback) -> Unsubscribe {
        self.add_subscriber(Subscriber::State(callback))
    }

    fn subscribe_events(&self, callback: ModalEventCallback) -> Unsubscribe {
        self.add_subscriber(Subscriber::Event(callback))
    }

    fn set_theme_mode(&self, mode: ThemeMode) {
        *self.theme_mode.lock() = mode;
    }
}

pub struct HeadlessModalFactory {
    modal: Arc<HeadlessModal>,
    create_calls: AtomicUsize,
    last_options: Mutex<Option<ModalOptions>>,
}

impl HeadlessModalFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            modal: HeadlessModal::new(ThemeMode::default()),
            create_calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        })
    }

    pub fn modal(&self) -> Arc<HeadlessModal> {
        Arc::clone(&self.modal)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<ModalOptions> {
        self.last_options.lock().clone()
    }
}

impl ModalFactory for HeadlessModalFactory {
    fn create(
        &self,
        _provider: Arc<dyn UniversalProvider>,
        options: ModalOptions,
    ) -> anyhow::Result<Arc<dyn ModalController>> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.modal.set_theme_mode(options.theme_mode);
        *self.last_options.lock() = Some(options);
        Ok(Arc::clone(&self.modal) as Arc<dyn ModalController>)
    }
}
