use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use relay_integration::{
    MissingModalFactory, ModalController, ModalFactory, ProviderFactory, SignClient, Unsubscribe,
};
use serde_json::Value;
use shared::{
    domain::{Session, ThemeMode, METHOD_VERSION_PROPERTY},
    error::{RelayError, RelayErrorCode},
    protocol::{
        tron_methods, tron_required_namespaces, ConnectParams, DisconnectReason, FindParams,
        ModalEvent, ModalState, RpcRequest, SessionEvent, SessionRequest, SignMessageParams,
        SignMessageResponse, SignTransactionParams, WrappedTransaction, TRON_SIGN_MESSAGE,
        TRON_SIGN_TRANSACTION,
    },
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod event_bus;
pub mod listener;
pub mod provider;
pub mod session_store;
pub mod subscriptions;

pub use config::{load_config, AdapterConfig, ConfigError};
pub use error::{AdapterError, Result};
pub use event_bus::{AdapterEvent, EventKind, Listener, ListenerHandle, ListenerId};
pub use subscriptions::SubscriptionHandle;

use event_bus::EventBus;
use listener::RemoteMutationListener;
use provider::{ProviderHandle, ProviderInitializer};
use session_store::{primary_address, SessionStore};
use subscriptions::SubscriptionCache;

const METHOD_VERSION_V1: &str = "v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Resuming,
    AwaitingApproval,
    Connected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectStatus {
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Settled,
    Resuming,
    AwaitingApproval,
}

enum Resumed {
    Adopted(String),
    Nothing(broadcast::Receiver<SessionEvent>),
}

struct PhaseGuard<'a> {
    phase: &'a Mutex<Phase>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = Phase::Settled;
    }
}

/// Clears the local session however the enclosing call finishes.
struct ClearSessionOnDrop<'a> {
    store: &'a SessionStore,
}

impl Drop for ClearSessionOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.store.clear_session() {
            info!(topic = %session.topic, "disconnect: local session cleared");
        }
    }
}

/// Close watcher plus the open modal. Dropping it unsubscribes and closes the
/// modal in the background.
struct OpenModal {
    modal: Option<Arc<dyn ModalController>>,
    unsubscribe: Option<Unsubscribe>,
}

impl OpenModal {
    async fn close(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        if let Some(modal) = self.modal.take() {
            if let Err(err) = modal.close().await {
                warn!(error = %err, "connect: failed to close approval modal");
            }
        }
    }
}

impl Drop for OpenModal {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
        let Some(modal) = self.modal.take() else {
            return;
        };
        debug!("connect: abandoned while awaiting approval, closing modal");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = modal.close().await {
                    warn!(error = %err, "connect: failed to close approval modal");
                }
            });
        }
    }
}

pub struct WalletSessionAdapter {
    config: AdapterConfig,
    provider: ProviderInitializer,
    modal_factory: Arc<dyn ModalFactory>,
    modal: Mutex<Option<Arc<dyn ModalController>>>,
    theme_mode: Mutex<ThemeMode>,
    store: Arc<SessionStore>,
    bus: Arc<EventBus>,
    listener: RemoteMutationListener,
    subscriptions: SubscriptionCache,
    phase: Mutex<Phase>,
}

impl WalletSessionAdapter {
    /// Adapter that can only resume sessions; first-time pairing needs a
    /// modal, see [`WalletSessionAdapter::new_with_modal`].
    pub fn new(config: AdapterConfig, provider_factory: Arc<dyn ProviderFactory>) -> Self {
        Self::new_with_modal(config, provider_factory, Arc::new(MissingModalFactory))
    }

    pub fn new_with_modal(
        config: AdapterConfig,
        provider_factory: Arc<dyn ProviderFactory>,
        modal_factory: Arc<dyn ModalFactory>,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let bus = Arc::new(EventBus::new());
        Self {
            provider: ProviderInitializer::new(provider_factory, config.provider_options()),
            theme_mode: Mutex::new(config.theme_mode),
            config,
            modal_factory,
            modal: Mutex::new(None),
            listener: RemoteMutationListener::new(Arc::clone(&store), Arc::clone(&bus)),
            store,
            bus,
            subscriptions: SubscriptionCache::new(),
            phase: Mutex::new(Phase::Settled),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        match *self.phase.lock() {
            Phase::Resuming => ConnectionState::Resuming,
            Phase::AwaitingApproval => ConnectionState::AwaitingApproval,
            Phase::Settled if self.store.has_session() => ConnectionState::Connected,
            Phase::Settled => ConnectionState::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.store.has_session()
    }

    pub fn address(&self) -> Option<String> {
        self.store.current_address().ok()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.store.all_addresses()
    }

    pub fn session(&self) -> Option<Session> {
        self.store.session()
    }

    pub async fn connect(&self) -> Result<String> {
        let handle = self.provider.get_provider().await?;
        let _phase = self.enter_phase(Phase::Resuming);
        let events = handle.client.subscribe_session_events();

        let events = match self.resume(&handle, events)? {
            Resumed::Adopted(address) => return Ok(address),
            Resumed::Nothing(events) => events,
        };

        let session = self.await_approval(&handle).await?;
        let topic = session.topic.clone();
        let address = self.adopt(&handle, session, events)?;
        info!(%topic, "connect: wallet approved new session");
        Ok(address)
    }

    /// Resume-only variant of [`connect`](Self::connect); never opens the
    /// modal and reports an empty address when nothing can be resumed.
    pub async fn check_connect_status(&self) -> Result<ConnectStatus> {
        let handle = self.provider.get_provider().await?;
        let _phase = self.enter_phase(Phase::Resuming);
        let events = handle.client.subscribe_session_events();

        let address = match self.resume(&handle, events)? {
            Resumed::Adopted(address) => address,
            Resumed::Nothing(_) => String::new(),
        };
        Ok(ConnectStatus { address })
    }

    /// Ends the session with the wallet. The local session is cleared even
    /// when the remote request fails.
    pub async fn disconnect(&self) -> Result<()> {
        self.listener.detach();
        let released = self.subscriptions.release_all();
        debug!(released, "disconnect: released modal subscriptions");

        let _cleanup = ClearSessionOnDrop { store: &self.store };

        let handle = self
            .provider
            .current()
            .ok_or(AdapterError::NotInitialized("WalletConnect client is not initialized"))?;
        let topic = self
            .store
            .topic()
            .or_else(|| handle.provider.session_topic())
            .ok_or(AdapterError::NotInitialized("no session topic to disconnect"))?;

        match handle
            .client
            .disconnect(&topic, DisconnectReason::user_disconnected())
            .await
        {
            Ok(()) => {
                info!(%topic, "disconnect: wallet session closed");
                Ok(())
            }
            Err(err) => {
                warn!(%topic, error = %err, "disconnect: remote disconnect failed");
                Err(err.into())
            }
        }
    }

    /// Drops every local subscription and the local session without
    /// contacting the wallet; the remote session stays resumable.
    pub fn dispose(&self) {
        self.listener.detach();
        self.subscriptions.release_all();
        self.bus.remove_all_listeners(None);
        self.store.clear_session();
    }

    pub async fn sign_transaction(&self, transaction: Value) -> Result<Value> {
        let (client, session, address) = self.active_session()?;
        let params = if session.session_property(METHOD_VERSION_PROPERTY) == Some(METHOD_VERSION_V1)
        {
            SignTransactionParams::V1 {
                address,
                transaction,
            }
        } else {
            SignTransactionParams::Wrapped {
                address,
                transaction: WrappedTransaction { transaction },
            }
        };

        let response = client
            .request(self.session_request(
                &session,
                TRON_SIGN_TRANSACTION,
                serde_json::to_value(params)?,
            ))
            .await?;
        Ok(unwrap_result(response))
    }

    pub async fn sign_message(&self, message: &str) -> Result<String> {
        let (client, session, address) = self.active_session()?;
        let params = SignMessageParams {
            address,
            message: message.to_string(),
        };

        let response = client
            .request(self.session_request(
                &session,
                TRON_SIGN_MESSAGE,
                serde_json::to_value(params)?,
            ))
            .await?;
        let parsed: SignMessageResponse = serde_json::from_value(response)
            .map_err(|err| AdapterError::InvalidResponse(err.to_string()))?;
        parsed
            .signature
            .ok_or_else(|| AdapterError::InvalidResponse("missing signature".into()))
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&AdapterEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, Arc::new(listener))
    }

    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.bus.off(kind, id)
    }

    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        self.bus.remove_all_listeners(kind);
    }

    pub fn subscribe_modal_state<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ModalState) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe_modal_state(Arc::new(callback))
    }

    pub fn subscribe_modal_events<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ModalEvent) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe_modal_events(Arc::new(callback))
    }

    /// Applied to the modal now if it exists, otherwise when it is created.
    pub fn set_theme_mode(&self, mode: ThemeMode) {
        let modal = self.modal.lock();
        *self.theme_mode.lock() = mode;
        if let Some(modal) = modal.as_ref() {
            modal.set_theme_mode(mode);
        }
    }

    fn enter_phase(&self, phase: Phase) -> PhaseGuard<'_> {
        *self.phase.lock() = phase;
        PhaseGuard { phase: &self.phase }
    }

    fn find_params(&self) -> FindParams {
        FindParams {
            chain_id: self.config.chain_id().to_string(),
            methods: tron_methods(),
        }
    }

    fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            required_namespaces: tron_required_namespaces(self.config.chain_id()),
            optional_namespaces: Default::default(),
            pairing_topic: None,
        }
    }

    fn session_request(&self, session: &Session, method: &str, params: Value) -> SessionRequest {
        SessionRequest {
            topic: session.topic.clone(),
            chain_id: self.config.chain_id().to_string(),
            request: RpcRequest {
                method: method.to_string(),
                params,
            },
        }
    }

    fn resume(
        &self,
        handle: &ProviderHandle,
        events: broadcast::Receiver<SessionEvent>,
    ) -> Result<Resumed> {
        let Some(session) = handle.client.find(&self.find_params()).pop() else {
            debug!(chain = self.config.chain_id(), "connect: no session to resume");
            return Ok(Resumed::Nothing(events));
        };
        let topic = session.topic.clone();
        let address = self.adopt(handle, session, events)?;
        info!(%topic, "connect: resumed existing session");
        Ok(Resumed::Adopted(address))
    }

    fn adopt(
        &self,
        handle: &ProviderHandle,
        session: Session,
        events: broadcast::Receiver<SessionEvent>,
    ) -> Result<String> {
        let topic = session.topic.clone();
        let address = self.store.set_session(session)?;
        self.listener.arm(Arc::clone(&handle.client), events, topic);
        self.bus
            .emit(&AdapterEvent::AccountsChanged(self.store.all_addresses()));
        Ok(address)
    }

    fn ensure_modal(&self, handle: &ProviderHandle) -> Result<Arc<dyn ModalController>> {
        let mut guard = self.modal.lock();
        if let Some(modal) = guard.as_ref() {
            return Ok(Arc::clone(modal));
        }

        let options = self.config.modal_options(*self.theme_mode.lock());
        let modal = self
            .modal_factory
            .create(Arc::clone(&handle.provider), options)
            .map_err(AdapterError::Modal)?;
        *guard = Some(Arc::clone(&modal));
        drop(guard);

        info!("connect: approval modal created");
        self.subscriptions.attach(Arc::clone(&modal));
        Ok(modal)
    }

    async fn await_approval(&self, handle: &ProviderHandle) -> Result<Session> {
        let modal = self.ensure_modal(handle)?;
        *self.phase.lock() = Phase::AwaitingApproval;

        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let was_open = AtomicBool::new(false);
        let unsubscribe = modal.subscribe_state(Arc::new(move |state: &ModalState| {
            if state.open {
                was_open.store(true, Ordering::SeqCst);
            } else if was_open.swap(false, Ordering::SeqCst) {
                let _ = closed_tx.send(());
            }
        }));
        let open = OpenModal {
            modal: Some(Arc::clone(&modal)),
            unsubscribe: Some(unsubscribe),
        };

        let outcome = self.race_approval(handle, modal.as_ref(), &mut closed_rx).await;

        open.close().await;
        outcome
    }

    async fn race_approval(
        &self,
        handle: &ProviderHandle,
        modal: &dyn ModalController,
        closed: &mut mpsc::UnboundedReceiver<()>,
    ) -> Result<Session> {
        modal.open().await.map_err(AdapterError::Modal)?;

        // Runs on its own task so a cancelled wait leaves the pairing alive;
        // a late approval lands in transport storage for the next resume.
        let provider = Arc::clone(&handle.provider);
        let params = self.connect_params();
        let mut approval = tokio::spawn(async move { provider.connect(params).await });

        tokio::select! {
            joined = &mut approval => match joined {
                Ok(result) => result.map_err(AdapterError::from),
                Err(err) => Err(AdapterError::Relay(RelayError::new(
                    RelayErrorCode::Internal,
                    format!("approval task failed: {err}"),
                ))),
            },
            Some(()) = closed.recv() => {
                info!("connect: approval modal closed before approval");
                Err(AdapterError::UserCancelled)
            }
        }
    }

    fn active_session(&self) -> Result<(Arc<dyn SignClient>, Session, String)> {
        let handle = self
            .provider
            .current()
            .ok_or(AdapterError::NotInitialized("WalletConnect client is not initialized"))?;
        let session = self
            .store
            .session()
            .ok_or(AdapterError::NotInitialized("no active session, call connect first"))?;
        let address = primary_address(&session)?;
        Ok((handle.client, session, address))
    }
}

/// Wallets answer either `{ result: .. }` or the bare payload.
fn unwrap_result(response: Value) -> Value {
    match response {
        Value::Object(mut fields) => match fields.remove("result") {
            Some(result) if !result.is_null() => result,
            Some(result) => {
                fields.insert("result".to_string(), result);
                Value::Object(fields)
            }
            None => Value::Object(fields),
        },
        other => other,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
