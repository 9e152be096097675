use std::{collections::BTreeMap, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value};
use shared::{
    domain::{Metadata, Session, ThemeMode, Topic},
    error::RelayError,
    protocol::{
        ConnectParams, DisconnectReason, FindParams, ModalEvent, ModalState, SessionEvent,
        SessionRequest,
    },
};
use tokio::sync::broadcast;
use url::Url;

pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOptions {
    pub project_id: String,
    pub relay_url: Option<Url>,
    pub metadata: Metadata,
}

#[async_trait]
pub trait SignClient: Send + Sync {
    /// Sessions held in transport storage that satisfy `params`, oldest first.
    fn find(&self, params: &FindParams) -> Vec<Session>;
    async fn request(&self, request: SessionRequest) -> Result<Value, RelayError>;
    async fn disconnect(&self, topic: &Topic, reason: DisconnectReason) -> Result<(), RelayError>;
    /// Authoritative record for `topic`, `None` once the transport dropped it.
    fn session(&self, topic: &Topic) -> Option<Session>;
    /// Dropping the receiver ends the subscription.
    fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent>;
}

#[async_trait]
pub trait UniversalProvider: Send + Sync {
    async fn connect(&self, params: ConnectParams) -> Result<Session, RelayError>;
    fn client(&self) -> Arc<dyn SignClient>;
    fn session_topic(&self) -> Option<Topic>;
}

#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn init(
        &self,
        options: ProviderOptions,
    ) -> Result<Arc<dyn UniversalProvider>, RelayError>;
}

pub type ModalStateCallback = Arc<dyn Fn(&ModalState) + Send + Sync>;
pub type ModalEventCallback = Arc<dyn Fn(&ModalEvent) + Send + Sync>;
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModalOptions {
    pub project_id: String,
    pub chain_id: String,
    pub metadata: Metadata,
    pub theme_mode: ThemeMode,
    pub theme_variables: BTreeMap<String, String>,
    pub featured_wallet_ids: Vec<String>,
    pub enable_analytics: bool,
    pub extra: Map<String, Value>,
}

#[async_trait]
pub trait ModalController: Send + Sync {
    async fn open(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
    fn subscribe_state(&self, callback: ModalStateCallback) -> Unsubscribe;
    fn subscribe_events(&self, callback: ModalEventCallback) -> Unsubscribe;
    fn set_theme_mode(&self, mode: ThemeMode);
}

pub trait ModalFactory: Send + Sync {
    fn create(
        &self,
        provider: Arc<dyn UniversalProvider>,
        options: ModalOptions,
    ) -> anyhow::Result<Arc<dyn ModalController>>;
}

pub struct MissingModalFactory;

impl ModalFactory for MissingModalFactory {
    fn create(
        &self,
        _provider: Arc<dyn UniversalProvider>,
        _options: ModalOptions,
    ) -> anyhow::Result<Arc<dyn ModalController>> {
        Err(anyhow!("approval modal is unavailable in this environment"))
    }
}
