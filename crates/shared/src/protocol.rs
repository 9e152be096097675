use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Namespace, Namespaces, Topic, TRON_NAMESPACE};

pub const TRON_SIGN_TRANSACTION: &str = "tron_signTransaction";
pub const TRON_SIGN_MESSAGE: &str = "tron_signMessage";

/// Reason code the WalletConnect sign protocol reserves for a user-initiated
/// disconnect.
pub const USER_DISCONNECTED_CODE: u32 = 6000;

pub fn tron_methods() -> Vec<String> {
    vec![
        TRON_SIGN_TRANSACTION.to_string(),
        TRON_SIGN_MESSAGE.to_string(),
    ]
}

pub fn tron_required_namespaces(chain_id: &str) -> Namespaces {
    let mut namespaces = Namespaces::new();
    namespaces.insert(
        TRON_NAMESPACE.to_string(),
        Namespace {
            chains: Some(vec![chain_id.to_string()]),
            accounts: Vec::new(),
            methods: tron_methods(),
            events: Vec::new(),
        },
    );
    namespaces
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub required_namespaces: Namespaces,
    #[serde(default, skip_serializing_if = "Namespaces::is_empty")]
    pub optional_namespaces: Namespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_topic: Option<Topic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindParams {
    pub chain_id: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub topic: Topic,
    pub chain_id: String,
    pub request: RpcRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub code: u32,
    pub message: String,
}

impl DisconnectReason {
    pub fn user_disconnected() -> Self {
        Self {
            code: USER_DISCONNECTED_CODE,
            message: "User disconnected.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdateParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Namespaces>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub topic: Topic,
    pub params: SessionUpdateParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDelete {
    pub topic: Topic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionUpdate(SessionUpdate),
    SessionDelete(SessionDelete),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalState {
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_network_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalEvent {
    pub timestamp: i64,
    pub event: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedTransaction {
    pub transaction: Value,
}

/// `tron_signTransaction` parameter layouts. Wallets declaring method version
/// `v1` take the transaction directly, older wallets expect it wrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignTransactionParams {
    V1 {
        address: String,
        transaction: Value,
    },
    Wrapped {
        address: String,
        transaction: WrappedTransaction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessageParams {
    pub address: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignMessageResponse {
    #[serde(default)]
    pub signature: Option<String>,
}
