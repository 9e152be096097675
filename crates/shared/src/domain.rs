use std::{collections::HashMap, fmt};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const TRON_NAMESPACE: &str = "tron";
pub const TRON_MAINNET: &str = "tron:0x2b6653dc";
pub const TRON_SHASTA: &str = "tron:0x94a9059e";
pub const TRON_NILE: &str = "tron:0xcd8690dc";

/// Session property a wallet sets to select the signing payload layout.
pub const METHOD_VERSION_PROPERTY: &str = "tron_method_version";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(pub String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TronChain {
    #[default]
    Mainnet,
    Shasta,
    Nile,
    /// Any other CAIP-2 chain id, e.g. a private network.
    Custom(String),
}

impl TronChain {
    pub fn chain_id(&self) -> &str {
        match self {
            TronChain::Mainnet => TRON_MAINNET,
            TronChain::Shasta => TRON_SHASTA,
            TronChain::Nile => TRON_NILE,
            TronChain::Custom(id) => id,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | TRON_MAINNET => TronChain::Mainnet,
            "shasta" | TRON_SHASTA => TronChain::Shasta,
            "nile" | TRON_NILE => TronChain::Nile,
            _ => TronChain::Custom(raw.trim().to_string()),
        }
    }
}

impl From<String> for TronChain {
    fn from(value: String) -> Self {
        TronChain::parse(&value)
    }
}

impl From<TronChain> for String {
    fn from(value: TronChain) -> Self {
        value.chain_id().to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub name: String,
    pub description: String,
    pub url: String,
    pub icons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<String>>,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Keeps the wallet's declared namespace order.
pub type Namespaces = IndexMap<String, Namespace>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: Topic,
    pub namespaces: Namespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_properties: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<Metadata>,
    #[serde(default)]
    pub expiry: i64,
    #[serde(default)]
    pub acknowledged: bool,
}

impl Session {
    /// Raw account identifiers in declared namespace order, then account order.
    pub fn account_ids(&self) -> impl Iterator<Item = &str> {
        self.namespaces
            .values()
            .flat_map(|namespace| namespace.accounts.iter().map(String::as_str))
    }

    pub fn session_property(&self, key: &str) -> Option<&str> {
        self.session_properties
            .as_ref()
            .and_then(|properties| properties.get(key))
            .map(String::as_str)
    }

    pub fn supports_chain(&self, chain_id: &str) -> bool {
        self.namespaces.values().any(|namespace| {
            namespace
                .chains
                .as_ref()
                .is_some_and(|chains| chains.iter().any(|chain| chain == chain_id))
                || namespace.accounts.iter().any(|account| {
                    account
                        .rsplit_once(':')
                        .is_some_and(|(chain, _)| chain == chain_id)
                })
        })
    }

    pub fn supports_methods(&self, methods: &[String]) -> bool {
        methods.iter().all(|method| {
            self.namespaces
                .values()
                .any(|namespace| namespace.methods.iter().any(|m| m == method))
        })
    }
}
