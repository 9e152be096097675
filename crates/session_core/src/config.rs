use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use relay_integration::{ModalOptions, ProviderOptions};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::domain::{Metadata, ThemeMode, TronChain};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("project id is required to reach the WalletConnect relay")]
    MissingProjectId,
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("failed to read config file '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub project_id: String,
    pub network: TronChain,
    pub relay_url: Option<Url>,
    pub metadata: Metadata,
    pub theme_mode: ThemeMode,
    pub theme_variables: BTreeMap<String, String>,
    pub featured_wallet_ids: Vec<String>,
    pub enable_analytics: bool,
    pub extra: Map<String, Value>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            network: TronChain::Mainnet,
            relay_url: None,
            metadata: Metadata {
                name: "TRON dApp".into(),
                description: "TRON WalletConnect session".into(),
                url: String::new(),
                icons: Vec::new(),
            },
            theme_mode: ThemeMode::Light,
            theme_variables: BTreeMap::new(),
            featured_wallet_ids: Vec::new(),
            enable_analytics: false,
            extra: Map::new(),
        }
    }
}

impl AdapterConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    pub fn chain_id(&self) -> &str {
        self.network.chain_id()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        if !self.metadata.url.is_empty() {
            Url::parse(&self.metadata.url).map_err(|err| ConfigError::InvalidField {
                field: "metadata.url",
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            project_id: self.project_id.trim().to_string(),
            relay_url: self.relay_url.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub(crate) fn modal_options(&self, theme_mode: ThemeMode) -> ModalOptions {
        ModalOptions {
            project_id: self.project_id.trim().to_string(),
            chain_id: self.chain_id().to_string(),
            metadata: self.metadata.clone(),
            theme_mode,
            theme_variables: self.theme_variables.clone(),
            featured_wallet_ids: self.featured_wallet_ids.clone(),
            enable_analytics: self.enable_analytics,
            extra: self.extra.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<AdapterConfig, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<AdapterConfig>(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => AdapterConfig::default(),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

pub(crate) fn apply_env_overrides(
    config: &mut AdapterConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(v) = lookup("WALLETCONNECT_PROJECT_ID") {
        config.project_id = v;
    }
    if let Some(v) = lookup("APP__PROJECT_ID") {
        config.project_id = v;
    }

    if let Some(v) = lookup("APP__NETWORK") {
        config.network = TronChain::parse(&v);
    }

    if let Some(v) = lookup("APP__RELAY_URL") {
        let url = Url::parse(&v).map_err(|err| ConfigError::InvalidField {
            field: "relay_url",
            reason: err.to_string(),
        })?;
        config.relay_url = Some(url);
    }

    if let Some(v) = lookup("APP__THEME_MODE") {
        if v.eq_ignore_ascii_case("dark") {
            config.theme_mode = ThemeMode::Dark;
        } else if v.eq_ignore_ascii_case("light") {
            config.theme_mode = ThemeMode::Light;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
