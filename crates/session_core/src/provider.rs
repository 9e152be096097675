use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use parking_lot::Mutex;
use relay_integration::{ProviderFactory, ProviderOptions, SignClient, UniversalProvider};
use shared::error::RelayError;
use tracing::{info, warn};

use crate::error::{AdapterError, Result};

type InitFuture =
    Shared<BoxFuture<'static, std::result::Result<Arc<dyn UniversalProvider>, RelayError>>>;

#[derive(Clone)]
pub struct ProviderHandle {
    pub provider: Arc<dyn UniversalProvider>,
    pub client: Arc<dyn SignClient>,
}

enum InitState {
    Empty,
    Pending { attempt: u64, future: InitFuture },
    Ready(ProviderHandle),
}

pub struct ProviderInitializer {
    factory: Arc<dyn ProviderFactory>,
    options: ProviderOptions,
    state: Mutex<InitState>,
    attempts: AtomicU64,
}

impl ProviderInitializer {
    pub fn new(factory: Arc<dyn ProviderFactory>, options: ProviderOptions) -> Self {
        Self {
            factory,
            options,
            state: Mutex::new(InitState::Empty),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns the provider, initializing it on first use. Concurrent callers
    /// await the same attempt; a failed attempt is forgotten so the next call
    /// starts over.
    pub async fn get_provider(&self) -> Result<ProviderHandle> {
        if self.options.project_id.trim().is_empty() {
            return Err(AdapterError::Configuration(
                "project id is required to initialize the WalletConnect provider".into(),
            ));
        }

        let (attempt, future) = {
            let mut state = self.state.lock();
            match &*state {
                InitState::Ready(handle) => return Ok(handle.clone()),
                InitState::Pending { attempt, future } => (*attempt, future.clone()),
                InitState::Empty => {
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let factory = Arc::clone(&self.factory);
                    let options = self.options.clone();
                    let future = async move { factory.init(options).await }.boxed().shared();
                    *state = InitState::Pending {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;

        let mut state = self.state.lock();
        // Another caller of the same attempt may already have settled it.
        if let InitState::Ready(handle) = &*state {
            return Ok(handle.clone());
        }
        let owns_state =
            matches!(&*state, InitState::Pending { attempt: current, .. } if *current == attempt);

        match outcome {
            Ok(provider) => {
                let handle = ProviderHandle {
                    client: provider.client(),
                    provider,
                };
                if owns_state {
                    info!(attempt, "provider: initialized");
                    *state = InitState::Ready(handle.clone());
                }
                Ok(handle)
            }
            Err(err) => {
                if owns_state {
                    warn!(attempt, error = %err, "provider: initialization failed");
                    *state = InitState::Empty;
                }
                Err(AdapterError::Relay(err))
            }
        }
    }

    pub fn current(&self) -> Option<ProviderHandle> {
        match &*self.state.lock() {
            InitState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_integration::memory::{MemoryProviderFactory, MemoryWallet};
    use shared::domain::Metadata;
    use std::time::Duration;

    use super::*;

    fn options(project_id: &str) -> ProviderOptions {
        ProviderOptions {
            project_id: project_id.into(),
            relay_url: None,
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn missing_project_id_is_a_configuration_error() {
        let factory = MemoryProviderFactory::new(MemoryWallet::new());
        let initializer = ProviderInitializer::new(factory.clone(), options("  "));

        let err = initializer.get_provider().await.err().expect("config error");
        assert!(matches!(err, AdapterError::Configuration(_)));
        assert_eq!(factory.init_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_attempt() {
        let factory = MemoryProviderFactory::new(MemoryWallet::new());
        factory.set_init_delay(Some(Duration::from_millis(30)));
        let initializer = Arc::new(ProviderInitializer::new(factory.clone(), options("p")));

        let first = {
            let initializer = Arc::clone(&initializer);
            tokio::spawn(async move { initializer.get_provider().await.map(|_| ()) })
        };
        let second = {
            let initializer = Arc::clone(&initializer);
            tokio::spawn(async move { initializer.get_provider().await.map(|_| ()) })
        };

        first.await.expect("join").expect("first");
        second.await.expect("join").expect("second");
        initializer.get_provider().await.expect("memoized");

        assert_eq!(factory.init_calls(), 1);
        assert!(initializer.current().is_some());
    }

    #[tokio::test]
    async fn failed_attempt_is_not_replayed() {
        let factory = MemoryProviderFactory::new(MemoryWallet::new());
        factory.fail_next(1);
        let initializer = ProviderInitializer::new(factory.clone(), options("p"));

        let err = initializer.get_provider().await.err().expect("first fails");
        assert!(matches!(err, AdapterError::Relay(_)));
        assert!(initializer.current().is_none());

        initializer.get_provider().await.expect("fresh attempt succeeds");
        assert_eq!(factory.init_calls(), 2);
    }
}
