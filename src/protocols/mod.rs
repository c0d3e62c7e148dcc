pub mod endpoints;
pub mod error;
pub mod execution;
pub mod folks;
pub mod pact;
pub mod tinyman;
pub mod traits;

pub use error::ExecutionError;
pub use execution::{ExecutionContext, Submission};
pub use traits::{ContractCheck, DefiProtocol, PoolSnapshot};

use crate::algorand::AlgodApi;
use crate::config::TraderConfig;
use crate::types::Protocol;
use anyhow::Result;
use endpoints::PoolFetcher;
use folks::FolksClient;
use pact::PactClient;
use std::sync::Arc;
use std::time::Duration;
use tinyman::TinymanClient;

/// Handles every protocol client shares.
#[derive(Clone)]
pub struct ProtocolDeps {
    pub algod: Arc<dyn AlgodApi>,
    pub fetcher: PoolFetcher,
    /// Absent when no wallet is loaded; read-only commands still work.
    pub exec: Option<ExecutionContext>,
    pub cache_ttl: Duration,
}

impl ProtocolDeps {
    pub fn new(config: &TraderConfig, algod: Arc<dyn AlgodApi>, exec: Option<ExecutionContext>) -> Result<Self> {
        Ok(Self {
            algod,
            fetcher: PoolFetcher::new(&config.http)?,
            exec,
            cache_ttl: Duration::from_secs(config.http.pool_cache_ttl_secs),
        })
    }

    pub fn exec(&self) -> Result<&ExecutionContext, ExecutionError> {
        self.exec.as_ref().ok_or(ExecutionError::NoWallet)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(fake: Arc<crate::algorand::testing::FakeAlgod>, dry_run: bool) -> Self {
        let exec = execution::tests::context(fake.clone(), dry_run);
        Self {
            algod: fake,
            fetcher: PoolFetcher::new(&crate::config::schema::HttpConfig::default())
                .expect("http client"),
            exec: Some(exec),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// The three protocol clients, built from config.
#[derive(Clone)]
pub struct ProtocolSet {
    pub tinyman: Arc<TinymanClient>,
    pub pact: Arc<PactClient>,
    pub folks: Arc<FolksClient>,
    enabled: Vec<Protocol>,
}

impl ProtocolSet {
    pub fn new(config: &TraderConfig, deps: ProtocolDeps) -> Self {
        let mut enabled = Vec::new();
        if config.tinyman.enabled {
            enabled.push(Protocol::Tinyman);
        }
        if config.pact.enabled {
            enabled.push(Protocol::PactFinance);
        }
        if config.folks.enabled {
            enabled.push(Protocol::FolksFinance);
        }

        Self {
            tinyman: Arc::new(TinymanClient::new(config.tinyman.clone(), deps.clone())),
            pact: Arc::new(PactClient::new(config.pact.clone(), deps.clone())),
            folks: Arc::new(FolksClient::new(config.folks.clone(), deps)),
            enabled,
        }
    }

    /// The client for a protocol, if it is enabled.
    pub fn get(&self, protocol: Protocol) -> Option<Arc<dyn DefiProtocol>> {
        if !self.enabled.contains(&protocol) {
            return None;
        }
        let client: Arc<dyn DefiProtocol> = match protocol {
            Protocol::Tinyman => self.tinyman.clone(),
            Protocol::PactFinance => self.pact.clone(),
            Protocol::FolksFinance => self.folks.clone(),
        };
        Some(client)
    }

    pub fn enabled(&self) -> Vec<Arc<dyn DefiProtocol>> {
        self.enabled.iter().filter_map(|p| self.get(*p)).collect()
    }
}
