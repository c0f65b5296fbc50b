//! Chain module - pending-nonce queries against the chain-registry proxy
//!
//! The sentry never talks to a node directly; every call is routed through
//! the registry proxy under the job's chain UUID.

pub mod provider;

pub use provider::RpcChainClient;

use crate::error::SentryResult;

use async_trait::async_trait;
use ethers::types::Address;

/// Blockchain RPC collaborator used for nonce calibration
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Pending nonce of an account on the public chain
    async fn pending_nonce_at(&self, chain_uuid: &str, account: Address) -> SentryResult<u64>;

    /// Pending nonce inside a named privacy group (EEA-group transactions)
    async fn priv_nonce(
        &self,
        chain_uuid: &str,
        account: Address,
        privacy_group_id: &str,
    ) -> SentryResult<u64>;

    /// Pending nonce for an ad-hoc participant list (EEA-list transactions)
    async fn priv_eea_nonce(
        &self,
        chain_uuid: &str,
        account: Address,
        private_from: &str,
        private_for: &[String],
    ) -> SentryResult<u64>;
}
