//! JSON-RPC chain client backed by ethers providers
//!
//! One provider per chain UUID, created lazily and cached. Besu privacy
//! endpoints (priv_getTransactionCount, priv_getEeaTransactionCount) are
//! invoked as raw requests since ethers has no typed bindings for them.

use super::ChainClient;
use crate::error::{SentryError, SentryResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, BlockNumber, U64};
use std::time::Duration;
use tracing::debug;

pub struct RpcChainClient {
    registry_url: String,
    providers: DashMap<String, Provider<Http>>,
}

impl RpcChainClient {
    pub fn new(registry_url: &str) -> Self {
        Self {
            registry_url: registry_url.trim_end_matches('/').to_string(),
            providers: DashMap::new(),
        }
    }

    fn provider(&self, chain_uuid: &str) -> SentryResult<Provider<Http>> {
        if let Some(provider) = self.providers.get(chain_uuid) {
            return Ok(provider.clone());
        }

        let url = format!("{}/{}", self.registry_url, chain_uuid);
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| SentryError::Rpc {
                chain_uuid: chain_uuid.to_string(),
                message: e.to_string(),
            })?
            .interval(Duration::from_millis(100));

        debug!(chain_uuid, url, "created chain provider");
        self.providers
            .insert(chain_uuid.to_string(), provider.clone());
        Ok(provider)
    }

    fn rpc_error(chain_uuid: &str, err: impl ToString) -> SentryError {
        SentryError::Rpc {
            chain_uuid: chain_uuid.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn pending_nonce_at(&self, chain_uuid: &str, account: Address) -> SentryResult<u64> {
        let provider = self.provider(chain_uuid)?;
        let nonce = provider
            .get_transaction_count(account, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| Self::rpc_error(chain_uuid, e))?;

        Ok(nonce.as_u64())
    }

    async fn priv_nonce(
        &self,
        chain_uuid: &str,
        account: Address,
        privacy_group_id: &str,
    ) -> SentryResult<u64> {
        let provider = self.provider(chain_uuid)?;
        let nonce: U64 = provider
            .request(
                "priv_getTransactionCount",
                [
                    serde_json::json!(account),
                    serde_json::json!(privacy_group_id),
                ],
            )
            .await
            .map_err(|e| Self::rpc_error(chain_uuid, e))?;

        Ok(nonce.as_u64())
    }

    async fn priv_eea_nonce(
        &self,
        chain_uuid: &str,
        account: Address,
        private_from: &str,
        private_for: &[String],
    ) -> SentryResult<u64> {
        let provider = self.provider(chain_uuid)?;
        let nonce: U64 = provider
            .request(
                "priv_getEeaTransactionCount",
                [
                    serde_json::json!(account),
                    serde_json::json!(private_from),
                    serde_json::json!(private_for),
                ],
            )
            .await
            .map_err(|e| Self::rpc_error(chain_uuid, e))?;

        Ok(nonce.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_is_cached_per_chain() {
        let client = RpcChainClient::new("http://registry:8082/");
        client.provider("chain-a").unwrap();
        client.provider("chain-a").unwrap();
        client.provider("chain-b").unwrap();
        assert_eq!(client.providers.len(), 2);
    }
}
