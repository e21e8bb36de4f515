// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidential backend interface and per-network selection.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::crypto::SessionKeypair;
use super::eip712::{build_authorization_message, AuthorizationMessage, DecryptionDomain, UserDecryptParams};
use super::local::{DevNode, LocalBackend};
use super::relayer::{RelayerConfig, RemoteBackend};
use super::types::{DecryptionResult, EncryptedInput, HandleContractPair};
use crate::error::{ClientError, ClientResult};
use crate::network::{NetworkContext, NetworkKind};

/// Capability set shared by the local and remote confidential backends.
#[async_trait]
pub trait ConfidentialBackend: Send + Sync {
    fn kind(&self) -> NetworkKind;

    fn network_id(&self) -> u64;

    /// EIP-712 domain authorizations for this backend are signed in.
    fn decryption_domain(&self) -> DecryptionDomain;

    /// Finish any lazy initialization; idempotent.
    async fn ensure_ready(&self) -> ClientResult<()>;

    async fn generate_keypair(&self) -> ClientResult<SessionKeypair>;

    /// Encrypt `value` for use by `contract` on behalf of `account`.
    async fn encrypt(
        &self,
        value: u32,
        contract: Address,
        account: Address,
    ) -> ClientResult<EncryptedInput>;

    /// Decrypt the requested handles for the authorization in `params`.
    ///
    /// Unknown handles are reported in [`DecryptionResult::missing`]; the
    /// call only fails as a whole when the authorization itself is rejected.
    async fn user_decrypt(
        &self,
        requests: &[HandleContractPair],
        params: &UserDecryptParams,
    ) -> ClientResult<DecryptionResult>;

    fn build_authorization_message(
        &self,
        public_key: &[u8],
        scoped_contracts: &[Address],
        issued_at: u64,
        validity_days: u64,
    ) -> AuthorizationMessage {
        build_authorization_message(
            &self.decryption_domain(),
            public_key,
            scoped_contracts,
            issued_at,
            validity_days,
        )
    }
}

/// Picks and memoizes one backend per network.
///
/// Local networks are served through the configured development node;
/// remote networks need a relayer configuration for their chain id. A
/// backend is initialized at most once per network, concurrent callers
/// share the same instance, and failed initializations are not cached.
pub struct BackendSelector {
    dev_node: Option<Arc<dyn DevNode>>,
    relayers: HashMap<u64, RelayerConfig>,
    backends: Mutex<HashMap<u64, Arc<dyn ConfidentialBackend>>>,
}

impl Default for BackendSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendSelector {
    /// Selector with no relayer and no development node.
    pub fn new() -> Self {
        Self {
            dev_node: None,
            relayers: HashMap::new(),
            backends: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dev_node(mut self, node: Arc<dyn DevNode>) -> Self {
        self.dev_node = Some(node);
        self
    }

    pub fn with_relayer(mut self, config: RelayerConfig) -> Self {
        self.relayers.insert(config.chain_id, config);
        self
    }

    /// Backend for `context.network_id`, creating it on first use.
    pub async fn select(
        &self,
        context: &NetworkContext,
    ) -> ClientResult<Arc<dyn ConfidentialBackend>> {
        let network_id = context.network_id;

        // Held across initialization so concurrent first calls share one init.
        let mut backends = self.backends.lock().await;
        if let Some(backend) = backends.get(&network_id) {
            return Ok(backend.clone());
        }

        let backend: Arc<dyn ConfidentialBackend> = match context.kind() {
            NetworkKind::Local => {
                let node = self.dev_node.clone().ok_or_else(|| {
                    ClientError::BackendUnavailable(format!(
                        "No development node configured for network {network_id}"
                    ))
                })?;
                Arc::new(LocalBackend::connect(network_id, node).await)
            }
            NetworkKind::Remote => {
                let config = self.relayers.get(&network_id).cloned().ok_or_else(|| {
                    ClientError::BackendUnavailable(format!(
                        "No relayer configured for network {network_id}"
                    ))
                })?;
                Arc::new(RemoteBackend::new(config)?)
            }
        };

        if let Err(e) = backend.ensure_ready().await {
            tracing::warn!(network_id, error = %e, "Backend initialization failed");
            return Err(match e {
                ClientError::BackendUnavailable(_) => e,
                other => ClientError::BackendUnavailable(other.to_string()),
            });
        }

        tracing::info!(network_id, kind = ?backend.kind(), "Confidential backend selected");
        backends.insert(network_id, backend.clone());
        Ok(backend)
    }

    /// Whether a backend for `network_id` is already initialized.
    pub async fn is_initialized(&self, network_id: u64) -> bool {
        self.backends.lock().await.contains_key(&network_id)
    }
}
