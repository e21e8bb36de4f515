// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidential backend for public networks, served by a remote relayer.
//!
//! The relayer module (service version and the relayer's sealing key) is
//! loaded on first use and at most once per backend. Inputs are sealed to
//! the relayer key and exchanged for a handle and a coprocessor-signed proof;
//! user decryptions return one payload per known handle, sealed to the
//! session public key.
//!
//! ## Endpoints
//!
//! - `GET  /v1/keyurl` - service version and sealing key
//! - `POST /v1/input-proof` - encrypted input verification
//! - `POST /v1/user-decrypt` - authorized re-encryption of handles

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{address, Address, Bytes, B256};
use async_trait::async_trait;
use k256::PublicKey;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use super::backend::ConfidentialBackend;
use super::crypto::{decode_public_key, seal, SessionKeypair};
use super::eip712::{default_extra_data, verify_user_decrypt, DecryptionDomain, UserDecryptParams};
use super::types::{CiphertextHandle, DecryptionResult, EncryptedInput, HandleContractPair};
use super::unix_now;
use crate::error::{ClientError, ClientResult};
use crate::network::{NetworkKind, SEPOLIA_CHAIN_ID};

/// Relayer API generation this client speaks.
pub const SUPPORTED_API_VERSION: (u64, u64) = (0, 2);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Relayer errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("Relayer unreachable: {0}")]
    Unavailable(String),

    #[error("Relayer denied the request: {0}")]
    Denied(String),

    #[error("Relayer rejected the request: {0}")]
    Rejected(String),

    #[error("Unsupported relayer version {0}")]
    UnsupportedVersion(String),

    #[error("Invalid relayer response: {0}")]
    InvalidResponse(String),
}

impl From<RelayerError> for ClientError {
    fn from(e: RelayerError) -> Self {
        match e {
            RelayerError::Denied(msg) => ClientError::AuthorizationInvalid(msg),
            RelayerError::Rejected(msg) => ClientError::InvalidInput(msg),
            other => ClientError::BackendUnavailable(other.to_string()),
        }
    }
}

/// Relayer endpoint and coprocessor deployment of one public network.
///
/// `relayer_url` must point at a service that speaks this client's JSON
/// protocol: `GET v1/keyurl`, `POST v1/input-proof` and `POST v1/user-decrypt`,
/// each answering with a `{"response": ...}` envelope. There is no built-in
/// endpoint; operators supply one that fronts the coprocessor deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerConfig {
    pub relayer_url: String,
    pub chain_id: u64,
    pub gateway_chain_id: u64,
    pub acl_address: Address,
    pub kms_verifier_address: Address,
    pub input_verifier_address: Address,
    pub decryption_contract: Address,
    pub input_verification_contract: Address,
    pub request_timeout: Duration,
}

impl RelayerConfig {
    /// Public testnet deployment served by the relayer at `relayer_url`.
    ///
    /// # Arguments
    /// * `relayer_url` - Base URL of a relayer speaking the v1 protocol
    ///
    /// # Returns
    /// The Sepolia coprocessor addresses bound to that relayer.
    pub fn sepolia(relayer_url: impl Into<String>) -> Self {
        Self {
            relayer_url: relayer_url.into().trim_end_matches('/').to_string(),
            chain_id: SEPOLIA_CHAIN_ID,
            gateway_chain_id: 55815,
            acl_address: address!("687820221192C5B662b25367F70076A37bc79b6c"),
            kms_verifier_address: address!("1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC"),
            input_verifier_address: address!("bc91f3daD1A5F19F8390c400196e58073B6a0BC4"),
            decryption_contract: address!("b6E160B1ff80D67Bfe90A85eE06Ce0A2613607D1"),
            input_verification_contract: address!("7048C39f048125eDa9d678AEbaDfB22F7900a29F"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn decryption_domain(&self) -> DecryptionDomain {
        DecryptionDomain {
            gateway_chain_id: self.gateway_chain_id,
            verifying_contract: self.decryption_contract,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.relayer_url.trim_end_matches('/'), path)
    }
}

/// Load state of the relayer module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unloaded,
    Ready,
}

/// Loaded relayer module.
#[derive(Debug, Clone)]
pub struct RelayerModule {
    pub version: String,
    pub key_id: String,
    sealing_key: PublicKey,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyInfo {
    version: String,
    key_id: String,
    public_key: Bytes,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InputProofRequest {
    contract_chain_id: String,
    contract_address: Address,
    user_address: Address,
    ciphertext_with_input_verification: Bytes,
    extra_data: Bytes,
}

#[derive(Debug, Deserialize)]
struct InputProofResponse {
    handles: Vec<B256>,
    signatures: Vec<Bytes>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestValidity {
    start_timestamp: String,
    duration_days: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDecryptRequest<'a> {
    handle_contract_pairs: &'a [HandleContractPair],
    request_validity: RequestValidity,
    contracts_chain_id: String,
    contract_addresses: &'a [Address],
    user_address: Address,
    signature: String,
    public_key: String,
    extra_data: Bytes,
}

#[derive(Debug, Deserialize)]
struct SealedShare {
    handle: CiphertextHandle,
    payload: Bytes,
}

fn is_supported_version(version: &str) -> bool {
    let mut parts = version.trim_start_matches('v').split('.');
    let major = parts.next().and_then(|p| p.parse::<u64>().ok());
    let minor = parts.next().and_then(|p| p.parse::<u64>().ok());
    matches!((major, minor), (Some(major), Some(minor)) if (major, minor) == SUPPORTED_API_VERSION)
}

/// Proof layout accepted by the input verifier:
/// `num_handles (1) | num_signers (1) | handles (32 each) | signatures (65 each)`.
fn encode_input_proof(handles: &[B256], signatures: &[Bytes]) -> Result<Bytes, RelayerError> {
    let num_handles = u8::try_from(handles.len())
        .map_err(|_| RelayerError::InvalidResponse("too many handles".to_string()))?;
    let num_signers = u8::try_from(signatures.len())
        .map_err(|_| RelayerError::InvalidResponse("too many signatures".to_string()))?;

    let mut proof = vec![num_handles, num_signers];
    for handle in handles {
        proof.extend_from_slice(handle.as_slice());
    }
    for signature in signatures {
        proof.extend_from_slice(signature);
    }
    Ok(Bytes::from(proof))
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RelayerError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match status.as_u16() {
            401 | 403 => RelayerError::Denied(format!("HTTP {status}: {body}")),
            400..=499 => RelayerError::Rejected(format!("HTTP {status}: {body}")),
            _ => RelayerError::Unavailable(format!("HTTP {status}: {body}")),
        });
    }

    response
        .json::<Envelope<T>>()
        .await
        .map(|envelope| envelope.response)
        .map_err(|e| RelayerError::InvalidResponse(e.to_string()))
}

/// Backend that delegates encryption and decryption to a relayer.
pub struct RemoteBackend {
    config: RelayerConfig,
    http: reqwest::Client,
    module: OnceCell<RelayerModule>,
    load_attempts: AtomicUsize,
}

impl RemoteBackend {
    pub fn new(config: RelayerConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::BackendUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            module: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &RelayerConfig {
        &self.config
    }

    pub fn module_state(&self) -> ModuleState {
        if self.module.initialized() {
            ModuleState::Ready
        } else {
            ModuleState::Unloaded
        }
    }

    /// Number of times the module load was attempted.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::Relaxed)
    }

    async fn module(&self) -> ClientResult<&RelayerModule> {
        self.module
            .get_or_try_init(|| self.load_module())
            .await
            .map_err(ClientError::from)
    }

    async fn load_module(&self) -> Result<RelayerModule, RelayerError> {
        self.load_attempts.fetch_add(1, Ordering::Relaxed);
        let url = self.config.endpoint("v1/keyurl");
        tracing::info!(url = %url, chain_id = self.config.chain_id, "Loading relayer module");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RelayerError::Unavailable(e.to_string()))?;
        let info: KeyInfo = read_json(response).await?;

        if !is_supported_version(&info.version) {
            return Err(RelayerError::UnsupportedVersion(info.version));
        }
        let sealing_key = decode_public_key(&info.public_key)
            .map_err(|e| RelayerError::InvalidResponse(e.to_string()))?;

        tracing::info!(version = %info.version, key_id = %info.key_id, "Relayer module ready");
        Ok(RelayerModule {
            version: info.version,
            key_id: info.key_id,
            sealing_key,
        })
    }

    async fn post<B: Serialize + ?Sized, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RelayerError> {
        let response = self
            .http
            .post(self.config.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| RelayerError::Unavailable(e.to_string()))?;
        read_json(response).await
    }
}

#[async_trait]
impl ConfidentialBackend for RemoteBackend {
    fn kind(&self) -> NetworkKind {
        NetworkKind::Remote
    }

    fn network_id(&self) -> u64 {
        self.config.chain_id
    }

    fn decryption_domain(&self) -> DecryptionDomain {
        self.config.decryption_domain()
    }

    async fn ensure_ready(&self) -> ClientResult<()> {
        self.module().await.map(|_| ())
    }

    async fn generate_keypair(&self) -> ClientResult<SessionKeypair> {
        self.module().await?;
        Ok(SessionKeypair::generate())
    }

    async fn encrypt(
        &self,
        value: u32,
        contract: Address,
        account: Address,
    ) -> ClientResult<EncryptedInput> {
        let module = self.module().await?;

        let request = InputProofRequest {
            contract_chain_id: format!("{:#x}", self.config.chain_id),
            contract_address: contract,
            user_address: account,
            ciphertext_with_input_verification: seal(u64::from(value), &module.sealing_key)?,
            extra_data: default_extra_data(),
        };
        let response: InputProofResponse = self.post("v1/input-proof", &request).await?;

        let handle = response.handles.first().copied().ok_or_else(|| {
            ClientError::from(RelayerError::InvalidResponse("no handle returned".to_string()))
        })?;
        let input_proof = encode_input_proof(&response.handles, &response.signatures)?;

        tracing::debug!(handle = %CiphertextHandle(handle).short(), contract = %contract, "Encrypted input via relayer");

        Ok(EncryptedInput {
            handle: CiphertextHandle(handle),
            input_proof,
            contract,
            account,
        })
    }

    async fn user_decrypt(
        &self,
        requests: &[HandleContractPair],
        params: &UserDecryptParams,
    ) -> ClientResult<DecryptionResult> {
        verify_user_decrypt(&self.config.decryption_domain(), requests, params, unix_now())?;

        let keypair = SessionKeypair::from_private_key(&params.private_key)?;
        if !keypair.matches(&params.public_key) {
            return Err(ClientError::AuthorizationInvalid(
                "Session private key does not match the signed public key".to_string(),
            ));
        }
        self.module().await?;

        let mut result = DecryptionResult::new();
        if requests.is_empty() {
            return Ok(result);
        }

        let request = UserDecryptRequest {
            handle_contract_pairs: requests,
            request_validity: RequestValidity {
                start_timestamp: params.issued_at.to_string(),
                duration_days: params.validity_days.to_string(),
            },
            contracts_chain_id: self.config.chain_id.to_string(),
            contract_addresses: &params.scoped_contracts,
            user_address: params.account,
            signature: alloy::hex::encode(params.signature.as_bytes()),
            public_key: alloy::hex::encode(&params.public_key),
            extra_data: default_extra_data(),
        };
        let shares: Vec<SealedShare> = self.post("v1/user-decrypt", &request).await?;
        let shares: HashMap<CiphertextHandle, Bytes> =
            shares.into_iter().map(|s| (s.handle, s.payload)).collect();

        for request in requests {
            match shares.get(&request.handle) {
                Some(payload) => result.insert(request.handle, keypair.open(payload)?),
                None => result.mark_missing(request.handle),
            }
        }

        tracing::debug!(
            requested = requests.len(),
            decrypted = result.len(),
            missing = result.missing().len(),
            "Relayer user decryption finished"
        );
        Ok(result)
    }
}
