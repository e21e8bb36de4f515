// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidential backend for local development chains.
//!
//! On a development chain the coprocessor is mocked: an encrypted input is a
//! handle plus a mock proof that carries the cleartext and a coprocessor
//! signature, and the node can be asked for the cleartext behind any handle.
//! Encryption therefore needs no network round-trip. Decryption still goes
//! through the full authorization check and the ACL, and results are
//! re-encrypted to the session key before being opened.
//!
//! ## Mock proof layout
//!
//! ```text
//! handle (32) | contract (20) | account (20) | chain_id (8, BE) | value (8, BE) | signature (65)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{address, b256, keccak256, Address, Bytes, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use k256::elliptic_curve::rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::backend::ConfidentialBackend;
use super::crypto::{decode_public_key, seal, SessionKeypair};
use super::eip712::{verify_user_decrypt, DecryptionDomain, UserDecryptParams};
use super::types::{CiphertextHandle, DecryptionResult, EncryptedInput, HandleContractPair};
use super::unix_now;
use crate::error::{ClientError, ClientResult};
use crate::ledger::LedgerError;
use crate::network::NetworkKind;

pub const DEFAULT_ACL_ADDRESS: Address = address!("50157CFfD6bBFA2DECe204a89ec419c23ef5755D");
pub const DEFAULT_INPUT_VERIFIER_ADDRESS: Address =
    address!("901F8942346f7AB3a01F6D7613119Bca447Bb030");
pub const DEFAULT_KMS_VERIFIER_ADDRESS: Address =
    address!("1364cBBf2cDF5032C47d8226a6f6FBD2AFCDacAC");

/// Gateway chain the development KMS signs for.
pub const DEV_GATEWAY_CHAIN_ID: u64 = 55815;
pub const DEV_DECRYPTION_CONTRACT: Address = address!("5ffdaAB0373E62E2ea2944776209aEf29E631A64");
pub const DEV_INPUT_VERIFICATION_CONTRACT: Address =
    address!("812b06e1CDCE800494b79fFE4f925A504a9A9810");

// Well-known development coprocessor key. Never holds funds.
const COPROCESSOR_DEV_KEY: B256 =
    b256!("7ec8ada6642fc4ccfb7729bc29c17cf8d21b61abd5642d1db992c0b8672ab901");

const PROOF_LEN: usize = 32 + 20 + 20 + 8 + 8 + 65;
const HANDLE_LABEL: &[u8] = b"vitalchain/dev/input";

/// Address of the development coprocessor key.
pub const COPROCESSOR_DEV_ADDRESS: Address = address!("c9990FEfE0c27D31D0C2aa36196b085c0c4d456c");

/// Signer of development input proofs.
pub fn coprocessor_signer() -> ClientResult<PrivateKeySigner> {
    PrivateKeySigner::from_bytes(&COPROCESSOR_DEV_KEY).map_err(|e| {
        ClientError::BackendUnavailable(format!("Invalid development coprocessor key: {e}"))
    })
}

/// Coprocessor contract addresses as published by `fhevm_relayer_metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FhevmMetadata {
    #[serde(rename = "ACLAddress")]
    pub acl_address: Address,
    #[serde(rename = "InputVerifierAddress")]
    pub input_verifier_address: Address,
    #[serde(rename = "KMSVerifierAddress")]
    pub kms_verifier_address: Address,
}

impl Default for FhevmMetadata {
    fn default() -> Self {
        Self {
            acl_address: DEFAULT_ACL_ADDRESS,
            input_verifier_address: DEFAULT_INPUT_VERIFIER_ADDRESS,
            kms_verifier_address: DEFAULT_KMS_VERIFIER_ADDRESS,
        }
    }
}

/// Development-node extensions a local backend relies on.
#[async_trait]
pub trait DevNode: Send + Sync {
    /// Published coprocessor addresses, if the node exposes them.
    async fn relayer_metadata(&self) -> Result<Option<FhevmMetadata>, LedgerError>;

    /// Cleartext behind `handle`; `None` if the handle is unknown.
    async fn plaintext(&self, handle: &CiphertextHandle) -> Result<Option<u64>, LedgerError>;

    /// Whether the ACL at `acl` lets `account` use `handle`.
    async fn is_allowed(
        &self,
        acl: Address,
        handle: &CiphertextHandle,
        account: Address,
    ) -> Result<bool, LedgerError>;
}

/// Input proof accepted by development input verifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockInputProof {
    pub handle: CiphertextHandle,
    pub contract: Address,
    pub account: Address,
    pub chain_id: u64,
    pub value: u64,
    pub signature: Signature,
}

impl MockInputProof {
    /// Build and sign a proof with the development coprocessor key.
    ///
    /// # Arguments
    /// * `handle` - Handle the proof vouches for
    /// * `contract` - Contract allowed to consume the input
    /// * `account` - Account submitting the input
    /// * `chain_id` - Development chain id
    /// * `value` - Cleartext carried by the mock ciphertext
    ///
    /// # Returns
    /// * `Ok(MockInputProof)` - Proof signed by the development coprocessor
    /// * `Err(ClientError::BackendUnavailable)` - If the coprocessor key cannot sign
    pub fn sign(
        handle: CiphertextHandle,
        contract: Address,
        account: Address,
        chain_id: u64,
        value: u64,
    ) -> ClientResult<Self> {
        let digest = proof_digest(&handle, contract, account, chain_id, value);
        let signature = coprocessor_signer()?
            .sign_hash_sync(&digest)
            .map_err(|e| ClientError::BackendUnavailable(format!("Coprocessor signing failed: {e}")))?;
        Ok(Self {
            handle,
            contract,
            account,
            chain_id,
            value,
            signature,
        })
    }

    pub fn digest(&self) -> B256 {
        proof_digest(&self.handle, self.contract, self.account, self.chain_id, self.value)
    }

    /// Address that produced the signature.
    pub fn signer(&self) -> Result<Address, String> {
        self.signature
            .recover_address_from_prehash(&self.digest())
            .map_err(|e| e.to_string())
    }

    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(PROOF_LEN);
        out.extend_from_slice(self.handle.as_bytes());
        out.extend_from_slice(self.contract.as_slice());
        out.extend_from_slice(self.account.as_slice());
        out.extend_from_slice(&self.chain_id.to_be_bytes());
        out.extend_from_slice(&self.value.to_be_bytes());
        out.extend_from_slice(&self.signature.as_bytes());
        Bytes::from(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() != PROOF_LEN {
            return Err(format!("proof has {} bytes, expected {PROOF_LEN}", bytes.len()));
        }
        let handle = CiphertextHandle(B256::from_slice(&bytes[0..32]));
        let contract = Address::from_slice(&bytes[32..52]);
        let account = Address::from_slice(&bytes[52..72]);
        let chain_id = u64::from_be_bytes(bytes[72..80].try_into().map_err(|_| "chain id")?);
        let value = u64::from_be_bytes(bytes[80..88].try_into().map_err(|_| "value")?);
        let signature = Signature::from_raw(&bytes[88..]).map_err(|e| e.to_string())?;
        Ok(Self {
            handle,
            contract,
            account,
            chain_id,
            value,
            signature,
        })
    }
}

fn proof_digest(
    handle: &CiphertextHandle,
    contract: Address,
    account: Address,
    chain_id: u64,
    value: u64,
) -> B256 {
    let mut preimage = Vec::with_capacity(88);
    preimage.extend_from_slice(handle.as_bytes());
    preimage.extend_from_slice(contract.as_slice());
    preimage.extend_from_slice(account.as_slice());
    preimage.extend_from_slice(&chain_id.to_be_bytes());
    preimage.extend_from_slice(&value.to_be_bytes());
    keccak256(preimage)
}

fn random_salt() -> B256 {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    B256::from(salt)
}

/// Resolved coprocessor parameters of a local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalParameters {
    pub chain_id: u64,
    pub metadata: FhevmMetadata,
    /// Whether `metadata` came from the node rather than the defaults
    pub published: bool,
    pub decryption: DecryptionDomain,
    pub input_verification_contract: Address,
}

/// Backend for development chains.
pub struct LocalBackend {
    params: LocalParameters,
    node: Arc<dyn DevNode>,
    salt: B256,
    inputs: AtomicU64,
}

impl LocalBackend {
    /// Resolve coprocessor addresses from the node, falling back to the
    /// well-known development deployment.
    pub async fn connect(chain_id: u64, node: Arc<dyn DevNode>) -> Self {
        let (metadata, published) = match node.relayer_metadata().await {
            Ok(Some(metadata)) => (metadata, true),
            Ok(None) => {
                tracing::info!(chain_id, "Node publishes no relayer metadata, using defaults");
                (FhevmMetadata::default(), false)
            }
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "Relayer metadata lookup failed, using defaults");
                (FhevmMetadata::default(), false)
            }
        };

        tracing::info!(
            chain_id,
            acl = %metadata.acl_address,
            input_verifier = %metadata.input_verifier_address,
            kms_verifier = %metadata.kms_verifier_address,
            "Local confidential backend ready"
        );

        Self {
            params: LocalParameters {
                chain_id,
                metadata,
                published,
                decryption: DecryptionDomain {
                    gateway_chain_id: DEV_GATEWAY_CHAIN_ID,
                    verifying_contract: DEV_DECRYPTION_CONTRACT,
                },
                input_verification_contract: DEV_INPUT_VERIFICATION_CONTRACT,
            },
            node,
            salt: random_salt(),
            inputs: AtomicU64::new(0),
        }
    }

    /// Coprocessor deployment this backend resolved at connect time.
    ///
    /// # Returns
    /// The chain id, the decryption domain and the coprocessor addresses,
    /// with `published` set when the node served them.
    pub fn parameters(&self) -> &LocalParameters {
        &self.params
    }

    fn next_handle(&self, value: u32, contract: Address, account: Address) -> CiphertextHandle {
        let index = self.inputs.fetch_add(1, Ordering::Relaxed);
        let mut preimage = HANDLE_LABEL.to_vec();
        preimage.extend_from_slice(self.salt.as_slice());
        preimage.extend_from_slice(&index.to_be_bytes());
        preimage.extend_from_slice(&value.to_be_bytes());
        preimage.extend_from_slice(contract.as_slice());
        preimage.extend_from_slice(account.as_slice());
        preimage.extend_from_slice(&self.params.chain_id.to_be_bytes());
        CiphertextHandle(keccak256(preimage))
    }
}

#[async_trait]
impl ConfidentialBackend for LocalBackend {
    fn kind(&self) -> NetworkKind {
        NetworkKind::Local
    }

    fn network_id(&self) -> u64 {
        self.params.chain_id
    }

    fn decryption_domain(&self) -> DecryptionDomain {
        self.params.decryption
    }

    async fn ensure_ready(&self) -> ClientResult<()> {
        Ok(())
    }

    async fn generate_keypair(&self) -> ClientResult<SessionKeypair> {
        Ok(SessionKeypair::generate())
    }

    async fn encrypt(
        &self,
        value: u32,
        contract: Address,
        account: Address,
    ) -> ClientResult<EncryptedInput> {
        let handle = self.next_handle(value, contract, account);
        let proof = MockInputProof::sign(
            handle,
            contract,
            account,
            self.params.chain_id,
            u64::from(value),
        )?;

        tracing::debug!(handle = %handle.short(), contract = %contract, "Encrypted input");

        Ok(EncryptedInput {
            handle,
            input_proof: proof.encode(),
            contract,
            account,
        })
    }

    async fn user_decrypt(
        &self,
        requests: &[HandleContractPair],
        params: &UserDecryptParams,
    ) -> ClientResult<DecryptionResult> {
        verify_user_decrypt(&self.params.decryption, requests, params, unix_now())?;

        let keypair = SessionKeypair::from_private_key(&params.private_key)?;
        if !keypair.matches(&params.public_key) {
            return Err(ClientError::AuthorizationInvalid(
                "Session private key does not match the signed public key".to_string(),
            ));
        }
        let recipient = decode_public_key(&params.public_key)?;
        let acl = self.params.metadata.acl_address;

        let mut result = DecryptionResult::new();
        for request in requests {
            let Some(value) = self.node.plaintext(&request.handle).await? else {
                tracing::debug!(handle = %request.handle.short(), "Unknown handle");
                result.mark_missing(request.handle);
                continue;
            };

            for grantee in [params.account, request.contract_address] {
                if !self.node.is_allowed(acl, &request.handle, grantee).await? {
                    return Err(ClientError::AuthorizationInvalid(format!(
                        "{grantee} is not allowed to decrypt {}",
                        request.handle.short()
                    )));
                }
            }

            let sealed = seal(value, &recipient)?;
            result.insert(request.handle, keypair.open(&sealed)?);
        }

        tracing::debug!(
            requested = requests.len(),
            decrypted = result.len(),
            missing = result.missing().len(),
            "User decryption finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    use crate::fhe::eip712::build_authorization_message;
    use crate::ledger::abi::IVitalChain;
    use crate::ledger::memory::{DevLedgerConfig, InMemoryLedger};
    use crate::ledger::{LedgerGateway, TxRequest};

    const RECORDS: Address = Address::repeat_byte(0xaa);
    const BADGE: Address = Address::repeat_byte(0xbb);

    async fn setup() -> (Arc<InMemoryLedger>, LocalBackend, PrivateKeySigner) {
        let ledger = Arc::new(InMemoryLedger::new(DevLedgerConfig::new(RECORDS, BADGE)));
        let backend = LocalBackend::connect(31337, ledger.clone()).await;
        (ledger, backend, PrivateKeySigner::random())
    }

    async fn submit(ledger: &InMemoryLedger, input: &EncryptedInput) {
        let call = IVitalChain::logVitalRecordCall {
            inputVolume: input.handle.0,
            inputProof: input.input_proof.clone(),
            ipfsCid: String::new(),
            date: 0,
            locationHash: B256::ZERO,
            hospitalHash: B256::ZERO,
            donationCategory: 0,
            transparentVolume: 0,
        };
        ledger
            .submit(TxRequest {
                from: input.account,
                to: RECORDS,
                input: call.abi_encode().into(),
                gas_limit: None,
            })
            .await
            .unwrap();
    }

    fn authorize(
        backend: &LocalBackend,
        signer: &PrivateKeySigner,
        keypair: &SessionKeypair,
        contracts: Vec<Address>,
    ) -> UserDecryptParams {
        let issued_at = unix_now();
        let message = build_authorization_message(
            &backend.decryption_domain(),
            &keypair.public_key(),
            &contracts,
            issued_at,
            1,
        );
        UserDecryptParams {
            private_key: keypair.private_key(),
            public_key: keypair.public_key(),
            signature: signer.sign_hash_sync(&message.signing_hash()).unwrap(),
            scoped_contracts: contracts,
            account: signer.address(),
            issued_at,
            validity_days: 1,
        }
    }

    #[test]
    fn mock_proof_round_trips_and_recovers_coprocessor() {
        let proof = MockInputProof::sign(
            CiphertextHandle(B256::repeat_byte(3)),
            RECORDS,
            Address::repeat_byte(1),
            31337,
            120,
        )
        .unwrap();
        let decoded = MockInputProof::decode(&proof.encode()).unwrap();
        assert_eq!(decoded, proof);
        assert_eq!(decoded.signer().unwrap(), COPROCESSOR_DEV_ADDRESS);
        assert!(MockInputProof::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn coprocessor_address_matches_its_key() {
        assert_eq!(coprocessor_signer().unwrap().address(), COPROCESSOR_DEV_ADDRESS);
    }

    #[tokio::test]
    async fn missing_metadata_falls_back_to_defaults() {
        let (_ledger, backend, _) = setup().await;
        assert!(!backend.parameters().published);
        assert_eq!(backend.parameters().metadata, FhevmMetadata::default());
    }

    #[tokio::test]
    async fn published_metadata_is_used() {
        let mut config = DevLedgerConfig::new(RECORDS, BADGE);
        let published = FhevmMetadata {
            acl_address: Address::repeat_byte(0x11),
            input_verifier_address: Address::repeat_byte(0x22),
            kms_verifier_address: Address::repeat_byte(0x33),
        };
        config.metadata = Some(published);
        let backend = LocalBackend::connect(31337, Arc::new(InMemoryLedger::new(config))).await;
        assert!(backend.parameters().published);
        assert_eq!(backend.parameters().metadata, published);
    }

    #[tokio::test]
    async fn encrypt_submit_decrypt_round_trip() {
        let (ledger, backend, signer) = setup().await;
        let input = backend.encrypt(120, RECORDS, signer.address()).await.unwrap();
        submit(&ledger, &input).await;

        let keypair = backend.generate_keypair().await.unwrap();
        let params = authorize(&backend, &signer, &keypair, vec![RECORDS]);
        let result = backend
            .user_decrypt(&[HandleContractPair::new(input.handle, RECORDS)], &params)
            .await
            .unwrap();
        assert_eq!(result.get(&input.handle), Some(120));
    }

    #[tokio::test]
    async fn unknown_handle_is_reported_missing_alongside_known_one() {
        let (ledger, backend, signer) = setup().await;
        let input = backend.encrypt(7, RECORDS, signer.address()).await.unwrap();
        submit(&ledger, &input).await;
        let unknown = CiphertextHandle(B256::repeat_byte(0x99));

        let keypair = backend.generate_keypair().await.unwrap();
        let params = authorize(&backend, &signer, &keypair, vec![RECORDS]);
        let result = backend
            .user_decrypt(
                &[
                    HandleContractPair::new(input.handle, RECORDS),
                    HandleContractPair::new(unknown, RECORDS),
                ],
                &params,
            )
            .await
            .unwrap();

        assert_eq!(result.get(&input.handle), Some(7));
        assert_eq!(result.missing(), &[unknown]);
    }

    #[tokio::test]
    async fn acl_denial_is_authorization_invalid() {
        let (ledger, backend, signer) = setup().await;
        let input = backend.encrypt(7, RECORDS, signer.address()).await.unwrap();
        submit(&ledger, &input).await;
        ledger.revoke_all(&input.handle).await;

        let keypair = backend.generate_keypair().await.unwrap();
        let params = authorize(&backend, &signer, &keypair, vec![RECORDS]);
        let err = backend
            .user_decrypt(&[HandleContractPair::new(input.handle, RECORDS)], &params)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[tokio::test]
    async fn mismatched_private_key_is_rejected() {
        let (_ledger, backend, signer) = setup().await;
        let keypair = backend.generate_keypair().await.unwrap();
        let mut params = authorize(&backend, &signer, &keypair, vec![RECORDS]);
        params.private_key = SessionKeypair::generate().private_key();

        let err = backend.user_decrypt(&[], &params).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[tokio::test]
    async fn handles_are_unique_per_input() {
        let (_ledger, backend, signer) = setup().await;
        let a = backend.encrypt(1, RECORDS, signer.address()).await.unwrap();
        let b = backend.encrypt(1, RECORDS, signer.address()).await.unwrap();
        assert_ne!(a.handle, b.handle);
    }
}
