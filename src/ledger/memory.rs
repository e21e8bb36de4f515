// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process development ledger.
//!
//! Executes the records and badge contracts against in-memory state the way
//! a local development chain with a mock coprocessor does: encrypted inputs
//! arrive as mock proofs carrying their cleartext, the coprocessor signature
//! is checked, and every ciphertext handle keeps its cleartext and ACL next
//! to it. One block is mined per transaction.

use std::collections::{HashMap, HashSet};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::abi::{IDonorBadge, IVitalChain};
use super::{ConfirmationPolicy, EventFilter, EventRecord, LedgerError, LedgerGateway, TxReceipt, TxRequest};
use crate::fhe::local::{DevNode, FhevmMetadata, MockInputProof, COPROCESSOR_DEV_ADDRESS};
use crate::fhe::types::CiphertextHandle;
use crate::network::LOCAL_CHAIN_ID;

/// Gas charged for `logVitalRecord`.
pub const RECORD_GAS: u64 = 350_000;

/// Gas charged for `claimBadge`.
pub const CLAIM_GAS: u64 = 90_000;

/// Deployment parameters of the development ledger.
#[derive(Debug, Clone)]
pub struct DevLedgerConfig {
    pub chain_id: u64,
    pub records_contract: Address,
    pub badge_contract: Address,
    pub thresholds: Vec<u32>,
    /// Served by `fhevm_relayer_metadata`; `None` behaves like a node without it
    pub metadata: Option<FhevmMetadata>,
    /// Address whose signature the input verifier accepts
    pub coprocessor: Address,
}

impl DevLedgerConfig {
    pub fn new(records_contract: Address, badge_contract: Address) -> Self {
        Self {
            chain_id: LOCAL_CHAIN_ID,
            records_contract,
            badge_contract,
            thresholds: vec![1, 10, 20],
            metadata: None,
            coprocessor: COPROCESSOR_DEV_ADDRESS,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    head: u64,
    nonce: u64,
    unreachable: bool,
    receipts: HashMap<B256, TxReceipt>,
    logs: Vec<EventRecord>,
    counts: HashMap<Address, CiphertextHandle>,
    last_values: HashMap<Address, CiphertextHandle>,
    cleartexts: HashMap<CiphertextHandle, u64>,
    acl: HashMap<CiphertextHandle, HashSet<Address>>,
    consumed_inputs: HashSet<CiphertextHandle>,
    claimed: HashSet<(Address, usize)>,
}

impl LedgerState {
    fn allow(&mut self, handle: CiphertextHandle, account: Address) {
        self.acl.entry(handle).or_default().insert(account);
    }

    fn next_nonce(&mut self) -> u64 {
        self.nonce += 1;
        self.nonce
    }
}

/// Development ledger held entirely in memory.
pub struct InMemoryLedger {
    config: DevLedgerConfig,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(config: DevLedgerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn config(&self) -> &DevLedgerConfig {
        &self.config
    }

    /// Advance the chain by `blocks` empty blocks.
    pub async fn mine(&self, blocks: u64) {
        self.state.lock().await.head += blocks;
    }

    /// Simulate the node going away (or coming back).
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Grant `account` access to `handle`, as `FHE.allow` would.
    pub async fn allow(&self, handle: CiphertextHandle, account: Address) {
        self.state.lock().await.allow(handle, account);
    }

    /// Revoke every grant on `handle`.
    pub async fn revoke_all(&self, handle: &CiphertextHandle) {
        self.state.lock().await.acl.remove(handle);
    }

    async fn guard(&self) -> Result<tokio::sync::MutexGuard<'_, LedgerState>, LedgerError> {
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(LedgerError::Unreachable(
                "development ledger is offline".to_string(),
            ));
        }
        Ok(state)
    }

    fn execute_record(
        &self,
        state: &mut LedgerState,
        from: Address,
        call: IVitalChain::logVitalRecordCall,
    ) -> Result<EventRecord, LedgerError> {
        let proof = MockInputProof::decode(&call.inputProof)
            .map_err(|e| LedgerError::Reverted(format!("InvalidInputProof: {e}")))?;

        let input = CiphertextHandle(call.inputVolume);
        if proof.handle != input {
            return Err(LedgerError::Reverted(
                "InvalidInputProof: handle does not match proof".to_string(),
            ));
        }
        if proof.contract != self.config.records_contract || proof.account != from {
            return Err(LedgerError::Reverted(
                "InvalidInputProof: proof is bound to another contract or account".to_string(),
            ));
        }
        if proof.chain_id != self.config.chain_id {
            return Err(LedgerError::Reverted(
                "InvalidInputProof: proof is bound to another chain".to_string(),
            ));
        }
        let signer = proof
            .signer()
            .map_err(|e| LedgerError::Reverted(format!("InvalidInputProof: {e}")))?;
        if signer != self.config.coprocessor {
            return Err(LedgerError::Reverted(
                "InvalidInputProof: not signed by the coprocessor".to_string(),
            ));
        }
        if !state.consumed_inputs.insert(input) {
            return Err(LedgerError::Reverted(
                "InvalidInputProof: input already used".to_string(),
            ));
        }

        let records = self.config.records_contract;
        state.cleartexts.insert(input, proof.value);
        state.allow(input, records);
        state.allow(input, from);
        state.last_values.insert(from, input);

        let previous = state
            .counts
            .get(&from)
            .and_then(|h| state.cleartexts.get(h).copied())
            .unwrap_or(0);
        let nonce = state.next_nonce();
        let mut preimage = b"vitalchain/dev/count".to_vec();
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let count = CiphertextHandle(keccak256(preimage));
        state.cleartexts.insert(count, previous + 1);
        state.allow(count, records);
        state.allow(count, from);
        state.counts.insert(from, count);

        let event = IVitalChain::VitalRecordLogged {
            user: from,
            ipfsCid: call.ipfsCid,
            date: call.date,
            locationHash: call.locationHash,
            hospitalHash: call.hospitalHash,
            donationCategory: call.donationCategory,
            transparentVolume: call.transparentVolume,
            encVolume: input.0,
        };
        let log = event.encode_log_data();
        Ok(EventRecord {
            address: records,
            block_number: 0,
            log_index: 0,
            tx_hash: None,
            topics: log.topics().to_vec(),
            data: log.data,
        })
    }

    fn execute_claim(
        &self,
        state: &mut LedgerState,
        from: Address,
        call: IDonorBadge::claimBadgeCall,
    ) -> Result<(), LedgerError> {
        let index = usize::try_from(call.levelIndex)
            .ok()
            .filter(|i| *i < self.config.thresholds.len())
            .ok_or_else(|| LedgerError::Reverted(format!("invalid level {}", call.levelIndex)))?;

        if state.claimed.contains(&(from, index)) {
            return Err(LedgerError::Reverted("badge already claimed".to_string()));
        }

        let count = state
            .counts
            .get(&from)
            .and_then(|h| state.cleartexts.get(h).copied())
            .unwrap_or(0);
        let threshold = u64::from(self.config.thresholds[index]);
        if count < threshold {
            return Err(LedgerError::Reverted(format!(
                "threshold not reached: {count} < {threshold}"
            )));
        }

        state.claimed.insert((from, index));
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn submit(&self, tx: TxRequest) -> Result<B256, LedgerError> {
        let mut state = self.guard().await?;

        let (gas, event) = if tx.to == self.config.records_contract {
            let call = IVitalChain::logVitalRecordCall::abi_decode(&tx.input)
                .map_err(|e| LedgerError::Reverted(format!("bad calldata: {e}")))?;
            check_gas(tx.gas_limit, RECORD_GAS)?;
            (RECORD_GAS, Some(self.execute_record(&mut state, tx.from, call)?))
        } else if tx.to == self.config.badge_contract {
            let call = IDonorBadge::claimBadgeCall::abi_decode(&tx.input)
                .map_err(|e| LedgerError::Reverted(format!("bad calldata: {e}")))?;
            check_gas(tx.gas_limit, CLAIM_GAS)?;
            self.execute_claim(&mut state, tx.from, call)?;
            (CLAIM_GAS, None)
        } else {
            return Err(LedgerError::Reverted(format!("no contract at {}", tx.to)));
        };

        let nonce = state.next_nonce();
        let mut preimage = tx.from.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        preimage.extend_from_slice(&tx.input);
        let tx_hash = keccak256(preimage);

        state.head += 1;
        let block_number = state.head;
        if let Some(mut event) = event {
            event.block_number = block_number;
            event.tx_hash = Some(tx_hash);
            event.log_index = state.logs.len() as u64;
            state.logs.push(event);
        }
        state.receipts.insert(
            tx_hash,
            TxReceipt {
                tx_hash,
                block_number,
                gas_used: gas,
                success: true,
            },
        );

        tracing::debug!(tx_hash = %tx_hash, block = block_number, "Development ledger mined transaction");
        Ok(tx_hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: B256,
        policy: &ConfirmationPolicy,
    ) -> Result<TxReceipt, LedgerError> {
        let state = self.guard().await?;
        let receipt = state
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| LedgerError::Rpc(format!("unknown transaction {tx_hash}")))?;

        let depth = state.head.saturating_sub(receipt.block_number) + 1;
        if depth < policy.confirmations {
            return Err(LedgerError::Timeout(format!(
                "{tx_hash} has {depth} of {} confirmations",
                policy.confirmations
            )));
        }
        Ok(receipt)
    }

    async fn call(
        &self,
        contract: Address,
        input: Bytes,
        caller: Address,
    ) -> Result<Bytes, LedgerError> {
        let state = self.guard().await?;
        let selector: [u8; 4] = input
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| LedgerError::Reverted("missing selector".to_string()))?;

        let output = if contract == self.config.records_contract {
            match selector {
                IVitalChain::myEncryptedCountCall::SELECTOR => {
                    let handle = state.counts.get(&caller).copied().unwrap_or(CiphertextHandle::ZERO);
                    IVitalChain::myEncryptedCountCall::abi_encode_returns(&handle.0)
                }
                IVitalChain::myEncryptedLastVolumeCall::SELECTOR => {
                    let handle = state.last_values.get(&caller).copied().unwrap_or(CiphertextHandle::ZERO);
                    IVitalChain::myEncryptedLastVolumeCall::abi_encode_returns(&handle.0)
                }
                _ => return Err(LedgerError::Reverted("unknown view".to_string())),
            }
        } else if contract == self.config.badge_contract
            && selector == IDonorBadge::thresholdsCall::SELECTOR
        {
            IDonorBadge::thresholdsCall::abi_encode_returns(&self.config.thresholds)
        } else {
            return Err(LedgerError::Reverted(format!("no view at {contract}")));
        };

        Ok(output.into())
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        Ok(self.guard().await?.head)
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, LedgerError> {
        let state = self.guard().await?;
        Ok(state
            .logs
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DevNode for InMemoryLedger {
    async fn relayer_metadata(&self) -> Result<Option<FhevmMetadata>, LedgerError> {
        self.guard().await?;
        Ok(self.config.metadata.clone())
    }

    async fn plaintext(&self, handle: &CiphertextHandle) -> Result<Option<u64>, LedgerError> {
        Ok(self.guard().await?.cleartexts.get(handle).copied())
    }

    async fn is_allowed(
        &self,
        _acl: Address,
        handle: &CiphertextHandle,
        account: Address,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .guard()
            .await?
            .acl
            .get(handle)
            .is_some_and(|grants| grants.contains(&account)))
    }
}

fn check_gas(limit: Option<u64>, required: u64) -> Result<(), LedgerError> {
    match limit {
        Some(limit) if limit < required => Err(LedgerError::OutOfGas(format!(
            "gas limit {limit} below required {required}"
        ))),
        _ => Ok(()),
    }
}

/// Encode a `claimBadge(levelIndex)` call.
pub fn claim_calldata(level_index: usize) -> Bytes {
    IDonorBadge::claimBadgeCall {
        levelIndex: U256::from(level_index),
    }
    .abi_encode()
    .into()
}
