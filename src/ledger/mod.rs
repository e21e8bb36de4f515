// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger Gateway: the thin port between the client and the EVM ledger.
//!
//! The ledger is treated as an opaque store reached through four calls:
//! submit a transaction, wait for its receipt, read a value through a view
//! call, and query historical event logs.
//!
//! Implementations:
//! - [`evm::EvmLedger`] - alloy JSON-RPC adapter (also serves development-node RPCs)
//! - [`memory::InMemoryLedger`] - in-process development ledger used by tests

pub mod abi;
pub mod evm;
pub mod memory;

use std::time::Duration;

use alloy::primitives::{Address, Bytes, LogData, B256};
use async_trait::async_trait;

use crate::fhe::types::CiphertextHandle;

/// Default number of confirmations before a submission counts as done.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

/// Default time to wait for a receipt before reporting the submission as pending.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors returned by ledger gateways.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error("Out of gas: {0}")]
    OutOfGas(String),

    #[error("Timed out waiting for confirmation: {0}")]
    Timeout(String),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

/// A state-changing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    /// ABI-encoded function selector and arguments
    pub input: Bytes,
    pub gas_limit: Option<u64>,
}

/// Receipt of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

/// How long and how deep to wait before declaring a submission confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub confirmations: u64,
    pub timeout: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            timeout: DEFAULT_RECEIPT_TIMEOUT,
        }
    }
}

/// Log filter: one contract, one event signature, optional first indexed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub address: Address,
    pub event_signature: B256,
    pub topic1: Option<B256>,
    pub from_block: u64,
    /// `None` means the latest block
    pub to_block: Option<u64>,
}

impl EventFilter {
    pub fn matches(&self, record: &EventRecord) -> bool {
        if record.address != self.address {
            return false;
        }
        if record.topics.first() != Some(&self.event_signature) {
            return false;
        }
        if let Some(topic1) = self.topic1 {
            if record.topics.get(1) != Some(&topic1) {
                return false;
            }
        }
        record.block_number >= self.from_block
            && self.to_block.map_or(true, |to| record.block_number <= to)
    }
}

/// One historical event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub address: Address,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<B256>,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl EventRecord {
    pub fn log_data(&self) -> LogData {
        LogData::new_unchecked(self.topics.clone(), self.data.clone())
    }
}

/// Port to the external ledger.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Chain id the gateway is connected to.
    fn chain_id(&self) -> u64;

    /// Send a transaction signed by the gateway's wallet.
    ///
    /// # Arguments
    /// * `tx` - Sender, target contract, calldata and optional gas limit
    ///
    /// # Returns
    /// * `Ok(B256)` - Transaction hash once the node accepted it
    /// * `Err(LedgerError::Reverted)` - If gas estimation shows the call reverts
    /// * `Err(LedgerError::Unreachable)` - If the node could not be contacted
    async fn submit(&self, tx: TxRequest) -> Result<B256, LedgerError>;

    /// Wait for inclusion according to `policy`.
    ///
    /// # Arguments
    /// * `tx_hash` - Hash returned by [`LedgerGateway::submit`]
    /// * `policy` - Confirmations required and how long to wait for them
    ///
    /// # Returns
    /// * `Ok(TxReceipt)` - Receipt of a successful transaction
    /// * `Err(LedgerError::Timeout)` - If the policy deadline passed first
    /// * `Err(LedgerError::Reverted)` - If the transaction was mined but failed
    async fn await_receipt(
        &self,
        tx_hash: B256,
        policy: &ConfirmationPolicy,
    ) -> Result<TxReceipt, LedgerError>;

    /// Execute a read-only call as `caller` and return the raw return data.
    async fn call(&self, contract: Address, input: Bytes, caller: Address)
        -> Result<Bytes, LedgerError>;

    /// Current head of the chain.
    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Ordered (oldest first) logs matching `filter`.
    ///
    /// # Arguments
    /// * `filter` - Emitting contract, event topics and inclusive block range
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, LedgerError>;

    /// Read a `bytes32` ciphertext handle through a view call.
    ///
    /// # Returns
    /// * `Ok(CiphertextHandle)` - The handle, zero if the contract never set it
    /// * `Err(LedgerError::Decode)` - If the call did not return exactly 32 bytes
    async fn read_handle(
        &self,
        contract: Address,
        input: Bytes,
        caller: Address,
    ) -> Result<CiphertextHandle, LedgerError> {
        let output = self.call(contract, input, caller).await?;
        if output.len() != 32 {
            return Err(LedgerError::Decode(format!(
                "Expected a 32-byte handle, got {} bytes",
                output.len()
            )));
        }
        Ok(CiphertextHandle(B256::from_slice(&output)))
    }
}
