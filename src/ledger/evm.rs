// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON-RPC ledger adapter built on alloy.
//!
//! The same provider answers the development-node extensions a local
//! confidential backend needs (`fhevm_relayer_metadata`, cleartext lookup,
//! ACL reads), so one `EvmLedger` serves both ports on a local chain.

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Bytes, B256, U256},
    providers::{
        DynProvider, PendingTransactionBuilder, PendingTransactionError, Provider,
        ProviderBuilder, WatchTxError,
    },
    rpc::types::{Filter, TransactionRequest},
    sol_types::SolCall,
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::abi::IAcl;
use super::{ConfirmationPolicy, EventFilter, EventRecord, LedgerError, LedgerGateway, TxReceipt, TxRequest};
use crate::fhe::local::{DevNode, FhevmMetadata};
use crate::fhe::types::CiphertextHandle;

/// Development-node RPC returning the coprocessor contract addresses.
pub const RELAYER_METADATA_METHOD: &str = "fhevm_relayer_metadata";

/// Development-node RPC returning the cleartext behind a handle.
pub const CLEARTEXT_METHOD: &str = "fhevm_getClearText";

/// Ledger reached over HTTP JSON-RPC.
#[derive(Clone)]
pub struct EvmLedger {
    provider: DynProvider,
    chain_id: u64,
}

impl EvmLedger {
    /// Connect a read-only provider.
    pub fn connect(rpc_url: &str, chain_id: u64) -> Result<Self, LedgerError> {
        let url = parse_url(rpc_url)?;
        let provider = DynProvider::new(ProviderBuilder::new().connect_http(url));
        Ok(Self { provider, chain_id })
    }

    /// Connect a provider that signs and sends transactions with `wallet`.
    pub fn connect_with_wallet(
        rpc_url: &str,
        chain_id: u64,
        wallet: EthereumWallet,
    ) -> Result<Self, LedgerError> {
        let url = parse_url(rpc_url)?;
        let provider = DynProvider::new(ProviderBuilder::new().wallet(wallet).connect_http(url));
        Ok(Self { provider, chain_id })
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }
}

fn parse_url(rpc_url: &str) -> Result<url::Url, LedgerError> {
    rpc_url
        .parse()
        .map_err(|e: url::ParseError| LedgerError::InvalidRpcUrl(format!("{rpc_url}: {e}")))
}

/// Map an RPC failure onto the gateway error taxonomy.
fn classify_rpc_error(e: RpcError<TransportErrorKind>) -> LedgerError {
    if e.is_transport_error() {
        return LedgerError::Unreachable(e.to_string());
    }
    classify_message(e.to_string())
}

fn classify_message(message: String) -> LedgerError {
    let lower = message.to_lowercase();
    if lower.contains("out of gas") || lower.contains("gas required exceeds") {
        LedgerError::OutOfGas(message)
    } else if lower.contains("revert") {
        LedgerError::Reverted(message)
    } else if lower.contains("connection refused") || lower.contains("error sending request") {
        LedgerError::Unreachable(message)
    } else {
        LedgerError::Rpc(message)
    }
}

#[async_trait]
impl LedgerGateway for EvmLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn submit(&self, tx: TxRequest) -> Result<B256, LedgerError> {
        let mut request = TransactionRequest::default()
            .from(tx.from)
            .to(tx.to)
            .input(tx.input.into());

        if let Some(limit) = tx.gas_limit {
            request = request.gas_limit(limit);
        }

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(classify_rpc_error)?;

        let tx_hash = *pending.tx_hash();
        tracing::info!(tx_hash = %tx_hash, to = %tx.to, "Transaction submitted");
        Ok(tx_hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: B256,
        policy: &ConfirmationPolicy,
    ) -> Result<TxReceipt, LedgerError> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx_hash)
            .with_required_confirmations(policy.confirmations)
            .with_timeout(Some(policy.timeout))
            .get_receipt()
            .await
            .map_err(|e| match e {
                PendingTransactionError::TxWatcher(WatchTxError::Timeout) => LedgerError::Timeout(
                    format!("{tx_hash} not confirmed within {:?}", policy.timeout),
                ),
                PendingTransactionError::TransportError(e) => classify_rpc_error(e),
                other => LedgerError::Rpc(other.to_string()),
            })?;

        let result = TxReceipt {
            tx_hash,
            block_number: receipt.block_number.unwrap_or(0),
            gas_used: receipt.gas_used,
            success: receipt.status(),
        };

        tracing::info!(
            tx_hash = %tx_hash,
            block = result.block_number,
            gas_used = result.gas_used,
            success = result.success,
            "Transaction confirmed"
        );
        Ok(result)
    }

    async fn call(
        &self,
        contract: Address,
        input: Bytes,
        caller: Address,
    ) -> Result<Bytes, LedgerError> {
        let request = TransactionRequest::default()
            .from(caller)
            .to(contract)
            .input(input.into());

        self.provider.call(request).await.map_err(classify_rpc_error)
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map_err(classify_rpc_error)
    }

    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, LedgerError> {
        let to_block = match filter.to_block {
            Some(to) => to,
            None => self.block_number().await?,
        };

        let mut query = Filter::new()
            .address(filter.address)
            .event_signature(filter.event_signature)
            .from_block(filter.from_block)
            .to_block(to_block);
        if let Some(topic1) = filter.topic1 {
            query = query.topic1(topic1);
        }

        let logs = self
            .provider
            .get_logs(&query)
            .await
            .map_err(classify_rpc_error)?;

        tracing::debug!(
            address = %filter.address,
            from_block = filter.from_block,
            to_block,
            count = logs.len(),
            "Fetched event logs"
        );

        Ok(logs
            .into_iter()
            .map(|log| EventRecord {
                address: log.address(),
                block_number: log.block_number.unwrap_or(0),
                log_index: log.log_index.unwrap_or(0),
                tx_hash: log.transaction_hash,
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl DevNode for EvmLedger {
    async fn relayer_metadata(&self) -> Result<Option<FhevmMetadata>, LedgerError> {
        let value: Value = self
            .provider
            .raw_request(RELAYER_METADATA_METHOD.into(), json!([]))
            .await
            .map_err(classify_rpc_error)?;

        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| LedgerError::Decode(format!("Malformed relayer metadata: {e}")))
    }

    async fn plaintext(&self, handle: &CiphertextHandle) -> Result<Option<u64>, LedgerError> {
        let value: Value = self
            .provider
            .raw_request(CLEARTEXT_METHOD.into(), json!([handle.to_string()]))
            .await
            .map_err(classify_rpc_error)?;

        parse_cleartext(&value)
    }

    async fn is_allowed(
        &self,
        acl: Address,
        handle: &CiphertextHandle,
        account: Address,
    ) -> Result<bool, LedgerError> {
        let input = IAcl::persistAllowedCall {
            handle: handle.0,
            account,
        }
        .abi_encode();
        let output = self.call(acl, input.into(), account).await?;
        IAcl::persistAllowedCall::abi_decode_returns(&output)
            .map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

/// Cleartexts come back as `null` (unknown handle), a quantity string or a number.
fn parse_cleartext(value: &Value) -> Result<Option<u64>, LedgerError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| LedgerError::Decode(format!("Cleartext {n} is not a u64"))),
        Value::String(s) => {
            let parsed: U256 = s
                .parse()
                .map_err(|e| LedgerError::Decode(format!("Cleartext {s:?}: {e}")))?;
            u64::try_from(parsed)
                .map(Some)
                .map_err(|_| LedgerError::Decode(format!("Cleartext {s} overflows u64")))
        }
        other => Err(LedgerError::Decode(format!("Unexpected cleartext {other}"))),
    }
}
