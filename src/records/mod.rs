// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record Orchestrator.
//!
//! Top-level flows over a confidential session and the ledger gateway:
//!
//! - **Submit**: encrypt the indicator, attach transparent metadata, send
//!   `logVitalRecord` and wait for confirmation (or report it as pending)
//! - **Read + decrypt**: read the caller's handles, authorize once, decrypt
//!   in one batch, derive achievement progress from the counter
//! - **Claim**: send `claimBadge` for a level; the badge contract decides
//!   whether the claim is valid
//! - **History**: recent `VitalRecordLogged` events of the caller

pub mod achievements;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::error::{ClientError, ClientResult};
use crate::fhe::authorization::request_authorization;
use crate::fhe::session::{ConfidentialSession, SessionState};
use crate::fhe::types::{CiphertextHandle, HandleContractPair};
use crate::fhe::unix_now;
use crate::ledger::abi::{address_topic, salted_text_hash, IDonorBadge, IVitalChain};
use crate::ledger::{ConfirmationPolicy, EventFilter, LedgerError, LedgerGateway, TxReceipt, TxRequest};
use crate::wallet::WalletSigner;

pub use achievements::{
    achievement_progress, default_levels, unlocked_set, AchievementLevel, AchievementStatus,
};

/// Metadata reference stored with every record.
pub const DEFAULT_IPFS_CID: &str = "ipfs://health-record";

/// How far back `recent_records` looks.
pub const RECENT_BLOCK_WINDOW: u64 = 5_000;

/// Default number of entries returned by `recent_records`.
pub const DEFAULT_RECENT_LIMIT: usize = 5;

/// Gas limit for record submission.
pub const DEFAULT_GAS_LIMIT: u64 = 10_000_000;

/// Kind of checkup a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordCategory {
    Routine = 0,
    Specialist = 1,
}

impl TryFrom<u8> for RecordCategory {
    type Error = ClientError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RecordCategory::Routine),
            1 => Ok(RecordCategory::Specialist),
            other => Err(ClientError::InvalidInput(format!(
                "Unknown record category {other}"
            ))),
        }
    }
}

impl FromStr for RecordCategory {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "0" | "routine" => Ok(RecordCategory::Routine),
            "1" | "specialist" => Ok(RecordCategory::Specialist),
            other => Err(ClientError::InvalidInput(format!(
                "Unknown record category {other:?}"
            ))),
        }
    }
}

impl fmt::Display for RecordCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordCategory::Routine => write!(f, "routine"),
            RecordCategory::Specialist => write!(f, "specialist"),
        }
    }
}

/// One health record as entered by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VitalRecordInput {
    /// Confidential indicator, encrypted as a 32-bit value
    pub indicator: u32,
    pub category: RecordCategory,
    pub date: NaiveDate,
    pub checkup_type: String,
    pub facility: String,
    pub ipfs_cid: String,
}

impl VitalRecordInput {
    pub fn new(indicator: u32, category: RecordCategory, date: NaiveDate) -> Self {
        Self {
            indicator,
            category,
            date,
            checkup_type: String::new(),
            facility: String::new(),
            ipfs_cid: DEFAULT_IPFS_CID.to_string(),
        }
    }

    pub fn with_details(mut self, checkup_type: &str, facility: &str) -> Self {
        self.checkup_type = checkup_type.to_string();
        self.facility = facility.to_string();
        self
    }

    fn unix_date(&self) -> u64 {
        self.date
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp()
            .max(0) as u64
    }
}

/// Result of a state-changing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Confirmed(TxReceipt),
    /// Accepted by the node but not confirmed within the policy timeout
    Pending { tx_hash: B256 },
}

impl SubmitOutcome {
    pub fn tx_hash(&self) -> B256 {
        match self {
            SubmitOutcome::Confirmed(receipt) => receipt.tx_hash,
            SubmitOutcome::Pending { tx_hash } => *tx_hash,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmitOutcome::Confirmed(_))
    }
}

/// Decrypted dashboard figures of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyStats {
    pub count: u64,
    pub last_value: Option<u64>,
    pub count_handle: CiphertextHandle,
    pub last_handle: CiphertextHandle,
}

/// One entry of the caller's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentRecord {
    pub date: u64,
    pub ipfs_cid: String,
    pub category: u8,
    pub block_number: u64,
    pub tx_hash: Option<B256>,
    pub handle: CiphertextHandle,
}

/// Deployed contracts the orchestrator talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordContracts {
    pub records: Address,
    pub badge: Address,
}

pub struct RecordOrchestrator {
    ledger: Arc<dyn LedgerGateway>,
    contracts: RecordContracts,
    policy: ConfirmationPolicy,
    gas_limit: Option<u64>,
    validity_days: u64,
}

fn rejection(e: LedgerError) -> ClientError {
    match e {
        LedgerError::Reverted(reason) => ClientError::SubmissionRejected(reason),
        LedgerError::OutOfGas(reason) => ClientError::SubmissionRejected(format!("out of gas: {reason}")),
        other => ClientError::Ledger(other),
    }
}

impl RecordOrchestrator {
    /// Orchestrator over `ledger` with the default confirmation policy, the
    /// default submission gas limit and the longest authorization window.
    pub fn new(ledger: Arc<dyn LedgerGateway>, contracts: RecordContracts) -> Self {
        Self {
            ledger,
            contracts,
            policy: ConfirmationPolicy::default(),
            gas_limit: Some(DEFAULT_GAS_LIMIT),
            validity_days: crate::fhe::eip712::MAX_VALIDITY_DAYS,
        }
    }

    /// Replace the confirmation policy used for submissions and claims.
    ///
    /// # Arguments
    /// * `policy` - Confirmations required before success and the wait
    ///   after which a submission is reported as pending
    ///
    /// # Returns
    /// The orchestrator, for chaining.
    pub fn with_policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Window, in days, of the decryption authorizations this orchestrator requests.
    pub fn with_validity_days(mut self, validity_days: u64) -> Self {
        self.validity_days = validity_days;
        self
    }

    pub fn contracts(&self) -> &RecordContracts {
        &self.contracts
    }

    fn check_session(&self, session: &ConfidentialSession) -> ClientResult<()> {
        if session.context().ledger_address != self.contracts.records {
            return Err(ClientError::InvalidInput(format!(
                "Session is bound to {}, not the records contract {}",
                session.context().ledger_address,
                self.contracts.records
            )));
        }
        if session.context().network_id != self.ledger.chain_id() {
            return Err(ClientError::InvalidInput(format!(
                "Session network {} differs from ledger network {}",
                session.context().network_id,
                self.ledger.chain_id()
            )));
        }
        Ok(())
    }

    /// Encrypt and submit one record.
    pub async fn submit_record(
        &self,
        session: &mut ConfidentialSession,
        record: &VitalRecordInput,
    ) -> ClientResult<SubmitOutcome> {
        self.check_session(session)?;
        let account = session.context().account;

        let input = session.encrypt(record.indicator, self.contracts.records).await?;
        let call = IVitalChain::logVitalRecordCall {
            inputVolume: input.handle.0,
            inputProof: input.input_proof,
            ipfsCid: record.ipfs_cid.clone(),
            date: record.unix_date(),
            locationHash: salted_text_hash(&record.checkup_type, account),
            hospitalHash: salted_text_hash(&record.facility, account),
            donationCategory: record.category as u8,
            transparentVolume: 0,
        };

        tracing::info!(
            account = %account,
            category = %record.category,
            handle = %input.handle.short(),
            "Submitting vital record"
        );
        self.send(account, self.contracts.records, call.abi_encode().into(), self.gas_limit)
            .await
    }

    async fn send(
        &self,
        from: Address,
        to: Address,
        input: Bytes,
        gas_limit: Option<u64>,
    ) -> ClientResult<SubmitOutcome> {
        let tx_hash = self
            .ledger
            .submit(TxRequest {
                from,
                to,
                input,
                gas_limit,
            })
            .await
            .map_err(rejection)?;

        tracing::debug!(tx_hash = %tx_hash, confirmations = self.policy.confirmations, "Waiting for confirmation");
        match self.ledger.await_receipt(tx_hash, &self.policy).await {
            Ok(receipt) if receipt.success => Ok(SubmitOutcome::Confirmed(receipt)),
            Ok(receipt) => Err(ClientError::SubmissionRejected(format!(
                "{tx_hash} reverted in block {}",
                receipt.block_number
            ))),
            Err(LedgerError::Timeout(reason)) => {
                tracing::warn!(tx_hash = %tx_hash, reason = %reason, "Transaction still pending");
                Ok(SubmitOutcome::Pending { tx_hash })
            }
            Err(e) => Err(rejection(e)),
        }
    }

    async fn read_handle(&self, account: Address, input: Vec<u8>) -> ClientResult<CiphertextHandle> {
        Ok(self
            .ledger
            .read_handle(self.contracts.records, input.into(), account)
            .await?)
    }

    /// Reuse the session authorization while it is valid for the records
    /// contract, otherwise ask the wallet for a new one.
    async fn ensure_authorized(
        &self,
        session: &mut ConfidentialSession,
        signer: &dyn WalletSigner,
    ) -> ClientResult<()> {
        let reusable = matches!(
            session.state(),
            SessionState::Authorized | SessionState::Decrypted
        ) && session.authorization().is_some_and(|a| {
            a.is_valid_at(unix_now()) && a.covers(&self.contracts.records)
        });

        if !reusable {
            request_authorization(session, signer, &[self.contracts.records], self.validity_days)
                .await?;
        }
        Ok(())
    }

    /// Read and decrypt the running count and the last submitted value.
    pub async fn read_my_stats(
        &self,
        session: &mut ConfidentialSession,
        signer: &dyn WalletSigner,
    ) -> ClientResult<MyStats> {
        self.check_session(session)?;
        let account = session.context().account;

        let count_handle = self
            .read_handle(account, IVitalChain::myEncryptedCountCall {}.abi_encode())
            .await?;
        let last_handle = self
            .read_handle(account, IVitalChain::myEncryptedLastVolumeCall {}.abi_encode())
            .await?;

        let requests: Vec<HandleContractPair> = [count_handle, last_handle]
            .into_iter()
            .filter(|h| !h.is_uninitialized())
            .map(|h| HandleContractPair::new(h, self.contracts.records))
            .collect();

        let mut stats = MyStats {
            count: 0,
            last_value: None,
            count_handle,
            last_handle,
        };
        if requests.is_empty() {
            tracing::debug!(account = %account, "No records yet, nothing to decrypt");
            return Ok(stats);
        }

        self.ensure_authorized(session, signer).await?;
        let result = session.decrypt(&requests).await?;

        if !count_handle.is_uninitialized() {
            stats.count = result.require(&count_handle)?;
        }
        if !last_handle.is_uninitialized() {
            stats.last_value = result.get(&last_handle);
        }
        Ok(stats)
    }

    /// Decrypted record counter of the session account.
    pub async fn read_counter(
        &self,
        session: &mut ConfidentialSession,
        signer: &dyn WalletSigner,
    ) -> ClientResult<u64> {
        self.check_session(session)?;
        let account = session.context().account;
        let handle = self
            .read_handle(account, IVitalChain::myEncryptedCountCall {}.abi_encode())
            .await?;
        if handle.is_uninitialized() {
            return Ok(0);
        }

        self.ensure_authorized(session, signer).await?;
        let result = session
            .decrypt(&[HandleContractPair::new(handle, self.contracts.records)])
            .await?;
        result.require(&handle)
    }

    /// Achievement tiers, with thresholds from the badge contract when readable.
    pub async fn load_levels(&self) -> Vec<AchievementLevel> {
        let call = IDonorBadge::thresholdsCall {}.abi_encode();
        let output = self
            .ledger
            .call(self.contracts.badge, call.into(), Address::ZERO)
            .await;

        let thresholds = output.map_err(|e| e.to_string()).and_then(|data| {
            IDonorBadge::thresholdsCall::abi_decode_returns(&data).map_err(|e| e.to_string())
        });
        match thresholds {
            Ok(thresholds) => achievements::levels_with_thresholds(&thresholds),
            Err(e) => {
                tracing::warn!(badge = %self.contracts.badge, error = %e, "Using default achievement thresholds");
                default_levels()
            }
        }
    }

    /// Decrypt the counter and derive the unlock state of every level.
    pub async fn refresh_achievements(
        &self,
        session: &mut ConfidentialSession,
        signer: &dyn WalletSigner,
    ) -> ClientResult<Vec<AchievementStatus>> {
        let counter = self.read_counter(session, signer).await?;
        let levels = self.load_levels().await;
        let statuses = achievement_progress(counter, &levels);

        tracing::info!(
            counter,
            unlocked = statuses.iter().filter(|s| s.unlocked).count(),
            levels = statuses.len(),
            "Achievements refreshed"
        );
        Ok(statuses)
    }

    /// Claim the badge of `level_index` for `account`.
    ///
    /// Double claims and locked levels are rejected by the badge contract
    /// and surface as [`ClientError::SubmissionRejected`].
    pub async fn claim_badge(
        &self,
        account: Address,
        level_index: usize,
    ) -> ClientResult<SubmitOutcome> {
        let call = IDonorBadge::claimBadgeCall {
            levelIndex: U256::from(level_index),
        };
        tracing::info!(account = %account, level_index, "Claiming badge");
        self.send(account, self.contracts.badge, call.abi_encode().into(), None)
            .await
    }

    /// Newest-first history of `account`, at most `limit` entries.
    pub async fn recent_records(
        &self,
        account: Address,
        limit: usize,
    ) -> ClientResult<Vec<RecentRecord>> {
        let head = self.ledger.block_number().await?;
        let filter = EventFilter {
            address: self.contracts.records,
            event_signature: IVitalChain::VitalRecordLogged::SIGNATURE_HASH,
            topic1: Some(address_topic(account)),
            from_block: head.saturating_sub(RECENT_BLOCK_WINDOW),
            to_block: Some(head),
        };

        let mut events = self.ledger.query_events(&filter).await?;
        events.sort_by_key(|e| (e.block_number, e.log_index));

        events
            .iter()
            .rev()
            .take(limit)
            .map(|event| {
                let decoded = IVitalChain::VitalRecordLogged::decode_log_data(&event.log_data())
                    .map_err(|e| LedgerError::Decode(e.to_string()))?;
                Ok(RecentRecord {
                    date: decoded.date,
                    ipfs_cid: decoded.ipfsCid,
                    category: decoded.donationCategory,
                    block_number: event.block_number,
                    tx_hash: event.tx_hash,
                    handle: CiphertextHandle(decoded.encVolume),
                })
            })
            .collect()
    }
}
