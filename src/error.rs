// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate error taxonomy.
//!
//! Every variant carries a human-readable cause. Nothing in this crate
//! retries on its own: authorization windows and single-use input proofs
//! make blind retries unsafe, so repetition is always the caller's decision.

use crate::fhe::types::CiphertextHandle;
use crate::ledger::LedgerError;

/// Errors surfaced by sessions, backends and the record orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The confidential-computation backend could not be acquired or initialized.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The wallet refused to sign the authorization message.
    #[error("Signature declined: {0}")]
    SignatureDeclined(String),

    /// Signature, scope, network or key material does not match the request.
    #[error("Authorization invalid: {0}")]
    AuthorizationInvalid(String),

    /// The authorization window has elapsed (or has not started yet).
    #[error("Authorization expired: window [{issued_at}, {expires_at}] does not contain {now}")]
    AuthorizationExpired {
        issued_at: u64,
        expires_at: u64,
        now: u64,
    },

    /// A requested handle is unknown to the backend.
    #[error("Ciphertext handle not found: {0}")]
    HandleNotFound(CiphertextHandle),

    /// The ledger reverted the transaction.
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// Another authorization for the same account and network is awaiting a signature.
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// The session is not in a state that allows the operation.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Caller-supplied input is out of range or malformed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ClientError {
    /// Whether the caller may repeat the full flow once the environment is fixed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::BackendUnavailable(_)
                | ClientError::SessionBusy(_)
                | ClientError::Ledger(LedgerError::Unreachable(_))
                | ClientError::Ledger(LedgerError::Timeout(_))
        )
    }

    /// Whether a fresh authorization must be obtained before decrypting again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            ClientError::AuthorizationInvalid(_) | ClientError::AuthorizationExpired { .. }
        )
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
