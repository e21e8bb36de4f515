// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidential computation: encrypted inputs, session keys, decryption
//! authorizations and the backends that serve them.
//!
//! Two backends implement [`backend::ConfidentialBackend`]:
//!
//! - [`local::LocalBackend`] for development chains (mock coprocessor)
//! - [`relayer::RemoteBackend`] for public networks (remote relayer)
//!
//! [`backend::BackendSelector`] picks one per network and memoizes it;
//! [`session::SessionManager`] hands out sessions bound to the active
//! network context.

pub mod authorization;
pub mod backend;
pub mod crypto;
pub mod eip712;
pub mod local;
pub mod relayer;
pub mod session;
pub mod types;

pub use authorization::{request_authorization, DecryptionAuthorization};
pub use backend::{BackendSelector, ConfidentialBackend};
pub use session::{ConfidentialSession, SessionManager, SessionState};
pub use types::{CiphertextHandle, DecryptionResult, EncryptedInput, HandleContractPair};

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
