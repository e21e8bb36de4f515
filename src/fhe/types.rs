// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Values exchanged between sessions, backends and the ledger.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Opaque 32-byte identifier of an encrypted value known to the ledger.
///
/// The client never decodes a handle; it only trades it for a cleartext
/// through an authorized decryption request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiphertextHandle(pub B256);

impl CiphertextHandle {
    pub const ZERO: CiphertextHandle = CiphertextHandle(B256::ZERO);

    /// The ledger returns the zero handle for slots that were never written.
    pub fn is_uninitialized(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }

    /// Abbreviated form for display (`0x1234abcd…9f00aa11`).
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..10], &full[full.len() - 8..])
    }
}

impl From<B256> for CiphertextHandle {
    fn from(value: B256) -> Self {
        Self(value)
    }
}

impl FromStr for CiphertextHandle {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| ClientError::InvalidInput(format!("Invalid ciphertext handle: {e}")))
    }
}

impl fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for CiphertextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CiphertextHandle({self})")
    }
}

/// A ciphertext handle together with the proof the ledger needs to accept it.
///
/// Both parts are produced together and must be submitted together. The
/// proof binds the handle to one contract and one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    pub handle: CiphertextHandle,
    pub input_proof: Bytes,
    /// Contract the proof is bound to
    pub contract: Address,
    /// Account the proof is bound to
    pub account: Address,
}

/// One entry of a decryption request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleContractPair {
    pub handle: CiphertextHandle,
    pub contract_address: Address,
}

impl HandleContractPair {
    pub fn new(handle: CiphertextHandle, contract_address: Address) -> Self {
        Self {
            handle,
            contract_address,
        }
    }
}

/// Cleartexts for the handles of one decryption request.
///
/// Only requested handles that the backend knows have an entry. Handles the
/// backend does not know are listed in `missing`; there is no zero default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptionResult {
    values: HashMap<CiphertextHandle, u64>,
    missing: Vec<CiphertextHandle>,
}

impl DecryptionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: CiphertextHandle, value: u64) {
        self.values.insert(handle, value);
    }

    pub fn mark_missing(&mut self, handle: CiphertextHandle) {
        if !self.missing.contains(&handle) {
            self.missing.push(handle);
        }
    }

    pub fn get(&self, handle: &CiphertextHandle) -> Option<u64> {
        self.values.get(handle).copied()
    }

    /// Cleartext for `handle`, or `HandleNotFound` if the backend had no entry.
    pub fn require(&self, handle: &CiphertextHandle) -> ClientResult<u64> {
        self.get(handle)
            .ok_or(ClientError::HandleNotFound(*handle))
    }

    pub fn missing(&self) -> &[CiphertextHandle] {
        &self.missing
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, handle: &CiphertextHandle) -> bool {
        self.values.contains_key(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_handle_is_uninitialized() {
        assert!(CiphertextHandle::ZERO.is_uninitialized());
        assert!(!CiphertextHandle(B256::repeat_byte(1)).is_uninitialized());
    }

    #[test]
    fn handle_parses_and_displays_as_hex() {
        let text = "0x0101010101010101010101010101010101010101010101010101010101010101";
        let handle: CiphertextHandle = text.parse().unwrap();
        assert_eq!(handle.to_string(), text);
        assert_eq!(handle.short(), "0x01010101…01010101");
        assert!("0x1234".parse::<CiphertextHandle>().is_err());
    }

    #[test]
    fn missing_handles_have_no_entry() {
        let known = CiphertextHandle(B256::repeat_byte(1));
        let unknown = CiphertextHandle(B256::repeat_byte(2));

        let mut result = DecryptionResult::new();
        result.insert(known, 7);
        result.mark_missing(unknown);
        result.mark_missing(unknown);

        assert_eq!(result.get(&known), Some(7));
        assert_eq!(result.get(&unknown), None);
        assert_eq!(result.missing(), &[unknown]);
        assert!(matches!(
            result.require(&unknown),
            Err(ClientError::HandleNotFound(h)) if h == unknown
        ));
    }
}
