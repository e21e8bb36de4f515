// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Contract interfaces of the records ledger, the badge contract and the
//! development ACL.

use alloy::primitives::{keccak256, Address, B256};
use alloy::sol;

sol! {
    /// Confidential health records contract.
    interface IVitalChain {
        function logVitalRecord(
            bytes32 inputVolume,
            bytes inputProof,
            string ipfsCid,
            uint64 date,
            bytes32 locationHash,
            bytes32 hospitalHash,
            uint8 donationCategory,
            uint32 transparentVolume
        ) external;

        function myEncryptedCount() external view returns (bytes32);
        function myEncryptedLastVolume() external view returns (bytes32);

        event VitalRecordLogged(
            address indexed user,
            string ipfsCid,
            uint64 date,
            bytes32 locationHash,
            bytes32 hospitalHash,
            uint8 donationCategory,
            uint32 transparentVolume,
            bytes32 encVolume
        );
    }

    /// Achievement badge contract.
    interface IDonorBadge {
        function claimBadge(uint256 levelIndex) external;
        function thresholds() external view returns (uint32[]);
    }

    /// Access-control list of the confidential coprocessor.
    interface IAcl {
        function persistAllowed(bytes32 handle, address account) external view returns (bool);
    }
}

/// Salted transparent hash of a free-text field: `keccak256(text || account)`.
///
/// The account is mixed in as its checksummed hex string so equal texts from
/// different users do not collide.
pub fn salted_text_hash(text: &str, account: Address) -> B256 {
    let mut preimage = text.as_bytes().to_vec();
    preimage.extend_from_slice(account.to_checksum(None).as_bytes());
    keccak256(preimage)
}

/// Left-pad an address into an indexed event topic.
pub fn address_topic(account: Address) -> B256 {
    account.into_word()
}
