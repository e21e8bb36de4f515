// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed-data message behind every user decryption.
//!
//! The wallet signs an EIP-712 `UserDecryptRequestVerification` in the
//! `Decryption` domain of the decryption verifying contract. Whoever decrypts
//! (local simulator or remote relayer) rebuilds the same message from the
//! request parameters and checks the signature against it, so the message
//! must be a pure function of its inputs.

use alloy::primitives::{Address, Bytes, Signature, B256, U256};
use alloy::sol;
use alloy::sol_types::{eip712_domain, Eip712Domain, SolStruct};
use serde_json::json;

use super::types::HandleContractPair;
use crate::error::{ClientError, ClientResult};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct UserDecryptRequestVerification {
        bytes publicKey;
        address[] contractAddresses;
        uint256 startTimestamp;
        uint256 durationDays;
        bytes extraData;
    }
}

/// EIP-712 primary type name.
pub const PRIMARY_TYPE: &str = "UserDecryptRequestVerification";

/// Upper bound on an authorization window accepted by the decryption service.
pub const MAX_VALIDITY_DAYS: u64 = 365;

const SECONDS_PER_DAY: u64 = 86_400;

/// Constant `extraData` carried by every request.
pub fn default_extra_data() -> Bytes {
    Bytes::from_static(&[0x00])
}

/// Where authorizations are verified: gateway chain and decryption contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptionDomain {
    pub gateway_chain_id: u64,
    pub verifying_contract: Address,
}

impl DecryptionDomain {
    pub fn eip712(&self) -> Eip712Domain {
        eip712_domain! {
            name: "Decryption",
            version: "1",
            chain_id: self.gateway_chain_id,
            verifying_contract: self.verifying_contract,
        }
    }
}

/// Structured message a wallet signs to authorize user decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationMessage {
    pub domain: Eip712Domain,
    pub message: UserDecryptRequestVerification,
}

impl AuthorizationMessage {
    /// The EIP-712 digest the signature covers.
    pub fn signing_hash(&self) -> B256 {
        self.message.eip712_signing_hash(&self.domain)
    }

    /// `eth_signTypedData_v4` payload for wallets that sign JSON.
    pub fn typed_data_json(&self) -> serde_json::Value {
        let chain_id = self.domain.chain_id.map(|c| c.to_string());
        let verifying_contract = self.domain.verifying_contract.map(|a| a.to_checksum(None));
        json!({
            "types": {
                "EIP712Domain": [
                    { "name": "name", "type": "string" },
                    { "name": "version", "type": "string" },
                    { "name": "chainId", "type": "uint256" },
                    { "name": "verifyingContract", "type": "address" }
                ],
                PRIMARY_TYPE: [
                    { "name": "publicKey", "type": "bytes" },
                    { "name": "contractAddresses", "type": "address[]" },
                    { "name": "startTimestamp", "type": "uint256" },
                    { "name": "durationDays", "type": "uint256" },
                    { "name": "extraData", "type": "bytes" }
                ]
            },
            "primaryType": PRIMARY_TYPE,
            "domain": {
                "name": self.domain.name.as_deref(),
                "version": self.domain.version.as_deref(),
                "chainId": chain_id,
                "verifyingContract": verifying_contract,
            },
            "message": {
                "publicKey": self.message.publicKey.to_string(),
                "contractAddresses": self
                    .message
                    .contractAddresses
                    .iter()
                    .map(|a| a.to_checksum(None))
                    .collect::<Vec<_>>(),
                "startTimestamp": self.message.startTimestamp.to_string(),
                "durationDays": self.message.durationDays.to_string(),
                "extraData": self.message.extraData.to_string(),
            }
        })
    }
}

/// Build the canonical authorization message. Identical inputs always give
/// an identical message; contract order is preserved as given.
pub fn build_authorization_message(
    domain: &DecryptionDomain,
    public_key: &[u8],
    scoped_contracts: &[Address],
    issued_at: u64,
    validity_days: u64,
) -> AuthorizationMessage {
    AuthorizationMessage {
        domain: domain.eip712(),
        message: UserDecryptRequestVerification {
            publicKey: Bytes::copy_from_slice(public_key),
            contractAddresses: scoped_contracts.to_vec(),
            startTimestamp: U256::from(issued_at),
            durationDays: U256::from(validity_days),
            extraData: default_extra_data(),
        },
    }
}

/// Everything a backend needs to perform one user decryption.
#[derive(Debug, Clone)]
pub struct UserDecryptParams {
    pub private_key: Bytes,
    pub public_key: Bytes,
    pub signature: Signature,
    pub scoped_contracts: Vec<Address>,
    pub account: Address,
    pub issued_at: u64,
    pub validity_days: u64,
}

impl UserDecryptParams {
    pub fn expires_at(&self) -> u64 {
        window_end(self.issued_at, self.validity_days)
    }
}

pub fn window_end(issued_at: u64, validity_days: u64) -> u64 {
    issued_at.saturating_add(validity_days.saturating_mul(SECONDS_PER_DAY))
}

/// Reject windows the decryption service would never honor.
pub fn validate_validity_days(validity_days: u64) -> ClientResult<()> {
    if validity_days == 0 || validity_days > MAX_VALIDITY_DAYS {
        return Err(ClientError::InvalidInput(format!(
            "Validity must be between 1 and {MAX_VALIDITY_DAYS} days, got {validity_days}"
        )));
    }
    Ok(())
}

/// Check a user decryption request the way the decrypting party does.
///
/// Order: signature over the rebuilt message, contract scope, then window.
pub fn verify_user_decrypt(
    domain: &DecryptionDomain,
    requests: &[HandleContractPair],
    params: &UserDecryptParams,
    now: u64,
) -> ClientResult<()> {
    validate_validity_days(params.validity_days)?;

    let message = build_authorization_message(
        domain,
        &params.public_key,
        &params.scoped_contracts,
        params.issued_at,
        params.validity_days,
    );
    let signer = params
        .signature
        .recover_address_from_prehash(&message.signing_hash())
        .map_err(|e| ClientError::AuthorizationInvalid(format!("Unrecoverable signature: {e}")))?;
    if signer != params.account {
        return Err(ClientError::AuthorizationInvalid(format!(
            "Signature was produced by {signer}, not {}",
            params.account
        )));
    }

    if let Some(outside) = requests
        .iter()
        .find(|r| !params.scoped_contracts.contains(&r.contract_address))
    {
        return Err(ClientError::AuthorizationInvalid(format!(
            "Contract {} is not in the authorized scope",
            outside.contract_address
        )));
    }

    let expires_at = params.expires_at();
    if now < params.issued_at || now > expires_at {
        return Err(ClientError::AuthorizationExpired {
            issued_at: params.issued_at,
            expires_at,
            now,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    use crate::fhe::types::CiphertextHandle;

    fn domain() -> DecryptionDomain {
        DecryptionDomain {
            gateway_chain_id: 55815,
            verifying_contract: Address::repeat_byte(0x5f),
        }
    }

    fn signed_params(
        signer: &PrivateKeySigner,
        contracts: Vec<Address>,
        issued_at: u64,
        days: u64,
    ) -> UserDecryptParams {
        let public_key = Bytes::from_static(&[2u8; 33]);
        let message = build_authorization_message(&domain(), &public_key, &contracts, issued_at, days);
        let signature = signer.sign_hash_sync(&message.signing_hash()).unwrap();
        UserDecryptParams {
            private_key: Bytes::new(),
            public_key,
            signature,
            scoped_contracts: contracts,
            account: signer.address(),
            issued_at,
            validity_days: days,
        }
    }

    fn request(contract: Address) -> Vec<HandleContractPair> {
        vec![HandleContractPair::new(
            CiphertextHandle(B256::repeat_byte(9)),
            contract,
        )]
    }

    #[test]
    fn identical_inputs_give_identical_messages() {
        let contracts = [Address::repeat_byte(1), Address::repeat_byte(2)];
        let a = build_authorization_message(&domain(), &[2u8; 33], &contracts, 1_700_000_000, 365);
        let b = build_authorization_message(&domain(), &[2u8; 33], &contracts, 1_700_000_000, 365);
        assert_eq!(a, b);
        assert_eq!(a.signing_hash(), b.signing_hash());

        let later = build_authorization_message(&domain(), &[2u8; 33], &contracts, 1_700_000_001, 365);
        assert_ne!(a.signing_hash(), later.signing_hash());
    }

    #[test]
    fn domain_change_changes_the_digest() {
        let contracts = [Address::repeat_byte(1)];
        let a = build_authorization_message(&domain(), &[2u8; 33], &contracts, 10, 1);
        let other = DecryptionDomain {
            gateway_chain_id: 55815,
            verifying_contract: Address::repeat_byte(0xb6),
        };
        let b = build_authorization_message(&other, &[2u8; 33], &contracts, 10, 1);
        assert_ne!(a.signing_hash(), b.signing_hash());
    }

    #[test]
    fn valid_request_passes() {
        let signer = PrivateKeySigner::random();
        let contract = Address::repeat_byte(0xaa);
        let params = signed_params(&signer, vec![contract], 1_000, 1);
        verify_user_decrypt(&domain(), &request(contract), &params, 1_000 + 3_600).unwrap();
    }

    #[test]
    fn contract_outside_scope_is_invalid() {
        let signer = PrivateKeySigner::random();
        let params = signed_params(&signer, vec![Address::repeat_byte(0xaa)], 1_000, 1);
        let err = verify_user_decrypt(&domain(), &request(Address::repeat_byte(0xbb)), &params, 1_001)
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[test]
    fn widening_the_scope_after_signing_is_invalid() {
        let signer = PrivateKeySigner::random();
        let contract = Address::repeat_byte(0xaa);
        let mut params = signed_params(&signer, vec![contract], 1_000, 1);
        params.scoped_contracts.push(Address::repeat_byte(0xbb));
        let err = verify_user_decrypt(&domain(), &request(Address::repeat_byte(0xbb)), &params, 1_001)
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[test]
    fn elapsed_window_is_expired_even_with_valid_signature() {
        let signer = PrivateKeySigner::random();
        let contract = Address::repeat_byte(0xaa);
        let params = signed_params(&signer, vec![contract], 1_000, 1);
        let err = verify_user_decrypt(&domain(), &request(contract), &params, 1_000 + 86_401)
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::AuthorizationExpired { expires_at: 87_400, .. }
        ));
    }

    #[test]
    fn signature_from_another_account_is_invalid() {
        let signer = PrivateKeySigner::random();
        let contract = Address::repeat_byte(0xaa);
        let mut params = signed_params(&signer, vec![contract], 1_000, 1);
        params.account = Address::repeat_byte(0x42);
        let err = verify_user_decrypt(&domain(), &request(contract), &params, 1_001).unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[test]
    fn validity_days_bounds() {
        assert!(validate_validity_days(0).is_err());
        assert!(validate_validity_days(1).is_ok());
        assert!(validate_validity_days(365).is_ok());
        assert!(validate_validity_days(366).is_err());
    }

    #[test]
    fn typed_data_json_names_primary_type() {
        let message = build_authorization_message(&domain(), &[2u8; 33], &[Address::ZERO], 5, 7);
        let json = message.typed_data_json();
        assert_eq!(json["primaryType"], PRIMARY_TYPE);
        assert_eq!(json["domain"]["name"], "Decryption");
        assert_eq!(json["domain"]["chainId"], "55815");
        assert_eq!(json["message"]["durationDays"], "7");
    }
}
