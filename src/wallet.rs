// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet signer port and the local key implementation.
//!
//! The signer is the user's wallet: it knows one account address and signs
//! typed data on request. Interactive wallets may refuse, which surfaces as
//! [`SignerError::Declined`]. The local implementation signs with a
//! secp256k1 key loaded from hex or from a PKCS#8/SEC1 PEM file.

use std::path::Path;

use alloy::{
    network::EthereumWallet,
    primitives::{Address, Signature},
    signers::{local::PrivateKeySigner, Signer},
};
use async_trait::async_trait;
use k256::SecretKey;

use crate::fhe::eip712::AuthorizationMessage;

/// Errors raised while loading keys or signing.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Signature declined by wallet: {0}")]
    Declined(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// The user's wallet as seen by the session protocol.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Account the wallet signs for.
    fn address(&self) -> Address;

    /// Sign EIP-712 structured data (domain, types and message).
    async fn sign_structured_data(
        &self,
        message: &AuthorizationMessage,
    ) -> Result<Signature, SignerError>;
}

/// Wallet backed by an in-process secp256k1 key.
#[derive(Clone)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
}

// The key never appears in logs or panic messages.
impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.signer.address())
            .finish_non_exhaustive()
    }
}

impl LocalWallet {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    /// Fresh random key, used by tests and throwaway development accounts.
    pub fn random() -> Self {
        Self::new(PrivateKeySigner::random())
    }

    /// Load from a hex private key (with or without `0x`).
    pub fn from_hex(private_key_hex: &str) -> Result<Self, SignerError> {
        signer_from_hex(private_key_hex).map(Self::new)
    }

    /// Load from a PEM file on disk.
    pub fn from_pem_file(path: &Path) -> Result<Self, SignerError> {
        let bytes = std::fs::read(path).map_err(|e| {
            SignerError::InvalidPrivateKey(format!("Cannot read {}: {}", path.display(), e))
        })?;
        signer_from_pem(&bytes).map(Self::new)
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// Transaction-signing wallet for the ledger adapter.
    pub fn ethereum_wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign_structured_data(
        &self,
        message: &AuthorizationMessage,
    ) -> Result<Signature, SignerError> {
        self.signer
            .sign_hash(&message.signing_hash())
            .await
            .map_err(|e| SignerError::SigningFailed(e.to_string()))
    }
}

/// Create a signer from a hex private key.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, SignerError> {
    let trimmed = private_key_hex.trim();
    let trimmed = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let key_bytes = alloy::hex::decode(trimmed)
        .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))?;

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))
}

/// Parse a PEM private key (SEC1 or PKCS#8) into a signer.
pub fn signer_from_pem(pem_bytes: &[u8]) -> Result<PrivateKeySigner, SignerError> {
    let pem_str = std::str::from_utf8(pem_bytes)
        .map_err(|e| SignerError::InvalidPrivateKey(format!("Invalid UTF-8: {}", e)))?;

    let pem = pem::parse(pem_str)
        .map_err(|e| SignerError::InvalidPrivateKey(format!("Invalid PEM: {}", e)))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| {
            use k256::pkcs8::DecodePrivateKey;
            SecretKey::from_pkcs8_der(pem.contents())
        })
        .map_err(|e| SignerError::InvalidPrivateKey(format!("Invalid key format: {}", e)))?;

    PrivateKeySigner::from_slice(&secret_key.to_bytes())
        .map_err(|e| SignerError::InvalidPrivateKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use alloy::primitives::Address;
    use k256::pkcs8::{EncodePrivateKey, LineEnding};

    use crate::fhe::eip712::{build_authorization_message, DecryptionDomain};

    // First Hardhat development account.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    #[test]
    fn hex_key_loads_with_or_without_prefix() {
        let with = LocalWallet::from_hex(DEV_KEY).unwrap();
        let without = LocalWallet::from_hex(DEV_KEY.trim_start_matches("0x")).unwrap();
        let expected: Address = DEV_ADDRESS.parse().unwrap();
        assert_eq!(with.address(), expected);
        assert_eq!(without.address(), expected);
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(matches!(
            LocalWallet::from_hex("0xnothex"),
            Err(SignerError::InvalidPrivateKey(_))
        ));
    }

    #[test]
    fn pkcs8_pem_file_loads() {
        let secret = SecretKey::from_slice(&alloy::hex::decode(&DEV_KEY[2..]).unwrap()).unwrap();
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pem.as_bytes()).unwrap();

        let wallet = LocalWallet::from_pem_file(file.path()).unwrap();
        assert_eq!(wallet.address(), DEV_ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn missing_pem_file_is_reported() {
        let err = LocalWallet::from_pem_file(Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(err.to_string().contains("Cannot read"));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let wallet = LocalWallet::from_hex(DEV_KEY).unwrap();
        let rendered = format!("{wallet:?}");
        assert!(rendered.contains("LocalWallet"));
        assert!(!rendered.contains(&DEV_KEY[2..]));
    }

    #[tokio::test]
    async fn structured_signature_recovers_to_wallet_address() {
        let wallet = LocalWallet::random();
        let domain = DecryptionDomain {
            gateway_chain_id: 55815,
            verifying_contract: Address::repeat_byte(0x5f),
        };
        let message = build_authorization_message(&domain, &[2u8; 33], &[Address::ZERO], 1, 1);

        let signature = wallet.sign_structured_data(&message).await.unwrap();
        let recovered = signature
            .recover_address_from_prehash(&message.signing_hash())
            .unwrap();
        assert_eq!(recovered, wallet.address());
    }
}
