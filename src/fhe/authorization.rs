// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decryption authorizations: signed permission for a session key to
//! decrypt handles of a fixed set of contracts during a time window.

use alloy::primitives::{Address, Bytes, Signature};

use super::eip712::{validate_validity_days, window_end, UserDecryptParams};
use super::session::ConfidentialSession;
use super::unix_now;
use crate::error::{ClientError, ClientResult};
use crate::wallet::{SignerError, WalletSigner};

/// A wallet-signed decryption authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionAuthorization {
    pub public_key: Bytes,
    pub scoped_contracts: Vec<Address>,
    pub issued_at: u64,
    pub validity_days: u64,
    pub signature: Signature,
    pub account: Address,
    pub network_id: u64,
}

impl DecryptionAuthorization {
    pub fn expires_at(&self) -> u64 {
        window_end(self.issued_at, self.validity_days)
    }

    pub fn is_valid_at(&self, now: u64) -> bool {
        now >= self.issued_at && now <= self.expires_at()
    }

    pub fn covers(&self, contract: &Address) -> bool {
        self.scoped_contracts.contains(contract)
    }

    /// Decryption parameters for the session key's private half.
    pub fn to_params(&self, private_key: Bytes) -> UserDecryptParams {
        UserDecryptParams {
            private_key,
            public_key: self.public_key.clone(),
            signature: self.signature,
            scoped_contracts: self.scoped_contracts.clone(),
            account: self.account,
            issued_at: self.issued_at,
            validity_days: self.validity_days,
        }
    }
}

/// Ask `signer` to authorize the session key for `scoped_contracts`.
///
/// Issues a keypair first if the session has none, and replaces the keypair
/// when the stored authorization has expired. While the wallet is
/// signing, the session is `AuthorizationPending` and no other authorization
/// for the same account and network may start. A declined signature leaves
/// the session at `KeypairIssued`.
///
/// # Arguments
/// * `session` - Session whose keypair is authorized
/// * `signer` - Wallet of the session account
/// * `scoped_contracts` - Contracts the authorization may decrypt for
/// * `validity_days` - Window length, 1 to 365 days
///
/// # Returns
/// * `Ok(DecryptionAuthorization)` - Verified authorization, also stored on the session
/// * `Err(ClientError::SignatureDeclined)` - If the wallet refused to sign
/// * `Err(ClientError::SessionBusy)` - If another authorization is pending for the account
pub async fn request_authorization(
    session: &mut ConfidentialSession,
    signer: &dyn WalletSigner,
    scoped_contracts: &[Address],
    validity_days: u64,
) -> ClientResult<DecryptionAuthorization> {
    validate_validity_days(validity_days)?;
    if scoped_contracts.is_empty() {
        return Err(ClientError::InvalidInput(
            "An authorization must name at least one contract".to_string(),
        ));
    }

    let context = *session.context();
    if signer.address() != context.account {
        return Err(ClientError::InvalidInput(format!(
            "Signer {} does not own session account {}",
            signer.address(),
            context.account
        )));
    }

    let issued_at = unix_now();
    session.prepare_authorization(issued_at).await?;

    let (guard, public_key) = session.begin_authorization()?;
    let message =
        session.build_authorization_message(&public_key, scoped_contracts, issued_at, validity_days);

    tracing::info!(
        context = %context,
        contracts = scoped_contracts.len(),
        validity_days,
        "Requesting decryption authorization"
    );
    let signed = signer.sign_structured_data(&message).await;
    drop(guard);

    let signature = match signed {
        Ok(signature) => signature,
        Err(e) => {
            session.abort_authorization();
            tracing::info!(context = %context, error = %e, "Authorization not signed");
            return Err(match e {
                SignerError::Declined(reason) => ClientError::SignatureDeclined(reason),
                other => ClientError::SignatureDeclined(other.to_string()),
            });
        }
    };

    let authorization = DecryptionAuthorization {
        public_key,
        scoped_contracts: scoped_contracts.to_vec(),
        issued_at,
        validity_days,
        signature,
        account: context.account,
        network_id: context.network_id,
    };
    session.complete_authorization(authorization.clone())?;
    Ok(authorization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use alloy::primitives::{B256, U256};
    use alloy::sol_types::SolCall;
    use async_trait::async_trait;

    use crate::fhe::backend::BackendSelector;
    use crate::fhe::eip712::AuthorizationMessage;
    use crate::fhe::session::{SessionManager, SessionState};
    use crate::fhe::types::{CiphertextHandle, HandleContractPair};
    use crate::ledger::abi::IVitalChain;
    use crate::ledger::memory::{DevLedgerConfig, InMemoryLedger};
    use crate::ledger::{LedgerGateway, TxRequest};
    use crate::network::{NetworkContext, LOCAL_CHAIN_ID};
    use crate::wallet::LocalWallet;

    const RECORDS: Address = Address::repeat_byte(0xaa);
    const BADGE: Address = Address::repeat_byte(0xbb);

    struct DecliningWallet(Address);

    #[async_trait]
    impl WalletSigner for DecliningWallet {
        fn address(&self) -> Address {
            self.0
        }

        async fn sign_structured_data(
            &self,
            _message: &AuthorizationMessage,
        ) -> Result<Signature, SignerError> {
            Err(SignerError::Declined("user rejected the request".to_string()))
        }
    }

    fn setup() -> (Arc<InMemoryLedger>, SessionManager, LocalWallet) {
        let ledger = Arc::new(InMemoryLedger::new(DevLedgerConfig::new(RECORDS, BADGE)));
        let manager = SessionManager::new(BackendSelector::new().with_dev_node(ledger.clone()));
        (ledger, manager, LocalWallet::random())
    }

    fn context(wallet: &LocalWallet) -> NetworkContext {
        NetworkContext::new(LOCAL_CHAIN_ID, RECORDS, wallet.address())
    }

    async fn record(ledger: &InMemoryLedger, session: &mut ConfidentialSession, value: u32) -> CiphertextHandle {
        let input = session.encrypt(value, RECORDS).await.unwrap();
        let call = IVitalChain::logVitalRecordCall {
            inputVolume: input.handle.0,
            inputProof: input.input_proof.clone(),
            ipfsCid: String::new(),
            date: 0,
            locationHash: B256::ZERO,
            hospitalHash: B256::ZERO,
            donationCategory: 0,
            transparentVolume: 0,
        };
        ledger
            .submit(TxRequest {
                from: input.account,
                to: RECORDS,
                input: call.abi_encode().into(),
                gas_limit: None,
            })
            .await
            .unwrap();
        input.handle
    }

    #[tokio::test]
    async fn authorize_then_decrypt_recovers_submitted_value() {
        let (ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();
        let handle = record(&ledger, &mut session, 120).await;

        let authorization = request_authorization(&mut session, &wallet, &[RECORDS], 365)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Authorized);
        assert_eq!(authorization.account, wallet.address());
        assert_eq!(authorization.expires_at(), authorization.issued_at + 365 * 86_400);

        let result = session
            .decrypt(&[HandleContractPair::new(handle, RECORDS)])
            .await
            .unwrap();
        assert_eq!(result.get(&handle), Some(120));
        assert_eq!(session.state(), SessionState::Decrypted);
    }

    #[tokio::test]
    async fn contract_outside_scope_is_rejected() {
        let (ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();
        let handle = record(&ledger, &mut session, 3).await;

        request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();
        let err = session
            .decrypt(&[HandleContractPair::new(handle, BADGE)])
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[tokio::test]
    async fn elapsed_authorization_expires_and_rotates_keypair() {
        let (ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();
        let handle = record(&ledger, &mut session, 3).await;

        let mut authorization = request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();
        let old_key = authorization.public_key.clone();
        // Two days in the past: the one-day window is over.
        authorization.issued_at -= 2 * 86_400;

        let err = session
            .decrypt_with(&[HandleContractPair::new(handle, RECORDS)], &authorization)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationExpired { .. }));
        assert!(err.requires_reauthorization());
        assert_eq!(session.state(), SessionState::KeypairIssued);
        assert!(session.authorization().is_none());
        assert!(!session.keypair().unwrap().matches(&old_key));

        request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();
        let result = session
            .decrypt(&[HandleContractPair::new(handle, RECORDS)])
            .await
            .unwrap();
        assert_eq!(result.get(&handle), Some(3));
    }

    #[tokio::test]
    async fn declined_signature_returns_to_keypair_issued() {
        let (_ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();

        let err = request_authorization(
            &mut session,
            &DecliningWallet(wallet.address()),
            &[RECORDS],
            365,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::SignatureDeclined(_)));
        assert_eq!(session.state(), SessionState::KeypairIssued);

        // The pending mark is released, so the next attempt may proceed.
        request_authorization(&mut session, &wallet, &[RECORDS], 365)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resigning_with_the_same_keypair_is_allowed() {
        let (_ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();

        let first = request_authorization(&mut session, &wallet, &[RECORDS], 30)
            .await
            .unwrap();
        let second = request_authorization(&mut session, &wallet, &[RECORDS, BADGE], 30)
            .await
            .unwrap();
        assert_eq!(first.public_key, second.public_key);
        assert!(second.covers(&BADGE));
    }

    #[tokio::test]
    async fn renewing_an_elapsed_authorization_rotates_the_keypair() {
        let (_ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();

        let first = request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();
        session.backdate_authorization(2 * 86_400);

        let renewed = request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();
        assert_ne!(first.public_key, renewed.public_key);
        assert!(renewed.is_valid_at(unix_now()));
        assert!(session.keypair().unwrap().matches(&renewed.public_key));
        assert_eq!(session.state(), SessionState::Authorized);
    }

    #[tokio::test]
    async fn foreign_signer_and_bad_windows_are_rejected() {
        let (_ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();

        let other = LocalWallet::random();
        assert!(matches!(
            request_authorization(&mut session, &other, &[RECORDS], 1).await,
            Err(ClientError::InvalidInput(_))
        ));
        assert!(matches!(
            request_authorization(&mut session, &wallet, &[RECORDS], 0).await,
            Err(ClientError::InvalidInput(_))
        ));
        assert!(matches!(
            request_authorization(&mut session, &wallet, &[], 1).await,
            Err(ClientError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn authorization_for_another_network_is_invalid() {
        let (_ledger, manager, wallet) = setup();
        let mut session = manager.open_session(context(&wallet)).await.unwrap();
        let mut authorization = request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();
        authorization.network_id = 11155111;

        let err = session.decrypt_with(&[], &authorization).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let authorization = DecryptionAuthorization {
            public_key: Bytes::new(),
            scoped_contracts: vec![RECORDS],
            issued_at: 1_000,
            validity_days: 1,
            signature: Signature::new(U256::from(1), U256::from(1), false),
            account: Address::ZERO,
            network_id: LOCAL_CHAIN_ID,
        };
        assert!(!authorization.is_valid_at(999));
        assert!(authorization.is_valid_at(1_000));
        assert!(authorization.is_valid_at(87_400));
        assert!(!authorization.is_valid_at(87_401));
    }
}
