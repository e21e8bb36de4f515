// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Confidential sessions.
//!
//! A session binds one [`NetworkContext`] to one backend, holds the session
//! keypair and the current decryption authorization, and walks through:
//!
//! ```text
//! Uninitialized -> BackendReady -> KeypairIssued -> AuthorizationPending
//!     -> Authorized -> Decrypted
//! ```
//!
//! The [`SessionManager`] publishes the active context on a watch channel.
//! Sessions check it before and after every backend call; once the context
//! changes the session drops its key material and returns to `Uninitialized`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, Bytes};
use tokio::sync::watch;

use super::authorization::DecryptionAuthorization;
use super::backend::{BackendSelector, ConfidentialBackend};
use super::crypto::SessionKeypair;
use super::eip712::AuthorizationMessage;
use super::types::{DecryptionResult, EncryptedInput, HandleContractPair};
use super::unix_now;
use crate::error::{ClientError, ClientResult};
use crate::network::{NetworkContext, NetworkKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    BackendReady,
    KeypairIssued,
    AuthorizationPending,
    Authorized,
    Decrypted,
}

type PendingKey = (Address, u64);

/// Accounts with an authorization awaiting the wallet, per network.
#[derive(Debug, Default)]
pub struct PendingAuthorizations {
    inner: Mutex<HashSet<PendingKey>>,
}

impl PendingAuthorizations {
    fn is_pending(&self, key: &PendingKey) -> bool {
        self.inner
            .lock()
            .map(|pending| pending.contains(key))
            .unwrap_or(false)
    }

    fn acquire(self: &Arc<Self>, key: PendingKey) -> ClientResult<PendingGuard> {
        let mut pending = self
            .inner
            .lock()
            .map_err(|_| ClientError::InvalidState("pending set poisoned".to_string()))?;
        if !pending.insert(key) {
            return Err(ClientError::SessionBusy(format!(
                "Authorization for {} on network {} is awaiting a signature",
                key.0, key.1
            )));
        }
        Ok(PendingGuard {
            owner: self.clone(),
            key,
        })
    }
}

/// Clears the pending mark when the signing attempt ends.
#[derive(Debug)]
pub struct PendingGuard {
    owner: Arc<PendingAuthorizations>,
    key: PendingKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.owner.inner.lock() {
            pending.remove(&self.key);
        }
    }
}

/// Per-context confidential session.
pub struct ConfidentialSession {
    context: NetworkContext,
    backend: Arc<dyn ConfidentialBackend>,
    state: SessionState,
    keypair: Option<SessionKeypair>,
    authorization: Option<DecryptionAuthorization>,
    active: watch::Receiver<Option<NetworkContext>>,
    pending: Arc<PendingAuthorizations>,
}

impl ConfidentialSession {
    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn backend_kind(&self) -> NetworkKind {
        self.backend.kind()
    }

    pub fn keypair(&self) -> Option<&SessionKeypair> {
        self.keypair.as_ref()
    }

    pub fn authorization(&self) -> Option<&DecryptionAuthorization> {
        self.authorization.as_ref()
    }

    /// Whether the session still belongs to the active network context.
    pub fn is_current(&self) -> bool {
        *self.active.borrow() == Some(self.context)
    }

    fn discard(&mut self) {
        self.keypair = None;
        self.authorization = None;
        self.state = SessionState::Uninitialized;
    }

    fn ensure_current(&mut self) -> ClientResult<()> {
        if self.state == SessionState::Uninitialized {
            return Err(ClientError::InvalidState(format!(
                "Session for {} was discarded",
                self.context
            )));
        }
        if !self.is_current() {
            tracing::info!(context = %self.context, "Network context changed, discarding session");
            self.discard();
            return Err(ClientError::AuthorizationInvalid(format!(
                "Network context {} is no longer active",
                self.context
            )));
        }
        Ok(())
    }

    /// Issue a fresh keypair, replacing any previous one and its authorization.
    pub async fn generate_keypair(&mut self) -> ClientResult<Bytes> {
        self.ensure_current()?;
        if self.state == SessionState::AuthorizationPending {
            return Err(ClientError::InvalidState(
                "Cannot rotate the keypair while an authorization is pending".to_string(),
            ));
        }

        let keypair = self.backend.generate_keypair().await?;
        let public_key = keypair.public_key();
        self.keypair = Some(keypair);
        self.authorization = None;
        self.state = SessionState::KeypairIssued;

        tracing::debug!(context = %self.context, "Session keypair issued");
        Ok(public_key)
    }

    /// Encrypt a value for `contract`, bound to the session account.
    pub async fn encrypt(&mut self, value: u32, contract: Address) -> ClientResult<EncryptedInput> {
        self.ensure_current()?;
        let input = self
            .backend
            .encrypt(value, contract, self.context.account)
            .await?;
        self.ensure_current()?;
        Ok(input)
    }

    pub fn build_authorization_message(
        &self,
        public_key: &[u8],
        scoped_contracts: &[Address],
        issued_at: u64,
        validity_days: u64,
    ) -> AuthorizationMessage {
        self.backend
            .build_authorization_message(public_key, scoped_contracts, issued_at, validity_days)
    }

    /// Mark the session as waiting for a wallet signature.
    pub(crate) fn begin_authorization(&mut self) -> ClientResult<(PendingGuard, Bytes)> {
        self.ensure_current()?;
        let public_key = self
            .keypair
            .as_ref()
            .map(SessionKeypair::public_key)
            .ok_or_else(|| ClientError::InvalidState("No session keypair issued".to_string()))?;

        let guard = self
            .pending
            .acquire((self.context.account, self.context.network_id))?;
        self.state = SessionState::AuthorizationPending;
        Ok((guard, public_key))
    }

    pub(crate) fn abort_authorization(&mut self) {
        if self.state == SessionState::AuthorizationPending {
            self.state = SessionState::KeypairIssued;
        }
    }

    pub(crate) fn complete_authorization(
        &mut self,
        authorization: DecryptionAuthorization,
    ) -> ClientResult<()> {
        self.ensure_current()?;
        self.authorization = Some(authorization);
        self.state = SessionState::Authorized;
        Ok(())
    }

    /// Shift the stored authorization window into the past.
    #[cfg(test)]
    pub(crate) fn backdate_authorization(&mut self, seconds: u64) {
        if let Some(authorization) = self.authorization.as_mut() {
            authorization.issued_at = authorization.issued_at.saturating_sub(seconds);
        }
    }

    /// Decrypt with the session's current authorization.
    pub async fn decrypt(
        &mut self,
        requests: &[HandleContractPair],
    ) -> ClientResult<DecryptionResult> {
        let authorization = self.authorization.clone().ok_or_else(|| {
            ClientError::InvalidState("No decryption authorization for this session".to_string())
        })?;
        self.decrypt_with(requests, &authorization).await
    }

    /// Decrypt with an explicit authorization.
    ///
    /// An elapsed authorization is discarded together with the keypair and
    /// a fresh keypair is issued, so the next step is a new signature.
    pub async fn decrypt_with(
        &mut self,
        requests: &[HandleContractPair],
        authorization: &DecryptionAuthorization,
    ) -> ClientResult<DecryptionResult> {
        self.ensure_current()?;
        if !matches!(
            self.state,
            SessionState::Authorized | SessionState::Decrypted
        ) {
            return Err(ClientError::InvalidState(format!(
                "Cannot decrypt in state {:?}",
                self.state
            )));
        }

        if authorization.network_id != self.context.network_id
            || authorization.account != self.context.account
        {
            return Err(ClientError::AuthorizationInvalid(
                "Authorization was issued for another account or network".to_string(),
            ));
        }

        let keypair = self
            .keypair
            .as_ref()
            .ok_or_else(|| ClientError::InvalidState("No session keypair issued".to_string()))?;
        if !keypair.matches(&authorization.public_key) {
            return Err(ClientError::AuthorizationInvalid(
                "Authorization was signed for another session key".to_string(),
            ));
        }

        let now = unix_now();
        if !authorization.is_valid_at(now) {
            return Err(self.expire(authorization, now).await);
        }

        let params = authorization.to_params(keypair.private_key());
        let outcome = self.backend.user_decrypt(requests, &params).await;
        self.ensure_current()?;

        match outcome {
            Ok(result) => {
                self.state = SessionState::Decrypted;
                Ok(result)
            }
            Err(ClientError::AuthorizationExpired { .. }) => Err(self.expire(authorization, now).await),
            Err(e) => Err(e),
        }
    }

    async fn expire(&mut self, authorization: &DecryptionAuthorization, now: u64) -> ClientError {
        if let Err(e) = self.rotate_after_expiry(authorization, now).await {
            tracing::warn!(error = %e, "Could not issue a fresh keypair after expiry");
        }
        ClientError::AuthorizationExpired {
            issued_at: authorization.issued_at,
            expires_at: authorization.expires_at(),
            now,
        }
    }

    /// Drop an elapsed authorization together with its keypair and issue a
    /// fresh keypair. The old key material is never signed for a new window.
    async fn rotate_after_expiry(
        &mut self,
        authorization: &DecryptionAuthorization,
        now: u64,
    ) -> ClientResult<()> {
        tracing::info!(
            context = %self.context,
            expires_at = authorization.expires_at(),
            now,
            "Decryption authorization expired"
        );
        self.authorization = None;
        self.keypair = None;
        self.state = SessionState::BackendReady;
        self.generate_keypair().await?;
        Ok(())
    }

    /// Prepare the session for a new signature at `now`.
    ///
    /// Issues a keypair when none exists. A stored authorization whose window
    /// no longer contains `now` is retired first, along with its keypair.
    /// Re-signing while the stored authorization is still valid keeps the
    /// keypair.
    pub(crate) async fn prepare_authorization(&mut self, now: u64) -> ClientResult<()> {
        self.ensure_current()?;
        if let Some(previous) = self.authorization.clone() {
            if !previous.is_valid_at(now) {
                self.rotate_after_expiry(&previous, now).await?;
            }
        }
        if self.keypair.is_none() {
            self.generate_keypair().await?;
        }
        Ok(())
    }
}

/// Owns the backend selector and the active network context.
pub struct SessionManager {
    selector: BackendSelector,
    active: watch::Sender<Option<NetworkContext>>,
    pending: Arc<PendingAuthorizations>,
}

impl SessionManager {
    pub fn new(selector: BackendSelector) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            selector,
            active,
            pending: Arc::new(PendingAuthorizations::default()),
        }
    }

    pub fn selector(&self) -> &BackendSelector {
        &self.selector
    }

    pub fn active_context(&self) -> Option<NetworkContext> {
        *self.active.borrow()
    }

    /// Make `context` active, invalidating sessions bound to any other context.
    pub fn switch_network(&self, context: NetworkContext) {
        let changed = self.active.send_if_modified(|active| {
            if *active == Some(context) {
                false
            } else {
                *active = Some(context);
                true
            }
        });
        if changed {
            tracing::info!(context = %context, "Active network context changed");
        }
    }

    /// Wallet disconnected: no context is active.
    pub fn disconnect(&self) {
        self.active.send_replace(None);
        tracing::info!("Wallet disconnected, all sessions invalidated");
    }

    /// Open a session for `context`, making it the active context.
    pub async fn open_session(&self, context: NetworkContext) -> ClientResult<ConfidentialSession> {
        if self
            .pending
            .is_pending(&(context.account, context.network_id))
        {
            return Err(ClientError::SessionBusy(format!(
                "Authorization for {} is awaiting a signature",
                context
            )));
        }

        self.switch_network(context);
        let backend = self.selector.select(&context).await?;

        Ok(ConfidentialSession {
            context,
            backend,
            state: SessionState::BackendReady,
            keypair: None,
            authorization: None,
            active: self.active.subscribe(),
            pending: self.pending.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::fhe::authorization::request_authorization;
    use crate::fhe::eip712::{DecryptionDomain, UserDecryptParams};
    use crate::fhe::local::LocalBackend;
    use crate::ledger::memory::{DevLedgerConfig, InMemoryLedger};
    use crate::network::LOCAL_CHAIN_ID;
    use crate::wallet::{LocalWallet, WalletSigner};

    const RECORDS: Address = Address::repeat_byte(0xaa);

    fn manager() -> SessionManager {
        let ledger = InMemoryLedger::new(DevLedgerConfig::new(RECORDS, Address::repeat_byte(0xbb)));
        SessionManager::new(BackendSelector::new().with_dev_node(Arc::new(ledger)))
    }

    fn context(account: u8) -> NetworkContext {
        NetworkContext::new(LOCAL_CHAIN_ID, RECORDS, Address::repeat_byte(account))
    }

    #[tokio::test]
    async fn session_starts_backend_ready_and_issues_keypairs() {
        let manager = manager();
        let mut session = manager.open_session(context(1)).await.unwrap();
        assert_eq!(session.state(), SessionState::BackendReady);
        assert_eq!(session.backend_kind(), NetworkKind::Local);

        let first = session.generate_keypair().await.unwrap();
        let second = session.generate_keypair().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(session.state(), SessionState::KeypairIssued);
    }

    #[tokio::test]
    async fn network_switch_discards_session() {
        let manager = manager();
        let mut session = manager.open_session(context(1)).await.unwrap();
        session.generate_keypair().await.unwrap();

        manager.switch_network(context(2));
        assert!(!session.is_current());

        let err = session.encrypt(5, RECORDS).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthorizationInvalid(_)));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.keypair().is_none());
    }

    /// Local backend whose decryption parks until released.
    struct GatedBackend {
        inner: LocalBackend,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ConfidentialBackend for GatedBackend {
        fn kind(&self) -> NetworkKind {
            self.inner.kind()
        }

        fn network_id(&self) -> u64 {
            self.inner.network_id()
        }

        fn decryption_domain(&self) -> DecryptionDomain {
            self.inner.decryption_domain()
        }

        async fn ensure_ready(&self) -> ClientResult<()> {
            self.inner.ensure_ready().await
        }

        async fn generate_keypair(&self) -> ClientResult<SessionKeypair> {
            self.inner.generate_keypair().await
        }

        async fn encrypt(
            &self,
            value: u32,
            contract: Address,
            account: Address,
        ) -> ClientResult<EncryptedInput> {
            self.inner.encrypt(value, contract, account).await
        }

        async fn user_decrypt(
            &self,
            requests: &[HandleContractPair],
            params: &UserDecryptParams,
        ) -> ClientResult<DecryptionResult> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.user_decrypt(requests, params).await
        }
    }

    #[tokio::test]
    async fn network_switch_during_decryption_discards_result() {
        let ledger = Arc::new(InMemoryLedger::new(DevLedgerConfig::new(
            RECORDS,
            Address::repeat_byte(0xbb),
        )));
        let manager = SessionManager::new(BackendSelector::new().with_dev_node(ledger.clone()));
        let backend = Arc::new(GatedBackend {
            inner: LocalBackend::connect(LOCAL_CHAIN_ID, ledger).await,
            entered: Notify::new(),
            release: Notify::new(),
        });

        let wallet = LocalWallet::random();
        let home = NetworkContext::new(LOCAL_CHAIN_ID, RECORDS, wallet.address());
        manager.switch_network(home);
        let mut session = ConfidentialSession {
            context: home,
            backend: backend.clone(),
            state: SessionState::BackendReady,
            keypair: None,
            authorization: None,
            active: manager.active.subscribe(),
            pending: manager.pending.clone(),
        };
        request_authorization(&mut session, &wallet, &[RECORDS], 1)
            .await
            .unwrap();

        let switch = async {
            backend.entered.notified().await;
            manager.switch_network(context(2));
            backend.release.notify_one();
        };
        let (result, ()) = tokio::join!(session.decrypt(&[]), switch);

        assert!(matches!(result, Err(ClientError::AuthorizationInvalid(_))));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.keypair().is_none());
        assert!(session.authorization().is_none());
    }

    #[tokio::test]
    async fn decrypt_without_authorization_is_invalid_state() {
        let manager = manager();
        let mut session = manager.open_session(context(1)).await.unwrap();
        let err = session.decrypt(&[]).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[tokio::test]
    async fn pending_authorization_blocks_new_sessions() {
        let manager = manager();
        let mut session = manager.open_session(context(1)).await.unwrap();
        session.generate_keypair().await.unwrap();

        let (guard, _) = session.begin_authorization().unwrap();
        assert_eq!(session.state(), SessionState::AuthorizationPending);
        assert!(matches!(
            manager.open_session(context(1)).await,
            Err(ClientError::SessionBusy(_))
        ));
        assert!(matches!(
            session.begin_authorization(),
            Err(ClientError::SessionBusy(_))
        ));

        drop(guard);
        session.abort_authorization();
        assert_eq!(session.state(), SessionState::KeypairIssued);
        assert!(manager.open_session(context(1)).await.is_ok());
    }

    #[tokio::test]
    async fn disconnect_invalidates_sessions() {
        let manager = manager();
        let session = manager.open_session(context(1)).await.unwrap();
        assert_eq!(manager.active_context(), Some(context(1)));
        manager.disconnect();
        assert!(!session.is_current());
        assert_eq!(manager.active_context(), None);
    }
}
