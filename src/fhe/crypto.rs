// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session key material and re-encryption of cleartexts to a session key.
//!
//! Decryption results never travel in clear: the decrypting party seals each
//! cleartext to the session public key (ephemeral secp256k1 ECDH, HMAC-SHA256
//! keystream and tag) and only the holder of the session private key can open
//! it.
//!
//! ## Sealed layout
//!
//! ```text
//! ephemeral_pubkey (33, SEC1 compressed) | ciphertext (8, big-endian u64 ^ keystream) | tag (32)
//! ```

use std::fmt;

use alloy::primitives::Bytes;
use hmac::{Hmac, Mac};
use k256::ecdh::{diffie_hellman, EphemeralSecret};
use k256::elliptic_curve::rand_core::OsRng;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use sha2::Sha256;

use crate::error::{ClientError, ClientResult};

type HmacSha256 = Hmac<Sha256>;

const STREAM_LABEL: &[u8] = b"vitalchain/reencrypt/stream/v1";
const TAG_LABEL: &[u8] = b"vitalchain/reencrypt/tag/v1";

const EPHEMERAL_LEN: usize = 33;
const VALUE_LEN: usize = 8;
const TAG_LEN: usize = 32;

/// Length of a sealed cleartext.
pub const SEALED_LEN: usize = EPHEMERAL_LEN + VALUE_LEN + TAG_LEN;

/// Per-session asymmetric keypair used to open decryption results.
///
/// Never persisted; dropped with the session. The secret scalar is zeroized
/// on drop by `k256`.
#[derive(Clone)]
pub struct SessionKeypair {
    secret: SecretKey,
    public: PublicKey,
}

impl SessionKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Rebuild a keypair from raw private key bytes.
    pub fn from_private_key(bytes: &[u8]) -> ClientResult<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| ClientError::InvalidInput(format!("Invalid session private key: {e}")))?;
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// SEC1 compressed public key, the form signed into authorizations.
    pub fn public_key(&self) -> Bytes {
        encode_public_key(&self.public)
    }

    pub fn private_key(&self) -> Bytes {
        Bytes::copy_from_slice(&self.secret.to_bytes())
    }

    /// Whether `public_key` is the public half of this keypair.
    pub fn matches(&self, public_key: &[u8]) -> bool {
        self.public_key().as_ref() == public_key
    }

    /// Open a value sealed to this keypair's public key.
    pub fn open(&self, sealed: &[u8]) -> ClientResult<u64> {
        open(&self.secret, sealed)
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

pub fn encode_public_key(key: &PublicKey) -> Bytes {
    Bytes::copy_from_slice(key.to_encoded_point(true).as_bytes())
}

pub fn decode_public_key(bytes: &[u8]) -> ClientResult<PublicKey> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| ClientError::InvalidInput(format!("Invalid session public key: {e}")))
}

/// Seal `value` so that only the holder of `recipient`'s secret can read it.
pub fn seal(value: u64, recipient: &PublicKey) -> ClientResult<Bytes> {
    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_public = ephemeral.public_key().to_encoded_point(true);
    let shared = ephemeral.diffie_hellman(recipient);
    let shared = shared.raw_secret_bytes();

    let stream = keystream(shared.as_slice())?;
    let mut ciphertext = value.to_be_bytes();
    for (byte, key) in ciphertext.iter_mut().zip(stream.iter()) {
        *byte ^= key;
    }

    let tag = authenticator(shared.as_slice(), ephemeral_public.as_bytes(), &ciphertext)?
        .finalize()
        .into_bytes();

    let mut out = Vec::with_capacity(SEALED_LEN);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    Ok(Bytes::from(out))
}

fn open(secret: &SecretKey, sealed: &[u8]) -> ClientResult<u64> {
    if sealed.len() != SEALED_LEN {
        return Err(ClientError::AuthorizationInvalid(format!(
            "Sealed value has length {}, expected {SEALED_LEN}",
            sealed.len()
        )));
    }

    let (ephemeral_bytes, rest) = sealed.split_at(EPHEMERAL_LEN);
    let (ciphertext, tag) = rest.split_at(VALUE_LEN);

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral_bytes).map_err(|e| {
        ClientError::AuthorizationInvalid(format!("Sealed value has a bad ephemeral key: {e}"))
    })?;
    let shared = diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
    let shared = shared.raw_secret_bytes();

    authenticator(shared.as_slice(), ephemeral_bytes, ciphertext)?
        .verify_slice(tag)
        .map_err(|_| {
            ClientError::AuthorizationInvalid(
                "Sealed value was not addressed to this session key".to_string(),
            )
        })?;

    let stream = keystream(shared.as_slice())?;
    let mut value = [0u8; VALUE_LEN];
    for (i, byte) in value.iter_mut().enumerate() {
        *byte = ciphertext[i] ^ stream[i];
    }
    Ok(u64::from_be_bytes(value))
}

fn keyed_mac(shared: &[u8]) -> ClientResult<HmacSha256> {
    HmacSha256::new_from_slice(shared)
        .map_err(|e| ClientError::AuthorizationInvalid(format!("Invalid shared secret: {e}")))
}

fn keystream(shared: &[u8]) -> ClientResult<[u8; 32]> {
    let mut mac = keyed_mac(shared)?;
    mac.update(STREAM_LABEL);
    Ok(mac.finalize().into_bytes().into())
}

/// MAC over the ephemeral key and ciphertext, ready to finalize or verify.
fn authenticator(shared: &[u8], ephemeral: &[u8], ciphertext: &[u8]) -> ClientResult<HmacSha256> {
    let mut mac = keyed_mac(shared)?;
    mac.update(TAG_LABEL);
    mac.update(ephemeral);
    mac.update(ciphertext);
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_value_opens_with_matching_keypair() {
        let keypair = SessionKeypair::generate();
        let recipient = decode_public_key(&keypair.public_key()).unwrap();

        let sealed = seal(120, &recipient).unwrap();
        assert_eq!(sealed.len(), SEALED_LEN);
        assert_eq!(keypair.open(&sealed).unwrap(), 120);
    }

    #[test]
    fn sealed_value_rejects_other_keypair() {
        let intended = SessionKeypair::generate();
        let other = SessionKeypair::generate();
        let sealed = seal(7, &decode_public_key(&intended.public_key()).unwrap()).unwrap();

        assert!(matches!(
            other.open(&sealed),
            Err(ClientError::AuthorizationInvalid(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let keypair = SessionKeypair::generate();
        let mut sealed = seal(42, &decode_public_key(&keypair.public_key()).unwrap())
            .unwrap()
            .to_vec();
        sealed[EPHEMERAL_LEN] ^= 0x01;
        assert!(keypair.open(&sealed).is_err());
    }

    #[test]
    fn keystream_and_tag_derive_from_any_secret_length() {
        for shared in [&[][..], &[7u8; 32][..], &[9u8; 200][..]] {
            let stream = keystream(shared).unwrap();
            assert_eq!(stream, keystream(shared).unwrap());
            let tag = authenticator(shared, b"eph", b"ct").unwrap().finalize().into_bytes();
            assert!(authenticator(shared, b"eph", b"ct").unwrap().verify_slice(&tag).is_ok());
        }
        assert_ne!(keystream(&[1]).unwrap(), keystream(&[2]).unwrap());
    }

    #[test]
    fn keypairs_are_fresh_and_round_trip_through_private_bytes() {
        let a = SessionKeypair::generate();
        let b = SessionKeypair::generate();
        assert_ne!(a.public_key(), b.public_key());

        let restored = SessionKeypair::from_private_key(&a.private_key()).unwrap();
        assert!(restored.matches(&a.public_key()));
        assert!(!restored.matches(&b.public_key()));
    }

    #[test]
    fn debug_output_hides_the_private_key() {
        let keypair = SessionKeypair::generate();
        let rendered = format!("{keypair:?}");
        assert!(!rendered.contains(&alloy::hex::encode(keypair.private_key())));
    }
}
