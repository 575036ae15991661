//! Handshake key agreement and per-direction record protection.

use crate::config::Role;
use crate::error::SealError;
use crate::{MAC_SIZE, TAG_SIZE, X25519_PUBLIC_KEY_SIZE, XCHACHA_KEY_SIZE, XCHACHA_NONCE_SIZE};
use chacha20poly1305::{
    Tag, XChaCha20Poly1305, XNonce,
    aead::{AeadInPlace, KeyInit},
};
use rand_core::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Nonce salt size (the rest of the nonce is the record counter)
const SALT_SIZE: usize = 16;

const CLIENT_WRITE_KEY: &str = "shroud-seal 2024-05 client write key";
const SERVER_WRITE_KEY: &str = "shroud-seal 2024-05 server write key";
const CLIENT_WRITE_SALT: &str = "shroud-seal 2024-05 client write salt";
const SERVER_WRITE_SALT: &str = "shroud-seal 2024-05 server write salt";
const CLIENT_FINISHED: &str = "shroud-seal 2024-05 client finished";
const SERVER_FINISHED: &str = "shroud-seal 2024-05 server finished";

/// One-use X25519 key pair generated per engine.
pub(crate) struct Ephemeral {
    secret: StaticSecret,
    public: PublicKey,
}

impl Ephemeral {
    pub(crate) fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub(crate) fn public_bytes(&self) -> [u8; X25519_PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Diffie-Hellman against the peer's hello key.
    ///
    /// Low-order peer points yield a non-contributory secret and are rejected.
    pub(crate) fn agree(
        &self,
        peer: &[u8; X25519_PUBLIC_KEY_SIZE],
    ) -> Result<Zeroizing<[u8; 32]>, SealError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        if !shared.was_contributory() {
            return Err(SealError::InvalidPublicKey);
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

/// Hash of both hello keys, client first.
pub(crate) fn transcript_hash(
    client_hello: &[u8; X25519_PUBLIC_KEY_SIZE],
    server_hello: &[u8; X25519_PUBLIC_KEY_SIZE],
) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(client_hello);
    hasher.update(server_hello);
    *hasher.finalize().as_bytes()
}

/// AEAD state for one direction of the record stream.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct RecordProtection {
    key: [u8; XCHACHA_KEY_SIZE],
    salt: [u8; SALT_SIZE],
    counter: u64,
}

impl RecordProtection {
    fn new(key: [u8; XCHACHA_KEY_SIZE], salt: [u8; SALT_SIZE]) -> Self {
        Self {
            key,
            salt,
            counter: 0,
        }
    }

    /// Records protected so far
    #[cfg(test)]
    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    /// Counter in the first 8 bytes (little-endian), salt in the remaining 16
    fn nonce(&self) -> Result<[u8; XCHACHA_NONCE_SIZE], SealError> {
        if self.counter == u64::MAX {
            return Err(SealError::NonceOverflow);
        }
        let mut bytes = [0u8; XCHACHA_NONCE_SIZE];
        bytes[..8].copy_from_slice(&self.counter.to_le_bytes());
        bytes[8..].copy_from_slice(&self.salt);
        Ok(bytes)
    }

    /// Encrypt `buffer` in place, returning the tag.
    pub(crate) fn seal(
        &mut self,
        aad: &[u8],
        buffer: &mut [u8],
    ) -> Result<[u8; TAG_SIZE], SealError> {
        let nonce = self.nonce()?;
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let tag = cipher
            .encrypt_in_place_detached(XNonce::from_slice(&nonce), aad, buffer)
            .map_err(|_| SealError::EncryptionFailed)?;
        self.counter += 1;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);
        Ok(tag_bytes)
    }

    /// Decrypt `buffer` in place, verifying `tag`.
    pub(crate) fn open(
        &mut self,
        aad: &[u8],
        buffer: &mut [u8],
        tag: &[u8],
    ) -> Result<(), SealError> {
        if tag.len() != TAG_SIZE {
            return Err(SealError::DecryptionFailed);
        }
        let nonce = self.nonce()?;
        let cipher = XChaCha20Poly1305::new((&self.key).into());
        cipher
            .decrypt_in_place_detached(
                XNonce::from_slice(&nonce),
                aad,
                buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| SealError::DecryptionFailed)?;
        self.counter += 1;
        Ok(())
    }
}

/// Everything derived from the shared secret and the hello transcript.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct HandshakeKeys {
    /// Protection for records we send
    pub(crate) write: RecordProtection,
    /// Protection for records we receive
    pub(crate) read: RecordProtection,
    /// MAC our finished message carries
    local_mac: [u8; MAC_SIZE],
    /// MAC the peer's finished message must carry
    peer_mac: [u8; MAC_SIZE],
}

impl HandshakeKeys {
    pub(crate) fn derive(role: Role, shared: &[u8; 32], transcript: &[u8; 32]) -> Self {
        let mut ikm = Zeroizing::new([0u8; 64]);
        ikm[..32].copy_from_slice(shared);
        ikm[32..].copy_from_slice(transcript);

        let client_write = RecordProtection::new(
            blake3::derive_key(CLIENT_WRITE_KEY, &ikm[..]),
            derive_salt(CLIENT_WRITE_SALT, &ikm[..]),
        );
        let server_write = RecordProtection::new(
            blake3::derive_key(SERVER_WRITE_KEY, &ikm[..]),
            derive_salt(SERVER_WRITE_SALT, &ikm[..]),
        );
        let client_mac = finished_mac(CLIENT_FINISHED, &ikm[..], transcript);
        let server_mac = finished_mac(SERVER_FINISHED, &ikm[..], transcript);

        match role {
            Role::Client => Self {
                write: client_write,
                read: server_write,
                local_mac: client_mac,
                peer_mac: server_mac,
            },
            Role::Server => Self {
                write: server_write,
                read: client_write,
                local_mac: server_mac,
                peer_mac: client_mac,
            },
        }
    }

    pub(crate) fn local_mac(&self) -> &[u8; MAC_SIZE] {
        &self.local_mac
    }

    /// Constant-time comparison against the expected peer MAC
    pub(crate) fn verify_peer_mac(&self, received: &[u8]) -> Result<(), SealError> {
        let received: [u8; MAC_SIZE] = received
            .try_into()
            .map_err(|_| SealError::FinishedMismatch)?;
        if blake3::Hash::from(received) == blake3::Hash::from(self.peer_mac) {
            Ok(())
        } else {
            Err(SealError::FinishedMismatch)
        }
    }
}

fn derive_salt(context: &str, ikm: &[u8]) -> [u8; SALT_SIZE] {
    let full = Zeroizing::new(blake3::derive_key(context, ikm));
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&full[..SALT_SIZE]);
    salt
}

fn finished_mac(context: &str, ikm: &[u8], transcript: &[u8; 32]) -> [u8; MAC_SIZE] {
    let key = Zeroizing::new(blake3::derive_key(context, ikm));
    *blake3::keyed_hash(&key, transcript).as_bytes()
}
