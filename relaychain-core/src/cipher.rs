//! Asymmetric cipher capability for message payloads
//!
//! The relay stores ciphertext as opaque bytes and never calls into this
//! module. Clients use a `Cipher` to seal messages for a receiver's public
//! identity and to open what they retrieve.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// X25519 key length, public and secret
pub const KEY_LEN: usize = 32;
/// ChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 12;
/// Poly1305 tag length
pub const TAG_LEN: usize = 16;
/// Bytes a sealed box adds on top of the plaintext
pub const SEALED_OVERHEAD: usize = KEY_LEN + NONCE_LEN + TAG_LEN;

const KEY_LABEL: &[u8] = b"relaychain sealed box v1";

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// Wrong key or tampered ciphertext; the AEAD does not say which
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Key derivation or sealing failed on well-formed input
    #[error("Cipher failure: {0}")]
    Internal(String),
}

/// Encrypt to a public key, decrypt with the matching secret key
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], public_key: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// X25519 key pair usable as a relay identity
pub struct SealedBoxKeypair {
    secret: Zeroizing<[u8; KEY_LEN]>,
    public: [u8; KEY_LEN],
}

impl SealedBoxKeypair {
    pub fn generate() -> Self {
        let mut secret = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut secret[..]);
        let public = PublicKey::from(&StaticSecret::from(*secret)).to_bytes();
        SealedBoxKeypair { secret, public }
    }

    /// Rebuild a key pair from a stored secret key
    pub fn from_secret(secret_key: &[u8]) -> Result<Self, CipherError> {
        let secret = Zeroizing::new(key_array(secret_key, "secret")?);
        let public = PublicKey::from(&StaticSecret::from(*secret)).to_bytes();
        Ok(SealedBoxKeypair { secret, public })
    }

    /// The public identity sent to the relay
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    pub fn secret_key(&self) -> &[u8] {
        &self.secret[..]
    }
}

/// Anonymous sealed box: X25519 ephemeral-static DH, HKDF-SHA256, ChaCha20-Poly1305
///
/// Output layout is `ephemeral_public(32) || nonce(12) || ciphertext+tag`.
/// The receiver's public key is bound in as associated data.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedBoxCipher;

impl SealedBoxCipher {
    pub fn new() -> Self {
        SealedBoxCipher
    }
}

impl Cipher for SealedBoxCipher {
    fn encrypt(&self, plaintext: &[u8], public_key: &[u8]) -> Result<Vec<u8>, CipherError> {
        let recipient_pk = PublicKey::from(key_array(public_key, "public")?);

        let mut ephemeral_bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut ephemeral_bytes[..]);
        let ephemeral_sk = StaticSecret::from(*ephemeral_bytes);
        let ephemeral_pk = PublicKey::from(&ephemeral_sk);

        let shared = ephemeral_sk.diffie_hellman(&recipient_pk);
        if !shared.was_contributory() {
            return Err(CipherError::InvalidKey("low-order public key".to_string()));
        }
        let key = derive_key(
            shared.as_bytes(),
            ephemeral_pk.as_bytes(),
            recipient_pk.as_bytes(),
        )?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);

        let aead = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let sealed = aead
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: recipient_pk.as_bytes(),
                },
            )
            .map_err(|_| CipherError::Internal("AEAD seal failed".to_string()))?;

        let mut out = Vec::with_capacity(SEALED_OVERHEAD + plaintext.len());
        out.extend_from_slice(ephemeral_pk.as_bytes());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < SEALED_OVERHEAD {
            return Err(CipherError::MalformedCiphertext(format!(
                "{} bytes is shorter than the {} byte envelope",
                ciphertext.len(),
                SEALED_OVERHEAD
            )));
        }
        let (ephemeral, rest) = ciphertext.split_at(KEY_LEN);
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let recipient_sk = StaticSecret::from(*Zeroizing::new(key_array(secret_key, "secret")?));
        let recipient_pk = PublicKey::from(&recipient_sk);
        let ephemeral_pk = PublicKey::from(key_array(ephemeral, "ephemeral")?);

        let shared = recipient_sk.diffie_hellman(&ephemeral_pk);
        if !shared.was_contributory() {
            return Err(CipherError::MalformedCiphertext(
                "low-order ephemeral key".to_string(),
            ));
        }
        let key = derive_key(
            shared.as_bytes(),
            ephemeral_pk.as_bytes(),
            recipient_pk.as_bytes(),
        )?;

        let aead = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        aead.decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: recipient_pk.as_bytes(),
            },
        )
        .map_err(|_| CipherError::DecryptionFailed)
    }
}

fn key_array(bytes: &[u8], kind: &str) -> Result<[u8; KEY_LEN], CipherError> {
    bytes.try_into().map_err(|_| {
        CipherError::InvalidKey(format!(
            "{} key must be {} bytes, got {}",
            kind,
            KEY_LEN,
            bytes.len()
        ))
    })
}

fn derive_key(
    shared: &[u8],
    ephemeral_pk: &[u8],
    recipient_pk: &[u8],
) -> Result<Zeroizing<[u8; KEY_LEN]>, CipherError> {
    let mut salt = [0u8; 2 * KEY_LEN];
    salt[..KEY_LEN].copy_from_slice(ephemeral_pk);
    salt[KEY_LEN..].copy_from_slice(recipient_pk);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(KEY_LABEL, &mut key[..])
        .map_err(|_| CipherError::Internal("HKDF expand failed".to_string()))?;
    Ok(key)
}
