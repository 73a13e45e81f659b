//! Hybrid KEM primitive: ephemeral-static ECDH over P-256 feeding AES-256-GCM,
//! plus the deterministic key derivation every tree node relies on.
//!
//! The ECDH x-coordinate is used directly as the AES-256 key and no associated
//! data is bound to the seal.

use crate::error::{Result, TreeKemError};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of the GCM nonce carried in every ciphertext.
pub const IV_LEN: usize = 12;

/// Length of an uncompressed SEC1 P-256 point.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Length of fresh leaf secrets generated by the core.
pub const SECRET_LEN: usize = 32;

const SIGNING_PREFIX: &[u8] = b"signing-";

/// A P-256 key pair in raw encodings: 32-byte scalar, 65-byte uncompressed point.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub private: Vec<u8>,
    pub public: Vec<u8>,
}

impl KeyPair {
    fn from_secret_key(secret_key: &SecretKey) -> Self {
        Self {
            private: secret_key.to_bytes().to_vec(),
            public: secret_key
                .public_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &fingerprint(&self.public))
            .finish_non_exhaustive()
    }
}

/// Output of [`eckem_encrypt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcKemCiphertext {
    /// Ephemeral public key, uncompressed SEC1.
    pub public: Vec<u8>,
    pub iv: Vec<u8>,
    /// AES-256-GCM output including the 16-byte tag.
    pub ciphertext: Vec<u8>,
}

/// Ciphertexts keyed by the tree position whose key sealed them.
pub type CiphertextMap = BTreeMap<usize, EcKemCiphertext>;

/// SHA-256, used as the ratchet step between a node and its parent.
pub fn hash(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// Securely generated random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Short printable digest of a public key, safe to log.
pub fn fingerprint(public_key: &[u8]) -> String {
    general_purpose::STANDARD_NO_PAD.encode(&hash(public_key)[..8])
}

/// Fresh random key pair.
pub fn generate_key_pair() -> KeyPair {
    KeyPair::from_secret_key(&SecretKey::random(&mut OsRng))
}

/// Derive a key pair from an arbitrary secret: the private scalar is SHA-256(secret).
///
/// Fails only in the negligible case where the digest is not a valid scalar.
pub fn key_pair_from_secret(secret: &[u8]) -> Result<KeyPair> {
    let digest = Zeroizing::new(hash(secret));
    let secret_key = SecretKey::from_slice(&digest)
        .map_err(|e| TreeKemError::CryptoFailure(format!("derived scalar rejected: {}", e)))?;
    Ok(KeyPair::from_secret_key(&secret_key))
}

/// Same derivation as [`key_pair_from_secret`] over `"signing-" || secret`.
pub fn signing_key_pair_from_secret(secret: &[u8]) -> Result<KeyPair> {
    let mut prefixed = Zeroizing::new(Vec::with_capacity(SIGNING_PREFIX.len() + secret.len()));
    prefixed.extend_from_slice(SIGNING_PREFIX);
    prefixed.extend_from_slice(secret);
    key_pair_from_secret(&prefixed)
}

/// Fails unless `public_key` is a SEC1-encoded point on P-256.
pub fn check_public_key(public_key: &[u8]) -> Result<()> {
    PublicKey::from_sec1_bytes(public_key)
        .map(|_| ())
        .map_err(|e| TreeKemError::CryptoFailure(format!("invalid public key: {}", e)))
}

fn shared_secret(private_key: &[u8], public_key: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let secret_key = SecretKey::from_slice(private_key)
        .map_err(|e| TreeKemError::CryptoFailure(format!("invalid private key: {}", e)))?;
    let public_key = PublicKey::from_sec1_bytes(public_key)
        .map_err(|e| TreeKemError::CryptoFailure(format!("invalid public key: {}", e)))?;

    let shared = p256::ecdh::diffie_hellman(secret_key.to_nonzero_scalar(), public_key.as_affine());
    Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|e| TreeKemError::CryptoFailure(format!("invalid AES-256 key: {}", e)))
}

/// Encrypt `value` so that only the holder of the private key behind `public_key` can open it.
pub fn eckem_encrypt(value: &[u8], public_key: &[u8]) -> Result<EcKemCiphertext> {
    let ephemeral = generate_key_pair();
    let key = shared_secret(&ephemeral.private, public_key)?;
    let cipher = cipher_for(&key)?;

    let iv = random_bytes(IV_LEN);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), value)
        .map_err(|e| TreeKemError::CryptoFailure(format!("AES-GCM seal failed: {}", e)))?;

    Ok(EcKemCiphertext {
        public: ephemeral.public.clone(),
        iv,
        ciphertext,
    })
}

/// Open a ciphertext produced by [`eckem_encrypt`].
pub fn eckem_decrypt(ciphertext: &EcKemCiphertext, private_key: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.iv.len() != IV_LEN {
        return Err(TreeKemError::CryptoFailure(format!(
            "expected {}-byte IV, got {}",
            IV_LEN,
            ciphertext.iv.len()
        )));
    }

    let key = shared_secret(private_key, &ciphertext.public)?;
    let cipher = cipher_for(&key)?;

    cipher
        .decrypt(Nonce::from_slice(&ciphertext.iv), ciphertext.ciphertext.as_slice())
        .map_err(|e| TreeKemError::CryptoFailure(format!("AES-GCM open failed: {}", e)))
}
