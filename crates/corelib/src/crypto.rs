//! Hashing and signing primitives.
//!
//! Digests are BLAKE3; signatures are ECDSA over secp256k1 with 33-byte
//! compressed public keys and 64-byte compact signatures.

use std::fmt;

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::address::Address;
use crate::error::{Error, Result};

/// Length of a full content digest.
pub const DIGEST_LEN: usize = 32;
/// Length of a short correlation tag.
pub const TAG_LEN: usize = 4;
/// Length of a compact signature.
pub const SIGNATURE_LEN: usize = 64;
/// Length of a compressed public key.
pub const PUBLIC_KEY_LEN: usize = 33;
/// Length of a secret key.
pub const SECRET_KEY_LEN: usize = 32;

pub type Digest = [u8; DIGEST_LEN];
pub type Tag = [u8; TAG_LEN];
pub type SignatureBytes = [u8; SIGNATURE_LEN];

/// 256-bit content digest.
pub fn digest(bytes: &[u8]) -> Digest {
    *blake3::hash(bytes).as_bytes()
}

/// Keyed digest. Only used by diagnostics tooling.
pub fn keyed_digest(key: &[u8; 32], bytes: &[u8]) -> Digest {
    *blake3::keyed_hash(key, bytes).as_bytes()
}

/// Short tag of a byte string: the last four bytes of its digest.
pub fn tag(bytes: &[u8]) -> Tag {
    tail_tag(&digest(bytes))
}

/// Last four bytes of an existing digest.
pub fn tail_tag(hash: &Digest) -> Tag {
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&hash[DIGEST_LEN - TAG_LEN..]);
    out
}

/// A compressed secp256k1 public key as carried on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Wrap wire bytes. Only the width is checked here; whether the bytes
    /// are a valid curve point is decided by [`verify`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| Error::FieldWidth {
            field: "sender_public_key",
            expected: PUBLIC_KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(PublicKey(arr))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// Signing keypair for a node.
#[derive(Clone)]
pub struct Keypair {
    secret: SigningKey,
    public: PublicKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS random source.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Restore a keypair from its 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SigningKey::from_slice(bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(secret))
    }

    fn from_signing_key(secret: SigningKey) -> Self {
        let point = secret.verifying_key().to_encoded_point(true);
        let mut public = [0u8; PUBLIC_KEY_LEN];
        public.copy_from_slice(point.as_bytes());
        Self {
            secret,
            public: PublicKey(public),
        }
    }

    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LEN] {
        let mut out = [0u8; SECRET_KEY_LEN];
        out.copy_from_slice(&self.secret.to_bytes());
        out
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn address(&self) -> Address {
        self.public.address()
    }

    /// Sign a message, returning the compact signature.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let signature: Signature = self.secret.sign(message);
        let mut out = [0u8; SIGNATURE_LEN];
        out.copy_from_slice(&signature.to_bytes());
        out
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Check a compact signature. Malformed keys or signatures verify as false.
pub fn verify(signature: &[u8], public_key: &PublicKey, message: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public_key.as_bytes()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}
