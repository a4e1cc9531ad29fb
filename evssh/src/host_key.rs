//! Deciding whether to trust the key a server presents during key exchange.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// A public host key as sent in the key exchange reply.
#[derive(Clone, Copy, Debug)]
pub struct HostKey<'a> {
    pub algorithm: &'a str,
    /// The key in SSH wire encoding.
    pub blob: &'a [u8],
}

pub trait HostKeyVerifier {
    fn verify(&self, host: &str, key: &HostKey<'_>) -> bool;
}

/// Trusts every key.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAny;

impl HostKeyVerifier for AcceptAny {
    fn verify(&self, _: &str, _: &HostKey<'_>) -> bool {
        true
    }
}

/// Trusts only the key with the given SHA-256 fingerprint.
#[derive(Clone, Debug)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn new(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn of(blob: &[u8]) -> Self {
        Self(Sha256::digest(blob).into())
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.0
    }
}

impl HostKeyVerifier for Fingerprint {
    fn verify(&self, _: &str, key: &HostKey<'_>) -> bool {
        Self::of(key.blob).0[..].ct_eq(&self.0[..]).into()
    }
}
