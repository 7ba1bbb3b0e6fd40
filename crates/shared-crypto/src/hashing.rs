//! One-shot digest helpers.
//!
//! SHA-256 derives node identifiers from public keys; SHA-1 derives
//! 160-bit data keys and topic identifiers from application strings.
//! SHA-1's collision weaknesses are acceptable for key derivation here:
//! the DHT stores no security-critical bindings under string-derived
//! keys, and the identifier width is fixed at 160 bits by the overlay.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-256 digest of `data`.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-1 digest of `data` (160 bits).
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc")
        let digest = sha256_digest(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha1_known_vector() {
        // SHA-1("abc")
        let digest = sha1_digest(b"abc");
        assert_eq!(hex::encode(digest), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn sha1_output_is_160_bits() {
        assert_eq!(sha1_digest(b"").len(), 20);
    }
}
