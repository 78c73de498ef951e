//! Content digests
//!
//! The digest recorded on a chunk row at creation time is authoritative. A
//! device never gets to vouch for its own bytes: any hash a node reports
//! alongside a download is ignored, and the served bytes are re-hashed
//! against the ledger's value.

use crate::integrity::error::{IntegrityError, IntegrityResult};
use blake3::Hasher;

pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// BLAKE3 digest of a byte slice.
    pub fn digest(data: &[u8]) -> [u8; 32] {
        let mut hasher = Hasher::new();
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Digest, hex-encoded for the ledger and API boundaries.
    pub fn digest_hex(data: &[u8]) -> String {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize().to_hex().to_string()
    }

    /// Check bytes against a hex-encoded trusted digest. A malformed
    /// expectation never verifies.
    pub fn verify_hex(data: &[u8], expected_hex: &str) -> bool {
        match blake3::Hash::from_hex(expected_hex) {
            Ok(expected) => blake3::hash(data) == expected,
            Err(_) => false,
        }
    }

    /// Like [`verify_hex`](Self::verify_hex), but reports both digests on
    /// mismatch.
    pub fn check_hex(data: &[u8], expected_hex: &str) -> IntegrityResult<()> {
        let expected = blake3::Hash::from_hex(expected_hex)
            .map_err(|_| IntegrityError::MalformedDigest(expected_hex.to_string()))?;
        let actual = blake3::hash(data);
        if actual == expected {
            Ok(())
        } else {
            Err(IntegrityError::DigestMismatch {
                expected: expected_hex.to_string(),
                actual: actual.to_hex().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_deterministic() {
        let data = b"Hello, World!";
        assert_eq!(IntegrityVerifier::digest(data), IntegrityVerifier::digest(data));
        assert_eq!(
            IntegrityVerifier::digest_hex(data),
            IntegrityVerifier::digest_hex(data)
        );
    }

    #[test]
    fn test_single_bit_flip_changes_digest() {
        let data = b"chunk payload".to_vec();
        let mut flipped = data.clone();
        flipped[0] ^= 0x01;

        assert_ne!(
            IntegrityVerifier::digest(&data),
            IntegrityVerifier::digest(&flipped)
        );
    }

    #[test]
    fn test_verify_hex() {
        let data = b"verify me";
        let hex = IntegrityVerifier::digest_hex(data);

        assert!(IntegrityVerifier::verify_hex(data, &hex));
        assert!(!IntegrityVerifier::verify_hex(b"other bytes", &hex));
    }

    #[test]
    fn test_malformed_digest_never_verifies() {
        assert!(!IntegrityVerifier::verify_hex(b"data", "not-hex"));
        assert!(!IntegrityVerifier::verify_hex(b"data", "abcd"));

        let result = IntegrityVerifier::check_hex(b"data", "zz");
        assert!(matches!(result, Err(IntegrityError::MalformedDigest(_))));
    }

    #[test]
    fn test_check_hex_reports_both_digests() {
        let expected = IntegrityVerifier::digest_hex(b"original");
        let result = IntegrityVerifier::check_hex(b"tampered", &expected);

        match result {
            Err(IntegrityError::DigestMismatch { expected: e, actual: a }) => {
                assert_eq!(e, expected);
                assert_eq!(a, IntegrityVerifier::digest_hex(b"tampered"));
            }
            other => panic!("expected DigestMismatch, got {other:?}"),
        }
    }
}
