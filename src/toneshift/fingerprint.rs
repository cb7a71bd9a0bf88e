//! Stable hashing for job identity and cache keys.

use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// SHA-256 of `input`, hex-encoded.
pub(crate) fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// SHA-256 of `input`, truncated to the first `chars` hex characters.
///
/// `chars` must be even and at most 64; callers pass a compile-time constant.
pub(crate) fn sha256_hex_truncated(input: &str, chars: usize) -> String {
    let mut out = sha256_hex(input);
    out.truncate(chars);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_is_stable() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
        assert_eq!(sha256_hex("abc").len(), 64);
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        // FIPS 180-2 test vector for "abc".
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_truncation() {
        let full = sha256_hex("abc");
        let short = sha256_hex_truncated("abc", 16);
        assert_eq!(short.len(), 16);
        assert!(full.starts_with(&short));
    }
}
