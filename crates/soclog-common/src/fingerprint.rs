//! Content fingerprints for ingested lines
//!
//! A fingerprint is the SHA-256 digest of a line's exact bytes. Two lines with
//! identical bytes always produce the same fingerprint, which is what lets the
//! sink's unique index reject re-deliveries across runs.

use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 digest of one source line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint a line.
    ///
    /// Callers must pass the same text they hand to the decoder (already
    /// trimmed), otherwise hash and parse would disagree on the record.
    pub fn of(line: &str) -> Self {
        Self::of_bytes(line.as_bytes())
    }

    /// Fingerprint raw bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form, as stored in the `raw_sha256` column
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_sha256_digest() {
        let fp = Fingerprint::of("hello world");
        assert_eq!(
            fp.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(fp.to_string(), fp.to_hex());
    }

    #[test]
    fn test_whitespace_is_significant() {
        // trimming is the caller's job; the digest sees every byte
        assert_ne!(Fingerprint::of("{}"), Fingerprint::of(" {}"));
    }

    #[test]
    fn test_hex_is_64_lowercase_chars() {
        let hex = Fingerprint::of(r#"{"a":1}"#).to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    proptest! {
        #[test]
        fn prop_identical_input_identical_digest(line in ".*") {
            prop_assert_eq!(Fingerprint::of(&line), Fingerprint::of(&line.clone()));
            prop_assert_eq!(Fingerprint::of(&line), Fingerprint::of_bytes(line.as_bytes()));
        }

        #[test]
        fn prop_distinct_input_distinct_digest(a in ".{0,64}", b in ".{0,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
        }
    }
}
