//! Supply-chain Verifier
//!
//! Checksum, typosquat distance, and manifest-hash checks for any
//! external artifact before it is loaded or installed (spec §4.11).
//! Generalizes the six-pattern malware-screen shape of §4.8 to the
//! package-origin problem. The Levenshtein distance is a ~15-line DP,
//! hand-rolled rather than pulling in a new crate — neither the teacher
//! nor the sibling example repos carry one for this.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::chain::canonical_json_bytes;

const TYPOSQUAT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub origin: String,
    pub checksum_sha256_hex: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    UntrustedOrigin,
    ChecksumMismatch,
    InvalidChecksumFormat,
    Typosquat { similar_to: String, similarity: String },
}

pub struct SupplyChainVerifier {
    trusted_origins: Vec<String>,
    protected_names: Vec<String>,
}

impl SupplyChainVerifier {
    pub fn new(trusted_origins: Vec<String>, protected_names: Vec<String>) -> Self {
        Self {
            trusted_origins,
            protected_names,
        }
    }

    pub fn verify_origin(&self, origin: &str) -> Result<(), VerificationFailure> {
        if self.trusted_origins.iter().any(|o| o == origin) {
            Ok(())
        } else {
            Err(VerificationFailure::UntrustedOrigin)
        }
    }

    pub fn verify_checksum(&self, descriptor: &ArtifactDescriptor, bytes: &[u8]) -> Result<(), VerificationFailure> {
        if descriptor.checksum_sha256_hex.len() != 64
            || !descriptor.checksum_sha256_hex.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(VerificationFailure::InvalidChecksumFormat);
        }
        let actual = hex::encode(Sha256::digest(bytes));
        if actual.eq_ignore_ascii_case(&descriptor.checksum_sha256_hex) {
            Ok(())
        } else {
            Err(VerificationFailure::ChecksumMismatch)
        }
    }

    /// Flag package names at Levenshtein similarity >= 0.7 against the
    /// protected-name list, spec §4.11.
    pub fn check_typosquat(&self, name: &str) -> Option<VerificationFailure> {
        for protected in &self.protected_names {
            if protected == name {
                continue;
            }
            let similarity = levenshtein_similarity(name, protected);
            if similarity >= TYPOSQUAT_THRESHOLD {
                return Some(VerificationFailure::Typosquat {
                    similar_to: protected.clone(),
                    similarity: format!("{similarity:.2}"),
                });
            }
        }
        None
    }

    /// Recompute the manifest hash over a sorted `{name -> {checksum,
    /// size}}` table, spec §4.11.
    pub fn manifest_hash(entries: &[ArtifactDescriptor]) -> String {
        let mut sorted: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        for e in entries {
            sorted.insert(
                e.name.as_str(),
                serde_json::json!({ "checksum": e.checksum_sha256_hex, "size": e.size }),
            );
        }
        let value = serde_json::to_value(&sorted).unwrap();
        hex::encode(Sha256::digest(canonical_json_bytes(&value)))
    }
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());

    let mut row: Vec<usize> = (0..=m).collect();
    for i in 1..=n {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=m {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[m]
}

fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein_distance(a, b) as f64 / max_len as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_close_typosquat() {
        let verifier = SupplyChainVerifier::new(vec![], vec!["reqwest".to_string()]);
        assert!(verifier.check_typosquat("reqwests").is_some());
        assert!(verifier.check_typosquat("completely-different").is_none());
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let verifier = SupplyChainVerifier::new(vec![], vec![]);
        let descriptor = ArtifactDescriptor {
            name: "pkg".to_string(),
            origin: "https://github.com/x/y".to_string(),
            checksum_sha256_hex: "0".repeat(64),
            size: 10,
        };
        assert_eq!(
            verifier.verify_checksum(&descriptor, b"hello world"),
            Err(VerificationFailure::ChecksumMismatch)
        );
    }

    #[test]
    fn manifest_hash_is_order_independent() {
        let a = ArtifactDescriptor {
            name: "a".to_string(),
            origin: "o".to_string(),
            checksum_sha256_hex: "1".repeat(64),
            size: 1,
        };
        let b = ArtifactDescriptor {
            name: "b".to_string(),
            origin: "o".to_string(),
            checksum_sha256_hex: "2".repeat(64),
            size: 2,
        };
        let hash1 = SupplyChainVerifier::manifest_hash(&[a.clone(), b.clone()]);
        let hash2 = SupplyChainVerifier::manifest_hash(&[b, a]);
        assert_eq!(hash1, hash2);
    }
}
