//! Safety number (fingerprint) generation for out-of-band key verification.
//!
//! Users read the digit groups to each other, or compare them on screen, to
//! confirm that the signing key the relay delivered really belongs to the
//! peer and was not substituted in transit.

use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

/// Fingerprint format version, mixed into the first hash round.
const FINGERPRINT_VERSION: u16 = 1;

/// Number of SHA-512 rounds over the key.
const FINGERPRINT_ITERATIONS: u32 = 5200;

/// Number of 5-digit groups in the rendered fingerprint.
const GROUP_COUNT: usize = 12;

/// Digest bytes consumed per group.
const BYTES_PER_GROUP: usize = 5;

/// A safety number: 60 decimal digits in 12 groups of 5.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    groups: Vec<String>,
}

impl Fingerprint {
    /// Fingerprint the canonical encoding of a public key.
    ///
    /// The same bytes always give the same fingerprint.
    pub fn of(public_key: &[u8]) -> Self {
        let mut hasher = Sha512::new();
        hasher.update(FINGERPRINT_VERSION.to_be_bytes());
        hasher.update(public_key);
        let mut digest = hasher.finalize();

        for _ in 1..FINGERPRINT_ITERATIONS {
            let mut hasher = Sha512::new();
            hasher.update(digest);
            hasher.update(public_key);
            digest = hasher.finalize();
        }

        let groups = digest[..GROUP_COUNT * BYTES_PER_GROUP]
            .chunks(BYTES_PER_GROUP)
            .map(|chunk| {
                let value = chunk.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                format!("{:05}", value % 100_000)
            })
            .collect();

        Self { groups }
    }

    /// The digit groups, in reading order.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// All 60 digits without separators.
    pub fn digits(&self) -> String {
        self.groups.concat()
    }

    /// Compare against another fingerprint in constant time.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.digits().as_bytes().ct_eq(other.digits().as_bytes()).into()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.groups.join(" "))
    }
}
