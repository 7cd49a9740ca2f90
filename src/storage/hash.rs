//! Digest algorithms recorded for blobs

use crate::error::{ProxyError, ProxyResult};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Hash algorithms a blob store can compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Legacy digest, used for ETags
    Sha1,
    Sha256,
}

/// Default algorithm list for Galaxy repositories
pub const DEFAULT_HASH_ALGORITHMS: &[HashAlgorithm] = &[HashAlgorithm::Sha256, HashAlgorithm::Sha1];

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ProxyError;

    fn from_str(s: &str) -> ProxyResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(ProxyError::BadRequest(format!(
                "unsupported hash algorithm: {}",
                other
            ))),
        }
    }
}

/// Hex digests keyed by algorithm
pub type Hashes = BTreeMap<HashAlgorithm, String>;

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

/// Feeds the same bytes into every requested digest
pub struct MultiHasher {
    hashers: Vec<(HashAlgorithm, Hasher)>,
}

impl MultiHasher {
    /// Sha256 is always computed since blobs are addressed by it
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        let mut wanted: Vec<HashAlgorithm> = algorithms.to_vec();
        if !wanted.contains(&HashAlgorithm::Sha256) {
            wanted.push(HashAlgorithm::Sha256);
        }
        wanted.sort();
        wanted.dedup();

        let hashers = wanted
            .into_iter()
            .map(|algorithm| {
                let hasher = match algorithm {
                    HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
                    HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
                };
                (algorithm, hasher)
            })
            .collect();

        Self { hashers }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for (_, hasher) in &mut self.hashers {
            match hasher {
                Hasher::Sha1(h) => h.update(bytes),
                Hasher::Sha256(h) => h.update(bytes),
            }
        }
    }

    pub fn finalize(self) -> Hashes {
        self.hashers
            .into_iter()
            .map(|(algorithm, hasher)| {
                let digest = match hasher {
                    Hasher::Sha1(h) => hex::encode(h.finalize()),
                    Hasher::Sha256(h) => hex::encode(h.finalize()),
                };
                (algorithm, digest)
            })
            .collect()
    }
}

/// Digest a byte slice in one go
pub fn hash_bytes(algorithms: &[HashAlgorithm], bytes: &[u8]) -> Hashes {
    let mut hasher = MultiHasher::new(algorithms);
    hasher.update(bytes);
    hasher.finalize()
}
