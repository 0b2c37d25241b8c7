use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod constants;
pub mod contract;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod mine;
pub mod protocol;
pub mod puf;

pub use config::{LedgerConfig, ProtocolConfig};
pub use contract::{BlockReason, ChallengeKey, CredentialStore, OpaqueKey, Response, Status};
pub use error::{ConfigError, DecodeError, IntegrityError, LedgerError, MiningError, ProtocolError};
pub use identity::DeviceId;
pub use ledger::{verify_archived, BlockArchive, Ledger, MinedBlock};
pub use mine::{CancelToken, MiningMetrics, MiningStats};
pub use protocol::{Authenticator, SessionOutcome, SessionReport};
pub use puf::{Challenge, CrpSource, Puf, PufConfig, PufKind};

pub type Hash = [u8; 32];

/// Milliseconds since the unix epoch; 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A sealed ledger record.
///
/// `hash` always equals [`Block::recompute_hash`] for blocks that went through
/// [`Block::seal`] or mining; anything else is corruption and is caught by
/// [`Ledger::verify`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub previous_hash: String,
    pub payload: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Builds a block with nonce 0 and its initial hash.
    pub fn seal(
        index: u64,
        timestamp: u64,
        payload: impl Into<String>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            previous_hash: previous_hash.into(),
            payload: payload.into(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.recompute_hash();
        block
    }

    /// Canonical preimage. Field order is part of the format:
    /// index, timestamp, previous_hash, nonce, payload. Strings are length
    /// prefixed so two different field splits can never collide.
    pub fn hash_bytes(&self) -> Vec<u8> {
        let prev = self.previous_hash.as_bytes();
        let payload = self.payload.as_bytes();
        let mut bytes = Vec::with_capacity(8 * 5 + prev.len() + payload.len());
        bytes.extend_from_slice(&self.index.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&(prev.len() as u64).to_le_bytes());
        bytes.extend_from_slice(prev);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    pub fn digest(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }

    pub fn recompute_hash(&self) -> String {
        hex::encode(self.digest())
    }

    pub fn is_self_consistent(&self) -> bool {
        self.hash == self.recompute_hash()
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        pow::meets_difficulty(&self.hash, difficulty)
    }
}

pub mod pow {
    /// True when the first `difficulty` characters of `hex_hash` are all `'0'`.
    pub fn meets_difficulty(hex_hash: &str, difficulty: usize) -> bool {
        hex_hash.len() >= difficulty && hex_hash.bytes().take(difficulty).all(|b| b == b'0')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_block() -> Block {
        Block::seal(1, 1_600_000_200_000, "payload", "ab".repeat(32))
    }

    #[test]
    fn difficulty_counts_leading_hex_zeros() {
        let mut h = [0xffu8; 32];
        h[0] = 0x00;
        h[1] = 0x0a;
        let hex_hash = hex::encode(h);
        assert!(pow::meets_difficulty(&hex_hash, 0));
        assert!(pow::meets_difficulty(&hex_hash, 3));
        assert!(!pow::meets_difficulty(&hex_hash, 4));
        assert!(pow::meets_difficulty(&"0".repeat(64), 64));
        assert!(!pow::meets_difficulty("00", 3));
    }

    #[test]
    fn seal_starts_at_nonce_zero_with_valid_hash() {
        let block = fixed_block();
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash.len(), constants::HASH_HEX_SIZE);
        assert!(block.is_self_consistent());
    }

    #[test]
    fn block_hash_consistency() {
        let block = fixed_block();
        assert_eq!(block.recompute_hash(), block.recompute_hash());
        assert_eq!(block.hash, fixed_block().hash);
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut block = fixed_block();
        let hash1 = block.recompute_hash();
        block.nonce += 1;
        let hash2 = block.recompute_hash();
        assert_ne!(hash1, hash2);
        assert!(!block.is_self_consistent());
    }

    #[test]
    fn block_hash_changes_with_every_field() {
        let base = fixed_block();
        let variants = [
            Block::seal(2, base.timestamp, "payload", base.previous_hash.clone()),
            Block::seal(1, base.timestamp + 1, "payload", base.previous_hash.clone()),
            Block::seal(1, base.timestamp, "payload!", base.previous_hash.clone()),
            Block::seal(1, base.timestamp, "payload", "0"),
        ];
        for v in variants {
            assert_ne!(v.hash, base.hash);
        }
    }

    #[test]
    fn length_prefix_separates_fields() {
        let a = Block::seal(0, 0, "bc", "a");
        let b = Block::seal(0, 0, "c", "ab");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn block_header_hash_bytes_example() {
        let block = Block::seal(1, 42, "xyz", "0");
        let bytes = block.hash_bytes();
        assert_eq!(bytes.len(), 8 + 8 + 8 + 1 + 8 + 8 + 3);
        assert_eq!(&bytes[0..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &42u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &1u64.to_le_bytes());
        assert_eq!(&bytes[24..25], b"0");
        assert_eq!(&bytes[25..33], &0u64.to_le_bytes());
        assert_eq!(&bytes[33..41], &3u64.to_le_bytes());
        assert_eq!(&bytes[41..], b"xyz");
    }

    #[test]
    fn large_payload_hashes_without_truncation() {
        let big = "x".repeat(1 << 20);
        let a = Block::seal(3, 7, big.clone(), "0");
        let b = Block::seal(3, 7, format!("{big}y"), "0");
        assert_eq!(a.hash_bytes().len(), 8 * 5 + 1 + (1 << 20));
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn block_serialization_example() {
        let block = fixed_block();
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, back);
        assert!(back.is_self_consistent());
    }
}
