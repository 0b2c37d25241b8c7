//! Error types for the ledger, the credential store codec and the protocol.

use std::time::Duration;

use thiserror::Error;

/// First chain-integrity violation found while scanning oldest to newest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityError {
    #[error("block {index} hash mismatch: stored {stored}, recomputed {recomputed}")]
    HashMismatch {
        index: u64,
        stored: String,
        recomputed: String,
    },

    #[error("block {index} does not link to its predecessor: expected {expected}, got {got}")]
    BrokenLink {
        index: u64,
        expected: String,
        got: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiningError {
    #[error("mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("mining timed out after {elapsed:?} ({attempts} attempts)")]
    TimedOut { elapsed: Duration, attempts: u64 },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger is empty")]
    Empty,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Mining(#[from] MiningError),

    #[error("stale candidate: built on {candidate_parent}, tip is now {tip}")]
    StaleCandidate { candidate_parent: String, tip: String },

    #[error("candidate block {index} is not sealed at difficulty {difficulty}")]
    Unsealed { index: u64, difficulty: usize },

    #[error("block archive: {0}")]
    Archive(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown status {0:?}")]
    UnknownStatus(String),

    #[error("identity {0:?} has a status but no challenge map")]
    MissingChallenges(String),

    #[error("identity {0:?} has challenges but no status")]
    MissingStatus(String),

    #[error("invalid device id {0:?}")]
    InvalidDeviceId(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("difficulty {0} exceeds the {max} hex characters of a hash", max = crate::constants::HASH_HEX_SIZE)]
    Difficulty(usize),

    #[error("retention limit must be at least 1")]
    Retention,

    #[error("{name} must be at least 1")]
    Zero { name: &'static str },

    #[error("{name} must be a probability in [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("chain integrity violated: {0}")]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("snapshot round trip failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("generator returned {got} responses for {expected} challenges")]
    GeneratorMismatch { expected: usize, got: usize },

    #[error("device {0} vanished from the credential store")]
    UnknownDevice(String),
}
