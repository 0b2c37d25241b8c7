pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
pub const GENESIS_PAYLOAD: &str = "Genesis Block";
pub const POW_TARGET_DIFFICULTY: usize = 4;
pub const RETENTION_LIMIT: usize = 10;
/// How many nonces are tried between cancellation / deadline checks.
pub const MINING_CHECK_INTERVAL: u64 = 4096;

pub const CHALLENGE_BITS: usize = 64;
pub const NUM_CRP: usize = 10;
pub const MAX_ATTEMPTS: u32 = 3;
pub const SAMPLE_SIZE: usize = 64;
pub const FAILURE_PROBABILITY: f64 = 0.3;
pub const DENY_PROBABILITY: f64 = 0.2;
