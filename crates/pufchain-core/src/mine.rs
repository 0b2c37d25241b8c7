use crate::{constants::MINING_CHECK_INTERVAL, error::MiningError, Block};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shared flag that stops an in-flight mining run. Clones observe the same flag.
/// A request is consumed by the mining run that observes it, so the next run
/// starts clean.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a pending request, reporting whether there was one.
    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Outcome of one successful mining run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MiningStats {
    pub hashes: u64,
    pub elapsed: Duration,
}

impl MiningStats {
    /// Hashes per second, 0 when no time was measured.
    pub fn hash_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.hashes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Running totals over every block the ledger has mined.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MiningMetrics {
    total_hashes: u64,
    total_time: Duration,
    blocks_mined: u64,
    last: MiningStats,
}

impl MiningMetrics {
    pub(crate) fn record(&mut self, stats: MiningStats) {
        self.total_hashes += stats.hashes;
        self.total_time += stats.elapsed;
        self.blocks_mined += 1;
        self.last = stats;
    }

    pub fn total_hashes(&self) -> u64 {
        self.total_hashes
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined
    }

    pub fn last(&self) -> MiningStats {
        self.last
    }

    pub fn average_block_time(&self) -> Duration {
        if self.blocks_mined == 0 {
            return Duration::ZERO;
        }
        self.total_time.div_f64(self.blocks_mined as f64)
    }

    /// Hash rate of the most recent mining run.
    pub fn last_hash_rate(&self) -> f64 {
        self.last.hash_rate()
    }

    /// Total hashes over total mining time.
    pub fn mean_hash_rate(&self) -> f64 {
        MiningStats {
            hashes: self.total_hashes,
            elapsed: self.total_time,
        }
        .hash_rate()
    }
}

/// Mines `block` by incrementing its nonce until the hex hash starts with
/// `difficulty` zeros. Returns the sealed block with the attempt count and
/// elapsed time.
///
/// The search is unbounded unless `cancel` fires or `timeout` elapses; both are
/// polled every [`MINING_CHECK_INTERVAL`] attempts. On error the block is
/// dropped, so a caller never sees a half-mined candidate.
pub fn mine_block(
    mut block: Block,
    difficulty: usize,
    cancel: &CancelToken,
    timeout: Option<Duration>,
) -> Result<(Block, MiningStats), MiningError> {
    let start = Instant::now();
    let mut hashes = 0u64;

    while !block.meets_difficulty(difficulty) {
        if hashes % MINING_CHECK_INTERVAL == 0 {
            if cancel.take() {
                debug!(index = block.index, hashes, "mining cancelled");
                return Err(MiningError::Cancelled { attempts: hashes });
            }
            if let Some(limit) = timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    return Err(MiningError::TimedOut {
                        elapsed,
                        attempts: hashes,
                    });
                }
            }
        }
        block.nonce = block.nonce.wrapping_add(1);
        block.hash = block.recompute_hash();
        hashes += 1;
    }

    let stats = MiningStats {
        hashes,
        elapsed: start.elapsed(),
    };
    info!(
        "Mined block {} with nonce {} and hash {} ({} hashes in {:?})",
        block.index, block.nonce, block.hash, stats.hashes, stats.elapsed
    );
    Ok((block, stats))
}
