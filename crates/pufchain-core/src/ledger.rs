use crate::{
    config::LedgerConfig,
    constants::{GENESIS_PAYLOAD, GENESIS_PREVIOUS_HASH},
    error::{ConfigError, IntegrityError, LedgerError},
    mine::{mine_block, CancelToken, MiningMetrics, MiningStats},
    now_millis, Block,
};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Durable home for committed blocks. Retention only trims the in-memory
/// window; an archive keeps everything that was ever committed.
pub trait BlockArchive: Send + Sync {
    fn put_block(&self, block: &Block) -> Result<()>;
    fn get_block(&self, index: u64) -> Result<Option<Block>>;
    /// Index of the newest archived block, `None` when empty.
    fn tip_index(&self) -> Result<Option<u64>>;
}

/// A block that made it onto the ledger together with the work it took.
#[derive(Clone, Debug, PartialEq)]
pub struct MinedBlock {
    pub block: Block,
    pub stats: MiningStats,
}

/// Single-writer proof-of-work chain with a bounded retained window.
pub struct Ledger {
    blocks: VecDeque<Block>,
    config: LedgerConfig,
    metrics: MiningMetrics,
    cancel: CancelToken,
    archive: Option<Arc<dyn BlockArchive>>,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut blocks = VecDeque::with_capacity(config.retention + 1);
        blocks.push_back(Self::create_genesis());
        Ok(Self {
            blocks,
            config,
            metrics: MiningMetrics::default(),
            cancel: CancelToken::new(),
            archive: None,
        })
    }

    /// Opens a ledger backed by `archive`. An empty archive gets a fresh
    /// genesis block; otherwise the newest `retention` archived blocks become
    /// the retained window and are verified before use.
    pub fn with_archive(
        config: LedgerConfig,
        archive: Arc<dyn BlockArchive>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        let tip = archive
            .tip_index()
            .map_err(|e| LedgerError::Archive(format!("{e:#}")))?;

        let mut blocks = VecDeque::with_capacity(config.retention + 1);
        match tip {
            None => {
                let genesis = Self::create_genesis();
                archive
                    .put_block(&genesis)
                    .map_err(|e| LedgerError::Archive(format!("{e:#}")))?;
                blocks.push_back(genesis);
            }
            Some(tip) => {
                let first = (tip + 1).saturating_sub(config.retention as u64);
                for index in first..=tip {
                    let block = archive
                        .get_block(index)
                        .map_err(|e| LedgerError::Archive(format!("{e:#}")))?
                        .ok_or_else(|| {
                            LedgerError::Archive(format!("archived block {index} is missing"))
                        })?;
                    blocks.push_back(block);
                }
                info!(first, tip, "resumed ledger from archive");
            }
        }

        let ledger = Self {
            blocks,
            config,
            metrics: MiningMetrics::default(),
            cancel: CancelToken::new(),
            archive: Some(archive),
        };
        ledger.verify()?;
        Ok(ledger)
    }

    /// The fixed first block: index 0, previous hash `"0"`, never mined.
    pub fn create_genesis() -> Block {
        Block::seal(0, now_millis(), GENESIS_PAYLOAD, GENESIS_PREVIOUS_HASH)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn difficulty(&self) -> usize {
        self.config.difficulty
    }

    pub fn retention(&self) -> usize {
        self.config.retention
    }

    /// Token that aborts any mining run this ledger starts.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn latest(&self) -> Result<&Block, LedgerError> {
        self.blocks.back().ok_or(LedgerError::Empty)
    }

    /// Retained blocks, oldest first.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Unmined block linked to the current tip.
    pub fn candidate(&self, payload: impl Into<String>) -> Result<Block, LedgerError> {
        let tip = self.latest()?;
        Ok(Block::seal(
            tip.index + 1,
            now_millis(),
            payload,
            tip.hash.clone(),
        ))
    }

    /// Mines `payload` onto the tip and commits it.
    pub fn append(&mut self, payload: impl Into<String>) -> Result<MinedBlock, LedgerError> {
        let candidate = self.candidate(payload)?;
        let (block, stats) = mine_block(
            candidate,
            self.config.difficulty,
            &self.cancel,
            self.config.mining_timeout,
        )?;
        self.commit(block, stats)
    }

    /// Commits a block mined elsewhere. The block must still extend the tip and
    /// satisfy the difficulty; on any error the ledger is left untouched.
    pub fn commit(&mut self, block: Block, stats: MiningStats) -> Result<MinedBlock, LedgerError> {
        let tip = self.latest()?;
        if block.previous_hash != tip.hash || block.index != tip.index + 1 {
            return Err(LedgerError::StaleCandidate {
                candidate_parent: block.previous_hash,
                tip: tip.hash.clone(),
            });
        }
        if !block.is_self_consistent() || !block.meets_difficulty(self.config.difficulty) {
            return Err(LedgerError::Unsealed {
                index: block.index,
                difficulty: self.config.difficulty,
            });
        }
        if let Some(archive) = &self.archive {
            archive
                .put_block(&block)
                .map_err(|e| LedgerError::Archive(format!("{e:#}")))?;
        }

        self.blocks.push_back(block.clone());
        self.metrics.record(stats);
        while self.blocks.len() > self.config.retention {
            if let Some(dropped) = self.blocks.pop_front() {
                debug!(index = dropped.index, "block left the retained window");
            }
        }
        Ok(MinedBlock { block, stats })
    }

    /// Checks every retained block's own hash and every adjacent link, oldest
    /// first, and reports the first violation.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let mut previous: Option<&Block> = None;
        for block in &self.blocks {
            let recomputed = block.recompute_hash();
            if block.hash != recomputed {
                error!(index = block.index, "block hash mismatch");
                return Err(IntegrityError::HashMismatch {
                    index: block.index,
                    stored: block.hash.clone(),
                    recomputed,
                });
            }
            if let Some(prev) = previous {
                if block.previous_hash != prev.hash {
                    error!(index = block.index, "broken chain link");
                    return Err(IntegrityError::BrokenLink {
                        index: block.index,
                        expected: prev.hash.clone(),
                        got: block.previous_hash.clone(),
                    });
                }
            }
            previous = Some(block);
        }
        Ok(())
    }

    pub fn validate(&self) -> bool {
        self.verify().is_ok()
    }

    pub fn metrics(&self) -> &MiningMetrics {
        &self.metrics
    }

    pub fn total_hashes(&self) -> u64 {
        self.metrics.total_hashes()
    }

    pub fn total_time(&self) -> Duration {
        self.metrics.total_time()
    }

    pub fn average_block_time(&self) -> Duration {
        self.metrics.average_block_time()
    }

    pub fn hash_rate(&self) -> f64 {
        self.metrics.last_hash_rate()
    }

    pub fn mean_hash_rate(&self) -> f64 {
        self.metrics.mean_hash_rate()
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut VecDeque<Block> {
        &mut self.blocks
    }
}

/// Re-verifies linkage over archived blocks `first..=last`, so custody that
/// fell out of the retained window can still be audited.
pub fn verify_archived(
    archive: &dyn BlockArchive,
    first: u64,
    last: u64,
) -> Result<(), LedgerError> {
    let mut previous: Option<Block> = None;
    for index in first..=last {
        let block = archive
            .get_block(index)
            .map_err(|e| LedgerError::Archive(format!("{e:#}")))?
            .ok_or_else(|| LedgerError::Archive(format!("archived block {index} is missing")))?;
        if !block.is_self_consistent() {
            return Err(IntegrityError::HashMismatch {
                index,
                stored: block.hash.clone(),
                recomputed: block.recompute_hash(),
            }
            .into());
        }
        if let Some(prev) = &previous {
            if block.previous_hash != prev.hash {
                return Err(IntegrityError::BrokenLink {
                    index,
                    expected: prev.hash.clone(),
                    got: block.previous_hash,
                }
                .into());
            }
        }
        previous = Some(block);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiningError;
    use anyhow::anyhow;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryArchive {
        blocks: Mutex<BTreeMap<u64, Block>>,
        fail_writes: bool,
    }

    impl BlockArchive for MemoryArchive {
        fn put_block(&self, block: &Block) -> Result<()> {
            if self.fail_writes {
                return Err(anyhow!("disk full"));
            }
            self.blocks
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .insert(block.index, block.clone());
            Ok(())
        }

        fn get_block(&self, index: u64) -> Result<Option<Block>> {
            Ok(self
                .blocks
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .get(&index)
                .cloned())
        }

        fn tip_index(&self) -> Result<Option<u64>> {
            Ok(self
                .blocks
                .lock()
                .map_err(|_| anyhow!("poisoned"))?
                .keys()
                .next_back()
                .copied())
        }
    }

    fn ledger(difficulty: usize, retention: usize) -> Ledger {
        Ledger::new(LedgerConfig::new(difficulty, retention).unwrap()).unwrap()
    }

    #[test]
    fn genesis_block_example() {
        let ledger = ledger(2, 10);
        let genesis = ledger.latest().unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.payload, GENESIS_PAYLOAD);
        assert_eq!(genesis.nonce, 0);
        assert!(ledger.validate());
        assert_eq!(ledger.total_hashes(), 0);
        assert_eq!(ledger.average_block_time(), Duration::ZERO);
    }

    #[test]
    fn append_links_and_mines() {
        let mut ledger = ledger(2, 10);
        let genesis_hash = ledger.latest().unwrap().hash.clone();
        let mined = ledger.append("Block 1 data").unwrap();
        assert_eq!(mined.block.index, 1);
        assert_eq!(mined.block.previous_hash, genesis_hash);
        assert!(mined.block.hash.starts_with("00"));
        assert_eq!(ledger.latest().unwrap(), &mined.block);
        assert!(ledger.validate());
        assert_eq!(ledger.total_hashes(), mined.stats.hashes);
        assert_eq!(ledger.metrics().blocks_mined(), 1);
    }

    #[test]
    fn every_mined_block_meets_difficulty() {
        let mut ledger = ledger(2, 100);
        for i in 1..=5 {
            ledger.append(format!("Block {i} data")).unwrap();
        }
        assert!(ledger.blocks().skip(1).all(|b| b.hash.starts_with("00")));
        assert!(ledger.validate());
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let mut ledger = ledger(1, 10);
        ledger.append("a").unwrap();
        ledger.append("b").unwrap();
        ledger.blocks[1].payload = "forged".into();
        assert!(!ledger.validate());
        assert!(matches!(
            ledger.verify(),
            Err(IntegrityError::HashMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn rehashed_tamper_breaks_the_link() {
        let mut ledger = ledger(1, 10);
        ledger.append("a").unwrap();
        ledger.append("b").unwrap();
        ledger.blocks[1].payload = "forged".into();
        ledger.blocks[1].hash = ledger.blocks[1].recompute_hash();
        assert!(matches!(
            ledger.verify(),
            Err(IntegrityError::BrokenLink { index: 2, .. })
        ));
    }

    #[test]
    fn retention_keeps_newest_blocks() {
        let mut ledger = ledger(1, 3);
        let mut last = None;
        for i in 1..=7 {
            last = Some(ledger.append(format!("Block {i} data")).unwrap().block);
        }
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.latest().unwrap(), &last.unwrap());
        let indices: Vec<u64> = ledger.blocks().map(|b| b.index).collect();
        assert_eq!(indices, vec![5, 6, 7]);
        assert!(ledger.validate());
        assert_eq!(ledger.metrics().blocks_mined(), 7);
    }

    #[test]
    fn retention_of_one_keeps_only_tip() {
        let mut ledger = ledger(0, 1);
        ledger.append("x").unwrap();
        ledger.append("y").unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.latest().unwrap().payload, "y");
        assert!(ledger.validate());
    }

    #[test]
    fn cancelled_append_leaves_ledger_untouched() {
        let mut ledger = ledger(64, 10);
        ledger.cancel_token().cancel();
        let before: Vec<Block> = ledger.blocks().cloned().collect();
        let err = ledger.append("never").unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Mining(MiningError::Cancelled { .. })
        ));
        assert_eq!(ledger.blocks().cloned().collect::<Vec<_>>(), before);
        assert_eq!(ledger.metrics().blocks_mined(), 0);
    }

    #[test]
    fn stale_candidate_is_rejected() {
        let mut ledger = ledger(1, 10);
        let candidate = ledger.candidate("late").unwrap();
        let (mined, stats) = mine_block(candidate, 1, &CancelToken::new(), None).unwrap();
        ledger.append("first").unwrap();
        let err = ledger.commit(mined, stats).unwrap_err();
        assert!(matches!(err, LedgerError::StaleCandidate { .. }));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn unmined_candidate_is_rejected() {
        let mut ledger = ledger(8, 10);
        let mut candidate = ledger.candidate("lazy").unwrap();
        candidate.hash = "0".repeat(64);
        let err = ledger.commit(candidate, MiningStats::default()).unwrap_err();
        assert!(matches!(err, LedgerError::Unsealed { difficulty: 8, .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn archive_receives_blocks_beyond_retention() {
        let archive = Arc::new(MemoryArchive::default());
        let mut ledger =
            Ledger::with_archive(LedgerConfig::new(1, 2).unwrap(), archive.clone()).unwrap();
        for i in 1..=5 {
            ledger.append(format!("Block {i} data")).unwrap();
        }
        assert_eq!(ledger.len(), 2);
        assert_eq!(archive.tip_index().unwrap(), Some(5));
        verify_archived(archive.as_ref(), 0, 5).unwrap();

        let resumed = Ledger::with_archive(LedgerConfig::new(1, 2).unwrap(), archive).unwrap();
        assert_eq!(resumed.latest().unwrap(), ledger.latest().unwrap());
        assert_eq!(resumed.len(), 2);
    }

    #[test]
    fn failed_archive_write_aborts_append() {
        let good = Arc::new(MemoryArchive::default());
        let mut ledger = Ledger::with_archive(LedgerConfig::new(0, 5).unwrap(), good).unwrap();
        ledger.archive = Some(Arc::new(MemoryArchive {
            fail_writes: true,
            ..MemoryArchive::default()
        }));
        let err = ledger.append("lost").unwrap_err();
        assert!(matches!(err, LedgerError::Archive(_)));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.metrics().blocks_mined(), 0);
    }

    #[test]
    fn tampered_archive_is_detected() {
        let archive = Arc::new(MemoryArchive::default());
        let mut ledger =
            Ledger::with_archive(LedgerConfig::new(0, 10).unwrap(), archive.clone()).unwrap();
        ledger.append("a").unwrap();
        ledger.append("b").unwrap();
        let mut forged = archive.get_block(1).unwrap().unwrap();
        forged.payload = "forged".into();
        archive.put_block(&forged).unwrap();
        assert!(matches!(
            verify_archived(archive.as_ref(), 0, 2),
            Err(LedgerError::Integrity(IntegrityError::HashMismatch { index: 1, .. }))
        ));
    }
}
