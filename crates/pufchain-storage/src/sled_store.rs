use anyhow::{Context, Result};
use pufchain_core::{Block, BlockArchive};
use sled::{Db, IVec, Tree};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const KEY_TIP_INDEX: &[u8] = b"tip_index";

/// Block archive on sled. Blocks live in their own tree keyed by big-endian
/// index, so iteration order is chain order.
#[derive(Clone)]
pub struct SledArchive {
  db: Db,
  blocks: Tree,
}

impl SledArchive {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let db = sled::open(path.as_ref())
      .with_context(|| format!("open sled at {}", path.as_ref().display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    info!(blocks = blocks.len(), "sled archive opened");
    Ok(Self { db, blocks })
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  /// Drops every archived block and the tip marker.
  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.db.remove(KEY_TIP_INDEX)?;
    self.db.flush()?;
    Ok(())
  }

  pub fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}

fn decode_index(v: &IVec) -> Result<u64> {
  let arr: [u8; 8] = v
    .as_ref()
    .try_into()
    .context("tip index is not 8 bytes")?;
  Ok(u64::from_be_bytes(arr))
}

impl BlockArchive for SledArchive {
  fn put_block(&self, block: &Block) -> Result<()> {
    let key = block.index.to_be_bytes();
    let bytes = bincode::serialize(block)?;
    self.blocks.insert(key, bytes)?;

    let newer = match self.db.get(KEY_TIP_INDEX)? {
      Some(v) => block.index >= decode_index(&v)?,
      None => true,
    };
    if newer {
      self.db.insert(KEY_TIP_INDEX, key.to_vec())?;
    }

    self.db.flush()?;
    debug!(index = block.index, "block archived");
    Ok(())
  }

  fn get_block(&self, index: u64) -> Result<Option<Block>> {
    let key = index.to_be_bytes();
    match self.blocks.get(key)? {
      Some(ivec) => {
        let block = bincode::deserialize(&ivec)
          .with_context(|| format!("archived block {index} is corrupt"))?;
        Ok(Some(block))
      }
      None => Ok(None),
    }
  }

  fn tip_index(&self) -> Result<Option<u64>> {
    self.db.get(KEY_TIP_INDEX)?.map(|v| decode_index(&v)).transpose()
  }
}
