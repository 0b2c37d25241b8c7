pub mod sled_store;

use anyhow::{Context, Result};
use pufchain_core::{Ledger, LedgerConfig};
use sled_store::SledArchive;
use std::path::Path;
use std::sync::Arc;

/// Opens (or creates) the archive under `dir` and a ledger resumed from it.
pub fn open_ledger<P: AsRef<Path>>(dir: P, config: LedgerConfig) -> Result<(Arc<SledArchive>, Ledger)> {
    let archive = Arc::new(SledArchive::open(dir)?);
    let ledger = Ledger::with_archive(config, archive.clone()).context("resume ledger from archive")?;
    Ok((archive, ledger))
}
