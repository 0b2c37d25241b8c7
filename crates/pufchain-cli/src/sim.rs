use anyhow::{Context, Result};
use pufchain_core::{
    Authenticator, CredentialStore, DeviceId, Ledger, Puf, PufKind, SessionReport,
};
use rand::{seq::SliceRandom, Rng};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Final statuses of every device in a run, grouped by status text.
#[derive(Debug, Default)]
pub struct StatesTracker {
    by_status: BTreeMap<String, Vec<DeviceId>>,
}

impl StatesTracker {
    pub fn record(&mut self, report: &SessionReport) {
        self.by_status
            .entry(report.outcome.status().to_string())
            .or_default()
            .push(report.device.clone());
    }

    pub fn count(&self, status: &str) -> usize {
        self.by_status.get(status).map_or(0, Vec::len)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<DeviceId>)> {
        self.by_status.iter()
    }
}

#[derive(Debug, Default)]
pub struct Summary {
    pub kinds: BTreeMap<PufKind, usize>,
    pub states: StatesTracker,
    pub total_hashes: u64,
    pub total_time: Duration,
    pub average_block_time: Duration,
    pub mean_hash_rate: f64,
    pub chain_valid: bool,
}

/// Snapshot to continue from: the tip's payload when it holds one, otherwise
/// an empty store (genesis and placeholder blocks carry plain text).
pub fn initial_store(ledger: &Ledger) -> Result<CredentialStore> {
    let tip = ledger.latest()?;
    if tip.index == 0 || !tip.payload.starts_with('{') {
        return Ok(CredentialStore::new());
    }
    CredentialStore::decode(&tip.payload)
        .with_context(|| format!("decode snapshot in block {}", tip.index))
}

/// Enrolls and authenticates `devices` simulated devices one after another.
/// Serials continue after `first_serial` so resumed runs mint fresh ids.
pub fn simulate<R: Rng>(
    auth: &mut Authenticator<R>,
    picker: &mut impl Rng,
    devices: u64,
    first_serial: u64,
    kind: Option<PufKind>,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for serial in first_serial..first_serial + devices {
        let kind = match kind {
            Some(k) => k,
            None => *PufKind::ALL
                .choose(picker)
                .context("no PUF kinds available")?,
        };
        let id = DeviceId::derive(kind.as_str(), serial);
        let mut puf = Puf::standard(kind, serial + 1);
        info!(%kind, device = id.short(), "simulating device");

        let report = auth
            .enroll_and_authenticate(&id, &mut puf)
            .with_context(|| format!("session for device {id}"))?;
        info!(device = id.short(), status = %report.outcome.status(), "session finished");

        *summary.kinds.entry(kind).or_default() += 1;
        summary.states.record(&report);
    }

    let ledger = auth.ledger();
    summary.total_hashes = ledger.total_hashes();
    summary.total_time = ledger.total_time();
    summary.average_block_time = ledger.average_block_time();
    summary.mean_hash_rate = ledger.mean_hash_rate();
    summary.chain_valid = ledger.validate();
    Ok(summary)
}

/// Appends `count` placeholder blocks and reports whether the chain validates.
pub fn mine_demo(ledger: &mut Ledger, count: u64) -> Result<bool> {
    for i in 1..=count {
        let mined = ledger.append(format!("Block {i} data"))?;
        info!(
            index = mined.block.index,
            hashes = mined.stats.hashes,
            rate = mined.stats.hash_rate(),
            "placeholder block mined"
        );
    }
    Ok(ledger.validate())
}

pub fn print_summary(summary: &Summary) {
    println!("PUFs generated:");
    for (kind, count) in &summary.kinds {
        println!("  {kind}: {count}");
    }
    println!();
    for (status, ids) in summary.states.iter() {
        println!("{status}: {}", ids.len());
        for id in ids {
            println!("  - {id}");
        }
    }
    println!();
    println!("chain valid:        {}", summary.chain_valid);
    println!("total hashes:       {}", summary.total_hashes);
    println!("total time:         {:.6} s", summary.total_time.as_secs_f64());
    println!(
        "average block time: {:.6} s",
        summary.average_block_time.as_secs_f64()
    );
    println!("mean hash rate:     {:.0} hashes/s", summary.mean_hash_rate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pufchain_core::{LedgerConfig, ProtocolConfig};
    use rand::{rngs::StdRng, SeedableRng};

    fn authenticator(config: ProtocolConfig) -> Authenticator<StdRng> {
        let ledger = Ledger::new(LedgerConfig::new(1, 10).unwrap()).unwrap();
        Authenticator::new(ledger, config, StdRng::seed_from_u64(3)).unwrap()
    }

    #[test]
    fn simulate_tracks_every_device() {
        let mut auth = authenticator(ProtocolConfig::default());
        let mut picker = StdRng::seed_from_u64(9);
        let summary = simulate(&mut auth, &mut picker, 6, 0, None).unwrap();

        assert_eq!(summary.kinds.values().sum::<usize>(), 6);
        let tracked: usize = summary.states.iter().map(|(_, ids)| ids.len()).sum();
        assert_eq!(tracked, 6);
        assert!(summary.chain_valid);
        assert_eq!(auth.store().len(), 6);
        assert!(auth.ledger().len() <= 10);
    }

    #[test]
    fn quiet_run_authenticates_everyone() {
        let mut auth = authenticator(ProtocolConfig {
            failure_probability: 0.0,
            deny_probability: 0.0,
            ..ProtocolConfig::default()
        });
        let mut picker = StdRng::seed_from_u64(1);
        let summary =
            simulate(&mut auth, &mut picker, 3, 0, Some(PufKind::BistableRing)).unwrap();
        assert_eq!(summary.states.count("Authenticated"), 3);
        assert_eq!(summary.kinds.get(&PufKind::BistableRing), Some(&3));
    }

    #[test]
    fn initial_store_ignores_placeholder_tips() {
        let mut ledger = Ledger::new(LedgerConfig::new(0, 10).unwrap()).unwrap();
        assert!(initial_store(&ledger).unwrap().is_empty());
        assert!(mine_demo(&mut ledger, 2).unwrap());
        assert!(initial_store(&ledger).unwrap().is_empty());

        ledger.append("{not json").unwrap();
        assert!(initial_store(&ledger).is_err());
    }
}
