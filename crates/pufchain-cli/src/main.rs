mod sim;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pufchain_core::{Authenticator, Ledger, LedgerConfig, ProtocolConfig, PufKind};
use rand::{rngs::StdRng, SeedableRng};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pufchain-cli")]
#[command(about = "PUF enrollment and authentication over a proof-of-work ledger")]
struct Cli {
    #[command(flatten)]
    ledger: LedgerArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args, Debug)]
struct LedgerArgs {
    /// JSON file with optional "ledger" and "protocol" sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Required leading hex zeros per mined block
    #[arg(long, global = true)]
    difficulty: Option<usize>,

    /// Blocks kept in memory
    #[arg(long, global = true)]
    retention: Option<usize>,

    /// Abort a mining run after this many milliseconds
    #[arg(long, global = true)]
    mining_timeout_ms: Option<u64>,

    /// Archive every block in a sled database under this directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enroll and authenticate simulated devices
    Simulate {
        /// Number of devices
        #[arg(long, default_value_t = 10)]
        devices: u64,
        /// Use one PUF kind for every device instead of picking at random
        #[arg(long)]
        kind: Option<PufKind>,
        /// Seed for device selection and protocol randomness
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        num_crp: Option<usize>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        sample_size: Option<usize>,
        #[arg(long)]
        failure_probability: Option<f64>,
        #[arg(long)]
        deny_probability: Option<f64>,
    },
    /// Mine placeholder blocks and validate the chain
    MineDemo {
        /// Number of blocks to append
        #[arg(long, default_value_t = 10)]
        blocks: u64,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    ledger: LedgerConfig,
    protocol: ProtocolConfig,
}

fn load_file_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parse config {}", path.display()))
        }
        None => Ok(FileConfig::default()),
    }
}

fn ledger_config(base: LedgerConfig, args: &LedgerArgs) -> Result<LedgerConfig> {
    let mut cfg = base;
    if let Some(d) = args.difficulty {
        cfg.difficulty = d;
    }
    if let Some(r) = args.retention {
        cfg.retention = r;
    }
    if let Some(ms) = args.mining_timeout_ms {
        cfg.mining_timeout = Some(Duration::from_millis(ms));
    }
    cfg.validate()?;
    Ok(cfg)
}

fn open_ledger(config: LedgerConfig, data_dir: Option<&PathBuf>) -> Result<Ledger> {
    match data_dir {
        Some(dir) => {
            let (archive, ledger) = pufchain_storage::open_ledger(dir, config)?;
            info!(archived = archive.len(), dir = %dir.display(), "using block archive");
            Ok(ledger)
        }
        None => Ok(Ledger::new(config)?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let file = load_file_config(cli.ledger.config.as_ref())?;
    let mut ledger = open_ledger(
        ledger_config(file.ledger, &cli.ledger)?,
        cli.ledger.data_dir.as_ref(),
    )?;
    let cancel = ledger.cancel_token();

    let work = match cli.cmd {
        Command::Simulate {
            devices,
            kind,
            seed,
            num_crp,
            max_attempts,
            sample_size,
            failure_probability,
            deny_probability,
        } => {
            let mut protocol = file.protocol;
            if let Some(v) = num_crp {
                protocol.num_crp = v;
            }
            if let Some(v) = max_attempts {
                protocol.max_attempts = v;
            }
            if let Some(v) = sample_size {
                protocol.sample_size = v;
            }
            if let Some(v) = failure_probability {
                protocol.failure_probability = v;
            }
            if let Some(v) = deny_probability {
                protocol.deny_probability = v;
            }

            let (mut picker, rng) = match seed {
                Some(s) => (StdRng::seed_from_u64(s), StdRng::seed_from_u64(s ^ 0x5eed)),
                None => (StdRng::from_entropy(), StdRng::from_entropy()),
            };
            let store = sim::initial_store(&ledger)?;
            let first_serial = store.len() as u64;
            let mut auth = Authenticator::with_store(ledger, store, protocol, rng)?;
            tokio::task::spawn_blocking(move || -> Result<()> {
                let summary = sim::simulate(&mut auth, &mut picker, devices, first_serial, kind)?;
                sim::print_summary(&summary);
                Ok(())
            })
        }
        Command::MineDemo { blocks } => tokio::task::spawn_blocking(move || -> Result<()> {
            let valid = sim::mine_demo(&mut ledger, blocks)?;
            println!("chain valid:        {valid}");
            println!("total hashes:       {}", ledger.total_hashes());
            println!(
                "average block time: {:.6} s",
                ledger.average_block_time().as_secs_f64()
            );
            println!("last hash rate:     {:.0} hashes/s", ledger.hash_rate());
            Ok(())
        }),
    };

    tokio::pin!(work);
    tokio::select! {
        res = &mut work => res.context("worker panicked")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling mining");
            cancel.cancel();
            work.await.context("worker panicked")?
        }
    }
}
