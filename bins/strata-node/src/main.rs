//! Strata history store operator tool.
//!
//! Opens the RocksDB history of a node and inspects, verifies, imports into,
//! rolls back or compacts it. An unimplemented feature reaching activation
//! during import stops the process with exit status 2.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use strata_core::constants::{NetworkType, MAX_BLOCK_SIZE};
use strata_core::error::StrataError;
use strata_core::features::{describe, IMPLEMENTED_FEATURES};
use strata_core::traits::{FeatureProvider, History};
use strata_core::types::{Block, FeatureId};
use strata_history::{BlockLedger, LedgerConfig, RocksStore};
use tracing::{debug, error, info};

/// Inspect and maintain a Strata block history store.
#[derive(Parser, Debug)]
#[command(name = "strata-node", version)]
struct Cli {
    /// TOML configuration file (environment: STRATA__<KEY>)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the history database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Network: mainnet, testnet or regtest
    #[arg(long, global = true)]
    network: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the chain tip and accepted features.
    Info(InfoArgs),
    /// Verify index consistency.
    Check(CheckArgs),
    /// List feature votes and activation status.
    Features,
    /// Append blocks from a length-prefixed block file.
    Import(ImportArgs),
    /// Discard blocks above a height.
    Rollback(RollbackArgs),
    /// Compact the database.
    Compact,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Print machine-readable JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CheckArgs {
    /// Scan every height instead of comparing index sizes.
    #[arg(long)]
    deep: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// File of blocks, each a u32 little-endian length followed by the block bytes.
    file: PathBuf,
}

#[derive(Args, Debug)]
struct RollbackArgs {
    /// Height to roll back to.
    #[arg(long)]
    to: u64,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    };

    init_logging(&config.log_level, &cli.log_format);

    if let Err(e) = run(cli.command, &config) {
        let fatal = e
            .downcast_ref::<StrataError>()
            .is_some_and(StrataError::is_fatal);
        if fatal {
            error!("{e:#}; update the node software before continuing");
            process::exit(2);
        }
        error!("{e:#}");
        process::exit(1);
    }
}

/// Merge the config file, environment and command-line overrides.
fn load_config(cli: &Cli) -> Result<LedgerConfig> {
    let mut config = LedgerConfig::load(cli.config.as_deref())?;
    if let Some(network) = &cli.network {
        config.network = parse_network(network)?;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    Ok(config)
}

fn parse_network(s: &str) -> Result<NetworkType> {
    match s {
        "mainnet" => Ok(NetworkType::Mainnet),
        "testnet" => Ok(NetworkType::Testnet),
        "regtest" => Ok(NetworkType::Regtest),
        _ => bail!("Invalid network (must be 'mainnet', 'testnet' or 'regtest')"),
    }
}

fn open_ledger(config: &LedgerConfig) -> Result<BlockLedger<RocksStore>> {
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data_dir {}", data_dir.display()))?;
    info!(network = ?config.network, data_dir = %data_dir.display(), "opening history");
    let ledger = BlockLedger::open_path(config.db_path(), config.ledger_settings()?)?;
    Ok(ledger)
}

fn run(command: Commands, config: &LedgerConfig) -> Result<()> {
    let ledger = open_ledger(config)?;
    match command {
        Commands::Info(args) => info_cmd(&ledger, args),
        Commands::Check(args) => check_cmd(&ledger, args),
        Commands::Features => features_cmd(&ledger),
        Commands::Import(args) => import_cmd(&ledger, args),
        Commands::Rollback(args) => rollback_cmd(&ledger, args),
        Commands::Compact => {
            ledger.compact()?;
            println!("compaction complete");
            Ok(())
        }
    }
}

fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{ms} ms"))
}

fn info_cmd(ledger: &BlockLedger<RocksStore>, args: InfoArgs) -> Result<()> {
    let stats = ledger.stats()?;
    let last = ledger.last_block()?;

    if args.json {
        let accepted: serde_json::Map<String, serde_json::Value> = stats
            .accepted_features
            .iter()
            .map(|(id, h)| (id.to_string(), serde_json::json!(h)))
            .collect();
        let out = serde_json::json!({
            "height": stats.height,
            "score": stats.score.to_string(),
            "last_block_id": stats.last_block_id,
            "last_block_timestamp": last.as_ref().map(Block::timestamp),
            "last_block_generator": last.as_ref().map(|b| hex::encode(b.header.generator)),
            "accepted_features": accepted,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("height:    {}", stats.height);
    println!("score:     {}", stats.score);
    match (&stats.last_block_id, &last) {
        (Some(id), Some(block)) => {
            println!("tip:       {id}");
            println!("timestamp: {}", format_timestamp(block.timestamp()));
            println!("generator: {}", hex::encode(block.header.generator));
        }
        _ => println!("tip:       (empty chain)"),
    }
    if stats.accepted_features.is_empty() {
        println!("accepted:  none");
    } else {
        for (id, h) in &stats.accepted_features {
            println!("accepted:  {} at height {h}", describe(*id));
        }
    }
    Ok(())
}

fn check_cmd(ledger: &BlockLedger<RocksStore>, args: CheckArgs) -> Result<()> {
    ledger.check_consistency()?;
    if !args.deep {
        println!("index sizes consistent at height {}", ledger.height()?);
        return Ok(());
    }

    let report = ledger.verify_deep()?;
    for problem in &report.problems {
        println!("problem: {problem}");
    }
    if !report.is_consistent() {
        bail!(
            "{} problem(s) found in {} block(s)",
            report.problems.len(),
            report.blocks_checked
        );
    }
    println!("{} block(s) verified at height {}", report.blocks_checked, report.height);
    Ok(())
}

fn features_cmd(ledger: &BlockLedger<RocksStore>) -> Result<()> {
    let height = ledger.height()?;
    let settings = ledger.activation_settings();
    let votes = ledger.feature_votes_within_window(height)?;
    let accepted = ledger.accepted_features()?;

    let mut ids: Vec<FeatureId> = IMPLEMENTED_FEATURES.iter().map(|f| f.id).collect();
    ids.extend(accepted.keys().copied());
    ids.extend(votes.keys().copied());
    ids.sort_unstable();
    ids.dedup();

    println!(
        "height {height}, window {} opening at {}, quorum {}",
        settings.window_size(),
        settings.window_opening(height),
        settings.min_votes()
    );
    for id in ids {
        let status = ledger.feature_status(id, height)?;
        let activation = ledger
            .feature_activation_height(id)?
            .map(|h| format!(", activates at {h}"))
            .unwrap_or_default();
        let implemented = if ledger.tracker().feature_settings().is_implemented(id) {
            ""
        } else {
            " [not implemented]"
        };
        println!(
            "{:<50} {:?}, {} vote(s){activation}{implemented}",
            describe(id),
            status,
            votes.get(&id).copied().unwrap_or(0)
        );
    }
    Ok(())
}

/// Read the next length-prefixed record, or `None` at a clean end of file.
fn read_record(reader: &mut impl Read) -> Result<Option<Vec<u8>>> {
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_BLOCK_SIZE {
        bail!("block record of {len} bytes exceeds the {MAX_BLOCK_SIZE} byte limit");
    }
    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .context("truncated block record")?;
    Ok(Some(bytes))
}

fn import_cmd(ledger: &BlockLedger<RocksStore>, args: ImportArgs) -> Result<()> {
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let mut reader = BufReader::new(file);

    let mut imported = 0u64;
    let mut skipped = 0u64;
    let mut index = 0u64;
    while let Some(bytes) = read_record(&mut reader)? {
        index += 1;
        let block = Block::from_bytes(&bytes)
            .map_err(StrataError::from)
            .with_context(|| format!("record {index} does not decode"))?;
        if ledger.contains(&block.id())? {
            debug!(record = index, id = %block.id(), "block already stored");
            skipped += 1;
            continue;
        }
        ledger
            .append_block(&block, || Ok(()))
            .with_context(|| format!("record {index} rejected"))?;
        imported += 1;
    }

    ledger.flush()?;
    info!(imported, skipped, height = ledger.height()?, "import complete");
    println!("imported {imported} block(s), skipped {skipped}, height {}", ledger.height()?);
    Ok(())
}

fn rollback_cmd(ledger: &BlockLedger<RocksStore>, args: RollbackArgs) -> Result<()> {
    let from = ledger.height()?;
    let transactions = ledger.rollback_to(args.to)?;
    ledger.flush()?;
    println!(
        "rolled back from {from} to {}, {} transaction(s) released",
        ledger.height()?,
        transactions.len()
    );
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
