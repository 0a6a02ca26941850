use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use label_crawl::persist::DEFAULT_LABEL;
use label_crawl::{AbiExtractor, Extractor, ResolverKind, WatchConfig, Watcher};
use label_data::{
    BlockCache, CachedResolver, ChainRpc, ChainSource, EvictionPolicy, RpcClient, RpcSource, Store,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
    rpc_url: Option<String>,
}

impl AppContext {
    fn rpc_url(&self, command: &str) -> Result<&str> {
        self.rpc_url
            .as_deref()
            .ok_or_else(|| eyre!("--rpc-url or LABEL_RPC_URL is required for {command}"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "label-watch")]
#[command(about = "Labels a contract's function calls and events as new blocks confirm")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/labels.sqlite")]
    db_path: String,

    /// JSON-RPC endpoint; falls back to LABEL_RPC_URL.
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Crawl a contract from the stored cursor and keep following the chain.
    Watch(WatchArgs),
    /// Copy a block range from the node into the local block store.
    Mirror(MirrorArgs),
    /// Show what the local database holds.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long)]
    contract: Address,

    /// Path to the contract's JSON ABI.
    #[arg(long)]
    abi: PathBuf,

    #[arg(long, default_value = DEFAULT_LABEL)]
    label: String,

    #[arg(long, default_value_t = 10)]
    confirmations: u64,

    /// Initial sleep between cycles, in seconds.
    #[arg(long, default_value_t = 1.0)]
    sleep: f64,

    #[arg(long, default_value_t = 0.1)]
    min_sleep: f64,

    #[arg(long, default_value_t = 60.0)]
    max_sleep: f64,

    #[arg(long)]
    start_block: Option<u64>,

    /// Start from --start-block even if the stored cursor is further ahead.
    #[arg(long)]
    force_start: bool,

    #[arg(long, default_value_t = 5)]
    batch_size: u64,

    #[arg(long, default_value_t = 1_000)]
    log_chunk_size: u64,

    /// rpc or cached (cache, then local block store, then node).
    #[arg(long, default_value = "rpc")]
    resolver: ResolverKind,

    #[arg(long, default_value_t = 500)]
    cache_capacity: usize,

    /// clear or lru.
    #[arg(long, default_value = "clear")]
    eviction: EvictionPolicy,

    #[arg(long, default_value_t = 100)]
    store_batch: u64,
}

impl WatchArgs {
    fn config(&self) -> Result<WatchConfig> {
        Ok(WatchConfig {
            label: self.label.clone(),
            confirmations: self.confirmations,
            sleep_interval: seconds(self.sleep, "--sleep")?,
            min_sleep: seconds(self.min_sleep, "--min-sleep")?,
            max_sleep: seconds(self.max_sleep, "--max-sleep")?,
            start_block: self.start_block,
            force_start: self.force_start,
            batch_size: self.batch_size,
            log_chunk_size: self.log_chunk_size,
            resolver: self.resolver,
            cache_capacity: self.cache_capacity,
            eviction: self.eviction,
            store_batch: self.store_batch,
            ..WatchConfig::new(self.contract)
        })
    }
}

#[derive(Args, Debug)]
struct MirrorArgs {
    #[arg(long)]
    start_block: u64,

    #[arg(long)]
    end_block: u64,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Also report labels written for this contract.
    #[arg(long)]
    contract: Option<Address>,

    #[arg(long, default_value = DEFAULT_LABEL)]
    label: String,

    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
        rpc_url: cli
            .rpc_url
            .or_else(|| std::env::var("LABEL_RPC_URL").ok()),
    };

    match cli.command {
        Commands::Watch(args) => handle_watch(&ctx, args).await,
        Commands::Mirror(args) => handle_mirror(&ctx, args).await,
        Commands::Status(args) => handle_status(&ctx, args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn handle_watch(ctx: &AppContext, args: WatchArgs) -> Result<()> {
    let config = args.config()?;
    config.validate().wrap_err("invalid watch configuration")?;

    let abi_json = std::fs::read_to_string(&args.abi)
        .wrap_err_with(|| format!("failed to read ABI file {}", args.abi.display()))?;
    let abi: JsonAbi = serde_json::from_str(&abi_json)
        .wrap_err_with(|| format!("failed to parse ABI file {}", args.abi.display()))?;

    let rpc_url = ctx.rpc_url("watch")?;
    ensure_parent_dir(&ctx.db_path)?;
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;
    let rpc = RpcClient::new(rpc_url).await?;
    let extractor = AbiExtractor::new(rpc.clone(), &abi, config.contract_address)
        .with_log_chunk_size(config.log_chunk_size);

    match config.resolver {
        ResolverKind::Rpc => {
            let source = RpcSource::new(rpc.clone());
            watch(config, &store, &rpc, &source, &extractor).await
        }
        ResolverKind::Cached => {
            let cache = BlockCache::new(config.cache_capacity, config.eviction);
            let resolver =
                CachedResolver::new(rpc.clone(), cache).with_store_batch(config.store_batch);
            let source = resolver.with_store(&store);
            watch(config, &store, &rpc, &source, &extractor).await
        }
    }
}

async fn watch(
    config: WatchConfig,
    store: &Store,
    rpc: &dyn ChainRpc,
    source: &dyn ChainSource,
    extractor: &dyn Extractor,
) -> Result<()> {
    let mut watcher = Watcher::start(config, store, rpc, source, extractor)
        .await
        .wrap_err("failed to start watcher")?;
    info!(
        address = %watcher.address(),
        cursor = watcher.cursor(),
        "watching contract, ctrl-c to stop"
    );

    tokio::select! {
        () = watcher.run() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.wrap_err("failed to listen for ctrl-c")?;
            info!("watch command stopped");
            Ok(())
        }
    }
}

async fn handle_mirror(ctx: &AppContext, args: MirrorArgs) -> Result<()> {
    if args.start_block > args.end_block {
        return Err(eyre!(
            "invalid range: start-block {} is greater than end-block {}",
            args.start_block,
            args.end_block
        ));
    }

    let rpc_url = ctx.rpc_url("mirror")?;
    ensure_parent_dir(&ctx.db_path)?;
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;
    let rpc = RpcClient::new(rpc_url).await?;

    let stats = rpc
        .mirror_range(args.start_block, args.end_block, &store)
        .await
        .wrap_err("failed to mirror block range")?;

    info!(
        start_block = args.start_block,
        end_block = args.end_block,
        mirrored = stats.mirrored,
        skipped = stats.skipped,
        missing = stats.missing,
        failed = stats.failed,
        transactions = stats.transactions,
        db_path = %ctx.db_path,
        "mirror command finished"
    );

    if stats.failed > 0 {
        return Err(eyre!(
            "{} blocks could not be mirrored; rerun the same range to fill them in",
            stats.failed
        ));
    }
    Ok(())
}

fn handle_status(ctx: &AppContext, args: StatusArgs) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let (min_block, max_block, block_count) = store
        .block_range()
        .wrap_err("failed to query block range")?;

    let labels = match args.contract {
        Some(address) => {
            let (calls, events) = store
                .label_counts(&args.label, address)
                .wrap_err("failed to count labels")?;
            let latest = store
                .latest_label(&args.label, address)
                .wrap_err("failed to query latest label")?;
            Some((address, calls, events, latest))
        }
        None => None,
    };

    if args.output == "json" {
        let mut report = serde_json::json!({
            "db_path": ctx.db_path,
            "blocks": block_count,
            "min_block": (block_count > 0).then_some(min_block),
            "max_block": (block_count > 0).then_some(max_block),
        });
        if let Some((address, calls, events, latest)) = &labels {
            report["labels"] = serde_json::json!({
                "label": args.label,
                "address": address.to_checksum(None),
                "calls": calls,
                "events": events,
                "last_block": latest.as_ref().map(|label| label.block_number),
                "last_block_timestamp": latest.as_ref().map(|label| label.block_timestamp),
            });
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Database Path", ctx.db_path.as_str()]);

    if block_count > 0 {
        table.add_row(vec!["Blocks", &block_count.to_string()]);
        table.add_row(vec!["Block Range", &format!("{min_block} - {max_block}")]);
    } else {
        table.add_row(vec!["Blocks", "0"]);
        table.add_row(vec!["Block Range", "No blocks in database"]);
    }

    if let Some((address, calls, events, latest)) = &labels {
        table.add_row(vec!["Label", args.label.as_str()]);
        table.add_row(vec!["Contract", &address.to_checksum(None)]);
        table.add_row(vec!["Call Labels", &calls.to_string()]);
        table.add_row(vec!["Event Labels", &events.to_string()]);
        match latest {
            Some(label) => {
                let datetime = chrono::DateTime::from_timestamp(label.block_timestamp as i64, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                table.add_row(vec![
                    "Last Labeled Block",
                    &format!("{} ({datetime} UTC)", label.block_number),
                ]);
            }
            None => {
                table.add_row(vec!["Last Labeled Block", "Nothing labeled yet"]);
            }
        }
    }

    println!("\n{}\n", table);

    info!(
        blocks = block_count,
        db_path = %ctx.db_path,
        "status command completed"
    );

    Ok(())
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .wrap_err_with(|| format!("{flag} must be a non-negative number of seconds"))
}

fn ensure_parent_dir(db_path: &str) -> Result<()> {
    match Path::new(db_path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create data directory {}", dir.display())),
        _ => Ok(()),
    }
}
