//! DDC Store CLI
//!
//! Entry point for the `ddc-store` maintenance tool.

use clap::{Parser, Subcommand};
use ddc_store::janitor::Event;
use ddc_store::{inventory, load_layers, CachePolicy, Janitor, JanitorParams, LocalFileSystem, RecordStore, StoreParams};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ddc-store")]
#[command(about = "Filesystem build artifact cache maintenance", version)]
struct Cli {
    /// Store root directory (overrides the configured Path)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// TOML file with a [store] table
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Store option as Key=Value (repeatable)
    #[arg(long = "param", short = 'p', global = true)]
    params: Vec<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure store latency and throughput
    SpeedTest,

    /// Run one unthrottled eviction pass
    Clean,

    /// Run the janitor until interrupted
    Maintain,

    /// Count the files under the store root
    Inventory,

    /// Parse a cache policy and print its canonical text
    Policy {
        /// Policy text, e.g. "Local,SkipMeta"
        text: String,
    },
}

#[derive(Serialize)]
struct SpeedReport {
    root: PathBuf,
    class: ddc_store::SpeedClass,
    stats: ddc_store::SpeedStats,
    writable: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::SpeedTest => run_speed_test(&cli),
        Commands::Clean => run_clean(&cli),
        Commands::Maintain => run_maintain(&cli),
        Commands::Inventory => run_inventory(&cli),
        Commands::Policy { text } => run_policy(text),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_params(cli: &Cli) -> StoreParams {
    let params = match load_layers(cli.config.as_deref(), &cli.params) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };
    match &cli.root {
        Some(root) => params.with_path(root),
        None if params.path.is_some() => params,
        None => {
            eprintln!("Error: no store root; pass --root or set Path");
            process::exit(1);
        }
    }
}

fn store_root(params: &StoreParams) -> PathBuf {
    params.path.clone().unwrap_or_default()
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn open_store(params: StoreParams) -> RecordStore {
    match RecordStore::open(params) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening store: {}", e);
            process::exit(1);
        }
    }
}

fn run_speed_test(cli: &Cli) {
    let mut params = load_params(cli);
    params.skip_speed_test = false;
    params.delete_unused = false;
    params.clean = false;
    params.flush = false;

    let store = open_store(params);
    print_json(&SpeedReport {
        root: store.root().to_path_buf(),
        class: store.speed_class(),
        stats: store.speed_stats(),
        writable: store.is_writable(),
    });
    if !store.is_usable() {
        process::exit(1);
    }
}

fn run_clean(cli: &Cli) {
    let params = load_params(cli);
    if params.read_only {
        eprintln!("Error: store is read-only, nothing to clean");
        process::exit(1);
    }
    let root = store_root(&params);
    let janitor_params = JanitorParams::from_store_params(&params);
    let summary = Janitor::run_once(&LocalFileSystem::new(), &root, &janitor_params);
    print_json(&summary);
}

fn run_maintain(cli: &Cli) {
    let mut params = load_params(cli);
    params.delete_unused = true;
    if params.read_only {
        eprintln!("Error: store is read-only, the janitor cannot run");
        process::exit(1);
    }

    let store = open_store(params);
    if store.janitor().is_none() {
        eprintln!("Error: janitor did not start for {}", store.root().display());
        process::exit(1);
    }

    let stop = Arc::new(Event::manual_reset());
    let handler_stop = Arc::clone(&stop);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nReceived interrupt signal, stopping janitor...");
        handler_stop.trigger();
    }) {
        eprintln!("Error installing signal handler: {}", e);
        process::exit(1);
    }

    stop.wait();
    let last_scan = store.last_scan();
    drop(store);
    if let Some(summary) = last_scan {
        print_json(&summary);
    }
}

fn run_inventory(cli: &Cli) {
    let params = load_params(cli);
    match inventory::collect(&store_root(&params)) {
        Ok(inventory) => print_json(&inventory),
        Err(e) => {
            eprintln!("Error reading store: {}", e);
            process::exit(1);
        }
    }
}

fn run_policy(text: &str) {
    match CachePolicy::parse_text(text) {
        Ok(policy) => println!("{}", policy.to_text()),
        Err(e) => {
            eprintln!("Invalid policy: {}", e);
            process::exit(1);
        }
    }
}
