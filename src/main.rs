//! # loc-harvest CLI (`loch`)
//!
//! The `loch` binary harvests one Library of Congress collection per run:
//! it pages through the collection's JSON listing, saves each record's
//! metadata document, and downloads the highest-resolution image assets the
//! record references, skipping anything already current on disk.
//!
//! ## Usage
//!
//! ```bash
//! # Harvest the default collection into output/brady-handy
//! loch
//!
//! # Harvest a named collection into ./bain
//! loch --collection bain
//!
//! # Point at an arbitrary paginated listing
//! loch --base-url "https://www.loc.gov/collections/bain/?q=horse" \
//!      --output-dir horses --per-page 50 --delay 0.5
//!
//! # Metadata only, no image downloads
//! loch --collection bain --no-images
//!
//! # Re-download everything, ignoring what is on disk
//! loch --collection bain --force
//! ```
//!
//! Progress and failures are reported as leveled log messages on stderr
//! (`-v` for debug, `-vv` for trace); the final summary goes to stdout.
//! The exit status is 0 when the collection ends naturally and 1 when a
//! page remained unreachable after retries.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use loc_harvest::config::{self, FileConfig, Overrides};
use loc_harvest::harvest::{self, HarvestOutcome, Session};
use loc_harvest::recheck::ProcessRespawner;
use loc_harvest::stats::format_bytes;

/// loc-harvest, a polite, resumable harvester for Library of Congress
/// collection APIs.
#[derive(Parser)]
#[command(
    name = "loch",
    about = "Harvest metadata and images from a Library of Congress collection",
    version,
    long_about = "loc-harvest walks the numbered pages of a collection's JSON listing, \
    saves each record's metadata document, and downloads the highest-resolution image \
    assets it references. Content already current on disk is never transferred again."
)]
struct Cli {
    /// Collection slug; maps to https://www.loc.gov/collections/<name>/
    /// and an output directory of the same name.
    #[arg(long)]
    collection: Option<String>,

    /// Base collection URL (overrides --collection). Pre-existing query
    /// parameters are preserved.
    #[arg(long)]
    base_url: Option<String>,

    /// Output root directory (overrides the collection mapping).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Records requested per page.
    #[arg(long)]
    per_page: Option<u32>,

    /// First page number to fetch.
    #[arg(long)]
    start_page: Option<u32>,

    /// Polite delay between pages, in seconds.
    #[arg(long)]
    delay: Option<f64>,

    /// Maximum fetch attempts per page before it is reported failed.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Base backoff delay between attempts, in milliseconds.
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Per-request timeout for page fetches and probes, in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Do not download image assets.
    #[arg(long)]
    no_images: bool,

    /// Do not write per-record metadata documents.
    #[arg(long)]
    no_json: bool,

    /// Rewrite metadata and re-download assets even when unchanged.
    #[arg(long)]
    force: bool,

    /// Path to an optional TOML configuration file. Explicit flags win.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Marker for a background self-verification child; suppresses any
    /// further self-verification spawning.
    #[arg(long, hide = true)]
    self_check_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file = match &cli.config {
        Some(path) => config::load_file(path)?,
        None => FileConfig::default(),
    };

    let overrides = Overrides {
        collection: cli.collection,
        base_url: cli.base_url,
        output_dir: cli.output_dir,
        per_page: cli.per_page,
        start_page: cli.start_page,
        delay_secs: cli.delay,
        max_retries: cli.max_retries,
        backoff_ms: cli.backoff_ms,
        timeout_secs: cli.timeout,
        no_images: cli.no_images,
        no_json: cli.no_json,
        force: cli.force,
        self_check_run: cli.self_check_run,
    };

    let config = config::resolve(overrides, file)?;
    let mut session = Session::new(&config, Box::new(ProcessRespawner))?;

    match harvest::run_harvest(&config, &mut session).await? {
        HarvestOutcome::CompletedNaturally { pages, records } => {
            println!("harvest complete");
            println!("  pages visited: {}", pages);
            println!("  records processed: {}", records);
            println!("  image sets downloaded: {}", session.stats.image_sets());
            println!(
                "  bytes downloaded: {}",
                format_bytes(session.stats.image_bytes())
            );
            Ok(())
        }
        HarvestOutcome::StoppedOnFetchFailure { page } => {
            println!("harvest stopped: page {} unreachable after retries", page);
            std::process::exit(1);
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("loc_harvest={level},loch={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
