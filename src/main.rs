use std::{
    fs,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use log::debug;
use signal_hook::consts::{SIGINT, SIGTERM};
use snapshotter::{
    runner::{read_url_list, register_termination_signals, Runner, RunnerOptions},
    utils::pause_from_secs,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Scrolling web page snapshotter", long_about = None)]
struct Args {
    /// File with one URL per line
    input_file: PathBuf,
    /// Number of snapshots a page is expected to yield at least
    #[arg(long = "min_snapshots", default_value_t = 2)]
    min_snapshots: usize,
    /// Maximum number of snapshots taken per page
    #[arg(long = "max_snapshots", default_value_t = 10)]
    max_snapshots: usize,
    /// Seconds to wait after each scroll for lazy content to settle
    #[arg(long = "scroll_pause_time", default_value_t = 2.0)]
    scroll_pause_time: f64,
    /// Concurrent browser sessions allowed per domain
    #[arg(long = "max_workers_per_domain", default_value_t = 2)]
    max_workers_per_domain: usize,
    /// Initial accessibility probes per 60 second window for each domain
    #[arg(long = "default_rate_limit", default_value_t = 30)]
    default_rate_limit: u32,
    /// Maximum time in seconds to wait for a page to load
    #[arg(long = "page_load_timeout", default_value_t = 30)]
    page_load_timeout: u64,
    /// Attempts per URL before it is reported as failed
    #[arg(short = 'r', long, default_value_t = 3)]
    retries: usize,
    /// Root directory for snapshots, defaults to Data/web_snapshots
    #[arg(short = 'd', long = "output_dir")]
    output_dir: Option<PathBuf>,
    /// Write a JSON summary of the run to this path
    #[arg(long = "summary_file")]
    summary_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    debug!("Starting snapshotter with {:#?}", args.clone());

    let scroll_pause = pause_from_secs(args.scroll_pause_time)?;

    let urls = read_url_list(&args.input_file)?;

    let mut builder = RunnerOptions::default_builder();
    builder
        .min_snapshots(args.min_snapshots)
        .max_snapshots(args.max_snapshots)
        .scroll_pause(scroll_pause)
        .max_workers_per_domain(args.max_workers_per_domain)
        .default_rate_limit(args.default_rate_limit)
        .page_load_timeout(Duration::from_secs(args.page_load_timeout))
        .retries(args.retries);
    if let Some(dir) = args.output_dir {
        builder.output_dir(dir);
    }
    let options = builder.build()?;

    let should_terminate = Arc::new(AtomicBool::new(false));
    register_termination_signals(&[SIGINT, SIGTERM], &should_terminate)?;

    let runner = Runner::new(options, should_terminate)?;
    let summary = runner.run(&urls).await;

    if let Some(path) = args.summary_file {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&path, json).context(format!("could not write summary to {:?}", path))?;
    }

    Ok(())
}
