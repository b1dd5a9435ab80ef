//! ring-walker - Parallel directory walker with work stealing
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ring_walker::config::{CliArgs, WalkConfig};
use ring_walker::progress::{print_header, print_summary, ProgressReporter};
use ring_walker::transport::{LocalTransport, Transport};
use ring_walker::tree::{DirTask, DirWalker, TreeStats, WalkCounters};
use ring_walker::walker::Walker;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Progress refresh interval
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = WalkConfig::from_args(args).context("Invalid configuration")?;

    if config.show_progress {
        print_header(&config.roots, config.rank_count);
    }

    let start = Instant::now();
    let per_rank = walk(&config)?;
    let duration = start.elapsed();

    let total = TreeStats::total(&per_rank);
    info!(
        dirs = total.dirs,
        files = total.files,
        bytes = total.bytes,
        errors = total.errors,
        elapsed_ms = duration.as_millis() as u64,
        "Walk complete"
    );

    if config.show_progress {
        print_summary(&per_rank, duration);
    }

    if total.errors > 0 {
        info!(errors = total.errors, "Walk completed with errors");
    }

    Ok(())
}

/// Run every rank on its own thread and return rank 0's gathered results
fn walk(config: &WalkConfig) -> Result<Vec<TreeStats>> {
    let seeds: Vec<DirTask> = config.roots.iter().map(DirTask::root).collect();
    let counters = Arc::new(WalkCounters::default());
    let (result_tx, result_rx) = crossbeam_channel::unbounded();

    info!(
        ranks = config.rank_count,
        roots = seeds.len(),
        "Walk starting"
    );

    for transport in LocalTransport::group(config.rank_count) {
        let rank = transport.rank();
        let hook = DirWalker::new()
            .max_depth(config.max_depth)
            .exclude(config.exclude_patterns.clone())
            .counters(Arc::clone(&counters));
        let rng = match config.rank_seed(rank) {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let seeds = seeds.clone();
        let result_tx = result_tx.clone();

        thread::Builder::new()
            .name(format!("rank-{}", rank))
            .spawn(move || {
                let walker: Walker<DirTask, _, _, TreeStats> = Walker::new(transport, hook);
                let outcome = walker.with_rng(rng).execute(&seeds);
                // The receiver is gone only if another rank already failed
                let _ = result_tx.send((rank, outcome));
            })
            .with_context(|| format!("Failed to spawn rank {}", rank))?;
    }
    drop(result_tx);

    let progress = config.show_progress.then(ProgressReporter::new);
    if let Some(p) = &progress {
        p.set_status("Walking...");
    }

    // A failed rank can leave its peers waiting forever, so return on the
    // first error instead of joining the threads
    let mut gathered = None;
    let mut finished = 0;
    while finished < config.rank_count {
        match result_rx.recv_timeout(PROGRESS_INTERVAL) {
            Ok((rank, outcome)) => {
                finished += 1;
                match outcome {
                    Ok(Some(results)) => gathered = Some(results),
                    Ok(None) => {}
                    Err(e) => {
                        if let Some(p) = &progress {
                            p.finish_and_clear();
                        }
                        return Err(e).with_context(|| format!("Rank {} failed", rank));
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(p) = &progress {
                    p.update(&counters);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(p) = &progress {
                    p.finish_and_clear();
                }
                bail!("A rank thread exited without reporting a result");
            }
        }
    }

    if let Some(p) = &progress {
        p.update(&counters);
        p.finish("Walk completed");
    }

    gathered.context("Rank 0 returned no gathered results")
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("ring_walker=debug,warn")
    } else {
        EnvFilter::new("ring_walker=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(verbose)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
