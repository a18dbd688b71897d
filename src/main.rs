use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use epsr_engine::core::registry::DataStore;
use epsr_engine::error::{EngineError, Outcome};
use epsr_engine::io::deck::Deck;
use epsr_engine::io::restart::RestartArchive;
use epsr_engine::modules::ModuleContext;
use epsr_engine::parallel::pool::{Communicator, ProcessPool};

// --- CLI Definitions ---

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Empirical potential structure refinement engine", long_about = None)]
struct Args {
    /// Input deck (TOML)
    input: PathBuf,

    /// Number of refinement iterations to run
    #[arg(short = 'n', long)]
    iterations: Option<u64>,

    /// Wall-clock limit in seconds
    #[arg(short = 't', long)]
    time_limit: Option<u64>,

    /// Restart file path (default: <input>.restart)
    #[arg(short = 'w', long)]
    restart_file: Option<PathBuf>,

    /// Ignore any existing restart file
    #[arg(short = 'x', long)]
    no_restart: bool,

    /// Append to existing output files instead of truncating them
    #[arg(short = 'a', long)]
    append: bool,

    /// Restart write stride, in iterations
    #[arg(short = 'f', long, default_value_t = 10)]
    restart_frequency: u64,

    /// Quiet output (warnings and errors only)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// Outcome of a worker's run, mapped to the process exit code by the master.
enum RunEnd {
    Completed,
    WallLimit,
}

fn worker_main(
    mut pool: ProcessPool,
    deck: Arc<Deck>,
    args: Arc<Args>,
    started: Instant,
) -> Result<RunEnd, EngineError> {
    let mut assembled = deck.assemble()?;
    pool.assign_processes_to_groups(deck.simulation.max_process_groups)?;

    let restart_path = args
        .restart_file
        .clone()
        .unwrap_or_else(|| args.input.with_extension("restart"));

    // Every worker restores the same archive, so stores stay identical
    let mut store = DataStore::new();
    let mut start_iteration = 1;
    if !args.no_restart && restart_path.exists() {
        let archive = RestartArchive::read(&restart_path)?;
        start_iteration = archive.iteration + 1;
        store = archive.store;
    }

    let n_iterations = args.iterations.unwrap_or(deck.simulation.iterations);
    let wall_limit = args.time_limit.map(Duration::from_secs);
    let mut failure_counts: Vec<u64> = vec![0; assembled.modules.len()];

    if pool.is_master() {
        info!(
            "Running {} iteration(s) from iteration {} on {} worker(s) ({} group(s))",
            n_iterations,
            start_iteration,
            pool.size(),
            pool.n_groups()
        );
    }

    let mut end = RunEnd::Completed;
    for iteration in start_iteration..=n_iterations {
        // The master's clock decides the wall-limit stop for everyone
        let out_of_time = wall_limit.map(|limit| started.elapsed() >= limit).unwrap_or(false);
        if pool.decide(out_of_time)? {
            warn!("Wall-clock limit reached, stopping at iteration {}", iteration);
            end = RunEnd::WallLimit;
            break;
        }

        if pool.is_master() {
            info!("--- Iteration {} of {}", iteration, n_iterations);
        }

        for module_index in 0..assembled.modules.len() {
            if !assembled.modules[module_index].should_run(iteration) {
                continue;
            }

            let module_name = assembled.modules[module_index].name().to_string();
            let result = {
                let mut ctx = ModuleContext {
                    cfg: &mut assembled.cfg,
                    pool: &pool,
                    store: &mut store,
                    iteration,
                    seed: deck.simulation.seed,
                };
                assembled.modules[module_index].run(&mut ctx, &mut assembled.potentials)
            };

            // One consensus per module: a failure anywhere aborts it everywhere
            let local_ok = match &result {
                Ok(Outcome::Success) => true,
                Ok(Outcome::NotExecuted) => {
                    warn!("Module '{}' was not executed this iteration", module_name);
                    true
                }
                Err(e) => {
                    error!("Module '{}' failed: {}", module_name, e);
                    if e.is_fatal() {
                        return Err(e.clone());
                    }
                    false
                }
            };

            if !pool.all_true(local_ok, Communicator::Pool)? {
                failure_counts[module_index] += 1;
                warn!(
                    "Module '{}' failed on at least one worker (failure {} of {} permitted)",
                    module_name, failure_counts[module_index], deck.simulation.module_failure_threshold
                );
                if failure_counts[module_index] >= deck.simulation.module_failure_threshold {
                    return Err(EngineError::Computation(format!(
                        "module '{}' crossed its failure threshold",
                        module_name
                    )));
                }
                // Abandon the rest of this iteration
                break;
            }
        }

        // Periodic restart write by the master
        if args.restart_frequency > 0 && iteration % args.restart_frequency == 0 {
            let written = if pool.is_master() {
                RestartArchive::new(iteration, assembled.cfg.contents_version(), store.clone())
                    .write(&restart_path)
                    .is_ok()
            } else {
                true
            };
            if !pool.decide(written)? {
                return Err(EngineError::Computation("restart write failed on the master".into()));
            }
        }
    }

    // Final restart write
    let written = if pool.is_master() {
        RestartArchive::new(n_iterations, assembled.cfg.contents_version(), store.clone())
            .write(&restart_path)
            .is_ok()
    } else {
        true
    };
    if !pool.decide(written)? {
        return Err(EngineError::Computation("final restart write failed".into()));
    }

    Ok(end)
}

fn main() {
    let args = Args::parse();

    let filter = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Parse the deck once; workers share it immutably
    let loaded = Deck::load(&args.input).with_context(|| format!("failed to load input deck '{}'", args.input.display()));
    let deck = match loaded {
        Ok(deck) => Arc::new(deck),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    // Honour -a by leaving any previous trajectory output in place
    if !args.append {
        let trajectory = format!("{}.md.xyz", deck.configuration.name);
        let _ = std::fs::remove_file(trajectory);
    }

    let n_workers = deck.simulation.workers.max(1);
    let args = Arc::new(args);
    let started = Instant::now();

    // The pool size is fixed by the launch configuration; workers execute the
    // same programme over their own configuration replicas
    let pools = ProcessPool::create_many("Main", n_workers);
    let mut handles = Vec::with_capacity(n_workers);
    for pool in pools {
        let deck = deck.clone();
        let args = args.clone();
        let builder = thread::Builder::new().name(format!("worker-{}", pool.rank()));
        handles.push(
            builder
                .spawn(move || worker_main(pool, deck, args, started))
                .expect("failed to spawn worker thread"),
        );
    }

    let mut exit_code = 0;
    for handle in handles {
        match handle.join() {
            Ok(Ok(RunEnd::Completed)) => {}
            Ok(Ok(RunEnd::WallLimit)) => exit_code = exit_code.max(3),
            Ok(Err(EngineError::Setup(e))) | Ok(Err(EngineError::Import(e))) => {
                error!("{}", e);
                exit_code = exit_code.max(1);
            }
            Ok(Err(e)) => {
                error!("{}", e);
                exit_code = exit_code.max(2);
            }
            Err(_) => {
                error!("a worker thread panicked");
                exit_code = exit_code.max(2);
            }
        }
    }

    if exit_code == 0 {
        info!("Done ({:.1} s)", started.elapsed().as_secs_f64());
    }
    std::process::exit(exit_code);
}
