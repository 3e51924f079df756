//! Naive against tiled local memory matrix transpose.
//!
//! Run with: cargo run -p tilekernel --bin matrix_transpose --release -- --size 2048

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use tilekernel::prelude::*;

/// Benchmark naive and tiled transpose of an N x N matrix and check both
/// against a host transpose.
#[derive(Parser)]
#[command(name = "matrix_transpose")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Matrix dimension N
    #[arg(short, long, default_value_t = TransposeConfig::default().size)]
    size: usize,

    /// Tile edge (work-group is tile x tile)
    #[arg(short, long, default_value_t = TransposeConfig::default().tile)]
    tile: usize,

    /// Benchmark iterations per strategy
    #[arg(short, long, default_value_t = TransposeConfig::default().iterations)]
    iterations: usize,

    /// Also run the thread-per-work-item tiled kernel
    #[arg(long)]
    threaded: bool,

    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    workers: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = TransposeConfig::default()
        .with_size(cli.size)
        .with_tile(cli.tile)
        .with_iterations(cli.iterations);
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let n = config.size;
    let a: Vec<f32> = (0..n * n).map(|i| i as f32).collect();
    let mut a_t = vec![0.0f32; n * n];
    let mut a_t_comparison = vec![0.0f32; n * n];
    let mut a_t_threaded = cli.threaded.then(|| vec![0.0f32; n * n]);

    if let Err(e) = run(
        &cli,
        &config,
        &a,
        &mut a_t,
        &mut a_t_comparison,
        a_t_threaded.as_deref_mut(),
    ) {
        println!("Exception caught: {}", e);
    }

    let reference = match transpose_reference(&a, n) {
        Ok(reference) => reference,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut passed = verify("naive", &a_t_comparison, &reference);
    passed &= verify("tiled", &a_t, &reference);
    if let Some(threaded) = &a_t_threaded {
        passed &= verify("tiled-threaded", threaded, &reference);
    }

    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(
    cli: &Cli,
    config: &TransposeConfig,
    a: &[f32],
    a_t: &mut [f32],
    a_t_comparison: &mut [f32],
    a_t_threaded: Option<&mut [f32]>,
) -> Result<()> {
    let queue = CpuQueue::with_config(QueueConfig::new().with_worker_threads(cli.workers))?;
    println!("Running on {}", queue.device().name);

    let range = Range::new([config.size, config.size])?;
    let input = Buffer::from_slice(a, range)?;
    let output = Buffer::<f32, 2>::new(range);
    let comparison = Buffer::<f32, 2>::new(range);
    let threaded = a_t_threaded
        .is_some()
        .then(|| Buffer::<f32, 2>::new(range));

    let mut runs = vec![
        (TransposeStrategy::Naive, &comparison),
        (TransposeStrategy::Tiled, &output),
    ];
    if let Some(buffer) = &threaded {
        runs.push((TransposeStrategy::TiledThreaded, buffer));
    }

    let outcome = runs.into_iter().try_for_each(|(strategy, out)| -> Result<()> {
        let report = benchmark(
            || {
                submit_transpose(&queue, strategy, &input, out, config.tile)?;
                queue.wait_and_throw()
            },
            config.iterations,
            strategy.label(),
        )?;

        println!("{}", report);
        println!(
            "  Throughput: {:.1} M elements/s",
            report.throughput(range.size()) / 1e6
        );
        println!();
        Ok(())
    });

    // Device results are copied back even when a kernel failed.
    output.copy_to_host(a_t)?;
    comparison.copy_to_host(a_t_comparison)?;
    if let (Some(buffer), Some(dst)) = (&threaded, a_t_threaded) {
        buffer.copy_to_host(dst)?;
    }

    outcome
}

fn verify(label: &str, actual: &[f32], expected: &[f32]) -> bool {
    match first_mismatch(actual, expected) {
        None => {
            println!("{} {}", label, "PASSED".green().bold());
            true
        }
        Some(i) => {
            println!(
                "{} {}: element {} is {}, expected {}",
                label,
                "FAILED".red().bold(),
                i,
                actual[i],
                expected[i]
            );
            false
        }
    }
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
