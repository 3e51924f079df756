//! Vector add with a flat launch and a grouped launch.
//!
//! Run with: cargo run -p tilekernel --bin vector_add --release -- --size 1024 --group 128

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use tilekernel::prelude::*;

/// Add two vectors on the selected device and verify r[i] == 2i.
#[derive(Parser)]
#[command(name = "vector_add")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of elements
    #[arg(short, long, default_value_t = VectorAddConfig::default().size)]
    size: usize,

    /// Work-group size for the grouped launch
    #[arg(short, long, default_value_t = VectorAddConfig::default().group_size)]
    group: usize,

    /// Device selector (default, cpu, gpu)
    #[arg(short, long, default_value = "default")]
    device: DeviceSelector,

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

    let config = VectorAddConfig::default()
        .with_size(cli.size)
        .with_group_size(cli.group);
    if let Err(e) = config.validate() {
        eprintln!("{} {}", "error:".red().bold(), e);
        return ExitCode::FAILURE;
    }

    let a: Vec<f32> = (0..config.size).map(|i| i as f32).collect();
    let b = a.clone();

    let mut passed = true;
    for grouped in [false, true] {
        let mut r = vec![0.0f32; config.size];
        let label = if grouped {
            format!("nd_range (group {})", config.group_size)
        } else {
            "range".to_string()
        };

        if let Err(e) = run(cli.device, &config, grouped, &a, &b, &mut r) {
            println!("Exception caught: {}", e);
        }

        match r.iter().enumerate().find(|(i, v)| **v != *i as f32 * 2.0) {
            None => println!("{} {}", label, "PASSED".green().bold()),
            Some((i, v)) => {
                passed = false;
                println!(
                    "{} {}: r[{}] = {}, expected {}",
                    label,
                    "FAILED".red().bold(),
                    i,
                    v,
                    i as f32 * 2.0
                );
            }
        }
    }

    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(
    selector: DeviceSelector,
    config: &VectorAddConfig,
    grouped: bool,
    a: &[f32],
    b: &[f32],
    r: &mut [f32],
) -> Result<()> {
    let queue = CpuQueue::with_config(QueueConfig::new().with_selector(selector))?;
    println!("Running on {}", queue.device().name);

    let event = if grouped {
        vector_add_nd_range(&queue, a, b, r, config.group_size)?
    } else {
        vector_add_range(&queue, a, b, r)?
    };
    tracing::info!("{}", event);
    Ok(())
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
