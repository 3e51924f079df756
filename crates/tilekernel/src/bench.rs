//! Repeated-run timing for kernels.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::info;

use tilekernel_core::error::{Result, TileKernelError};

/// Timing of a repeated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkReport {
    /// Benchmark name.
    pub name: String,
    /// Completed iterations.
    pub iterations: usize,
    /// Total wall-clock time.
    pub total: Duration,
    /// Fastest iteration.
    pub min: Duration,
    /// Slowest iteration.
    pub max: Duration,
}

impl BenchmarkReport {
    /// Mean time per iteration.
    pub fn mean(&self) -> Duration {
        if self.iterations == 0 {
            return Duration::ZERO;
        }
        self.total.div_f64(self.iterations as f64)
    }

    /// Throughput in elements per second for `elements` per iteration.
    pub fn throughput(&self, elements: usize) -> f64 {
        let mean = self.mean().as_secs_f64();
        if mean > 0.0 {
            elements as f64 / mean
        } else {
            0.0
        }
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Benchmark: {}", self.name)?;
        writeln!(f, "  Iterations: {}", self.iterations)?;
        writeln!(f, "  Total time: {:.3} ms", self.total.as_secs_f64() * 1000.0)?;
        writeln!(f, "  Mean time:  {:.3} ms", self.mean().as_secs_f64() * 1000.0)?;
        write!(
            f,
            "  Min / max:  {:.3} / {:.3} ms",
            self.min.as_secs_f64() * 1000.0,
            self.max.as_secs_f64() * 1000.0
        )
    }
}

/// Run `body` `iterations` times and time it.
///
/// Stops at the first failing iteration and returns its error.
pub fn benchmark<F>(mut body: F, iterations: usize, name: &str) -> Result<BenchmarkReport>
where
    F: FnMut() -> Result<()>,
{
    if iterations == 0 {
        return Err(TileKernelError::config(format!(
            "benchmark '{}' needs at least one iteration",
            name
        )));
    }

    let mut total = Duration::ZERO;
    let mut min = Duration::MAX;
    let mut max = Duration::ZERO;

    for _ in 0..iterations {
        let start = Instant::now();
        body()?;
        let elapsed = start.elapsed();

        total += elapsed;
        min = min.min(elapsed);
        max = max.max(elapsed);
    }

    let report = BenchmarkReport {
        name: name.to_string(),
        iterations,
        total,
        min,
        max,
    };

    info!(
        "{}: {} iterations, mean {:?}",
        report.name,
        report.iterations,
        report.mean()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_counts_iterations() {
        let mut calls = 0;
        let report = benchmark(
            || {
                calls += 1;
                Ok(())
            },
            5,
            "count",
        )
        .unwrap();

        assert_eq!(calls, 5);
        assert_eq!(report.iterations, 5);
        assert!(report.min <= report.max);
        assert!(report.mean() <= report.total);
    }

    #[test]
    fn test_benchmark_zero_iterations() {
        let err = benchmark(|| Ok(()), 0, "empty").unwrap_err();
        assert!(matches!(err, TileKernelError::InvalidConfig(_)));
    }

    #[test]
    fn test_benchmark_stops_on_error() {
        let mut calls = 0;
        let err = benchmark(
            || {
                calls += 1;
                if calls == 3 {
                    Err(TileKernelError::GroupAborted)
                } else {
                    Ok(())
                }
            },
            10,
            "failing",
        )
        .unwrap_err();

        assert_eq!(err, TileKernelError::GroupAborted);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_mean_beyond_u32_iterations() {
        let report = BenchmarkReport {
            name: "many".to_string(),
            iterations: 5_000_000_000,
            total: Duration::from_secs(5_000),
            min: Duration::from_micros(1),
            max: Duration::from_micros(1),
        };
        let mean = report.mean();
        assert!(mean >= Duration::from_nanos(999) && mean <= Duration::from_nanos(1001));

        let empty = BenchmarkReport {
            iterations: 0,
            ..report
        };
        assert_eq!(empty.mean(), Duration::ZERO);
    }

    #[test]
    fn test_report_display() {
        let report = BenchmarkReport {
            name: "transpose".to_string(),
            iterations: 4,
            total: Duration::from_millis(8),
            min: Duration::from_millis(1),
            max: Duration::from_millis(3),
        };
        assert_eq!(report.mean().as_micros(), 2000);
        assert!(report.to_string().contains("Mean time:  2.000 ms"));
    }
}
