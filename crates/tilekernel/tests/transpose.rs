//! Integration tests for the transpose kernels.

use tilekernel::prelude::*;

fn queue() -> CpuQueue {
    CpuQueue::with_config(QueueConfig::new().with_worker_threads(4)).expect("Failed to create queue")
}

fn matrix(n: usize) -> Vec<f32> {
    (0..n * n).map(|i| i as f32).collect()
}

/// Naive and tiled outputs are identical element for element and equal
/// the host reference.
#[test]
fn test_naive_and_tiled_identical() {
    let queue = queue();
    let n = 256;
    let data = matrix(n);

    let naive = transpose(&queue, TransposeStrategy::Naive, &data, n, 32).expect("naive failed");
    let tiled = transpose(&queue, TransposeStrategy::Tiled, &data, n, 32).expect("tiled failed");

    assert_eq!(naive, tiled);
    assert_eq!(naive, transpose_reference(&data, n).unwrap());
    for i in 0..n {
        for j in 0..n {
            assert_eq!(tiled[j * n + i], data[i * n + j]);
        }
    }
}

/// The thread-per-work-item kernel synchronizes on a real barrier and
/// matches the hierarchical one.
#[test]
fn test_threaded_barrier_transpose() {
    let queue = queue();
    let n = 64;
    let data = matrix(n);

    let threaded =
        transpose(&queue, TransposeStrategy::TiledThreaded, &data, n, 8).expect("threaded failed");
    let tiled = transpose(&queue, TransposeStrategy::Tiled, &data, n, 8).expect("tiled failed");

    assert_eq!(threaded, tiled);
    assert_eq!(queue.metrics().work_groups_executed, 2 * 64);
}

/// Repeated submissions into the same buffers, as the benchmark does.
#[test]
fn test_benchmarked_transpose() {
    let queue = queue();
    let n = 128;
    let range = Range::new([n, n]).unwrap();
    let input = Buffer::from_slice(&matrix(n), range).unwrap();
    let naive = Buffer::<f32, 2>::new(range);
    let tiled = Buffer::<f32, 2>::new(range);

    for (strategy, out) in [
        (TransposeStrategy::Naive, &naive),
        (TransposeStrategy::Tiled, &tiled),
    ] {
        let report = benchmark(
            || {
                submit_transpose(&queue, strategy, &input, out, 32)?;
                queue.wait_and_throw()
            },
            3,
            strategy.label(),
        )
        .expect("benchmark failed");
        assert_eq!(report.iterations, 3);
    }

    assert_eq!(naive.to_vec(), tiled.to_vec());
    assert_eq!(queue.metrics().submissions, 6);
}

/// Transposing twice gives back the input, for a non-float element type.
#[test]
fn test_double_transpose_integers() {
    let queue = queue();
    let n = 48;
    let data: Vec<u64> = (0..(n * n) as u64).map(|i| i * 7).collect();

    let once = transpose(&queue, TransposeStrategy::Tiled, &data, n, 16).unwrap();
    let twice = transpose(&queue, TransposeStrategy::Tiled, &once, n, 16).unwrap();

    assert_ne!(once, data);
    assert_eq!(twice, data);
}

/// A tile edge that does not divide N is rejected before submission.
#[test]
fn test_tile_not_dividing_size() {
    let queue = queue();
    let data = matrix(100);

    for strategy in TransposeStrategy::ALL {
        let err = transpose(&queue, strategy, &data, 100, 32).unwrap_err();
        assert!(matches!(err, TileKernelError::InvalidNdRange(_)));
    }
    assert_eq!(queue.metrics().submissions, 0);
}

/// A launch rejected by the device leaves the output unwritten, and the
/// check against the host transpose catches it.
#[test]
fn test_rejected_launch_fails_verification() {
    let queue = queue();
    let n = 64;
    let data = matrix(n);
    let range = Range::new([n, n]).unwrap();
    let input = Buffer::from_slice(&data, range).unwrap();
    let naive = Buffer::<f32, 2>::new(range);
    let tiled = Buffer::<f32, 2>::new(range);

    // 64 x 64 work-groups exceed the 1024 item limit.
    for (strategy, out) in [
        (TransposeStrategy::Naive, &naive),
        (TransposeStrategy::Tiled, &tiled),
    ] {
        let err = submit_transpose(&queue, strategy, &input, out, 64).unwrap_err();
        assert!(matches!(err, TileKernelError::InvalidNdRange(_)));
    }

    let reference = transpose_reference(&data, n).unwrap();
    assert_eq!(first_mismatch(&naive.to_vec(), &tiled.to_vec()), None);
    assert_eq!(first_mismatch(&naive.to_vec(), &reference), Some(1));
    assert_eq!(first_mismatch(&tiled.to_vec(), &reference), Some(1));
}
