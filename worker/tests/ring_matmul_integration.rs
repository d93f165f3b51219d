//! Integration tests for the ring matrix multiply
//!
//! These run whole rings of in-process workers joined by channels. The TCP
//! transport has its own tests in `tcp_ring.rs`.

// Rank indices are used both for indexing and for ring arithmetic
#![allow(clippy::needless_range_loop)]

use ring_matmul::comm::{Communicator, Payload, Phase, RingMessage};
use ring_matmul::decomposition::split_row_bands;
use ring_matmul::{
    multiply_in_process, run_local_cluster, ChannelComm, Decomposition, DenseMatrix,
    MatmulError, MatrixInitializer, Precision, Ring, RingEngine, RunParams, WorkerOptions,
};
use uuid::Uuid;

/// Shard origins held by each rank at each step, following only the ring
/// arithmetic: `held[step][rank]`
fn simulate_rotation(p: usize) -> Vec<Vec<usize>> {
    let mut held: Vec<usize> = (0..p).collect();
    let mut history = vec![held.clone()];

    for _ in 1..p {
        // every rank takes what its left neighbour held
        held = (0..p).map(|rank| held[Ring::left(rank, p)]).collect();
        history.push(held.clone());
    }
    history
}

/// identity + all-ones
fn identity_plus_ones(n: usize) -> DenseMatrix<f64> {
    DenseMatrix::from_fn(n, |i, j| if i == j { 2.0 } else { 1.0 })
}

#[tokio::test]
async fn test_scenario_identity_plus_ones_two_workers() {
    let m = identity_plus_ones(4);
    let result = multiply_in_process(&m, &m, 2, WorkerOptions::default())
        .await
        .unwrap();

    for i in 0..4 {
        for j in 0..4 {
            let expected = if i == j { 7.0 } else { 6.0 };
            assert_eq!(result.product.get(i, j), expected, "C[{}][{}]", i, j);
        }
    }
    assert_eq!(result.stats.len(), 2);
    assert!(result.stats.iter().all(|s| s.exchanges == 1));
}

#[tokio::test]
async fn test_scenario_single_worker_matches_reference() {
    let init = MatrixInitializer::new(2024);
    let a: DenseMatrix<f64> = init.matrix_a(8);
    let b: DenseMatrix<f64> = init.matrix_b(8);

    let result = multiply_in_process(&a, &b, 1, WorkerOptions::default())
        .await
        .unwrap();

    assert_eq!(result.stats[0].exchanges, 0);
    assert_eq!(result.steps[0].len(), 1);
    assert_eq!(result.product, a.matmul_reference(&b).unwrap());
}

#[tokio::test]
async fn test_scenario_all_ones_three_workers() {
    let ones = DenseMatrix::<f32>::filled(6, 1.0);
    let result = multiply_in_process(&ones, &ones, 3, WorkerOptions::default())
        .await
        .unwrap();

    assert!(
        result.product.as_slice().iter().all(|&v| v == 6.0),
        "product:\n{}",
        result.product
    );
}

#[tokio::test]
async fn test_indivisible_size_is_config_error() {
    let params = RunParams::new(7, Precision::F32, 1, false);
    let err = run_local_cluster(params, 2, WorkerOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MatmulError::Config(_)), "{}", err);

    let m = DenseMatrix::<f32>::identity(7);
    let err = multiply_in_process(&m, &m, 2, WorkerOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MatmulError::Config(_)), "{}", err);
}

#[test]
fn test_rotation_schedule_matches_origin_formula() {
    for p in 1..=8 {
        let history = simulate_rotation(p);
        for step in 0..p {
            for rank in 0..p {
                assert_eq!(
                    history[step][rank],
                    Ring::origin(rank, step, p),
                    "p={} step={} rank={}",
                    p,
                    step,
                    rank
                );
            }
        }
    }
}

#[tokio::test]
async fn test_origins_conserved_every_step() {
    let p = 5;
    let m = DenseMatrix::<f64>::identity(10);
    let result = multiply_in_process(&m, &m, p, WorkerOptions::default())
        .await
        .unwrap();

    for step in 0..p {
        let mut held: Vec<usize> =
            result.steps.iter().map(|records| records[step].origin).collect();
        held.sort_unstable();
        assert_eq!(held, (0..p).collect::<Vec<_>>(), "step {}", step);
    }
}

#[tokio::test]
async fn test_every_rank_covers_all_columns_once() {
    let n = 12;
    let p = 4;
    let m = DenseMatrix::<f32>::identity(n);
    let result = multiply_in_process(&m, &m, p, WorkerOptions::default())
        .await
        .unwrap();

    for (rank, records) in result.steps.iter().enumerate() {
        let mut covered = vec![0usize; n];
        for record in records {
            for col in record.columns.clone() {
                covered[col] += 1;
            }
        }
        assert!(
            covered.iter().all(|&count| count == 1),
            "rank {} coverage {:?}",
            rank,
            covered
        );
    }
}

#[tokio::test]
async fn test_distributed_matches_reference_both_precisions() {
    for precision in [Precision::F32, Precision::F64] {
        for (n, p) in [(8, 2), (12, 3), (16, 4), (15, 5)] {
            let params = RunParams::new(n, precision, 77, true);
            let reports = run_local_cluster(params, p, WorkerOptions::default())
                .await
                .unwrap();

            let verification = reports[0].verification.unwrap();
            assert!(
                verification.passed(),
                "{} n={} p={}: {:?}",
                precision,
                n,
                p,
                verification
            );
        }
    }
}

#[tokio::test]
async fn test_f32_and_f64_follow_same_schedule() {
    let single = run_local_cluster(
        RunParams::new(12, Precision::F32, 5, false),
        3,
        WorkerOptions::default(),
    )
    .await
    .unwrap();
    let double = run_local_cluster(
        RunParams::new(12, Precision::F64, 5, false),
        3,
        WorkerOptions::default(),
    )
    .await
    .unwrap();

    for (s, d) in single.iter().zip(&double) {
        assert_eq!(s.steps, d.steps, "rank {}", s.rank);
        assert_eq!(s.stats.exchanges, d.stats.exchanges);
        // same elements, twice the width
        assert!(d.stats.bytes_sent > s.stats.bytes_sent);
    }
}

#[tokio::test]
async fn test_every_rank_reports_agreed_params() {
    let params = RunParams::new(9, Precision::F64, 123, false);
    let reports = run_local_cluster(params.clone(), 3, WorkerOptions::default())
        .await
        .unwrap();

    for report in &reports {
        assert_eq!(report.params, params);
        assert_eq!(report.world_size, 3);
    }
}

#[tokio::test]
async fn test_row_bands_of_product_are_owned_by_ranks() {
    let init = MatrixInitializer::new(8);
    let a: DenseMatrix<f64> = init.matrix_a(6);
    let b: DenseMatrix<f64> = init.matrix_b(6);

    let result = multiply_in_process(&a, &b, 3, WorkerOptions::default())
        .await
        .unwrap();
    let expected_bands = split_row_bands(&a.matmul_reference(&b).unwrap(), 3).unwrap();
    let bands = split_row_bands(&result.product, 3).unwrap();

    for (rank, (got, want)) in bands.iter().zip(&expected_bands).enumerate() {
        assert_eq!(got, want, "rank {}", rank);
    }
}

#[tokio::test]
async fn test_wrong_precision_payload_is_protocol_error() {
    let mut comms = ChannelComm::ring(2);
    let mut rogue = comms.pop().unwrap();
    let mut comm = comms.pop().unwrap();
    let job_id = Uuid::new_v4();

    let rogue_task = tokio::spawn(async move {
        // rank 1 answers the first rotation with double-precision data
        let msg = RingMessage::new(job_id, Phase::Rotation, 0, 1, Payload::F64(vec![0.0; 8]));
        rogue.send_recv(msg).await
    });

    let d = Decomposition::new(4, 2, 0).unwrap();
    let (band, shard) = d.generate::<f32>(&MatrixInitializer::new(1));
    let mut engine = RingEngine::new(&mut comm, d, job_id).unwrap();
    let err = engine.run(&band, shard).await.unwrap_err();

    assert!(matches!(err, MatmulError::Protocol(_)), "{}", err);
    assert!(rogue_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_dropped_neighbour_is_communication_error() {
    let mut comms = ChannelComm::ring(2);
    drop(comms.pop());
    let mut comm = comms.pop().unwrap();

    let d = Decomposition::new(4, 2, 0).unwrap();
    let (band, shard) = d.generate::<f64>(&MatrixInitializer::new(1));
    let mut engine = RingEngine::new(&mut comm, d, Uuid::new_v4()).unwrap();
    let err = engine.run(&band, shard).await.unwrap_err();

    assert!(matches!(err, MatmulError::Communication(_)), "{}", err);
}

#[tokio::test]
async fn test_more_workers_than_rows_per_band() {
    // one row and one column per rank
    let init = MatrixInitializer::new(3);
    let a: DenseMatrix<f64> = init.matrix_a(7);
    let b: DenseMatrix<f64> = init.matrix_b(7);

    let result = multiply_in_process(&a, &b, 7, WorkerOptions::default())
        .await
        .unwrap();
    let expected = a.matmul_reference(&b).unwrap();

    assert_eq!(result.product, expected);
    assert!(result.stats.iter().all(|s| s.exchanges == 6));
}
