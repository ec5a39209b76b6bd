use chol_core::{CholCoreError, HostExecutor, MatrixView, QueueId, TraceEntry, TraceOp, Triangle};
use chol_factor::{
    BlockSize, BlockedCholesky, FactorAlgorithm, FactorConfig, FactorRun, PanelStrategy,
};
use pollster::block_on;

/// Random symmetric positive-definite matrix: M * M^T plus a diagonal shift,
/// column-major with leading dimension n.
fn spd_matrix(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut m = vec![0.0f64; n * n];
    for v in m.iter_mut() {
        *v = rng.f64() - 0.5;
    }
    let mut a = vec![0.0f64; n * n];
    for j in 0..n {
        for i in 0..n {
            let mut acc = 0.0;
            for k in 0..n {
                acc += m[i + k * n] * m[j + k * n];
            }
            a[i + j * n] = acc;
        }
    }
    for i in 0..n {
        a[i + i * n] += n as f64;
    }
    a
}

/// Checks `L * L^T == A` on the lower triangle, where `factored` holds the
/// factor in its lower triangle (the strict upper triangle is untouched
/// input and ignored).
fn assert_factor_reconstructs(orig: &[f64], factored: &[f64], n: usize, tol: f64) {
    for j in 0..n {
        for i in j..n {
            let mut acc = 0.0;
            for k in 0..=j {
                acc += factored[i + k * n] * factored[j + k * n];
            }
            let expected = orig[i + j * n];
            let diff = (acc - expected).abs();
            assert!(
                diff <= tol,
                "reconstruction failed at ({}, {}): expected {}, got {}, diff {}",
                i,
                j,
                expected,
                acc,
                diff
            );
        }
    }
}

fn config(nb: usize, panel: PanelStrategy) -> FactorConfig {
    FactorConfig::new()
        .with_block_size(BlockSize::Fixed(nb))
        .with_panel(panel)
}

/// Runs one factorization on the host executor, returning the outcome and
/// the executed op trace.
fn run_host(
    buf: &mut [f64],
    n: usize,
    nb: usize,
    panel: PanelStrategy,
) -> (Result<FactorRun, CholCoreError>, Vec<TraceEntry>) {
    let a = MatrixView::new(n, n, n.max(1)).unwrap();
    let algorithm = BlockedCholesky::with_config(config(nb, panel));
    let mut exec = HostExecutor::new(buf);
    let outcome = block_on(algorithm.factorize(&mut exec, Triangle::Lower, n, a));
    let trace = exec.trace().to_vec();
    (outcome, trace)
}

#[test]
fn identity_comes_back_as_identity() {
    // n=3, nb=2: one full panel plus a remainder panel.
    let n = 3;
    let mut buf = vec![0.0f64; n * n];
    for i in 0..n {
        buf[i + i * n] = 1.0;
    }
    let (outcome, _) = run_host(&mut buf, n, 2, PanelStrategy::HostAssisted);
    let run = outcome.unwrap();
    assert_eq!(run.panels, 2);
    for j in 0..n {
        for i in 0..n {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_eq!(buf[i + j * n], expected, "at ({}, {})", i, j);
        }
    }
}

#[test]
fn indefinite_two_by_two_reports_minor_two() {
    // First 1x1 block factors fine, the second pivot is negative.
    let n = 2;
    let mut buf = vec![4.0, 0.0, 0.0, -1.0];
    let (outcome, _) = run_host(&mut buf, n, 1, PanelStrategy::HostAssisted);
    let err = outcome.unwrap_err();
    assert!(matches!(err, CholCoreError::NotPositiveDefinite { minor: 2 }));
    assert_eq!(err.info_code(), 2);
    // The first block was factored before the failure.
    assert_eq!(buf[0], 2.0);
}

#[test]
fn reconstructs_spd_input_across_block_sizes() {
    let n = 64;
    let orig = spd_matrix(n, 7);
    for nb in [1, 8, 17, 32, 64] {
        let mut buf = orig.clone();
        let (outcome, _) = run_host(&mut buf, n, nb, PanelStrategy::HostAssisted);
        let run = outcome.unwrap();
        assert_eq!(run.block_size, nb);
        assert_factor_reconstructs(&orig, &buf, n, 1e-9 * n as f64);
    }
}

#[test]
fn factor_is_independent_of_block_size() {
    let n = 48;
    let orig = spd_matrix(n, 21);

    let mut reference = orig.clone();
    let (outcome, _) = run_host(&mut reference, n, 1, PanelStrategy::HostAssisted);
    outcome.unwrap();

    for nb in [5, 16, 48] {
        let mut buf = orig.clone();
        let (outcome, _) = run_host(&mut buf, n, nb, PanelStrategy::HostAssisted);
        outcome.unwrap();
        for j in 0..n {
            for i in j..n {
                let diff = (buf[i + j * n] - reference[i + j * n]).abs();
                assert!(
                    diff <= 1e-10,
                    "factor differs at ({}, {}) for nb={}: {}",
                    i,
                    j,
                    nb,
                    diff
                );
            }
        }
    }
}

#[test]
fn repeated_runs_are_bit_identical() {
    let n = 32;
    let orig = spd_matrix(n, 3);
    let mut first = orig.clone();
    let mut second = orig.clone();
    run_host(&mut first, n, 8, PanelStrategy::HostAssisted).0.unwrap();
    run_host(&mut second, n, 8, PanelStrategy::HostAssisted).0.unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_matrix_is_a_noop_with_no_queue_operations() {
    let mut buf: Vec<f64> = Vec::new();
    let (outcome, trace) = run_host(&mut buf, 0, 4, PanelStrategy::HostAssisted);
    let run = outcome.unwrap();
    assert_eq!(run.panels, 0);
    assert!(trace.is_empty());
}

#[test]
fn single_panel_has_no_trailing_update() {
    // n smaller than the block size: exactly one panel, nothing else.
    let n = 5;
    let orig = spd_matrix(n, 11);
    let mut buf = orig.clone();
    let (outcome, trace) = run_host(&mut buf, n, 8, PanelStrategy::HostAssisted);
    let run = outcome.unwrap();
    assert_eq!(run.panels, 1);
    assert_factor_reconstructs(&orig, &buf, n, 1e-10);
    let downloads = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Download { .. }))
        .count();
    let uploads = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Upload { .. }))
        .count();
    assert_eq!(downloads, 1);
    assert_eq!(uploads, 1);
    assert!(trace.iter().all(|t| matches!(
        t.op,
        TraceOp::Download { .. } | TraceOp::Upload { .. }
    )));
}

#[test]
fn three_panel_pipeline_has_the_expected_shape() {
    // Three full panels: the far-update path runs exactly once (after the
    // first panel; after the second the far region is empty).
    let n = 300;
    let nb = 100;
    let orig = spd_matrix(n, 5);
    let mut buf = orig.clone();
    let (outcome, trace) = run_host(&mut buf, n, nb, PanelStrategy::HostAssisted);
    let run = outcome.unwrap();
    assert_eq!(run.panels, 3);
    assert_factor_reconstructs(&orig, &buf, n, 1e-9 * n as f64);

    let solves: Vec<&TraceEntry> = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Trsm { .. }))
        .collect();
    assert_eq!(solves.len(), 2);
    assert!(solves.iter().all(|t| t.queue == QueueId::Compute));

    // Near rank-k updates stay on the compute queue; the single far gemm
    // and far rank-k land on the update queue.
    let near: Vec<&TraceEntry> = trace
        .iter()
        .filter(|t| {
            matches!(t.op, TraceOp::RankKUpdate { .. }) && t.queue == QueueId::Compute
        })
        .collect();
    assert_eq!(near.len(), 2);
    let far_rank_k: Vec<&TraceEntry> = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::RankKUpdate { .. }) && t.queue == QueueId::Update)
        .collect();
    assert_eq!(far_rank_k.len(), 1);
    let gemms: Vec<&TraceEntry> = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Gemm { .. }))
        .collect();
    assert_eq!(gemms.len(), 1);
    assert_eq!(gemms[0].queue, QueueId::Update);

    // The near update after the first panel targets A(100,100); the far
    // gemm targets A(200,100) and the far rank-k A(200,200).
    let near_c = match near[0].op {
        TraceOp::RankKUpdate { c } => c,
        _ => unreachable!(),
    };
    assert_eq!(near_c.offset(), 100 + 100 * n);
    let gemm_c = match gemms[0].op {
        TraceOp::Gemm { c } => c,
        _ => unreachable!(),
    };
    assert_eq!(gemm_c.offset(), 200 + 100 * n);
    let far_c = match far_rank_k[0].op {
        TraceOp::RankKUpdate { c } => c,
        _ => unreachable!(),
    };
    assert_eq!(far_c.offset(), 200 + 200 * n);

    // Cross-queue ordering: the solve's event is recorded before the update
    // queue's wait, and the wait precedes the far ops.
    let pos = |pred: &dyn Fn(&TraceEntry) -> bool| trace.iter().position(|t| pred(t)).unwrap();
    let first_record = pos(&|t| matches!(t.op, TraceOp::RecordEvent(_)));
    let wait = pos(&|t| matches!(t.op, TraceOp::WaitEvent(_)));
    let gemm = pos(&|t| matches!(t.op, TraceOp::Gemm { .. }));
    assert!(first_record < wait);
    assert!(wait < gemm);
}

#[test]
fn host_assisted_failure_halts_the_frontier() {
    // Identity with a poisoned diagonal entry at global index 3.
    let n = 6;
    let mut buf = vec![0.0f64; n * n];
    for i in 0..n {
        buf[i + i * n] = 1.0;
    }
    buf[2 + 2 * n] = -5.0;
    let (outcome, trace) = run_host(&mut buf, n, 2, PanelStrategy::HostAssisted);
    let err = outcome.unwrap_err();
    assert!(matches!(err, CholCoreError::NotPositiveDefinite { minor: 3 }));

    // Two panels were staged to the host (the second one failed). The
    // frontier stopped there: no third panel, and no trailing update was
    // issued for the failing one. Work already queued for the first panel
    // (the far update) still ran to completion during the final drain.
    let downloads = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Download { .. }))
        .count();
    assert_eq!(downloads, 2);
    let uploads = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Upload { .. }))
        .count();
    assert_eq!(uploads, 2);
    let solves = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Trsm { .. }))
        .count();
    assert_eq!(solves, 1);
    let gemms = trace
        .iter()
        .filter(|t| matches!(t.op, TraceOp::Gemm { .. }))
        .count();
    assert_eq!(gemms, 1);
}

#[test]
fn device_native_reports_status_after_the_final_drain() {
    let n = 6;
    let mut buf = vec![0.0f64; n * n];
    for i in 0..n {
        buf[i + i * n] = 1.0;
    }
    buf[2 + 2 * n] = -5.0;
    let (outcome, trace) = run_host(&mut buf, n, 2, PanelStrategy::DeviceNative);
    let err = outcome.unwrap_err();
    assert!(matches!(err, CholCoreError::NotPositiveDefinite { minor: 3 }));

    // All three panels were issued; the one behind the failure was skipped
    // by the status guard on the device.
    let flags: Vec<bool> = trace
        .iter()
        .filter_map(|t| match t.op {
            TraceOp::FactorBlock { skipped, .. } => Some(skipped),
            _ => None,
        })
        .collect();
    assert_eq!(flags, vec![false, false, true]);
}

#[test]
fn device_native_factors_spd_input() {
    let n = 64;
    let orig = spd_matrix(n, 13);
    let mut buf = orig.clone();
    let (outcome, _) = run_host(&mut buf, n, 16, PanelStrategy::DeviceNative);
    let run = outcome.unwrap();
    assert_eq!(run.panels, 4);
    assert_factor_reconstructs(&orig, &buf, n, 1e-9 * n as f64);
}

#[test]
fn upper_triangle_is_an_invalid_argument() {
    let n = 4;
    let mut buf = spd_matrix(n, 2);
    let a = MatrixView::new(n, n, n).unwrap();
    let algorithm = BlockedCholesky::new();
    let mut exec = HostExecutor::new(&mut buf);
    let err = block_on(algorithm.factorize(&mut exec, Triangle::Upper, n, a)).unwrap_err();
    assert!(matches!(err, CholCoreError::InvalidArgument { index: 1, .. }));
    assert_eq!(err.info_code(), -1);
    // Rejected before any work was issued.
    assert!(exec.trace().is_empty());
}

#[test]
fn mismatched_view_is_an_invalid_argument() {
    let mut buf = vec![0.0f64; 16];
    let a = MatrixView::new(4, 4, 4).unwrap();
    let algorithm = BlockedCholesky::new();
    let mut exec = HostExecutor::new(&mut buf);
    let err = block_on(algorithm.factorize(&mut exec, Triangle::Lower, 5, a)).unwrap_err();
    assert!(matches!(err, CholCoreError::InvalidArgument { index: 3, .. }));
    assert_eq!(err.info_code(), -3);
}

#[test]
fn zero_block_size_is_rejected() {
    let mut buf = vec![1.0f64];
    let a = MatrixView::new(1, 1, 1).unwrap();
    let algorithm = BlockedCholesky::with_config(config(0, PanelStrategy::HostAssisted));
    let mut exec = HostExecutor::new(&mut buf);
    let err = block_on(algorithm.factorize(&mut exec, Triangle::Lower, 1, a)).unwrap_err();
    assert!(matches!(err, CholCoreError::InvalidArgument { index: 5, .. }));
}
