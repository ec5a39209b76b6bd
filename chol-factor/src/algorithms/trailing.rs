//! Trailing-matrix update: the Schur-complement corrections after a panel.
//!
//! The trailing matrix is split into a near region (the next panel, on the
//! factorization's critical path) and a far region (everything past it).
//! The solve and the near rank-k update stay on the compute queue; the far
//! update moves to the update queue behind an event edge, so it overlaps
//! the next panel's factorization and its latency is hidden (look-ahead).

use chol_core::{
    Coeff, CholCoreError, Diag, EventId, Executor, KernelOp, MatrixView, QueueId, Side, Transpose,
    Triangle,
};

/// Issues the trailing update for the factored `jb x jb` panel at offset
/// `j`. `event` is re-recorded on every call; a wait issued here binds to
/// this call's recording.
pub(crate) fn update_trailing<E: Executor>(
    exec: &mut E,
    event: EventId,
    a: MatrixView,
    j: usize,
    jb: usize,
    nb: usize,
    n: usize,
) -> Result<(), CholCoreError> {
    let nextj = j + jb;
    debug_assert!(nextj < n, "no trailing matrix past the last panel");

    // Apply the diagonal factor to the column block below it, in place.
    let factor = a.block(j, j, jb, jb);
    let below = a.block(nextj, j, n - nextj, jb);
    exec.launch(
        QueueId::Compute,
        KernelOp::Trsm {
            side: Side::Right,
            uplo: Triangle::Lower,
            trans: Transpose::ConjTrans,
            diag: Diag::NonUnit,
            alpha: Coeff::One,
            l: factor,
            b: below,
        },
    )?;
    exec.record_event(QueueId::Compute, event)?;

    // Near region: the next panel's diagonal block. Same queue as the
    // solve, so no cross-queue wait is needed.
    let nextjb = nb.min(n - nextj);
    let near_rows = a.block(nextj, j, nextjb, jb);
    let near_diag = a.block(nextj, nextj, nextjb, nextjb);
    exec.launch(
        QueueId::Compute,
        KernelOp::RankKUpdate {
            uplo: Triangle::Lower,
            trans: Transpose::No,
            alpha: Coeff::NegOne,
            a: near_rows,
            beta: Coeff::One,
            c: near_diag,
        },
    )?;

    // Far region: not needed until later iterations, deferred to the update
    // queue. It reads the solved column block, hence the event wait.
    if nextj + nextjb < n {
        exec.wait_event(QueueId::Update, event)?;
        let far_rows = n - nextj - nextjb;
        let far_a = a.block(nextj + nextjb, j, far_rows, jb);
        let far_c = a.block(nextj + nextjb, nextj, far_rows, nextjb);
        exec.launch(
            QueueId::Update,
            KernelOp::Gemm {
                trans_a: Transpose::No,
                trans_b: Transpose::ConjTrans,
                alpha: Coeff::NegOne,
                a: far_a,
                b: near_rows,
                beta: Coeff::One,
                c: far_c,
            },
        )?;
        let far_diag = a.block(nextj + nextjb, nextj + nextjb, far_rows, far_rows);
        exec.launch(
            QueueId::Update,
            KernelOp::RankKUpdate {
                uplo: Triangle::Lower,
                trans: Transpose::No,
                alpha: Coeff::NegOne,
                a: far_a,
                beta: Coeff::One,
                c: far_diag,
            },
        )?;
    }
    Ok(())
}
