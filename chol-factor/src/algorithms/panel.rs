//! Panel factorization: one diagonal block per frontier step.

use chol_core::{kernels, CholCoreError, Executor, KernelOp, MatrixView, QueueId, Triangle};

use crate::config::PanelStrategy;

/// Factorizes the `jb x jb` diagonal block of `a` at frontier offset `j`.
///
/// Host-assisted: stages the block to the host, factors it there, and
/// reports failure immediately as `Some(global_minor)` (1-based). The owning
/// queue is drained before the host reads the staged data and again before
/// the transfer back is issued, so the staging buffer is never both an
/// in-flight destination and a new source. The partial factor is written
/// back even on failure.
///
/// Device-native: issues one in-device factorization; failure is only
/// visible in the device status cell after the final drain, so this always
/// returns `None`.
pub(crate) async fn factor_panel<E: Executor>(
    exec: &mut E,
    strategy: PanelStrategy,
    a: MatrixView,
    j: usize,
    jb: usize,
) -> Result<Option<usize>, CholCoreError> {
    let block = a.block(j, j, jb, jb);
    match strategy {
        PanelStrategy::HostAssisted => {
            let mut work = exec.read_block(QueueId::Compute, block).await?;
            let staged = MatrixView::new(jb, jb, jb)?;
            let local = kernels::potf2_lower(&mut work, staged);
            exec.synchronize(QueueId::Compute).await?;
            exec.write_block(QueueId::Compute, &work, block)?;
            if local != 0 {
                return Ok(Some(j + local));
            }
            Ok(None)
        }
        PanelStrategy::DeviceNative => {
            exec.launch(
                QueueId::Compute,
                KernelOp::FactorBlock {
                    uplo: Triangle::Lower,
                    block,
                    offset: j,
                },
            )?;
            Ok(None)
        }
    }
}
