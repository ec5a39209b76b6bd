//! Block scheduler for the right-looking blocked Cholesky factorization.

use chol_core::{CholCoreError, Executor, MatrixView, QueueId, Triangle};
use log::{debug, warn};

use super::{panel, trailing, FactorAlgorithm};
use crate::config::{FactorConfig, PanelStrategy};

/// Metadata about a completed factorization run.
#[derive(Debug, Clone, Copy)]
pub struct FactorRun {
    /// Number of diagonal panels processed.
    pub panels: usize,
    /// Panel width actually used.
    pub block_size: usize,
}

/// Blocked right-looking Cholesky factorization `A = L * L^H`.
///
/// Walks the frontier offset in steps of the configured block size:
/// factorizes each diagonal panel, then pipelines the trailing update
/// across the two queues so the far update overlaps the next panel.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockedCholesky {
    pub config: FactorConfig,
}

impl BlockedCholesky {
    /// Creates the algorithm with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FactorConfig) -> Self {
        Self { config }
    }
}

impl<E: Executor + Send> FactorAlgorithm<E> for BlockedCholesky {
    type Metadata = FactorRun;

    async fn factorize(
        &self,
        exec: &mut E,
        uplo: Triangle,
        n: usize,
        a: MatrixView,
    ) -> Result<FactorRun, CholCoreError> {
        // Argument checks happen before any work is issued.
        <BlockedCholesky as FactorAlgorithm<E>>::validate_inputs(self, uplo, n, &a)?;

        let nb = self.config.block_size.panel_width();
        if nb == 0 {
            return Err(CholCoreError::InvalidArgument {
                index: 5,
                reason: "block size must be nonzero".to_string(),
            });
        }
        if n == 0 {
            return Ok(FactorRun {
                panels: 0,
                block_size: nb,
            });
        }

        debug!(
            "blocked Cholesky: n={}, nb={}, panel strategy {:?}",
            n, nb, self.config.panel
        );
        exec.reset_status(QueueId::Compute)?;
        let event = exec.create_event();

        let mut panels = 0;
        let mut outcome: Result<(), CholCoreError> = Ok(());
        let mut j = 0;
        while j < n {
            let jb = nb.min(n - j);
            debug!("panel at offset {} (width {})", j, jb);
            panels += 1;
            match panel::factor_panel(exec, self.config.panel, a, j, jb).await {
                Ok(None) => {}
                Ok(Some(minor)) => {
                    // Terminal: no further blocks are processed and no
                    // further device work is issued.
                    warn!("leading minor of order {} is not positive definite", minor);
                    outcome = Err(CholCoreError::NotPositiveDefinite { minor });
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
            if j + jb < n {
                if let Err(e) = trailing::update_trailing(exec, event, a, j, jb, nb, n) {
                    outcome = Err(e);
                    break;
                }
            }
            j += jb;
        }

        // Everything already issued is drained before returning, on the
        // failure paths too; nothing is left dangling on either queue.
        exec.synchronize(QueueId::Compute).await?;
        exec.synchronize(QueueId::Update).await?;
        outcome?;

        if self.config.panel == PanelStrategy::DeviceNative {
            let status = exec.fetch_status().await?;
            if status > 0 {
                warn!("leading minor of order {} is not positive definite", status);
                return Err(CholCoreError::NotPositiveDefinite {
                    minor: status as usize,
                });
            }
        }

        Ok(FactorRun {
            panels,
            block_size: nb,
        })
    }
}
