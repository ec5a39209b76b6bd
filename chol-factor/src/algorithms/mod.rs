use std::fmt::Debug;
use std::future::Future;

use chol_core::{CholCoreError, Executor, MatrixView, Triangle};

// --- Algorithm Trait Definition ---
/// Trait representing a dense in-place factorization algorithm.
/// Generic over the executor so the same pipeline runs on the host replay
/// executor and on a GPU.
pub trait FactorAlgorithm<E: Executor> {
    /// Metadata describing a completed factorization run.
    type Metadata: Debug;

    /// Factorizes the matrix of order `n` behind the view `a` in place.
    ///
    /// On success the stored triangle holds the factor; on error the buffer
    /// contents past the reported point are undefined and must not be used.
    /// Every operation issued on the executor's queues is drained before
    /// this returns, on every path.
    fn factorize(
        &self,
        exec: &mut E,
        uplo: Triangle,
        n: usize,
        a: MatrixView,
    ) -> impl Future<Output = Result<Self::Metadata, CholCoreError>> + Send;

    /// Validates the call arguments; positions follow the conventional
    /// argument order (uplo = 1, n = 2, a = 3, ld = 4) so
    /// [`CholCoreError::info_code`] reproduces the usual negative codes.
    fn validate_inputs(
        &self,
        uplo: Triangle,
        n: usize,
        a: &MatrixView,
    ) -> Result<(), CholCoreError> {
        if uplo != Triangle::Lower {
            return Err(CholCoreError::InvalidArgument {
                index: 1,
                reason: "only the lower-triangular factorization is supported".to_string(),
            });
        }
        if a.rows() != n || a.cols() != n {
            return Err(CholCoreError::InvalidArgument {
                index: 3,
                reason: format!(
                    "matrix view is {}x{}, expected order {}",
                    a.rows(),
                    a.cols(),
                    n
                ),
            });
        }
        if a.ld() < n.max(1) {
            return Err(CholCoreError::InvalidArgument {
                index: 4,
                reason: format!("leading dimension ({}) must be >= max(1, {})", a.ld(), n),
            });
        }
        Ok(())
    }
}

// --- Algorithm Implementations ---

pub mod blocked_cholesky;
mod panel;
mod trailing;

pub use blocked_cholesky::{BlockedCholesky, FactorRun};
