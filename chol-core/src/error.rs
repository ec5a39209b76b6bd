use thiserror::Error;

#[derive(Error, Debug)]
pub enum CholCoreError {
    #[error("WGPU initialization failed: {0}")]
    WgpuInitError(String),

    #[error("WGPU error: {0}")]
    WgpuError(String),

    #[error("invalid argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    #[error("leading minor of order {minor} is not positive definite")]
    NotPositiveDefinite { minor: usize },

    #[error("host workspace allocation failed: {0}")]
    HostAlloc(String),

    #[error("device workspace allocation failed: {0}")]
    DeviceAlloc(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CholCoreError {
    /// Maps this error onto the conventional integer status of dense
    /// factorization routines: `-k` means argument `k` was invalid, `+k`
    /// means the leading minor of order `k` is not positive definite.
    /// Allocation failures use the dedicated `-112` / `-113` codes.
    pub fn info_code(&self) -> i64 {
        match self {
            CholCoreError::InvalidArgument { index, .. } => -(*index as i64),
            CholCoreError::NotPositiveDefinite { minor } => *minor as i64,
            CholCoreError::HostAlloc(_) => -112,
            CholCoreError::DeviceAlloc(_) => -113,
            _ => i64::MIN,
        }
    }
}
