//! `chol-factor`: blocked right-looking Cholesky factorization pipelined
//! across two execution queues.
//!
//! The algorithm layer is written against the `Executor` abstraction from
//! `chol-core`, so one pipeline definition runs on the host replay executor
//! (deterministic, fully inspectable, no GPU required) and on a WGPU device.

// Core modules
pub mod algorithms;
pub mod config;

pub use algorithms::{BlockedCholesky, FactorAlgorithm, FactorRun};
pub use config::{BlockSize, FactorConfig, PanelStrategy};

// Re-export from chol_core
pub use chol_core::{
    CholCoreError, Executor, GpuDevice, GpuExecutor, GpuMatrix, HostExecutor, MatrixView, QueueId,
    Triangle,
};
