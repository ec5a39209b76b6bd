//! # Factorization Core Library
//!
//! Provides the matrix-view data model, the two-queue execution fabric, the
//! numeric kernel interface with host reference kernels, and the WGPU device
//! plumbing used by the blocked factorization layer.

// Declare modules
pub(crate) mod context;
pub mod device;
pub mod error;
pub mod fabric;
pub mod host;
pub mod kernels;
pub mod matrix;
pub mod view;

// Re-export public types
pub use device::{GpuDevice, GpuExecutor, TransferStats};
pub use error::CholCoreError;
pub use fabric::{EventId, Executor, KernelOp, QueueId};
pub use host::{HostExecutor, TraceEntry, TraceOp};
pub use kernels::{Coeff, Diag, Side, Transpose, Triangle};
pub use matrix::GpuMatrix;
pub use view::MatrixView;
