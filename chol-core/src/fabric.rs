//! Execution fabric: two ordered logical queues, synchronization events, and
//! the executor abstraction the factorization pipeline is written against.
//!
//! Operations are modeled as explicit task nodes ([`KernelOp`]) tagged with
//! the queue they target; cross-queue ordering exists only where an event is
//! recorded on one queue and awaited on the other. This keeps the pipeline
//! inspectable and lets [`crate::host::HostExecutor`] replay it without real
//! asynchronous hardware.

use std::fmt::Debug;
use std::future::Future;

use bytemuck::Pod;
use num_traits::Float;

use crate::error::CholCoreError;
use crate::kernels::{Coeff, Diag, Side, Transpose, Triangle};
use crate::view::MatrixView;

/// One of the two ordered execution queues.
///
/// Operations issued to a queue complete in FIFO order on that queue, with
/// no ordering relative to the other queue unless an event edge says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueId {
    /// Panel factorization, triangular solve, and the near (critical-path)
    /// rank-k update.
    Compute,
    /// The deferred far trailing update, overlapped with the next panel.
    Update,
}

impl QueueId {
    pub fn other(self) -> QueueId {
        match self {
            QueueId::Compute => QueueId::Update,
            QueueId::Update => QueueId::Compute,
        }
    }
}

/// Handle to a synchronization event created by an executor.
///
/// An event may be re-recorded; a wait binds to the most recent record
/// issued before it in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventId(pub(crate) usize);

/// An asynchronous numeric operation bound to an execution queue.
///
/// Views address the single matrix buffer owned by the executor. Scaling
/// coefficients are restricted to plus/minus one ([`Coeff`]); that is all
/// the Schur-complement corrections of the blocked algorithm need.
#[derive(Debug, Clone, Copy)]
pub enum KernelOp {
    /// Triangular solve `b := alpha * b * inv(tri(l))`.
    Trsm {
        side: Side,
        uplo: Triangle,
        trans: Transpose,
        diag: Diag,
        alpha: Coeff,
        l: MatrixView,
        b: MatrixView,
    },
    /// Symmetric rank-k update `c := alpha * a * a^H + beta * c` on the
    /// stored triangle of `c`.
    RankKUpdate {
        uplo: Triangle,
        trans: Transpose,
        alpha: Coeff,
        a: MatrixView,
        beta: Coeff,
        c: MatrixView,
    },
    /// General multiply `c := alpha * a * b^H + beta * c`.
    Gemm {
        trans_a: Transpose,
        trans_b: Transpose,
        alpha: Coeff,
        a: MatrixView,
        b: MatrixView,
        beta: Coeff,
        c: MatrixView,
    },
    /// In-device factorization of the diagonal block `block` sitting at
    /// global diagonal offset `offset`. Skips all work when the status cell
    /// is already nonzero; records `offset + local` there on first failure.
    FactorBlock {
        uplo: Triangle,
        block: MatrixView,
        offset: usize,
    },
}

/// Abstraction over a device that executes [`KernelOp`]s on two ordered
/// queues. Implemented by the host replay executor and by the WGPU executor.
///
/// Issue-style methods (`launch`, `record_event`, `wait_event`,
/// `write_block`) return immediately; suspension points (`synchronize`,
/// `read_block`, `fetch_status`) are async and block on queue completion,
/// mirroring the drain semantics of the underlying fabric.
pub trait Executor {
    /// Element type of the matrix buffer this executor owns.
    type Elem: Float + Copy + Send + Sync + Debug + Default + Pod;

    /// Issues `op` on `queue`.
    fn launch(&mut self, queue: QueueId, op: KernelOp) -> Result<(), CholCoreError>;

    /// Creates a fresh, unrecorded event.
    fn create_event(&mut self) -> EventId;

    /// Records `event` on `queue`: the event fires once every operation
    /// issued on `queue` before this call has completed.
    fn record_event(&mut self, queue: QueueId, event: EventId) -> Result<(), CholCoreError>;

    /// Makes every operation issued on `queue` after this call wait until
    /// the latest recording of `event` has fired. Non-blocking for the host.
    fn wait_event(&mut self, queue: QueueId, event: EventId) -> Result<(), CholCoreError>;

    /// Drains `queue`: resolves once every operation previously issued on it
    /// has completed.
    fn synchronize(
        &mut self,
        queue: QueueId,
    ) -> impl Future<Output = Result<(), CholCoreError>> + Send;

    /// Drains `queue`, then copies the block `src` into a freshly allocated
    /// host vector (packed column-major with leading dimension `src.rows()`).
    fn read_block(
        &mut self,
        queue: QueueId,
        src: MatrixView,
    ) -> impl Future<Output = Result<Vec<Self::Elem>, CholCoreError>> + Send;

    /// Issues an asynchronous host-to-device copy of `data` (packed
    /// column-major, leading dimension `dst.rows()`) into the block `dst`
    /// on `queue`.
    fn write_block(
        &mut self,
        queue: QueueId,
        data: &[Self::Elem],
        dst: MatrixView,
    ) -> Result<(), CholCoreError>;

    /// Resets the device-resident status cell to zero on `queue`.
    fn reset_status(&mut self, queue: QueueId) -> Result<(), CholCoreError>;

    /// Drains both queues and returns the status cell contents.
    fn fetch_status(&mut self) -> impl Future<Output = Result<i64, CholCoreError>> + Send;
}
