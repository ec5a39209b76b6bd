//! Host replay executor.
//!
//! Buffers every issued operation per logical queue and replays them with
//! the host reference kernels, honoring FIFO order within a queue and event
//! edges across queues. A queue whose head waits on an event that cannot
//! fire any more is reported as a stall instead of hanging. Every executed
//! operation is appended to an inspectable trace, which is what the
//! pipeline-shape tests assert against.

use std::collections::VecDeque;
use std::fmt::Debug;

use bytemuck::Pod;
use num_traits::Float;

use crate::error::CholCoreError;
use crate::fabric::{EventId, Executor, KernelOp, QueueId};
use crate::kernels::{self, Diag, Side, Transpose, Triangle};
use crate::view::MatrixView;

/// One executed operation, in replay order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceOp {
    Trsm { b: MatrixView },
    RankKUpdate { c: MatrixView },
    Gemm { c: MatrixView },
    FactorBlock { block: MatrixView, skipped: bool },
    RecordEvent(EventId),
    WaitEvent(EventId),
    Download { src: MatrixView },
    Upload { dst: MatrixView },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceEntry {
    pub queue: QueueId,
    pub op: TraceOp,
}

enum Task<T> {
    Kernel(KernelOp),
    Record { event: EventId, seq: u64 },
    Wait { event: EventId, required: u64 },
    Upload { data: Vec<T>, dst: MatrixView },
    ResetStatus,
}

#[derive(Default, Clone, Copy)]
struct EventState {
    /// Sequence number of the latest `record_event` issued (program order).
    issued: u64,
    /// Sequence number of the latest recording that has fired.
    fired: u64,
}

/// Executor that owns a borrowed host buffer and replays queued work with
/// the reference kernels.
pub struct HostExecutor<'a, T> {
    buf: &'a mut [T],
    queues: [VecDeque<Task<T>>; 2],
    events: Vec<EventState>,
    next_seq: u64,
    status: i64,
    trace: Vec<TraceEntry>,
}

fn qi(queue: QueueId) -> usize {
    match queue {
        QueueId::Compute => 0,
        QueueId::Update => 1,
    }
}

impl<'a, T> HostExecutor<'a, T>
where
    T: Float + Copy + Send + Sync + Debug + Default + Pod,
{
    pub fn new(buf: &'a mut [T]) -> Self {
        Self {
            buf,
            queues: [VecDeque::new(), VecDeque::new()],
            events: Vec::new(),
            next_seq: 0,
            status: 0,
            trace: Vec::new(),
        }
    }

    /// Every operation executed so far, in replay order.
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// Executes the head task of `queue` if it is runnable. Returns `false`
    /// when the queue is empty or its head waits on an event that has not
    /// fired yet.
    fn step(&mut self, queue: QueueId) -> Result<bool, CholCoreError> {
        let runnable = match self.queues[qi(queue)].front() {
            None => false,
            Some(Task::Wait { event, required }) => self.events[event.0].fired >= *required,
            Some(_) => true,
        };
        if !runnable {
            return Ok(false);
        }
        let Some(task) = self.queues[qi(queue)].pop_front() else {
            return Ok(false);
        };
        match task {
            Task::Kernel(op) => self.exec_kernel(queue, op)?,
            Task::Record { event, seq } => {
                self.events[event.0].fired = seq;
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::RecordEvent(event),
                });
            }
            Task::Wait { event, .. } => {
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::WaitEvent(event),
                });
            }
            Task::Upload { data, dst } => {
                let rows = dst.rows();
                for c in 0..dst.cols() {
                    for r in 0..rows {
                        self.buf[dst.index(r, c)] = data[r + c * rows];
                    }
                }
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::Upload { dst },
                });
            }
            Task::ResetStatus => self.status = 0,
        }
        Ok(true)
    }

    /// Drains `queue`: alternates between both queues, running each head
    /// task once its event waits are satisfied, until nothing can run.
    ///
    /// The other queue is allowed to complete its runnable work too. The
    /// queues execute concurrently on a real device, so by the time a drain
    /// returns, any work whose dependencies were met may have finished;
    /// replaying to quiescence models that without depending on timing.
    fn drain(&mut self, queue: QueueId) -> Result<(), CholCoreError> {
        loop {
            let a = self.step(queue)?;
            let b = self.step(queue.other())?;
            if !a && !b {
                break;
            }
        }
        if !self.queues[qi(queue)].is_empty() {
            return Err(CholCoreError::Internal(
                "execution queues stalled on unsatisfiable event dependencies".to_string(),
            ));
        }
        Ok(())
    }

    fn exec_kernel(&mut self, queue: QueueId, op: KernelOp) -> Result<(), CholCoreError> {
        match op {
            KernelOp::Trsm {
                side,
                uplo,
                trans,
                diag,
                alpha,
                l,
                b,
            } => {
                if side != Side::Right
                    || uplo != Triangle::Lower
                    || trans != Transpose::ConjTrans
                    || diag != Diag::NonUnit
                {
                    return Err(CholCoreError::UnsupportedOperation(
                        "triangular solve: only right/lower/conj-trans/non-unit".to_string(),
                    ));
                }
                kernels::trsm_right_lower_trans(self.buf, alpha, l, b);
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::Trsm { b },
                });
            }
            KernelOp::RankKUpdate {
                uplo,
                trans,
                alpha,
                a,
                beta,
                c,
            } => {
                if uplo != Triangle::Lower || trans != Transpose::No {
                    return Err(CholCoreError::UnsupportedOperation(
                        "rank-k update: only lower/no-trans".to_string(),
                    ));
                }
                kernels::syrk_lower_notrans(self.buf, alpha, a, beta, c);
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::RankKUpdate { c },
                });
            }
            KernelOp::Gemm {
                trans_a,
                trans_b,
                alpha,
                a,
                b,
                beta,
                c,
            } => {
                if trans_a != Transpose::No || trans_b != Transpose::ConjTrans {
                    return Err(CholCoreError::UnsupportedOperation(
                        "general multiply: only no-trans x conj-trans".to_string(),
                    ));
                }
                kernels::gemm_nt(self.buf, alpha, a, b, beta, c);
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::Gemm { c },
                });
            }
            KernelOp::FactorBlock {
                uplo,
                block,
                offset,
            } => {
                if uplo != Triangle::Lower {
                    return Err(CholCoreError::UnsupportedOperation(
                        "block factorization: only the lower triangle".to_string(),
                    ));
                }
                let skipped = self.status != 0;
                if !skipped {
                    let local = kernels::potf2_lower(self.buf, block);
                    if local != 0 {
                        self.status = (offset + local) as i64;
                    }
                }
                self.trace.push(TraceEntry {
                    queue,
                    op: TraceOp::FactorBlock { block, skipped },
                });
            }
        }
        Ok(())
    }
}

impl<T> Executor for HostExecutor<'_, T>
where
    T: Float + Copy + Send + Sync + Debug + Default + Pod,
{
    type Elem = T;

    fn launch(&mut self, queue: QueueId, op: KernelOp) -> Result<(), CholCoreError> {
        self.queues[qi(queue)].push_back(Task::Kernel(op));
        Ok(())
    }

    fn create_event(&mut self) -> EventId {
        self.events.push(EventState::default());
        EventId(self.events.len() - 1)
    }

    fn record_event(&mut self, queue: QueueId, event: EventId) -> Result<(), CholCoreError> {
        if event.0 >= self.events.len() {
            return Err(CholCoreError::Internal(format!(
                "record on unknown event {:?}",
                event
            )));
        }
        self.next_seq += 1;
        self.events[event.0].issued = self.next_seq;
        self.queues[qi(queue)].push_back(Task::Record {
            event,
            seq: self.next_seq,
        });
        Ok(())
    }

    fn wait_event(&mut self, queue: QueueId, event: EventId) -> Result<(), CholCoreError> {
        if event.0 >= self.events.len() {
            return Err(CholCoreError::Internal(format!(
                "wait on unknown event {:?}",
                event
            )));
        }
        // A wait on a never-recorded event completes immediately
        // (required = 0 is always satisfied).
        self.queues[qi(queue)].push_back(Task::Wait {
            event,
            required: self.events[event.0].issued,
        });
        Ok(())
    }

    async fn synchronize(&mut self, queue: QueueId) -> Result<(), CholCoreError> {
        self.drain(queue)
    }

    async fn read_block(
        &mut self,
        queue: QueueId,
        src: MatrixView,
    ) -> Result<Vec<T>, CholCoreError> {
        self.drain(queue)?;
        let rows = src.rows();
        let mut out = vec![T::default(); rows * src.cols()];
        for c in 0..src.cols() {
            for r in 0..rows {
                out[r + c * rows] = self.buf[src.index(r, c)];
            }
        }
        self.trace.push(TraceEntry {
            queue,
            op: TraceOp::Download { src },
        });
        Ok(out)
    }

    fn write_block(
        &mut self,
        queue: QueueId,
        data: &[T],
        dst: MatrixView,
    ) -> Result<(), CholCoreError> {
        if data.len() != dst.rows() * dst.cols() {
            return Err(CholCoreError::Internal(format!(
                "block upload size mismatch: {} elements for a {}x{} block",
                data.len(),
                dst.rows(),
                dst.cols()
            )));
        }
        self.queues[qi(queue)].push_back(Task::Upload {
            data: data.to_vec(),
            dst,
        });
        Ok(())
    }

    fn reset_status(&mut self, queue: QueueId) -> Result<(), CholCoreError> {
        self.queues[qi(queue)].push_back(Task::ResetStatus);
        Ok(())
    }

    async fn fetch_status(&mut self) -> Result<i64, CholCoreError> {
        self.drain(QueueId::Compute)?;
        self.drain(QueueId::Update)?;
        Ok(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::block_on;

    fn full(n: usize) -> MatrixView {
        MatrixView::new(n, n, n).unwrap()
    }

    #[test]
    fn queued_work_runs_at_drain_in_fifo_order() {
        let mut buf = vec![4.0f64, 0.0, 0.0, 0.0];
        let mut exec = HostExecutor::new(&mut buf);
        let a = full(2);
        exec.launch(
            QueueId::Compute,
            KernelOp::FactorBlock {
                uplo: Triangle::Lower,
                block: a.block(0, 0, 1, 1),
                offset: 0,
            },
        )
        .unwrap();
        // Nothing executed before the drain.
        assert!(exec.trace().is_empty());
        block_on(exec.synchronize(QueueId::Compute)).unwrap();
        assert_eq!(exec.trace().len(), 1);
        assert_eq!(buf[0], 2.0);
    }

    #[test]
    fn wait_on_unrecorded_event_is_a_no_op() {
        let mut buf = vec![0.0f64; 4];
        let mut exec = HostExecutor::new(&mut buf);
        let ev = exec.create_event();
        exec.wait_event(QueueId::Update, ev).unwrap();
        block_on(exec.synchronize(QueueId::Update)).unwrap();
        assert_eq!(
            exec.trace(),
            &[TraceEntry {
                queue: QueueId::Update,
                op: TraceOp::WaitEvent(ev)
            }]
        );
    }

    #[test]
    fn event_edge_forces_cross_queue_order() {
        let mut buf = vec![1.0f64, 0.0, 0.0, 1.0];
        let mut exec = HostExecutor::new(&mut buf);
        let a = full(2);
        let ev = exec.create_event();
        exec.launch(
            QueueId::Compute,
            KernelOp::FactorBlock {
                uplo: Triangle::Lower,
                block: a.block(0, 0, 1, 1),
                offset: 0,
            },
        )
        .unwrap();
        exec.record_event(QueueId::Compute, ev).unwrap();
        exec.wait_event(QueueId::Update, ev).unwrap();
        exec.launch(
            QueueId::Update,
            KernelOp::FactorBlock {
                uplo: Triangle::Lower,
                block: a.block(1, 1, 1, 1),
                offset: 1,
            },
        )
        .unwrap();
        // Draining the update queue first must still run the compute queue's
        // work before the waiting task.
        block_on(exec.synchronize(QueueId::Update)).unwrap();
        let kinds: Vec<_> = exec.trace().iter().map(|t| t.queue).collect();
        assert_eq!(
            kinds,
            vec![
                QueueId::Compute,
                QueueId::Compute,
                QueueId::Update,
                QueueId::Update
            ]
        );
    }

    #[test]
    fn unsatisfiable_wait_reports_a_stall() {
        let mut buf = vec![0.0f64; 1];
        let mut exec = HostExecutor::new(&mut buf);
        let e1 = exec.create_event();
        let e2 = exec.create_event();
        exec.record_event(QueueId::Compute, e1).unwrap();
        exec.record_event(QueueId::Update, e2).unwrap();
        exec.wait_event(QueueId::Compute, e2).unwrap();
        exec.wait_event(QueueId::Update, e1).unwrap();
        // Rotate both queues so each wait precedes the record it needs:
        // a cross-queue cycle neither queue can break.
        exec.queues[0].rotate_left(1);
        exec.queues[1].rotate_left(1);
        let err = block_on(exec.synchronize(QueueId::Compute)).unwrap_err();
        assert!(matches!(err, CholCoreError::Internal(_)));
    }

    #[test]
    fn device_status_guard_skips_later_blocks() {
        // 3x3 with a failing 1x1 block at offset 1, then another block.
        let mut buf = vec![0.0f64; 9];
        let a = full(3);
        buf[a.index(0, 0)] = 4.0;
        buf[a.index(1, 1)] = -1.0;
        buf[a.index(2, 2)] = 9.0;
        let mut exec = HostExecutor::new(&mut buf);
        exec.reset_status(QueueId::Compute).unwrap();
        for j in 0..3 {
            exec.launch(
                QueueId::Compute,
                KernelOp::FactorBlock {
                    uplo: Triangle::Lower,
                    block: a.block(j, j, 1, 1),
                    offset: j,
                },
            )
            .unwrap();
        }
        let status = block_on(exec.fetch_status()).unwrap();
        assert_eq!(status, 2);
        let skipped: Vec<bool> = exec
            .trace()
            .iter()
            .filter_map(|t| match t.op {
                TraceOp::FactorBlock { skipped, .. } => Some(skipped),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec![false, false, true]);
        // The block behind the failure was never factored.
        assert_eq!(buf[8], 9.0);
    }
}
