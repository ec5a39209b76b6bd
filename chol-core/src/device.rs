//! GPU entry point and the WGPU-backed executor.
//!
//! [`GpuDevice`] owns the WGPU context and creates device-resident matrices;
//! [`GpuExecutor`] implements [`Executor`] for one matrix by dispatching the
//! WGSL kernels. WGPU exposes a single hardware queue, so both logical
//! queues map onto it: total submission order is a legal serialization of
//! the declared dependency graph and every event edge is subsumed by it.
//! Event record/wait therefore only needs bookkeeping here; the host replay
//! executor is the one that exercises the edges for real.

use std::borrow::Cow;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::error::CholCoreError;
use crate::fabric::{EventId, Executor, KernelOp, QueueId};
use crate::kernels::{Coeff, Diag, Side, Transpose, Triangle};
use crate::matrix::GpuMatrix;
use crate::view::MatrixView;

const WORKGROUP_SIZE: u32 = 64;

/// Represents a GPU execution device, holding the WGPU context.
#[derive(Debug)]
pub struct GpuDevice {
    pub(crate) context: Arc<GpuContext>,
}

/// Current GPU transfer statistics.
#[derive(Debug, Clone, Copy)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}

impl GpuDevice {
    /// Creates a new GpuDevice, initializing the underlying WGPU context
    /// asynchronously. This is the primary entry point for using the GPU.
    pub async fn new() -> Result<Self, CholCoreError> {
        let context = GpuContext::new().await?;
        log::info!("GpuDevice created successfully");
        Ok(Self {
            context: Arc::new(context),
        })
    }

    /// Creates a device-resident column-major matrix of order `n` with
    /// leading dimension `ld` from `ld * n` host elements.
    pub fn create_matrix(
        &self,
        label: &str,
        n: usize,
        ld: usize,
        data: &[f64],
    ) -> Result<GpuMatrix, CholCoreError> {
        if ld < n.max(1) {
            return Err(CholCoreError::InvalidArgument {
                index: 4,
                reason: format!("leading dimension ({}) must be >= max(1, {})", ld, n),
            });
        }
        if data.len() != ld * n {
            return Err(CholCoreError::InvalidArgument {
                index: 3,
                reason: format!(
                    "data length ({}) does not match ld * n ({})",
                    data.len(),
                    ld * n
                ),
            });
        }
        let buffer = self.context.create_buffer_with_data(
            label,
            bytemuck::cast_slice(data),
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        );
        Ok(GpuMatrix::new_internal(
            buffer,
            n,
            ld,
            String::from(label),
            Arc::clone(&self.context),
        ))
    }

    /// Builds an executor that runs the factorization pipeline against
    /// `matrix`. The matrix buffer is exclusively owned by that pipeline
    /// until the executor is dropped.
    pub fn executor<'a>(&self, matrix: &'a GpuMatrix) -> Result<GpuExecutor<'a>, CholCoreError> {
        GpuExecutor::new(Arc::clone(&self.context), matrix)
    }

    /// Returns the current GPU transfer statistics.
    pub fn transfer_stats(&self) -> TransferStats {
        let (bytes_to_gpu, bytes_from_gpu) = self.context.transfer_stats();
        TransferStats {
            bytes_to_gpu,
            bytes_from_gpu,
        }
    }

    /// Resets the GPU transfer statistics counters to zero.
    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct TrsmParams {
    m: u32,
    nb: u32,
    ld: u32,
    l_off: u32,
    b_off: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SyrkParams {
    n: u32,
    k: u32,
    ld: u32,
    a_off: u32,
    c_off: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GemmParams {
    m: u32,
    n: u32,
    k: u32,
    ld: u32,
    a_off: u32,
    b_off: u32,
    c_off: u32,
    pad0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Potf2Params {
    n: u32,
    ld: u32,
    a_off: u32,
    goff: u32,
}

struct KernelPipelines {
    mat_layout: wgpu::BindGroupLayout,
    panel_layout: wgpu::BindGroupLayout,
    trsm: wgpu::ComputePipeline,
    syrk: wgpu::ComputePipeline,
    gemm: wgpu::ComputePipeline,
    potf2: wgpu::ComputePipeline,
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl KernelPipelines {
    fn build(context: &GpuContext) -> Self {
        let device = &context.device;

        let mat_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("factor kernel bind group layout"),
            entries: &[storage_entry(0), uniform_entry(1)],
        });
        let panel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("panel kernel bind group layout"),
            entries: &[storage_entry(0), uniform_entry(1), storage_entry(2)],
        });

        let make = |label: &str, source: &'static str, layout: &wgpu::BindGroupLayout| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            });
            let pipeline_layout =
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[layout],
                    push_constant_ranges: &[],
                });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        };

        let trsm = make(
            "trsm_right_lower",
            include_str!("shaders/trsm_right_lower.wgsl"),
            &mat_layout,
        );
        let syrk = make(
            "syrk_lower",
            include_str!("shaders/syrk_lower.wgsl"),
            &mat_layout,
        );
        let gemm = make("gemm_nt", include_str!("shaders/gemm_nt.wgsl"), &mat_layout);
        let potf2 = make(
            "potf2_lower",
            include_str!("shaders/potf2_lower.wgsl"),
            &panel_layout,
        );

        Self {
            mat_layout,
            panel_layout,
            trsm,
            syrk,
            gemm,
            potf2,
        }
    }
}

/// WGPU-backed [`Executor`] bound to one device matrix.
pub struct GpuExecutor<'a> {
    context: Arc<GpuContext>,
    matrix: &'a GpuMatrix,
    pipelines: KernelPipelines,
    status: wgpu::Buffer,
    next_event: usize,
}

impl<'a> GpuExecutor<'a> {
    fn new(context: Arc<GpuContext>, matrix: &'a GpuMatrix) -> Result<Self, CholCoreError> {
        let pipelines = KernelPipelines::build(&context);
        let status = context.create_buffer_with_data(
            "factorization status cell",
            bytemuck::cast_slice(&[0i32]),
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        );
        Ok(Self {
            context,
            matrix,
            pipelines,
            status,
            next_event: 0,
        })
    }

    fn dispatch(
        &self,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        layout: &wgpu::BindGroupLayout,
        params: &[u8],
        with_status: bool,
        workgroups: u32,
    ) {
        let device = &self.context.device;
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: params,
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: self.matrix.inner().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: params_buffer.as_entire_binding(),
            },
        ];
        if with_status {
            entries.push(wgpu::BindGroupEntry {
                binding: 2,
                resource: self.status.as_entire_binding(),
            });
        }
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        self.context.queue.submit(Some(encoder.finish()));
    }
}

fn groups_for(threads: usize) -> u32 {
    (threads as u32).div_ceil(WORKGROUP_SIZE)
}

fn require(ok: bool, what: &str) -> Result<(), CholCoreError> {
    if ok {
        Ok(())
    } else {
        Err(CholCoreError::UnsupportedOperation(what.to_string()))
    }
}

impl Executor for GpuExecutor<'_> {
    type Elem = f64;

    fn launch(&mut self, queue: QueueId, op: KernelOp) -> Result<(), CholCoreError> {
        log::trace!("launch on {:?}: {:?}", queue, op);
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
                require(
                    side == Side::Right
                        && uplo == Triangle::Lower
                        && trans == Transpose::ConjTrans
                        && diag == Diag::NonUnit
                        && alpha == Coeff::One,
                    "triangular solve: only right/lower/conj-trans/non-unit, alpha = 1",
                )?;
                let m = b.rows();
                if m == 0 {
                    return Ok(());
                }
                let params = TrsmParams {
                    m: m as u32,
                    nb: b.cols() as u32,
                    ld: b.ld() as u32,
                    l_off: l.offset() as u32,
                    b_off: b.offset() as u32,
                    pad0: 0,
                    pad1: 0,
                    pad2: 0,
                };
                self.dispatch(
                    "trsm_right_lower",
                    &self.pipelines.trsm,
                    &self.pipelines.mat_layout,
                    bytemuck::bytes_of(&params),
                    false,
                    groups_for(m),
                );
            }
            KernelOp::RankKUpdate {
                uplo,
                trans,
                alpha,
                a,
                beta,
                c,
            } => {
                require(
                    uplo == Triangle::Lower
                        && trans == Transpose::No
                        && alpha == Coeff::NegOne
                        && beta == Coeff::One,
                    "rank-k update: only lower/no-trans, alpha = -1, beta = 1",
                )?;
                let n = c.rows();
                if n == 0 {
                    return Ok(());
                }
                let params = SyrkParams {
                    n: n as u32,
                    k: a.cols() as u32,
                    ld: c.ld() as u32,
                    a_off: a.offset() as u32,
                    c_off: c.offset() as u32,
                    pad0: 0,
                    pad1: 0,
                    pad2: 0,
                };
                self.dispatch(
                    "syrk_lower",
                    &self.pipelines.syrk,
                    &self.pipelines.mat_layout,
                    bytemuck::bytes_of(&params),
                    false,
                    groups_for(n * n),
                );
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
                require(
                    trans_a == Transpose::No
                        && trans_b == Transpose::ConjTrans
                        && alpha == Coeff::NegOne
                        && beta == Coeff::One,
                    "general multiply: only no-trans x conj-trans, alpha = -1, beta = 1",
                )?;
                let m = c.rows();
                let n = c.cols();
                if m == 0 || n == 0 {
                    return Ok(());
                }
                let params = GemmParams {
                    m: m as u32,
                    n: n as u32,
                    k: a.cols() as u32,
                    ld: c.ld() as u32,
                    a_off: a.offset() as u32,
                    b_off: b.offset() as u32,
                    c_off: c.offset() as u32,
                    pad0: 0,
                };
                self.dispatch(
                    "gemm_nt",
                    &self.pipelines.gemm,
                    &self.pipelines.mat_layout,
                    bytemuck::bytes_of(&params),
                    false,
                    groups_for(m * n),
                );
            }
            KernelOp::FactorBlock {
                uplo,
                block,
                offset,
            } => {
                require(
                    uplo == Triangle::Lower,
                    "block factorization: only the lower triangle",
                )?;
                if block.rows() == 0 {
                    return Ok(());
                }
                let params = Potf2Params {
                    n: block.rows() as u32,
                    ld: block.ld() as u32,
                    a_off: block.offset() as u32,
                    goff: offset as u32,
                };
                self.dispatch(
                    "potf2_lower",
                    &self.pipelines.potf2,
                    &self.pipelines.panel_layout,
                    bytemuck::bytes_of(&params),
                    true,
                    1,
                );
            }
        }
        Ok(())
    }

    fn create_event(&mut self) -> EventId {
        let id = EventId(self.next_event);
        self.next_event += 1;
        id
    }

    fn record_event(&mut self, queue: QueueId, event: EventId) -> Result<(), CholCoreError> {
        // One hardware queue: submission order already carries the edge.
        log::trace!("record {:?} on {:?}", event, queue);
        Ok(())
    }

    fn wait_event(&mut self, queue: QueueId, event: EventId) -> Result<(), CholCoreError> {
        log::trace!("wait {:?} on {:?}", event, queue);
        Ok(())
    }

    async fn synchronize(&mut self, queue: QueueId) -> Result<(), CholCoreError> {
        log::trace!("synchronize {:?}", queue);
        self.context.wait_idle()
    }

    async fn read_block(
        &mut self,
        queue: QueueId,
        src: MatrixView,
    ) -> Result<Vec<f64>, CholCoreError> {
        let rows = src.rows();
        let cols = src.cols();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }
        log::debug!("reading back {}x{} block on {:?}", rows, cols, queue);

        let elem = std::mem::size_of::<f64>() as u64;
        let size_bytes = (rows * cols) as u64 * elem;
        let staging = self.context.create_empty_buffer(
            "panel staging buffer",
            size_bytes,
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        );

        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("panel readback encoder"),
                });
        for c in 0..cols {
            let src_off = (src.offset() + c * src.ld()) as u64 * elem;
            let dst_off = (c * rows) as u64 * elem;
            encoder.copy_buffer_to_buffer(
                self.matrix.inner(),
                src_off,
                &staging,
                dst_off,
                rows as u64 * elem,
            );
        }
        self.context.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if sender.send(result).is_err() {
                log::error!("panel readback receiver dropped before map completed");
            }
        });
        self.context
            .bytes_from_gpu
            .fetch_add(size_bytes, std::sync::atomic::Ordering::Relaxed);
        self.context.wait_idle()?;

        match receiver.await {
            Ok(Ok(())) => {
                let out = {
                    let data = slice.get_mapped_range();
                    bytemuck::cast_slice(&data).to_vec()
                };
                staging.unmap();
                Ok(out)
            }
            Ok(Err(e)) => Err(CholCoreError::WgpuError(format!(
                "panel mapping failed: {}",
                e
            ))),
            Err(_) => Err(CholCoreError::Internal(
                "channel receive error during panel mapping".to_string(),
            )),
        }
    }

    fn write_block(
        &mut self,
        queue: QueueId,
        data: &[f64],
        dst: MatrixView,
    ) -> Result<(), CholCoreError> {
        let rows = dst.rows();
        let cols = dst.cols();
        if data.len() != rows * cols {
            return Err(CholCoreError::Internal(format!(
                "block upload size mismatch: {} elements for a {}x{} block",
                data.len(),
                rows,
                cols
            )));
        }
        if rows == 0 || cols == 0 {
            return Ok(());
        }
        log::debug!("uploading {}x{} block on {:?}", rows, cols, queue);
        let elem = std::mem::size_of::<f64>() as u64;
        for c in 0..cols {
            let dst_off = (dst.offset() + c * dst.ld()) as u64 * elem;
            self.context
                .write_buffer(self.matrix.inner(), dst_off, &data[c * rows..(c + 1) * rows]);
        }
        Ok(())
    }

    fn reset_status(&mut self, _queue: QueueId) -> Result<(), CholCoreError> {
        self.context.write_buffer(&self.status, 0, &[0i32]);
        Ok(())
    }

    async fn fetch_status(&mut self) -> Result<i64, CholCoreError> {
        self.context.wait_idle()?;
        let cell: Vec<i32> = self.context.read_buffer_to_cpu(&self.status, 1).await?;
        Ok(i64::from(cell[0]))
    }
}
