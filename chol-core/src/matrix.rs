use std::sync::Arc;

use crate::context::GpuContext;
use crate::error::CholCoreError;
use crate::view::MatrixView;

/// A dense column-major `f64` matrix resident on the GPU.
///
/// The buffer holds `ld * n` elements; element `(r, c)` sits at
/// `r + c * ld`. Only the lower triangle is referenced by the
/// factorization; the strict upper triangle is carried along untouched.
#[derive(Debug)]
pub struct GpuMatrix {
    buffer: wgpu::Buffer,
    n: usize,
    ld: usize,
    label: String,
    pub(crate) context: Arc<GpuContext>,
}

impl GpuMatrix {
    pub(crate) fn new_internal(
        buffer: wgpu::Buffer,
        n: usize,
        ld: usize,
        label: String,
        context: Arc<GpuContext>,
    ) -> Self {
        Self {
            buffer,
            n,
            ld,
            label,
            context,
        }
    }

    pub(crate) fn inner(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Matrix order.
    pub fn order(&self) -> usize {
        self.n
    }

    /// Leading dimension (column stride) in elements.
    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// View covering the whole matrix.
    pub fn view(&self) -> Result<MatrixView, CholCoreError> {
        MatrixView::new(self.n, self.n, self.ld)
    }

    /// Reads the full `ld * n` backing buffer to the CPU.
    /// Slow; intended for verification and final results only.
    pub async fn read_back(&self) -> Result<Vec<f64>, CholCoreError> {
        self.context
            .read_buffer_to_cpu(&self.buffer, self.ld * self.n)
            .await
    }
}
