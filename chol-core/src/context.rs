use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytemuck::Pod;
use wgpu::PollType;

use crate::error::CholCoreError;

/// Wrapper for the WGPU instance, device, and queue, plus transfer counters.
/// Internal to the crate; callers go through [`crate::device::GpuDevice`].
#[derive(Debug)]
pub(crate) struct GpuContext {
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    /// Bytes moved host-to-device through instrumented helpers.
    pub(crate) bytes_to_gpu: Arc<AtomicU64>,
    /// Bytes moved device-to-host through instrumented helpers.
    pub(crate) bytes_from_gpu: Arc<AtomicU64>,
}

impl GpuContext {
    /// Initializes the WGPU context asynchronously.
    ///
    /// The factorization kernels compute in f64, so `SHADER_F64` is a hard
    /// requirement here; adapters without it fail initialization.
    pub(crate) async fn new() -> Result<Self, CholCoreError> {
        log::info!("Initializing WGPU context");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY, // Vulkan, Metal, DX12
            ..Default::default()
        });

        log::debug!("Requesting adapter");
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // compute only
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| CholCoreError::WgpuInitError("No suitable adapter found".to_string()))?;

        log::info!("Selected adapter: {:?}", adapter.get_info());

        if !adapter.features().contains(wgpu::Features::SHADER_F64) {
            return Err(CholCoreError::WgpuInitError(
                "adapter does not support SHADER_F64".to_string(),
            ));
        }

        let limits = wgpu::Limits::default().using_resolution(adapter.limits());
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("chol_core device"),
                trace: wgpu::Trace::Off,
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: wgpu::Features::SHADER_F64,
                required_limits: limits,
            })
            .await
            .map_err(|e| CholCoreError::WgpuInitError(format!("Failed to request device: {}", e)))?;

        log::info!("Device and queue obtained, features: {:?}", device.features());

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            bytes_to_gpu: Arc::new(AtomicU64::new(0)),
            bytes_from_gpu: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Creates a GPU buffer initialized from raw bytes and counts the
    /// transfer.
    pub(crate) fn create_buffer_with_data(
        &self,
        label: &str,
        contents: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        use wgpu::util::DeviceExt;
        log::debug!("Creating buffer '{}' with {} bytes", label, contents.len());
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            });
        self.bytes_to_gpu
            .fetch_add(contents.len() as u64, Ordering::Relaxed);
        buffer
    }

    /// Creates an uninitialized GPU buffer; counts nothing.
    pub(crate) fn create_empty_buffer(
        &self,
        label: &str,
        size: u64,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        log::debug!("Creating empty buffer '{}' of size {}", label, size);
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    /// Writes `data` into `buffer` at `offset_bytes` via the queue and
    /// counts the transfer. Ordered before any later submission.
    pub(crate) fn write_buffer<T: Pod>(&self, buffer: &wgpu::Buffer, offset_bytes: u64, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return;
        }
        self.queue.write_buffer(buffer, offset_bytes, bytes);
        self.bytes_to_gpu
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
    }

    /// Blocks until all submitted work has completed.
    pub(crate) fn wait_idle(&self) -> Result<(), CholCoreError> {
        self.device
            .poll(PollType::Wait)
            .map_err(|e| CholCoreError::WgpuError(format!("device poll failed: {:?}", e)))?;
        Ok(())
    }

    /// Reads `element_count` elements of `T` from `buffer` back to the CPU.
    ///
    /// Submits a copy into a staging buffer, waits for the device, and maps
    /// the staging buffer. This drains the queue as a side effect.
    pub(crate) async fn read_buffer_to_cpu<T: Pod + Default + Clone>(
        &self,
        buffer: &wgpu::Buffer,
        element_count: usize,
    ) -> Result<Vec<T>, CholCoreError> {
        let size_bytes = (element_count * std::mem::size_of::<T>()) as u64;
        if size_bytes == 0 {
            return Ok(Vec::new());
        }
        if buffer.size() < size_bytes {
            return Err(CholCoreError::Internal(format!(
                "buffer size ({}) smaller than requested readback ({})",
                buffer.size(),
                size_bytes
            )));
        }

        log::debug!("Reading back {} bytes", size_bytes);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging buffer"),
            size: size_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            if sender.send(result).is_err() {
                log::error!("readback receiver dropped before map completed");
            }
        });

        self.bytes_from_gpu
            .fetch_add(size_bytes, Ordering::Relaxed);
        self.wait_idle()?;

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
                "buffer mapping failed: {}",
                e
            ))),
            Err(_) => Err(CholCoreError::Internal(
                "channel receive error during buffer mapping".to_string(),
            )),
        }
    }

    /// Returns (bytes_to_gpu, bytes_from_gpu).
    pub(crate) fn transfer_stats(&self) -> (u64, u64) {
        (
            self.bytes_to_gpu.load(Ordering::Relaxed),
            self.bytes_from_gpu.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn reset_transfer_stats(&self) {
        self.bytes_to_gpu.store(0, Ordering::Relaxed);
        self.bytes_from_gpu.store(0, Ordering::Relaxed);
        log::info!("GPU transfer counters reset.");
    }
}
