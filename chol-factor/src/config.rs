//! Factorization configuration: block-size policy and panel strategy.

/// Panel width used to partition the matrix into diagonal blocks.
///
/// The presets are the widths worth choosing on current hardware; larger
/// blocks shift more work into the trailing updates, smaller blocks shorten
/// the critical path. `Fixed` admits any nonzero width (benchmarking,
/// testing against width-1 reference runs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    B32,
    B64,
    B128,
    B256,
    B512,
    B1024,
    Fixed(usize),
}

impl BlockSize {
    /// Panel width in columns.
    pub fn panel_width(self) -> usize {
        match self {
            BlockSize::B32 => 32,
            BlockSize::B64 => 64,
            BlockSize::B128 => 128,
            BlockSize::B256 => 256,
            BlockSize::B512 => 512,
            BlockSize::B1024 => 1024,
            BlockSize::Fixed(nb) => nb,
        }
    }
}

impl Default for BlockSize {
    /// A middle-of-the-road width that keeps the far update large enough to
    /// overlap the next panel on every preset size above it.
    fn default() -> Self {
        BlockSize::B256
    }
}

/// How the diagonal panel is factorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelStrategy {
    /// Transfer the panel to the host, factor it there, check positive
    /// definiteness synchronously, and transfer the factor back. Failure is
    /// known per panel and halts the frontier immediately.
    #[default]
    HostAssisted,
    /// Factor directly on the device. Failure lands in the device status
    /// cell, which is fetched once after the final drain; panels behind a
    /// failure are skipped by the kernel's status guard.
    DeviceNative,
}

/// Configuration of one factorization call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FactorConfig {
    pub block_size: BlockSize,
    pub panel: PanelStrategy,
}

impl FactorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_block_size(mut self, block_size: BlockSize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_panel(mut self, panel: PanelStrategy) -> Self {
        self.panel = panel;
        self
    }
}
