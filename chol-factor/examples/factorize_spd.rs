use std::time::Instant;

use chol_core::{GpuDevice, HostExecutor, MatrixView, Triangle};
use chol_factor::{
    BlockSize, BlockedCholesky, FactorAlgorithm, FactorConfig, PanelStrategy,
};

/// Dense pentadiagonal SPD matrix (diagonally dominant), column-major.
/// Diagonals:
/// - Main: 4.0
/// - Adjacent (+1, -1): -1.0
/// - Outer (+2, -2): -0.5
fn pentadiagonal_matrix(n: usize) -> Vec<f64> {
    let mut a = vec![0.0f64; n * n];
    for i in 0..n {
        a[i + i * n] = 4.0;
        if i >= 1 {
            a[i + (i - 1) * n] = -1.0;
            a[(i - 1) + i * n] = -1.0;
        }
        if i >= 2 {
            a[i + (i - 2) * n] = -0.5;
            a[(i - 2) + i * n] = -0.5;
        }
    }
    a
}

fn main() {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .init();

    pollster::block_on(run());
}

async fn run() {
    let n = 512;
    log::info!("Setting up {}x{} pentadiagonal SPD matrix...", n, n);
    let data = pentadiagonal_matrix(n);

    let algorithm = BlockedCholesky::with_config(
        FactorConfig::new()
            .with_block_size(BlockSize::B128)
            .with_panel(PanelStrategy::HostAssisted),
    );

    match GpuDevice::new().await {
        Ok(device) => {
            let matrix = device
                .create_matrix("pentadiagonal", n, n, &data)
                .expect("Failed to create GPU matrix");
            let view = matrix.view().expect("Failed to build matrix view");
            let start = Instant::now();
            let run = {
                let mut exec = device.executor(&matrix).expect("Failed to build executor");
                algorithm
                    .factorize(&mut exec, Triangle::Lower, n, view)
                    .await
                    .expect("GPU factorization failed")
            };
            let elapsed = start.elapsed();
            let stats = device.transfer_stats();
            log::info!("GPU factorization done in {:?}", elapsed);
            log::info!("  Panels: {}", run.panels);
            log::info!("  Block size: {}", run.block_size);
            log::info!(
                "  Transfers: {} bytes to GPU, {} bytes from GPU",
                stats.bytes_to_gpu,
                stats.bytes_from_gpu
            );
            let factor = matrix.read_back().await.expect("Readback failed");
            log::info!("  L[0,0] = {} (expected 2.0)", factor[0]);
        }
        Err(e) => {
            log::warn!("No GPU available ({}), falling back to the host executor", e);
            let mut buf = data.clone();
            let view = MatrixView::new(n, n, n).expect("Failed to build matrix view");
            let start = Instant::now();
            let run = {
                let mut exec = HostExecutor::new(&mut buf);
                algorithm
                    .factorize(&mut exec, Triangle::Lower, n, view)
                    .await
                    .expect("Host factorization failed")
            };
            let elapsed = start.elapsed();
            log::info!("Host factorization done in {:?}", elapsed);
            log::info!("  Panels: {}", run.panels);
            log::info!("  L[0,0] = {} (expected 2.0)", buf[0]);
        }
    }
}
