use chol_core::{CholCoreError, GpuDevice, HostExecutor, Triangle};
use chol_factor::{
    BlockSize, BlockedCholesky, FactorAlgorithm, FactorConfig, PanelStrategy,
};
use pollster::block_on;

/// Random symmetric positive-definite matrix, column-major, ld = n.
fn spd_matrix(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut m = vec![0.0f64; n * n];
    for v in m.iter_mut() {
        *v = rng.f64() - 0.5;
    }
    let mut a = vec![0.0f64; n * n];
    for j in 0..n {
        for i in 0..n {
            let mut acc = 0.0;
            for k in 0..n {
                acc += m[i + k * n] * m[j + k * n];
            }
            a[i + j * n] = acc;
        }
    }
    for i in 0..n {
        a[i + i * n] += n as f64;
    }
    a
}

fn config(nb: usize, panel: PanelStrategy) -> FactorConfig {
    FactorConfig::new()
        .with_block_size(BlockSize::Fixed(nb))
        .with_panel(panel)
}

/// GPU availability is environment-dependent; tests skip without an adapter.
async fn try_device() -> Option<GpuDevice> {
    match GpuDevice::new().await {
        Ok(device) => Some(device),
        Err(e) => {
            eprintln!("skipping GPU test, no usable device: {}", e);
            None
        }
    }
}

fn assert_lower_close(a: &[f64], b: &[f64], n: usize, tol: f64) {
    for j in 0..n {
        for i in j..n {
            let diff = (a[i + j * n] - b[i + j * n]).abs();
            assert!(
                diff <= tol,
                "factors differ at ({}, {}): {} vs {} (diff {})",
                i,
                j,
                a[i + j * n],
                b[i + j * n],
                diff
            );
        }
    }
}

#[test]
fn gpu_factor_matches_host_result() -> Result<(), CholCoreError> {
    block_on(async {
        let Some(device) = try_device().await else {
            return Ok(());
        };
        let n = 64;
        let orig = spd_matrix(n, 17);

        for panel in [PanelStrategy::HostAssisted, PanelStrategy::DeviceNative] {
            let algorithm = BlockedCholesky::with_config(config(16, panel));

            let matrix = device.create_matrix("gpu factor test", n, n, &orig)?;
            let a = matrix.view()?;
            {
                let mut exec = device.executor(&matrix)?;
                algorithm
                    .factorize(&mut exec, Triangle::Lower, n, a)
                    .await?;
            }
            let gpu_result = matrix.read_back().await?;

            let mut host_result = orig.clone();
            {
                let mut exec = HostExecutor::new(&mut host_result);
                algorithm
                    .factorize(&mut exec, Triangle::Lower, n, a)
                    .await?;
            }
            assert_lower_close(&gpu_result, &host_result, n, 1e-9);
        }
        Ok(())
    })
}

#[test]
fn gpu_reports_non_positive_definite_minor() -> Result<(), CholCoreError> {
    block_on(async {
        let Some(device) = try_device().await else {
            return Ok(());
        };
        let n = 6;
        let mut data = vec![0.0f64; n * n];
        for i in 0..n {
            data[i + i * n] = 1.0;
        }
        data[2 + 2 * n] = -5.0;

        for panel in [PanelStrategy::HostAssisted, PanelStrategy::DeviceNative] {
            let algorithm = BlockedCholesky::with_config(config(2, panel));
            let matrix = device.create_matrix("gpu indefinite test", n, n, &data)?;
            let a = matrix.view()?;
            let mut exec = device.executor(&matrix)?;
            let err = algorithm
                .factorize(&mut exec, Triangle::Lower, n, a)
                .await
                .unwrap_err();
            assert!(
                matches!(err, CholCoreError::NotPositiveDefinite { minor: 3 }),
                "unexpected error for {:?}: {}",
                panel,
                err
            );
        }
        Ok(())
    })
}
