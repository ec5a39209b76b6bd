//! Numeric kernel interface and host reference kernels.
//!
//! The blocked factorization is written against four opaque operations
//! (triangular solve, symmetric rank-k update, general multiply, small-block
//! factorization). This module defines the selector vocabulary shared by all
//! executors and the host implementations used by [`crate::host::HostExecutor`]
//! and by the host-assisted panel path. The device implementations live in
//! the WGSL shaders dispatched by [`crate::device::GpuExecutor`].

use num_traits::Float;

use crate::view::MatrixView;

/// Which side of the triangular solve the triangular operand sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Which triangle of a symmetric operand is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triangle {
    Lower,
    Upper,
}

/// Transposition applied to an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    No,
    /// Conjugate transpose; identical to a plain transpose for real data.
    ConjTrans,
}

/// Whether the triangular operand has a unit diagonal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diag {
    NonUnit,
    Unit,
}

/// Scaling coefficient of a Schur-complement correction. The blocked
/// algorithm only ever scales by plus or minus one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coeff {
    One,
    NegOne,
}

impl Coeff {
    #[inline]
    pub fn value<T: Float>(self) -> T {
        match self {
            Coeff::One => T::one(),
            Coeff::NegOne => -T::one(),
        }
    }
}

/// Unblocked in-place Cholesky factorization of the lower triangle of the
/// square block `a`.
///
/// Returns 0 on success, or the 1-based index of the first column whose
/// fully-updated diagonal entry is not strictly positive. On failure the
/// columns before the failing one hold their final factor values; the rest
/// of the block is left partially updated.
pub fn potf2_lower<T: Float>(buf: &mut [T], a: MatrixView) -> usize {
    let n = a.rows();
    debug_assert_eq!(n, a.cols(), "diagonal block must be square");

    for j in 0..n {
        let d = buf[a.index(j, j)];
        // A non-positive or NaN pivot means the leading minor is not
        // positive definite.
        if !(d > T::zero()) {
            return j + 1;
        }
        let d = d.sqrt();
        buf[a.index(j, j)] = d;
        for i in (j + 1)..n {
            buf[a.index(i, j)] = buf[a.index(i, j)] / d;
        }
        // Right-looking rank-1 update of the remaining lower triangle.
        for k in (j + 1)..n {
            let ljk = buf[a.index(k, j)];
            for i in k..n {
                let lij = buf[a.index(i, j)];
                buf[a.index(i, k)] = buf[a.index(i, k)] - lij * ljk;
            }
        }
    }
    0
}

/// Triangular solve `B := alpha * B * inv(L^H)` with `L` the lower triangle
/// of `l` (non-unit diagonal). Solves every row of `B` independently by
/// forward substitution over the columns of `B`.
pub fn trsm_right_lower_trans<T: Float>(
    buf: &mut [T],
    alpha: Coeff,
    l: MatrixView,
    b: MatrixView,
) {
    let m = b.rows();
    let nb = b.cols();
    debug_assert_eq!(l.rows(), nb);
    debug_assert_eq!(l.cols(), nb);

    let alpha: T = alpha.value();
    for r in 0..m {
        for k in 0..nb {
            let mut x = alpha * buf[b.index(r, k)];
            for t in 0..k {
                x = x - buf[b.index(r, t)] * buf[l.index(k, t)];
            }
            buf[b.index(r, k)] = x / buf[l.index(k, k)];
        }
    }
}

/// Symmetric rank-k update `C := alpha * A * A^H + beta * C`, touching only
/// the lower triangle of the square block `c`. `A` is `n x k` untransposed.
pub fn syrk_lower_notrans<T: Float>(
    buf: &mut [T],
    alpha: Coeff,
    a: MatrixView,
    beta: Coeff,
    c: MatrixView,
) {
    let n = c.rows();
    let k = a.cols();
    debug_assert_eq!(c.cols(), n, "rank-k target must be square");
    debug_assert_eq!(a.rows(), n);

    let alpha: T = alpha.value();
    let beta: T = beta.value();
    for j in 0..n {
        for i in j..n {
            let mut acc = T::zero();
            for p in 0..k {
                acc = acc + buf[a.index(i, p)] * buf[a.index(j, p)];
            }
            buf[c.index(i, j)] = alpha * acc + beta * buf[c.index(i, j)];
        }
    }
}

/// General multiply `C := alpha * A * B^H + beta * C` with `A` of shape
/// `m x k` and `B` of shape `n x k`.
pub fn gemm_nt<T: Float>(
    buf: &mut [T],
    alpha: Coeff,
    a: MatrixView,
    b: MatrixView,
    beta: Coeff,
    c: MatrixView,
) {
    let m = c.rows();
    let n = c.cols();
    let k = a.cols();
    debug_assert_eq!(a.rows(), m);
    debug_assert_eq!(b.rows(), n);
    debug_assert_eq!(b.cols(), k);

    let alpha: T = alpha.value();
    let beta: T = beta.value();
    for j in 0..n {
        for i in 0..m {
            let mut acc = T::zero();
            for p in 0..k {
                acc = acc + buf[a.index(i, p)] * buf[b.index(j, p)];
            }
            buf[c.index(i, j)] = alpha * acc + beta * buf[c.index(i, j)];
        }
    }
}
