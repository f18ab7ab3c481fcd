//! Dense integer matrices and the Smith Normal Form.
//!
//! The gradient engine inverts integer linear systems of index bindings.
//! [`smith_normalize`] is the inversion primitive: it factors a matrix `A`
//! as `U·A·V = D` with `U`, `V` unimodular and `D` diagonal, after which
//! `A·x = b` reduces to the trivially-solvable `D·y = U·b`, `x = V·y`.

use num_traits::{PrimInt, Signed};

use crate::core::error::{Result, TensorError};

/// A dense row-major matrix over a primitive signed integer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix<T> {
    data: Vec<T>,
    height: usize,
    width: usize,
}

impl<T: PrimInt + Signed> Matrix<T> {
    /// A zero-filled `height × width` matrix.
    #[must_use]
    pub fn zeros(height: usize, width: usize) -> Self {
        Matrix {
            data: vec![T::zero(); height * width],
            height,
            width,
        }
    }

    /// The `n × n` identity.
    #[must_use]
    pub fn identity(n: usize) -> Self {
        let mut m = Matrix::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = T::one();
        }
        m
    }

    /// Build from explicit rows; every row must have the same length.
    pub fn from_rows(rows: &[Vec<T>]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != width) {
            return Err(TensorError::shape_mismatch("ragged rows in matrix literal"));
        }
        Ok(Matrix {
            data: rows.iter().flatten().copied().collect(),
            height,
            width,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Overwrite with the identity; the matrix must be square.
    pub fn set_identity(&mut self) {
        debug_assert_eq!(self.height, self.width);
        for i in 0..self.height {
            for j in 0..self.width {
                self[(i, j)] = if i == j { T::one() } else { T::zero() };
            }
        }
    }

    /// Swap rows `i` and `j`.
    pub fn swap_row(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        for l in 0..self.width {
            self.data.swap(i * self.width + l, j * self.width + l);
        }
    }

    /// Swap columns `i` and `j`.
    pub fn swap_col(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        for l in 0..self.height {
            self.data.swap(l * self.width + i, l * self.width + j);
        }
    }

    /// Multiply row `i` by `factor`.
    pub fn scale_row(&mut self, i: usize, factor: T) {
        for l in 0..self.width {
            self[(i, l)] = self[(i, l)] * factor;
        }
    }

    /// Multiply column `j` by `factor`.
    pub fn scale_col(&mut self, j: usize, factor: T) {
        for l in 0..self.height {
            self[(l, j)] = self[(l, j)] * factor;
        }
    }

    /// `row_j += factor · row_i`.
    pub fn add_row(&mut self, i: usize, j: usize, factor: T) {
        for l in 0..self.width {
            self[(j, l)] = self[(i, l)] * factor + self[(j, l)];
        }
    }

    /// `col_j += factor · col_i`.
    pub fn add_col(&mut self, i: usize, j: usize, factor: T) {
        for l in 0..self.height {
            self[(l, j)] = self[(l, i)] * factor + self[(l, j)];
        }
    }

    /// Replace rows `(i, j)` by `(s·rᵢ + t·rⱼ, g·rᵢ + h·rⱼ)`.
    ///
    /// With `s·h − t·g = ±1` this is a unimodular operation.
    pub fn row_transform(&mut self, i: usize, j: usize, s: T, t: T, g: T, h: T) {
        for l in 0..self.width {
            let vi = self[(i, l)];
            let vj = self[(j, l)];
            self[(i, l)] = vi * s + vj * t;
            self[(j, l)] = vi * g + vj * h;
        }
    }

    /// Replace columns `(i, j)` by `(s·cᵢ + t·cⱼ, g·cᵢ + h·cⱼ)`.
    pub fn col_transform(&mut self, i: usize, j: usize, s: T, t: T, g: T, h: T) {
        for l in 0..self.height {
            let vi = self[(l, i)];
            let vj = self[(l, j)];
            self[(l, i)] = vi * s + vj * t;
            self[(l, j)] = vi * g + vj * h;
        }
    }
}

impl<T> std::ops::Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j): (usize, usize)) -> &T {
        debug_assert!(i < self.height && j < self.width);
        &self.data[i * self.width + j]
    }
}

impl<T> std::ops::IndexMut<(usize, usize)> for Matrix<T> {
    #[inline]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut T {
        debug_assert!(i < self.height && j < self.width);
        &mut self.data[i * self.width + j]
    }
}

/// Extended Euclidean algorithm: returns `(g, x, y)` with `g = x·a + y·b`
/// and `g = gcd(a, b)`.
pub fn ext_euclidean<T: PrimInt + Signed>(a: T, b: T) -> (T, T, T) {
    let (mut r0, mut r1) = (a, b);
    let (mut s0, mut s1) = (T::one(), T::zero());
    let (mut t0, mut t1) = (T::zero(), T::one());
    while !r1.is_zero() {
        let q = r0 / r1;
        let r = r0 - q * r1;
        let s = s0 - q * s1;
        let t = t0 - q * t1;
        r0 = r1;
        r1 = r;
        s0 = s1;
        s1 = s;
        t0 = t1;
        t1 = t;
    }
    (r0, s0, t0)
}

/// True when `a` divides `b` (with `0 | b` only for `b == 0`).
pub fn divides<T: PrimInt + Signed>(a: T, b: T) -> bool {
    if a.is_zero() {
        b.is_zero()
    } else {
        (b % a).is_zero()
    }
}

fn next_nonzero<T: PrimInt + Signed>(m: &Matrix<T>, from: usize) -> Option<(usize, usize)> {
    for i in from..m.height() {
        for j in from..m.width() {
            if !m[(i, j)].is_zero() {
                return Some((i, j));
            }
        }
    }
    None
}

fn col_non_div<T: PrimInt + Signed>(m: &Matrix<T>, a: usize) -> Option<usize> {
    (a + 1..m.height()).find(|&i| !divides(m[(a, a)], m[(i, a)]))
}

fn col_non_zero<T: PrimInt + Signed>(m: &Matrix<T>, a: usize) -> Option<usize> {
    (a + 1..m.height()).find(|&i| !m[(i, a)].is_zero())
}

fn row_non_div<T: PrimInt + Signed>(m: &Matrix<T>, a: usize) -> Option<usize> {
    (a + 1..m.width()).find(|&j| !divides(m[(a, a)], m[(a, j)]))
}

fn row_non_zero<T: PrimInt + Signed>(m: &Matrix<T>, a: usize) -> Option<usize> {
    (a + 1..m.width()).find(|&j| !m[(a, j)].is_zero())
}

/// Reduce `trans` in place to Smith Normal Form.
///
/// On return `U·A·V = D` holds, where `A` is the original value of `trans`,
/// `D` its final (diagonal) value, and `U`, `V` are unimodular accumulators
/// initialized to identities here. The first `dim` diagonal entries are
/// positive and each divides the next; `dim` is returned.
///
/// `U` must be `height × height` and `V` `width × width`, otherwise
/// `ShapeMismatch` is returned.
pub fn smith_normalize<T: PrimInt + Signed>(
    trans: &mut Matrix<T>,
    u: &mut Matrix<T>,
    v: &mut Matrix<T>,
) -> Result<usize> {
    let height = trans.height();
    let width = trans.width();
    if u.height() != height || u.width() != height {
        return Err(TensorError::shape_mismatch(format!(
            "U matrix is {}x{}, expected {}x{}",
            u.height(),
            u.width(),
            height,
            height
        )));
    }
    if v.height() != width || v.width() != width {
        return Err(TensorError::shape_mismatch(format!(
            "V matrix is {}x{}, expected {}x{}",
            v.height(),
            v.width(),
            width,
            width
        )));
    }
    u.set_identity();
    v.set_identity();

    // `a` is the next pivot position; it survives the divisibility sweep so a
    // restart resumes reduction at the violation.
    let mut a = 0usize;
    let mut dim;
    loop {
        while let Some((pi, pj)) = next_nonzero(trans, a) {
            trans.swap_row(a, pi);
            u.swap_row(a, pi);
            trans.swap_col(a, pj);
            v.swap_col(a, pj);

            // clear row a and col a, keeping the pivot
            let mut changed = true;
            while changed {
                changed = false;
                while let Some(i) = col_non_div(trans, a) {
                    changed = true;
                    let (z, s, t) = ext_euclidean(trans[(a, a)], trans[(i, a)]);
                    let g = -trans[(i, a)] / z;
                    let h = trans[(a, a)] / z;
                    trans.row_transform(a, i, s, t, g, h);
                    u.row_transform(a, i, s, t, g, h);
                }
                while let Some(i) = col_non_zero(trans, a) {
                    changed = true;
                    let f = trans[(i, a)] / trans[(a, a)];
                    trans.add_row(a, i, -f);
                    u.add_row(a, i, -f);
                }
                while let Some(j) = row_non_div(trans, a) {
                    changed = true;
                    let (z, s, t) = ext_euclidean(trans[(a, a)], trans[(a, j)]);
                    let g = -trans[(a, j)] / z;
                    let h = trans[(a, a)] / z;
                    trans.col_transform(a, j, s, t, g, h);
                    v.col_transform(a, j, s, t, g, h);
                }
                while let Some(j) = row_non_zero(trans, a) {
                    changed = true;
                    let f = trans[(a, j)] / trans[(a, a)];
                    trans.add_col(a, j, -f);
                    v.add_col(a, j, -f);
                }
            }
            a += 1;
        }
        dim = a;

        // sign normalization and the divisibility chain along the diagonal
        let mut restart = false;
        for d in 0..dim {
            if trans[(d, d)] < T::zero() {
                trans.scale_col(d, -T::one());
                v.scale_col(d, -T::one());
            }
            if d + 1 < dim && !divides(trans[(d, d)], trans[(d + 1, d + 1)]) {
                trans.add_col(d + 1, d, T::one());
                v.add_col(d + 1, d, T::one());
                a = d;
                restart = true;
                break;
            }
        }
        if !restart {
            break;
        }
    }

    Ok(dim)
}
