use crate::dtype::Float;
use crate::error::{TensorError, TensorResult};
use crate::shape::Shape;

use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense row-major (C-order) tensor backed by a flat `Vec<T>`.
///
/// Layers mostly work with rank-2 tensors shaped `[batch, features]`; the
/// per-sample spatial layout inside `features` is owned by the layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    try_from = "TensorParts<T>",
    into = "TensorParts<T>",
    bound = "T: Float"
)]
pub struct Tensor<T: Float> {
    data: Vec<T>,
    shape: Shape,
}

/// Serialized form of a tensor; validated on the way back in.
#[derive(Serialize, Deserialize)]
#[serde(bound = "T: Float")]
struct TensorParts<T: Float> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Float> TryFrom<TensorParts<T>> for Tensor<T> {
    type Error = TensorError;

    fn try_from(parts: TensorParts<T>) -> TensorResult<Self> {
        Tensor::new(parts.data, parts.shape)
    }
}

impl<T: Float> From<Tensor<T>> for TensorParts<T> {
    fn from(t: Tensor<T>) -> Self {
        TensorParts {
            shape: t.shape.to_vec(),
            data: t.data,
        }
    }
}

// ─── Construction ───────────────────────────────────────────────────────────

impl<T: Float> Tensor<T> {
    /// Create a tensor from raw data and shape.
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> TensorResult<Self> {
        let s = Shape::new(shape);
        if data.len() != s.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: s.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor { data, shape: s })
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let s = Shape::new(shape);
        Tensor {
            data: vec![T::ZERO; s.numel()],
            shape: s,
        }
    }

    /// Create a 1-D tensor from a slice.
    pub fn from_slice(data: &[T]) -> Self {
        Tensor {
            data: data.to_vec(),
            shape: Shape::new(vec![data.len()]),
        }
    }

    /// Create a 2-D tensor from rows.
    pub fn from_vec2d(rows: &[Vec<T>]) -> TensorResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(TensorError::InvalidOperation(
                "All rows must have the same number of columns".to_string(),
            ));
        }
        let flat: Vec<T> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::new(flat, vec![rows.len(), cols])
    }

    /// Uniform samples from the closed interval `[low, high]`.
    pub fn rand_uniform(shape: Vec<usize>, low: T, high: T, rng: &mut StdRng) -> Self {
        let s = Shape::new(shape);
        let (lo, hi) = (low.to_f64(), high.to_f64());
        let unit = Uniform::new_inclusive(0.0f64, 1.0);
        let data = (0..s.numel())
            .map(|_| T::from_f64(lo + (hi - lo) * rng.sample(unit)))
            .collect();
        Tensor { data, shape: s }
    }

    /// Standard normal samples (Box-Muller), multiplied by `scale`.
    pub fn randn(shape: Vec<usize>, scale: T, rng: &mut StdRng) -> Self {
        let s = Shape::new(shape);
        let n = s.numel();
        let scale = scale.to_f64();
        let mut data = Vec::with_capacity(n + 1);
        while data.len() < n {
            let u1: f64 = rng.gen::<f64>().max(1e-10);
            let u2: f64 = rng.gen::<f64>();
            let r = (-2.0 * u1.ln()).sqrt();
            let theta = 2.0 * std::f64::consts::PI * u2;
            data.push(T::from_f64(scale * r * theta.cos()));
            data.push(T::from_f64(scale * r * theta.sin()));
        }
        data.truncate(n);
        Tensor { data, shape: s }
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shape_vec(&self) -> Vec<usize> {
        self.shape.to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// `(rows, cols)` of a matrix.
    pub fn dims2(&self) -> TensorResult<(usize, usize)> {
        self.shape.matrix()
    }

    // ─── Shape Manipulation ─────────────────────────────────────────────────

    /// Matrix transpose.
    pub fn t(&self) -> TensorResult<Tensor<T>> {
        let (rows, cols) = self.dims2()?;
        let mut data = vec![T::ZERO; self.numel()];
        for i in 0..rows {
            for j in 0..cols {
                data[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::new(data, vec![cols, rows])
    }

    // ─── Element-wise ───────────────────────────────────────────────────────

    pub fn apply<F: Fn(T) -> T>(&self, f: F) -> Tensor<T> {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn mul_scalar(&self, s: T) -> Tensor<T> {
        self.apply(|x| x * s)
    }

    pub fn div_scalar(&self, s: T) -> Tensor<T> {
        self.apply(|x| x / s)
    }

    /// In place `self += alpha * other`.
    pub fn scaled_add_assign(&mut self, alpha: T, other: &Tensor<T>) -> TensorResult<()> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape_vec(),
                got: other.shape_vec(),
            });
        }
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += alpha * b;
        }
        Ok(())
    }

    /// Add a `[cols]` vector to every row of a `[rows, cols]` matrix.
    pub fn add_row_vector(&self, row: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (_, cols) = self.dims2()?;
        if row.numel() != cols {
            return Err(TensorError::BroadcastError {
                a: self.shape_vec(),
                b: row.shape_vec(),
            });
        }
        let mut out = self.clone();
        for chunk in out.data.chunks_mut(cols) {
            for (v, &b) in chunk.iter_mut().zip(row.data.iter()) {
                *v += b;
            }
        }
        Ok(out)
    }

    // ─── Reductions ─────────────────────────────────────────────────────────

    /// Sum along an axis, collapsing that dimension.
    pub fn sum_axis(&self, axis: usize) -> TensorResult<Tensor<T>> {
        let dims = self.shape.dims();
        if axis >= dims.len() {
            return Err(TensorError::InvalidAxis {
                axis,
                ndim: self.ndim(),
            });
        }

        let outer: usize = dims[..axis].iter().product();
        let axis_size = dims[axis];
        let inner: usize = dims[axis + 1..].iter().product();

        let mut new_dims = dims.to_vec();
        new_dims.remove(axis);

        let mut result = vec![T::ZERO; outer * inner];
        for o in 0..outer {
            for a in 0..axis_size {
                let src = &self.data[(o * axis_size + a) * inner..(o * axis_size + a + 1) * inner];
                for (dst, &v) in result[o * inner..(o + 1) * inner].iter_mut().zip(src) {
                    *dst += v;
                }
            }
        }

        Tensor::new(result, new_dims)
    }

    /// Index of the largest entry of every row; ties resolve to the first.
    pub fn argmax_rows(&self) -> TensorResult<Vec<usize>> {
        let (_, cols) = self.dims2()?;
        if cols == 0 {
            return Err(TensorError::EmptyTensor);
        }
        Ok(self
            .data
            .chunks(cols)
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect())
    }

    // ─── Matrix Multiply ────────────────────────────────────────────────────

    /// `[m, k] x [k, n] -> [m, n]`.
    pub fn matmul(&self, other: &Tensor<T>) -> TensorResult<Tensor<T>> {
        let (m, k) = self.dims2()?;
        let (k2, n) = other.dims2()?;
        if k != k2 {
            return Err(TensorError::DimensionMismatch(format!(
                "matmul: inner dimensions must match, got {} and {}",
                k, k2
            )));
        }

        let mut data = vec![T::ZERO; m * n];
        for i in 0..m {
            let out_row = &mut data[i * n..(i + 1) * n];
            for p in 0..k {
                let a = self.data[i * k + p];
                if a == T::ZERO {
                    continue;
                }
                let b_row = &other.data[p * n..(p + 1) * n];
                for (o, &b) in out_row.iter_mut().zip(b_row) {
                    *o += a * b;
                }
            }
        }
        Tensor::new(data, vec![m, n])
    }
}

impl<T: Float> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl<T: Float> fmt::Display for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.numel() <= 8 {
            write!(f, "tensor({:?}, shape={})", self.data, self.shape)
        } else {
            write!(f, "tensor(shape={}, numel={})", self.shape, self.numel())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn test_creation() {
        let t: Tensor<f64> = Tensor::zeros(vec![3, 4]);
        assert_eq!(t.shape_vec(), vec![3, 4]);
        assert_eq!(t.numel(), 12);
        assert!(Tensor::<f64>::new(vec![1.0, 2.0, 3.0], vec![2, 2]).is_err());
    }

    #[test]
    fn test_from_vec2d() {
        let t: Tensor<f64> = Tensor::from_vec2d(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(t.shape_vec(), vec![2, 3]);
        assert_eq!(t.data()[5], 6.0);
        assert!(Tensor::<f64>::from_vec2d(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_matmul() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let b: Tensor<f64> = Tensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], vec![3, 2]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape_vec(), vec![2, 2]);
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
        assert!(a.matmul(&a).is_err());
    }

    #[test]
    fn test_transpose() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let t = a.t().unwrap();
        assert_eq!(t.shape_vec(), vec![3, 2]);
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_sum_axis() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        assert_eq!(a.sum_axis(0).unwrap().data(), &[5.0, 7.0, 9.0]);
        assert_eq!(a.sum_axis(1).unwrap().data(), &[6.0, 15.0]);
        assert!(a.sum_axis(2).is_err());
    }

    #[test]
    fn test_add_row_vector() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        let b = Tensor::from_slice(&[10.0, 20.0, 30.0]);
        let c = a.add_row_vector(&b).unwrap();
        assert_eq!(c.data(), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
        assert!(a.add_row_vector(&Tensor::from_slice(&[1.0])).is_err());
    }

    #[test]
    fn test_scaled_add_assign() {
        let mut a = Tensor::from_slice(&[1.0f64, 2.0]);
        a.scaled_add_assign(-0.1, &Tensor::from_slice(&[2.0, 3.0])).unwrap();
        assert_abs_diff_eq!(a.data()[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(a.data()[1], 1.7, epsilon = 1e-12);
        assert!(a.scaled_add_assign(1.0, &Tensor::from_slice(&[1.0])).is_err());
    }

    #[test]
    fn test_argmax_rows_first_tie() {
        let a: Tensor<f64> = Tensor::new(vec![1.0, 3.0, 3.0, 2.0, 0.0, -1.0], vec![2, 3]).unwrap();
        assert_eq!(a.argmax_rows().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_random_constructors() {
        let mut rng = StdRng::seed_from_u64(7);
        let u: Tensor<f64> = Tensor::rand_uniform(vec![100], -0.5, 0.5, &mut rng);
        assert!(u.data().iter().all(|&v| (-0.5..=0.5).contains(&v)));

        let n: Tensor<f32> = Tensor::randn(vec![3, 3], 0.1, &mut rng);
        assert_eq!(n.numel(), 9);

        let mut a = StdRng::seed_from_u64(1);
        let mut b = StdRng::seed_from_u64(1);
        assert_eq!(
            Tensor::<f64>::randn(vec![5], 1.0, &mut a),
            Tensor::<f64>::randn(vec![5], 1.0, &mut b)
        );
    }
}
