/// Matrix-like storage for dense Jacobian evaluation.
///
/// Implementors expose their data as one flat `f64` slice in whatever order
/// their backing store uses. The Jacobian writer always produces row-major
/// values and hands them to [`Matrix::write_row_major`], which maps them into
/// the implementor's layout: the default body assumes row-major storage and
/// copies straight through, column-major implementors override it with an
/// index scatter.
pub trait Matrix {
    /// Returns the matrix data as a flat slice in storage order.
    fn flat_slice(&self) -> &[f64];

    /// Returns the matrix data as a mutable flat slice in storage order.
    fn flat_mut_slice(&mut self) -> &mut [f64];

    /// Creates a zero-filled matrix of the given dimensions.
    fn zeros(rows: usize, cols: usize) -> Self;

    /// Returns the dimensions as `(rows, cols)`.
    fn dims(&self) -> (usize, usize);

    /// Writes row-major `values` so that entry `(i, j)` of an `(m, n)`
    /// matrix receives `values[i * n + j]`.
    fn write_row_major(&mut self, values: &[f64]) {
        self.flat_mut_slice().copy_from_slice(values);
    }
}

#[cfg(feature = "ndarray")]
impl Matrix for ndarray::Array2<f64> {
    fn flat_slice(&self) -> &[f64] {
        self.as_slice().unwrap()
    }

    fn flat_mut_slice(&mut self) -> &mut [f64] {
        self.as_slice_mut().unwrap()
    }

    fn zeros(rows: usize, cols: usize) -> Self {
        ndarray::Array2::zeros((rows, cols))
    }

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

// `DMatrix` stores column-major, so the flat slices follow that order and
// row-major writes go through an index scatter instead.
#[cfg(feature = "nalgebra")]
impl Matrix for nalgebra::DMatrix<f64> {
    fn flat_slice(&self) -> &[f64] {
        self.as_slice()
    }

    fn flat_mut_slice(&mut self) -> &mut [f64] {
        self.as_mut_slice()
    }

    fn zeros(rows: usize, cols: usize) -> Self {
        nalgebra::DMatrix::zeros(rows, cols)
    }

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }

    fn write_row_major(&mut self, values: &[f64]) {
        let (nrows, ncols) = (self.nrows(), self.ncols());
        for i in 0..nrows {
            for j in 0..ncols {
                self[(i, j)] = values[i * ncols + j];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[allow(unused_imports)]
    use super::*;

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_ndarray_matrix_backend() {
        let mut mat = ndarray::Array2::<f64>::zeros((2, 3));
        assert_eq!(mat.dims(), (2, 3));
        mat.write_row_major(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(mat.flat_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(mat[(1, 0)], 3.0);
    }

    #[cfg(feature = "nalgebra")]
    #[test]
    fn test_nalgebra_row_major_write_scatters() {
        let mut mat = nalgebra::DMatrix::<f64>::zeros(2, 3);
        assert_eq!(mat.dims(), (2, 3));
        mat.write_row_major(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(mat[(0, 1)], 1.0);
        assert_eq!(mat[(1, 0)], 3.0);
        assert_eq!(mat[(1, 2)], 5.0);
        // storage itself stays column-major
        assert_eq!(mat.flat_slice(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }
}
