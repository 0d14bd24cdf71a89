/// Vector-like storage that residual and observed evaluations can write into.
///
/// The in-place entry points ([`crate::problem::NonlinearProblem::residual_into`]
/// and friends) accept any implementor, so callers keep their solver's native
/// vector type end to end instead of copying through `Vec<f64>`.
pub trait Vector {
    /// Returns the vector's data as a slice.
    fn as_slice(&self) -> &[f64];

    /// Returns the vector's data as a mutable slice.
    fn as_mut_slice(&mut self) -> &mut [f64];

    /// Creates a zero-filled vector of the given length.
    fn zeros(len: usize) -> Self;

    /// Returns the number of elements.
    fn len(&self) -> usize;

    /// Checks if the vector is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vector for Vec<f64> {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        vec![0.0; len]
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Fixed-size arrays work when the length is known statically, which is
/// common for small hand-written systems.
impl<const N: usize> Vector for [f64; N] {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self
    }

    fn zeros(len: usize) -> Self {
        assert_eq!(len, N, "array length must match const generic size");
        [0.0; N]
    }

    fn len(&self) -> usize {
        N
    }
}

#[cfg(feature = "ndarray")]
impl Vector for ndarray::Array1<f64> {
    fn as_slice(&self) -> &[f64] {
        self.as_slice().unwrap()
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self.as_slice_mut().unwrap()
    }

    fn zeros(len: usize) -> Self {
        ndarray::Array1::zeros(len)
    }

    fn len(&self) -> usize {
        self.len()
    }
}

#[cfg(feature = "nalgebra")]
impl Vector for nalgebra::DVector<f64> {
    fn as_slice(&self) -> &[f64] {
        self.as_slice()
    }

    fn as_mut_slice(&mut self) -> &mut [f64] {
        self.as_mut_slice()
    }

    fn zeros(len: usize) -> Self {
        nalgebra::DVector::zeros(len)
    }

    fn len(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_backend() {
        let mut v = Vec::<f64>::zeros(3);
        assert_eq!(Vector::len(&v), 3);
        v.as_mut_slice()[1] = 2.5;
        assert_eq!(v.as_slice(), &[0.0, 2.5, 0.0]);
    }

    #[test]
    fn test_array_backend() {
        let mut arr = <[f64; 2]>::zeros(2);
        arr.as_mut_slice()[0] = 1.0;
        assert_eq!(arr, [1.0, 0.0]);
    }

    #[test]
    #[should_panic]
    fn test_array_backend_length_mismatch() {
        let _ = <[f64; 2]>::zeros(3);
    }
}
