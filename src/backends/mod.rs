//! Buffer abstractions for numeric backends.
//!
//! Solvers hand us their own vector and matrix types; the [`Vector`] and
//! [`Matrix`] traits expose them as flat `f64` slices so the in-place
//! evaluation paths can write straight into solver-owned storage. `Vec<f64>`
//! and fixed-size arrays are always supported; `ndarray` and `nalgebra`
//! containers are available behind the feature flags of the same name.

pub mod matrix;
pub mod vector;

pub use matrix::Matrix;
pub use vector::Vector;
