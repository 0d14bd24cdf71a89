use std::sync::Arc;

/// A JIT-compiled function evaluating a vector of expressions.
///
/// Arguments: unknown values `u`, canonical parameter values `p`, and the
/// output buffer to fill. Thread-safe and reentrant; concurrent calls need
/// distinct output buffers.
pub type SystemJitFn = Arc<dyn Fn(&[f64], &[f64], &mut [f64]) + Send + Sync>;

/// A JIT-compiled function evaluating a single scalar expression from
/// unknown and canonical parameter values.
pub type ScalarJitFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;
