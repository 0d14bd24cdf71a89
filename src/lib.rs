//! Symbolic-to-numeric compilation of nonlinear equation systems.
//!
//! This crate models nonlinear equation systems symbolically and compiles
//! them into native numeric callables for generic nonlinear and
//! least-squares solvers. Expression parsing builds on the
//! [evalexpr](https://github.com/ISibboI/evalexpr) crate and code generation
//! uses [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift)
//! for JIT compilation.
//!
//! # Features
//!
//! - Exact symbolic Jacobians and Hessians with option-keyed caching
//! - Observed (auxiliary) variable elimination before differentiation
//! - Structural sparsity analysis without differentiation
//! - Allocating and in-place calling conventions over one JIT artifact
//! - Parameter canonicalization for flat and grouped value layouts
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use nlsys_jit::{Equation, NonlinearSystem, ProblemBuilder};
//!
//! let model = NonlinearSystem::new(
//!     "lorenz",
//!     vec![
//!         Equation::parse("sigma * (y - x)").unwrap(),
//!         Equation::parse("x * (rho - z) - y").unwrap(),
//!         Equation::parse("x * y - beta * z").unwrap(),
//!     ],
//!     vec!["x".into(), "y".into(), "z".into()],
//!     vec!["sigma".into(), "rho".into(), "beta".into()],
//! )
//! .unwrap()
//! .complete();
//!
//! let u0 = HashMap::from([("x".to_string(), 1.0), ("y".to_string(), 1.0), ("z".to_string(), 1.0)]);
//! let p = HashMap::from([
//!     ("sigma".to_string(), 10.0),
//!     ("rho".to_string(), 8.0),
//!     ("beta".to_string(), 8.0 / 3.0),
//! ]);
//!
//! let problem = ProblemBuilder::new()
//!     .want_jacobian(true)
//!     .build(Arc::new(model), &u0, &p)
//!     .unwrap();
//! let residuals = problem.residual(problem.u0()).unwrap();
//! assert_eq!(residuals[0], 0.0);
//! ```

pub use compiler::CompiledFunction;
pub use model::{Equation, NonlinearSystem};
pub use problem::{NonlinearProblem, ProblemBuilder};

pub mod prelude {
    pub use crate::backends::{Matrix, Vector};
    pub use crate::compiler::CompiledFunction;
    pub use crate::derivative::{DerivativeOptions, JacobianMatrix};
    pub use crate::errors::{CompileError, ModelError};
    pub use crate::expr::Expr;
    pub use crate::model::{
        DefaultValue, Equation, NonlinearSystem, ObservedEquation, Parameter,
        ParameterDependency, TagSource,
    };
    pub use crate::params::{GroupedValues, ParameterInput, ParameterValues};
    pub use crate::problem::{JacobianPrototype, NonlinearProblem, ProblemBuilder};
}

/// Buffer traits for numeric backends
pub mod backends;
/// JIT compilation functionality using Cranelift
pub mod builder;
/// Compiled functions with allocating and in-place calling conventions
pub mod compiler;
/// Conversion from parsed expressions to the internal tree
pub mod convert;
/// Symbolic Jacobian and Hessian computation
pub mod derivative;
/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation and symbolic differentiation
pub mod expr;
/// Optional homotopy-continuation capability
pub mod homotopy;
/// The equation-system data model
pub mod model;
/// Observed variable elimination and introspection
pub mod observed;
/// Peephole optimisation of the flattened stack IR
pub mod opt;
/// Parameter canonicalization
pub mod params;
/// Solver-ready problem assembly
pub mod problem;
/// Structural sparsity analysis
pub mod sparsity;
/// Shared function-pointer types
pub mod types;
/// Linking shims for external math functions
pub(crate) mod operators;
