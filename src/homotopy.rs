//! Optional homotopy-continuation integration.
//!
//! The polynomial-solving algorithm itself lives in an external package;
//! this module only defines the accessor contract such a package must
//! satisfy and a construction entry point that fails with
//! [`ModelError::ExtensionUnavailable`] unless a backend is injected.

use std::sync::Arc;

use crate::errors::{CompileError, ModelError};
use crate::model::NonlinearSystem;

/// A problem object produced by a homotopy backend.
pub trait HomotopyProblem {
    /// Current state vector, in the model's unknown order.
    fn state(&self) -> Vec<f64>;

    fn set_state(&mut self, u: &[f64]) -> Result<(), CompileError>;

    /// Current parameter values, in the model's canonical order.
    fn parameters(&self) -> Vec<f64>;

    fn set_parameters(&mut self, p: &[f64]) -> Result<(), CompileError>;

    /// An observed quantity at the current state.
    fn observed_value(&self, symbol: &str) -> Result<f64, CompileError>;
}

/// Construction capability supplied by an external homotopy package.
pub trait HomotopyBackend {
    fn build(
        &self,
        model: Arc<NonlinearSystem>,
        u0: &[f64],
        p: &[f64],
    ) -> Result<Box<dyn HomotopyProblem>, CompileError>;
}

/// Builds a homotopy problem through the injected backend. Without one the
/// construction fails; the core never ships a solving algorithm.
pub fn build_homotopy_problem(
    model: Arc<NonlinearSystem>,
    u0: &[f64],
    p: &[f64],
    backend: Option<&dyn HomotopyBackend>,
) -> Result<Box<dyn HomotopyProblem>, CompileError> {
    let backend = backend.ok_or(ModelError::ExtensionUnavailable)?;
    if !model.is_complete() {
        return Err(ModelError::NotCompleted {
            name: model.name().to_string(),
        }
        .into());
    }
    backend.build(model, u0, p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::SymbolLayout;
    use crate::model::{Equation, ObservedEquation};
    use crate::observed::ObservedAccessor;
    use crate::params::ParameterLayout;

    fn model() -> Arc<NonlinearSystem> {
        Arc::new(
            NonlinearSystem::new(
                "poly",
                vec![Equation::parse("x^2 - c").unwrap()],
                vec!["x".into()],
                vec!["c".into()],
            )
            .unwrap()
            .with_observed(vec![ObservedEquation::parse("r = x * c").unwrap()])
            .unwrap()
            .complete(),
        )
    }

    struct StubProblem {
        u: Vec<f64>,
        p: Vec<f64>,
        observed: ObservedAccessor,
    }

    impl HomotopyProblem for StubProblem {
        fn state(&self) -> Vec<f64> {
            self.u.clone()
        }

        fn set_state(&mut self, u: &[f64]) -> Result<(), CompileError> {
            if u.len() != self.u.len() {
                return Err(CompileError::InvalidInputLength {
                    expected: self.u.len(),
                    got: u.len(),
                });
            }
            self.u.copy_from_slice(u);
            Ok(())
        }

        fn parameters(&self) -> Vec<f64> {
            self.p.clone()
        }

        fn set_parameters(&mut self, p: &[f64]) -> Result<(), CompileError> {
            if p.len() != self.p.len() {
                return Err(CompileError::InvalidInputLength {
                    expected: self.p.len(),
                    got: p.len(),
                });
            }
            self.p.copy_from_slice(p);
            Ok(())
        }

        fn observed_value(&self, symbol: &str) -> Result<f64, CompileError> {
            self.observed.value(symbol, &self.u, &self.p)
        }
    }

    struct StubBackend;

    impl HomotopyBackend for StubBackend {
        fn build(
            &self,
            model: Arc<NonlinearSystem>,
            u0: &[f64],
            p: &[f64],
        ) -> Result<Box<dyn HomotopyProblem>, CompileError> {
            let layout = ParameterLayout::of(&model);
            let observed = ObservedAccessor::new(
                model.observed().to_vec(),
                SymbolLayout::new(model.unknowns(), layout.slots()),
            );
            Ok(Box::new(StubProblem {
                u: u0.to_vec(),
                p: p.to_vec(),
                observed,
            }))
        }
    }

    #[test]
    fn test_missing_backend_fails() {
        let result = build_homotopy_problem(model(), &[1.0], &[4.0], None);
        assert!(matches!(
            result,
            Err(CompileError::ModelError(ModelError::ExtensionUnavailable))
        ));
    }

    #[test]
    fn test_injected_backend_builds_and_accesses() {
        let mut problem =
            build_homotopy_problem(model(), &[1.0], &[4.0], Some(&StubBackend)).unwrap();
        assert_eq!(problem.state(), vec![1.0]);
        assert_eq!(problem.parameters(), vec![4.0]);

        problem.set_state(&[2.0]).unwrap();
        assert_eq!(problem.observed_value("r").unwrap(), 8.0);
        assert!(problem.set_state(&[1.0, 2.0]).is_err());
    }
}
