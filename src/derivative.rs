//! Symbolic Jacobian and Hessian computation.
//!
//! Differentiation is exact and symbolic, never finite differences. The
//! Jacobian of a model is cached in the model's single-slot cache keyed by
//! the [`DerivativeOptions`] that produced it: a request with the exact same
//! key returns the stored matrix unchanged (same `Arc`), any other key
//! recomputes and replaces the slot. Hessians are never cached; they are
//! rarely requested more than once per option set.

use std::sync::Arc;

use rayon::prelude::*;

use crate::errors::CompileError;
use crate::expr::Expr;
use crate::model::NonlinearSystem;
use crate::observed;
use crate::sparsity::{self, SparsityPattern};

/// Options keying a derivative computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivativeOptions {
    /// Restrict storage to the structural sparsity pattern.
    pub sparse: bool,
    /// Run algebraic simplification on every entry.
    pub simplify: bool,
}

/// A matrix of symbolic expressions, dense (row-major) or sparse
/// (triplets restricted to the structural pattern).
#[derive(Debug, Clone, PartialEq)]
pub enum JacobianMatrix {
    Dense {
        nrows: usize,
        ncols: usize,
        entries: Vec<Expr>,
    },
    Sparse {
        nrows: usize,
        ncols: usize,
        triplets: Vec<(usize, usize, Expr)>,
    },
}

impl JacobianMatrix {
    pub fn shape(&self) -> (usize, usize) {
        match self {
            JacobianMatrix::Dense { nrows, ncols, .. }
            | JacobianMatrix::Sparse { nrows, ncols, .. } => (*nrows, *ncols),
        }
    }

    /// The expression at `(row, col)`; `None` for a structural zero of a
    /// sparse matrix.
    pub fn entry(&self, row: usize, col: usize) -> Option<&Expr> {
        match self {
            JacobianMatrix::Dense { ncols, entries, .. } => entries.get(row * ncols + col),
            JacobianMatrix::Sparse { triplets, .. } => triplets
                .iter()
                .find(|(i, j, _)| *i == row && *j == col)
                .map(|(_, _, e)| e),
        }
    }

    /// The nonzero structure this matrix carries. For dense storage every
    /// entry that is not the constant zero counts.
    pub fn sparsity(&self) -> SparsityPattern {
        let (nrows, ncols) = self.shape();
        let mut rows = vec![Vec::new(); nrows];
        match self {
            JacobianMatrix::Dense { entries, .. } => {
                for (idx, entry) in entries.iter().enumerate() {
                    if !matches!(entry, Expr::Const(c) if *c == 0.0) {
                        rows[idx / ncols].push(idx % ncols);
                    }
                }
            }
            JacobianMatrix::Sparse { triplets, .. } => {
                for (i, j, _) in triplets {
                    rows[*i].push(*j);
                }
                for row in &mut rows {
                    row.sort_unstable();
                }
            }
        }
        SparsityPattern::new(nrows, ncols, rows)
    }

    /// All entries as a row-major dense vector, structural zeros filled in.
    pub fn entries_row_major(&self) -> Vec<Expr> {
        match self {
            JacobianMatrix::Dense { entries, .. } => entries.clone(),
            JacobianMatrix::Sparse {
                nrows,
                ncols,
                triplets,
            } => {
                let mut out = vec![Expr::Const(0.0); nrows * ncols];
                for (i, j, e) in triplets {
                    out[i * ncols + j] = e.clone();
                }
                out
            }
        }
    }
}

/// Computes (or fetches from the model cache) the Jacobian of the model's
/// residuals with respect to its unknowns.
///
/// Observed definitions are substituted into every residual first, then each
/// substituted residual is differentiated per unknown in unknown order.
pub fn calculate_jacobian(
    model: &NonlinearSystem,
    options: DerivativeOptions,
) -> Result<Arc<JacobianMatrix>, CompileError> {
    model.cached_jacobian_or(options, || compute_jacobian(model, options))
}

fn compute_jacobian(
    model: &NonlinearSystem,
    options: DerivativeOptions,
) -> Result<JacobianMatrix, CompileError> {
    let residuals = observed::eliminate_observed_all(&model.residuals(), model.observed())?;
    let unknowns = model.unknowns();
    let nrows = residuals.len();
    let ncols = unknowns.len();

    if options.sparse {
        let pattern = sparsity::jacobian_sparsity(&residuals, unknowns);
        let mut triplets: Vec<(usize, usize, Expr)> = pattern
            .positions()
            .map(|(i, j)| (i, j, residuals[i].derivative(&unknowns[j])))
            .collect();
        if options.simplify {
            triplets
                .par_iter_mut()
                .for_each(|(_, _, entry)| *entry = entry.simplify());
        }
        Ok(JacobianMatrix::Sparse {
            nrows,
            ncols,
            triplets,
        })
    } else {
        let mut entries: Vec<Expr> = residuals
            .iter()
            .flat_map(|residual| unknowns.iter().map(|u| residual.derivative(u)))
            .collect();
        if options.simplify {
            entries.par_iter_mut().for_each(|entry| *entry = entry.simplify());
        }
        Ok(JacobianMatrix::Dense {
            nrows,
            ncols,
            entries,
        })
    }
}

/// Computes the Hessian of every residual, one matrix per residual.
/// Results are returned directly and never cached.
pub fn calculate_hessian(
    model: &NonlinearSystem,
    options: DerivativeOptions,
) -> Result<Vec<JacobianMatrix>, CompileError> {
    let residuals = observed::eliminate_observed_all(&model.residuals(), model.observed())?;
    let unknowns = model.unknowns();
    let n = unknowns.len();

    residuals
        .iter()
        .map(|residual| {
            if options.sparse {
                let pattern = sparsity::hessian_sparsity(residual, unknowns);
                let mut triplets: Vec<(usize, usize, Expr)> = pattern
                    .positions()
                    .map(|(i, j)| {
                        (i, j, residual.derivative(&unknowns[i]).derivative(&unknowns[j]))
                    })
                    .collect();
                if options.simplify {
                    triplets
                        .par_iter_mut()
                        .for_each(|(_, _, entry)| *entry = entry.simplify());
                }
                Ok(JacobianMatrix::Sparse {
                    nrows: n,
                    ncols: n,
                    triplets,
                })
            } else {
                let mut entries: Vec<Expr> = unknowns
                    .iter()
                    .flat_map(|ui| {
                        let first = residual.derivative(ui);
                        unknowns.iter().map(move |uj| first.derivative(uj)).collect::<Vec<_>>()
                    })
                    .collect();
                if options.simplify {
                    entries.par_iter_mut().for_each(|entry| *entry = entry.simplify());
                }
                Ok(JacobianMatrix::Dense {
                    nrows: n,
                    ncols: n,
                    entries,
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Equation, NonlinearSystem, ObservedEquation};

    fn lorenz() -> NonlinearSystem {
        NonlinearSystem::new(
            "lorenz",
            vec![
                Equation::parse("sigma * (y - x)").unwrap(),
                Equation::parse("x * (rho - z) - y").unwrap(),
                Equation::parse("x * y - beta * z").unwrap(),
            ],
            vec!["x".into(), "y".into(), "z".into()],
            vec!["sigma".into(), "rho".into(), "beta".into()],
        )
        .unwrap()
    }

    fn entry_value(matrix: &JacobianMatrix, i: usize, j: usize, u: &[f64], p: &[f64]) -> f64 {
        let lookup = |name: &str| match name {
            "x" => Some(u[0]),
            "y" => Some(u[1]),
            "z" => Some(u[2]),
            "sigma" => Some(p[0]),
            "rho" => Some(p[1]),
            "beta" => Some(p[2]),
            _ => None,
        };
        match matrix.entry(i, j) {
            Some(e) => e.eval(&lookup).unwrap(),
            None => 0.0,
        }
    }

    #[test]
    fn test_jacobian_entries_match_partials() {
        let model = lorenz();
        let jac = calculate_jacobian(&model, DerivativeOptions::default()).unwrap();
        assert_eq!(jac.shape(), (3, 3));

        let u = [1.0, 2.0, 3.0];
        let p = [10.0, 28.0, 8.0 / 3.0];
        // d(sigma*(y-x))/dx = -sigma, /dy = sigma, /dz = 0
        assert_eq!(entry_value(&jac, 0, 0, &u, &p), -10.0);
        assert_eq!(entry_value(&jac, 0, 1, &u, &p), 10.0);
        assert_eq!(entry_value(&jac, 0, 2, &u, &p), 0.0);
        // d(x*(rho-z)-y)/dx = rho-z, /dy = -1, /dz = -x
        assert_eq!(entry_value(&jac, 1, 0, &u, &p), 25.0);
        assert_eq!(entry_value(&jac, 1, 1, &u, &p), -1.0);
        assert_eq!(entry_value(&jac, 1, 2, &u, &p), -1.0);
        // d(x*y-beta*z)/dx = y, /dy = x, /dz = -beta
        assert_eq!(entry_value(&jac, 2, 0, &u, &p), 2.0);
        assert_eq!(entry_value(&jac, 2, 1, &u, &p), 1.0);
        assert_eq!(entry_value(&jac, 2, 2, &u, &p), -8.0 / 3.0);
    }

    #[test]
    fn test_cache_hit_is_object_identical() {
        let model = lorenz();
        let options = DerivativeOptions {
            sparse: false,
            simplify: true,
        };
        let first = calculate_jacobian(&model, options).unwrap();
        let second = calculate_jacobian(&model, options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_key_change_recomputes() {
        let model = lorenz();
        let dense = calculate_jacobian(&model, DerivativeOptions::default()).unwrap();
        let sparse = calculate_jacobian(
            &model,
            DerivativeOptions {
                sparse: true,
                simplify: false,
            },
        )
        .unwrap();
        assert!(!Arc::ptr_eq(&dense, &sparse));
        assert!(matches!(*sparse, JacobianMatrix::Sparse { .. }));

        // going back to the original key recomputes again: single slot
        let dense_again = calculate_jacobian(&model, DerivativeOptions::default()).unwrap();
        assert!(!Arc::ptr_eq(&dense, &dense_again));
    }

    #[test]
    fn test_sparse_restricted_to_pattern() {
        let model = lorenz();
        let jac = calculate_jacobian(
            &model,
            DerivativeOptions {
                sparse: true,
                simplify: true,
            },
        )
        .unwrap();
        // entry (0, 2) is structurally zero
        assert!(jac.entry(0, 2).is_none());
        assert!(jac.entry(1, 2).is_some());
        assert_eq!(jac.sparsity().nnz(), 8);
    }

    #[test]
    fn test_sparsity_is_superset_of_symbolic_nonzeros() {
        let model = lorenz();
        let pattern = crate::sparsity::model_jacobian_sparsity(&model).unwrap();
        let jac = calculate_jacobian(
            &model,
            DerivativeOptions {
                sparse: false,
                simplify: true,
            },
        )
        .unwrap();
        let (nrows, ncols) = jac.shape();
        for i in 0..nrows {
            for j in 0..ncols {
                let symbolically_zero = matches!(jac.entry(i, j), Some(Expr::Const(c)) if *c == 0.0);
                if !symbolically_zero {
                    assert!(pattern.contains(i, j), "missing nonzero at ({i}, {j})");
                }
            }
        }
    }

    #[test]
    fn test_observed_substituted_before_differentiation() {
        let model = NonlinearSystem::new(
            "m",
            vec![Equation::parse("w - y").unwrap()],
            vec!["x".into(), "y".into()],
            vec![],
        )
        .unwrap()
        .with_observed(vec![ObservedEquation::parse("w = x^2").unwrap()])
        .unwrap();

        let jac = calculate_jacobian(&model, DerivativeOptions::default()).unwrap();
        // d/dx of (x^2 - y) at x=3 is 6
        let value = jac
            .entry(0, 0)
            .unwrap()
            .eval(&|name| (name == "x").then_some(3.0))
            .unwrap();
        assert_eq!(value, 6.0);
    }

    #[test]
    fn test_hessian_per_residual() {
        let model = NonlinearSystem::new(
            "m",
            vec![
                Equation::parse("x^2 * y").unwrap(),
                Equation::parse("x + y").unwrap(),
            ],
            vec!["x".into(), "y".into()],
            vec![],
        )
        .unwrap();
        let hessians = calculate_hessian(
            &model,
            DerivativeOptions {
                sparse: false,
                simplify: true,
            },
        )
        .unwrap();
        assert_eq!(hessians.len(), 2);

        let lookup = |name: &str| match name {
            "x" => Some(2.0),
            "y" => Some(5.0),
            _ => None,
        };
        // d2(x^2 y)/dx2 = 2y, d2/dxdy = 2x
        assert_eq!(hessians[0].entry(0, 0).unwrap().eval(&lookup).unwrap(), 10.0);
        assert_eq!(hessians[0].entry(0, 1).unwrap().eval(&lookup).unwrap(), 4.0);
        // the affine residual has an all-zero Hessian
        assert_eq!(hessians[1].entry(0, 0).unwrap().eval(&lookup).unwrap(), 0.0);
    }
}
