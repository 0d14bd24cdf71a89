//! Structural nonzero analysis of Jacobians and Hessians.
//!
//! Patterns are computed by syntactic dependency traversal only. No numeric
//! evaluation and no differentiation happens here, which keeps the analysis
//! cheap enough to size sparse storage before (or instead of) running the
//! derivative engine. The patterns are sound supersets of the symbolically
//! nonzero entries.

use crate::errors::ModelError;
use crate::expr::Expr;
use crate::model::NonlinearSystem;
use crate::observed;

/// Boolean nonzero structure of a matrix, stored as sorted column indices
/// per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparsityPattern {
    nrows: usize,
    ncols: usize,
    rows: Vec<Vec<usize>>,
}

impl SparsityPattern {
    pub fn new(nrows: usize, ncols: usize, rows: Vec<Vec<usize>>) -> Self {
        debug_assert_eq!(rows.len(), nrows);
        Self { nrows, ncols, rows }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    /// Column indices of possibly nonzero entries in row `i`, sorted.
    pub fn row(&self, i: usize) -> &[usize] {
        &self.rows[i]
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.rows[row].binary_search(&col).is_ok()
    }

    /// Number of possibly nonzero entries.
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// All `(row, col)` positions in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .flat_map(|(i, cols)| cols.iter().map(move |&j| (i, j)))
    }
}

/// Which unknowns each residual structurally depends on. One row per
/// residual, one column per unknown, in the given orders.
pub fn jacobian_sparsity(residuals: &[Expr], unknowns: &[String]) -> SparsityPattern {
    let rows = residuals
        .iter()
        .map(|residual| {
            unknowns
                .iter()
                .enumerate()
                .filter(|(_, u)| residual.depends_on(u))
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    SparsityPattern::new(residuals.len(), unknowns.len(), rows)
}

/// Second-order structural dependency of one residual: entry `(i, j)` is
/// set when unknowns `i` and `j` both appear in the residual. This marks
/// every pair that could carry a nonzero second derivative.
pub fn hessian_sparsity(residual: &Expr, unknowns: &[String]) -> SparsityPattern {
    let present: Vec<usize> = unknowns
        .iter()
        .enumerate()
        .filter(|(_, u)| residual.depends_on(u))
        .map(|(j, _)| j)
        .collect();

    let n = unknowns.len();
    let mut rows = vec![Vec::new(); n];
    for &i in &present {
        rows[i] = present.clone();
    }
    SparsityPattern::new(n, n, rows)
}

/// Jacobian sparsity of a model's residuals with observed definitions
/// substituted away first, so dependencies routed through observed symbols
/// are not lost.
pub fn model_jacobian_sparsity(model: &NonlinearSystem) -> Result<SparsityPattern, ModelError> {
    let residuals = observed::eliminate_observed_all(&model.residuals(), model.observed())?;
    Ok(jacobian_sparsity(&residuals, model.unknowns()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::parse_expr;
    use crate::model::{Equation, NonlinearSystem, ObservedEquation};

    fn unknowns() -> Vec<String> {
        vec!["x".into(), "y".into(), "z".into()]
    }

    #[test]
    fn test_jacobian_sparsity_lorenz() {
        let residuals = vec![
            parse_expr("sigma * (y - x)").unwrap(),
            parse_expr("x * (rho - z) - y").unwrap(),
            parse_expr("x * y - beta * z").unwrap(),
        ];
        let pattern = jacobian_sparsity(&residuals, &unknowns());
        assert_eq!(pattern.shape(), (3, 3));
        assert_eq!(pattern.row(0), &[0, 1]);
        assert_eq!(pattern.row(1), &[0, 1, 2]);
        assert_eq!(pattern.row(2), &[0, 1, 2]);
        assert!(!pattern.contains(0, 2));
        assert_eq!(pattern.nnz(), 8);
    }

    #[test]
    fn test_hessian_sparsity_marks_cooccurring_pairs() {
        let residual = parse_expr("x * z + z^2").unwrap();
        let pattern = hessian_sparsity(&residual, &unknowns());
        assert_eq!(pattern.shape(), (3, 3));
        assert!(pattern.contains(0, 2));
        assert!(pattern.contains(2, 0));
        assert!(pattern.contains(2, 2));
        assert!(!pattern.contains(1, 1));
        assert!(!pattern.contains(0, 1));
    }

    #[test]
    fn test_observed_dependencies_are_not_lost() {
        let model = NonlinearSystem::new(
            "m",
            vec![Equation::parse("w - y").unwrap()],
            vec!["x".into(), "y".into()],
            vec![],
        )
        .unwrap()
        .with_observed(vec![ObservedEquation::parse("w = x^2").unwrap()])
        .unwrap();

        let pattern = model_jacobian_sparsity(&model).unwrap();
        // the residual reaches x only through the observed symbol w
        assert!(pattern.contains(0, 0));
        assert!(pattern.contains(0, 1));
    }

    #[test]
    fn test_positions_row_major() {
        let pattern = SparsityPattern::new(2, 2, vec![vec![1], vec![0, 1]]);
        let positions: Vec<_> = pattern.positions().collect();
        assert_eq!(positions, vec![(0, 1), (1, 0), (1, 1)]);
    }
}
