//! Assembly of solver-ready problem objects.
//!
//! A [`ProblemBuilder`] takes a completed model plus initial value and
//! parameter maps, resolves them against the model's defaults, compiles the
//! residual (and optionally the Jacobian) and packages everything a solver
//! needs into a [`NonlinearProblem`]: callables, prototypes for
//! preallocation, ordered numeric vectors and an observed accessor for
//! post-solve introspection.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::{Matrix, Vector};
use crate::compiler::CompiledFunction;
use crate::derivative::{self, DerivativeOptions, JacobianMatrix};
use crate::errors::{CompileError, ModelError};
use crate::expr::{Expr, SymbolLayout};
use crate::model::{DefaultValue, NonlinearSystem};
use crate::observed::ObservedAccessor;
use crate::params::{self, ParameterLayout};
use crate::sparsity::SparsityPattern;

/// Options for problem assembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProblemBuilder {
    want_jacobian: bool,
    sparse: bool,
    simplify: bool,
}

impl ProblemBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also compile the Jacobian and attach a prototype for solver
    /// preallocation.
    pub fn want_jacobian(mut self, want: bool) -> Self {
        self.want_jacobian = want;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    /// Builds the problem. The model must be complete; value maps may omit
    /// any symbol covered by a default, and a symbol with neither a value
    /// nor a default fails.
    pub fn build(
        &self,
        model: Arc<NonlinearSystem>,
        unknown_values: &HashMap<String, f64>,
        parameter_values: &HashMap<String, f64>,
    ) -> Result<NonlinearProblem, CompileError> {
        if !model.is_complete() {
            return Err(ModelError::NotCompleted {
                name: model.name().to_string(),
            }
            .into());
        }

        let known = resolve_known_values(&model, unknown_values, parameter_values);

        let u0 = model
            .unknowns()
            .iter()
            .map(|u| {
                known
                    .get(u)
                    .copied()
                    .ok_or_else(|| ModelError::MissingValue(u.clone()))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        // dependency equations are definitional and override any explicit
        // entry for their symbol; a free parameter a dependency needs but
        // nobody supplied is a missing value, not an unknown symbol
        let dependent: HashMap<String, f64> = params::evaluate_dependencies(&model, &known)
            .map_err(|err| match err {
                ModelError::UnresolvedSymbol(symbol) if model.is_parameter_symbol(&symbol) => {
                    ModelError::MissingValue(symbol)
                }
                other => other,
            })?
            .into_iter()
            .collect();
        let layout = ParameterLayout::of(&model);
        let p = layout
            .slots()
            .iter()
            .map(|slot| {
                dependent.get(slot).or_else(|| known.get(slot)).copied().ok_or_else(|| {
                    ModelError::MissingValue(slot.clone())
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let residual = CompiledFunction::compile(&model.residuals(), &model)?;

        let jacobian = if self.want_jacobian {
            let options = DerivativeOptions {
                sparse: self.sparse,
                simplify: self.simplify,
            };
            let matrix = derivative::calculate_jacobian(&model, options)?;
            let fun = CompiledFunction::compile_jacobian(&matrix, &model)?;
            let prototype = match &*matrix {
                JacobianMatrix::Dense { nrows, ncols, .. } => JacobianPrototype::Dense {
                    nrows: *nrows,
                    ncols: *ncols,
                },
                JacobianMatrix::Sparse { .. } => JacobianPrototype::Sparse(matrix.sparsity()),
            };
            Some(JacobianFunction { fun, prototype })
        } else {
            None
        };

        let resid_prototype = if model.is_square() {
            None
        } else {
            Some(vec![0.0; model.n_residuals()])
        };

        let observed = ObservedAccessor::new(
            model.observed().to_vec(),
            SymbolLayout::new(model.unknowns(), layout.slots()),
        );

        Ok(NonlinearProblem {
            system: model,
            residual,
            jacobian,
            u0,
            p,
            resid_prototype,
            observed,
            layout,
        })
    }
}

// Explicit values, then numeric defaults, then symbolic defaults evaluated
// against everything known so far. Symbolic defaults may chain, so they get
// bounded fixpoint passes like observed elimination.
fn resolve_known_values(
    model: &NonlinearSystem,
    unknown_values: &HashMap<String, f64>,
    parameter_values: &HashMap<String, f64>,
) -> HashMap<String, f64> {
    let mut known: HashMap<String, f64> = HashMap::new();
    known.extend(unknown_values.iter().map(|(k, v)| (k.clone(), *v)));
    known.extend(parameter_values.iter().map(|(k, v)| (k.clone(), *v)));

    let mut symbolic: Vec<(&String, &Expr)> = Vec::new();
    for (symbol, default) in model.defaults() {
        match default {
            DefaultValue::Numeric(value) => {
                known.entry(symbol.clone()).or_insert(*value);
            }
            DefaultValue::Symbolic(expr) => symbolic.push((symbol, expr)),
        }
    }
    for _ in 0..=symbolic.len() {
        for (symbol, expr) in &symbolic {
            if known.contains_key(*symbol) {
                continue;
            }
            if let Ok(value) = expr.eval(&|name| known.get(name).copied()) {
                known.insert((*symbol).clone(), value);
            }
        }
    }
    known
}

/// Shape prototype for solver-side Jacobian preallocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JacobianPrototype {
    Dense { nrows: usize, ncols: usize },
    Sparse(SparsityPattern),
}

/// A compiled Jacobian with its prototype.
#[derive(Clone)]
pub struct JacobianFunction {
    fun: CompiledFunction,
    prototype: JacobianPrototype,
}

impl JacobianFunction {
    pub fn prototype(&self) -> &JacobianPrototype {
        &self.prototype
    }

    /// Evaluates all compiled entries: row-major for dense, triplet order
    /// for sparse.
    pub fn values(&self, u: &[f64], p: &[f64]) -> Result<Vec<f64>, CompileError> {
        self.fun.call(u, p)
    }

    /// Evaluates a dense Jacobian into solver-owned matrix storage, so that
    /// `out[(i, j)]` holds the derivative of residual `i` with respect to
    /// unknown `j` regardless of the backend's storage order. Sparse
    /// prototypes are rejected; their entries follow triplet order, not a
    /// flat row-major layout.
    pub fn values_into<M: Matrix>(
        &self,
        out: &mut M,
        u: &[f64],
        p: &[f64],
    ) -> Result<(), CompileError> {
        match &self.prototype {
            JacobianPrototype::Dense { nrows, ncols } => {
                if out.dims() != (*nrows, *ncols) {
                    return Err(CompileError::InvalidOutputLength {
                        expected: nrows * ncols,
                        got: out.dims().0 * out.dims().1,
                    });
                }
                out.write_row_major(&self.fun.call(u, p)?);
                Ok(())
            }
            JacobianPrototype::Sparse(_) => Err(ModelError::Configuration(
                "in-place dense evaluation requires a dense Jacobian prototype".to_string(),
            )
            .into()),
        }
    }
}

/// A solver-ready nonlinear problem.
pub struct NonlinearProblem {
    system: Arc<NonlinearSystem>,
    residual: CompiledFunction,
    jacobian: Option<JacobianFunction>,
    u0: Vec<f64>,
    p: Vec<f64>,
    resid_prototype: Option<Vec<f64>>,
    observed: ObservedAccessor,
    layout: ParameterLayout,
}

impl NonlinearProblem {
    /// The source model, for introspection.
    pub fn system(&self) -> &Arc<NonlinearSystem> {
        &self.system
    }

    /// Initial unknown values in unknown order.
    pub fn u0(&self) -> &[f64] {
        &self.u0
    }

    /// Canonical parameter values.
    pub fn p(&self) -> &[f64] {
        &self.p
    }

    /// `None` for a square system; otherwise a zero vector sized by
    /// residual count, for solver preallocation in the least-squares case.
    pub fn resid_prototype(&self) -> Option<&[f64]> {
        self.resid_prototype.as_deref()
    }

    pub fn jacobian(&self) -> Option<&JacobianFunction> {
        self.jacobian.as_ref()
    }

    /// Evaluates the residuals at `u` with the problem's parameters.
    pub fn residual(&self, u: &[f64]) -> Result<Vec<f64>, CompileError> {
        self.residual.call(u, &self.p)
    }

    /// Evaluates the residuals into solver-owned storage.
    pub fn residual_into<V: Vector>(&self, out: &mut V, u: &[f64]) -> Result<(), CompileError> {
        self.residual.call_into(out.as_mut_slice(), u, &self.p)
    }

    /// Evaluates the Jacobian values at `u` with the problem's parameters.
    pub fn jacobian_values(&self, u: &[f64]) -> Result<Vec<f64>, CompileError> {
        let jacobian = self.jacobian.as_ref().ok_or_else(|| {
            ModelError::Configuration(
                "problem was built without a Jacobian; enable `want_jacobian`".to_string(),
            )
        })?;
        jacobian.values(u, &self.p)
    }

    /// Looks up any unknown, parameter or observed symbol from a raw state
    /// vector.
    pub fn value_of(&self, symbol: &str, u: &[f64]) -> Result<f64, CompileError> {
        if let Some(idx) = self.system.unknowns().iter().position(|s| s == symbol) {
            return u
                .get(idx)
                .copied()
                .ok_or(CompileError::InvalidInputLength {
                    expected: self.system.n_unknowns(),
                    got: u.len(),
                });
        }
        if let Ok(idx) = self.layout.index_of(symbol) {
            return Ok(self.p[idx]);
        }
        self.observed.value(symbol, u, &self.p)
    }

    /// Evaluates an observed symbol at the given state.
    pub fn observed_value(&self, symbol: &str, u: &[f64]) -> Result<f64, CompileError> {
        self.observed.value(symbol, u, &self.p)
    }
}
