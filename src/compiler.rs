//! Compilation of expression vectors into callable numeric functions.
//!
//! A [`CompiledFunction`] wraps exactly one JIT artifact and exposes it
//! through two calling conventions: [`CompiledFunction::call`] allocates a
//! fresh result vector, [`CompiledFunction::call_into`] writes into a
//! caller-provided buffer without allocating on the output path. Both accept
//! parameters as a flat slice or as a grouped container; grouped values are
//! scattered into the canonical order before the native call. Observed
//! definitions are substituted away at compile time, so generated code never
//! references an observed symbol.

use std::fmt::Write as _;

use crate::builder;
use crate::derivative::JacobianMatrix;
use crate::errors::CompileError;
use crate::expr::{Expr, Slot, SymbolLayout};
use crate::model::NonlinearSystem;
use crate::observed;
use crate::params::{ParameterInput, ParameterLayout};
use crate::types::SystemJitFn;

/// Unknowns removed upstream by deterministic substitution, carried as a
/// compiled block so their values can be recombined into the full state
/// after a solve.
#[derive(Clone)]
struct EliminatedBlock {
    symbols: Vec<String>,
    fun: SystemJitFn,
}

/// A compiled expression vector with both calling conventions.
#[derive(Clone)]
pub struct CompiledFunction {
    fun: SystemJitFn,
    exprs: Vec<Expr>,
    layout: SymbolLayout,
    n_outputs: usize,
    n_params: usize,
    eliminated: Option<EliminatedBlock>,
}

impl CompiledFunction {
    /// Compiles the expressions against the model's unknown order and
    /// canonical parameter layout. Observed symbols are eliminated first.
    pub fn compile(exprs: &[Expr], model: &NonlinearSystem) -> Result<Self, CompileError> {
        let resolved = observed::eliminate_observed_all(exprs, model.observed())?;
        let param_slots = ParameterLayout::of(model);
        let layout = SymbolLayout::new(model.unknowns(), param_slots.slots());
        let fun = builder::build_system_function(&resolved, &layout)?;
        Ok(Self {
            fun,
            n_outputs: resolved.len(),
            n_params: param_slots.len(),
            exprs: resolved,
            layout,
            eliminated: None,
        })
    }

    /// Compiles every entry of a Jacobian matrix. Dense matrices compile all
    /// entries in row-major order; sparse matrices compile only the stored
    /// triplets, in triplet order.
    pub fn compile_jacobian(
        matrix: &JacobianMatrix,
        model: &NonlinearSystem,
    ) -> Result<Self, CompileError> {
        let exprs: Vec<Expr> = match matrix {
            JacobianMatrix::Dense { .. } => matrix.entries_row_major(),
            JacobianMatrix::Sparse { triplets, .. } => {
                triplets.iter().map(|(_, _, e)| e.clone()).collect()
            }
        };
        Self::compile(&exprs, model)
    }

    /// Attaches solved-unknown bookkeeping: `(symbol, expr)` pairs for
    /// unknowns eliminated upstream, compiled against the same layout.
    pub fn with_eliminated(
        mut self,
        pairs: Vec<(String, Expr)>,
        model: &NonlinearSystem,
    ) -> Result<Self, CompileError> {
        let (symbols, exprs): (Vec<String>, Vec<Expr>) = pairs.into_iter().unzip();
        let resolved = observed::eliminate_observed_all(&exprs, model.observed())?;
        let fun = builder::build_system_function(&resolved, &self.layout)?;
        self.eliminated = Some(EliminatedBlock { symbols, fun });
        Ok(self)
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn n_unknowns(&self) -> usize {
        self.layout.n_unknowns()
    }

    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// Symbols of the eliminated unknowns, in recombination order.
    pub fn eliminated_symbols(&self) -> &[String] {
        self.eliminated
            .as_ref()
            .map(|block| block.symbols.as_slice())
            .unwrap_or(&[])
    }

    /// Evaluates into a freshly allocated vector.
    pub fn call<'a>(
        &self,
        u: &[f64],
        p: impl Into<ParameterInput<'a>>,
    ) -> Result<Vec<f64>, CompileError> {
        let mut out = vec![0.0; self.n_outputs];
        self.call_inner(u, p.into(), &mut out)?;
        Ok(out)
    }

    /// Evaluates into `out`. Does not allocate on the output path; a flat
    /// parameter slice makes the whole call allocation-free.
    pub fn call_into<'a>(
        &self,
        out: &mut [f64],
        u: &[f64],
        p: impl Into<ParameterInput<'a>>,
    ) -> Result<(), CompileError> {
        self.call_inner(u, p.into(), out)
    }

    /// Computes the values of eliminated unknowns from the reduced state,
    /// pairing each symbol with its value. Empty when nothing was
    /// eliminated.
    pub fn recombine<'a>(
        &self,
        u: &[f64],
        p: impl Into<ParameterInput<'a>>,
    ) -> Result<Vec<(String, f64)>, CompileError> {
        let Some(block) = &self.eliminated else {
            return Ok(Vec::new());
        };
        self.check_unknowns(u)?;
        let mut out = vec![0.0; block.symbols.len()];
        self.with_canonical_params(p.into(), |params| (block.fun)(u, params, &mut out))?;
        Ok(block.symbols.iter().cloned().zip(out).collect())
    }

    fn call_inner(
        &self,
        u: &[f64],
        p: ParameterInput<'_>,
        out: &mut [f64],
    ) -> Result<(), CompileError> {
        self.check_unknowns(u)?;
        if out.len() != self.n_outputs {
            return Err(CompileError::InvalidOutputLength {
                expected: self.n_outputs,
                got: out.len(),
            });
        }
        self.with_canonical_params(p, |params| (self.fun)(u, params, out))
    }

    fn check_unknowns(&self, u: &[f64]) -> Result<(), CompileError> {
        if u.len() != self.layout.n_unknowns() {
            return Err(CompileError::InvalidInputLength {
                expected: self.layout.n_unknowns(),
                got: u.len(),
            });
        }
        Ok(())
    }

    fn with_canonical_params<R>(
        &self,
        p: ParameterInput<'_>,
        f: impl FnOnce(&[f64]) -> R,
    ) -> Result<R, CompileError> {
        match p {
            ParameterInput::Flat(values) => {
                if values.len() != self.n_params {
                    return Err(CompileError::InvalidInputLength {
                        expected: self.n_params,
                        got: values.len(),
                    });
                }
                Ok(f(values))
            }
            ParameterInput::Grouped(grouped) => {
                let mut scratch = vec![0.0; self.n_params];
                grouped.write_canonical(&mut scratch)?;
                Ok(f(&scratch))
            }
        }
    }

    /// Renders the compiled expressions as indexed pseudo-source with the
    /// same dependency semantics as the native code. With
    /// `keep_annotations`, every statement carries its symbolic form as a
    /// trailing comment; otherwise the annotations are stripped.
    pub fn render_source(&self, keep_annotations: bool) -> String {
        let mut src = String::new();
        let _ = writeln!(
            src,
            "fn eval(u: &[f64; {}], p: &[f64; {}], out: &mut [f64; {}]) {{",
            self.layout.n_unknowns(),
            self.n_params,
            self.n_outputs
        );
        for (i, expr) in self.exprs.iter().enumerate() {
            let statement = format!("    out[{i}] = {};", render_indexed(expr, &self.layout));
            if keep_annotations {
                let _ = writeln!(src, "{statement} // {expr}");
            } else {
                let _ = writeln!(src, "{statement}");
            }
        }
        src.push_str("}\n");
        src
    }
}

// Fully parenthesised indexed rendering; precedence never matters.
fn render_indexed(expr: &Expr, layout: &SymbolLayout) -> String {
    let rec = |e: &Expr| render_indexed(e, layout);
    match expr {
        Expr::Const(c) => format!("{c:?}"),
        Expr::Var(name) => match layout.resolve(name) {
            Ok(Slot::Unknown(i)) => format!("u[{i}]"),
            Ok(Slot::Param(i)) => format!("p[{i}]"),
            Err(_) => name.clone(),
        },
        Expr::Add(l, r) => format!("({} + {})", rec(l), rec(r)),
        Expr::Sub(l, r) => format!("({} - {})", rec(l), rec(r)),
        Expr::Mul(l, r) => format!("({} * {})", rec(l), rec(r)),
        Expr::Div(l, r) => format!("({} / {})", rec(l), rec(r)),
        Expr::Neg(e) => format!("(-{})", rec(e)),
        Expr::Abs(e) => format!("{}.abs()", rec(e)),
        Expr::Pow(e, n) => format!("{}.powi({n})", rec(e)),
        Expr::PowFloat(e, x) => format!("{}.powf({x:?})", rec(e)),
        Expr::PowExpr(b, e) => format!("{}.powf({})", rec(b), rec(e)),
        Expr::Exp(e) => format!("{}.exp()", rec(e)),
        Expr::Ln(e) => format!("{}.ln()", rec(e)),
        Expr::Sqrt(e) => format!("{}.sqrt()", rec(e)),
        Expr::Sin(e) => format!("{}.sin()", rec(e)),
        Expr::Cos(e) => format!("{}.cos()", rec(e)),
    }
}
