//! Symbolic expression trees.
//!
//! `Expr` is the algebraic value that flows through the whole pipeline: the
//! residuals of a [`NonlinearSystem`](crate::model::NonlinearSystem), the
//! entries of a symbolic Jacobian, the right-hand sides of observed
//! equations. The tree is immutable; every operation rebuilds.
//!
//! Supported operations:
//! - exact symbolic differentiation ([`Expr::derivative`])
//! - best-effort algebraic simplification ([`Expr::simplify`]) which never
//!   changes numeric meaning
//! - visitor-based substitution of symbols by expressions
//!   ([`Expr::substitute`])
//! - free-symbol collection ([`Expr::free_symbols`])
//! - a tree-walking interpreter ([`Expr::eval`]) used off the hot path for
//!   defaults and parameter dependencies
//! - flattening into a linear stack IR ([`Expr::flatten`]) consumed by the
//!   Cranelift backend
//!
//! Variables are held by name (`Var(String)`); positions in the numeric
//! input arrays are resolved only at flatten time against a
//! [`SymbolLayout`]. This keeps substitution and differentiation free of any
//! codegen state.

use std::collections::{BTreeSet, HashMap};

use crate::errors::ModelError;

/// An expression tree node.
///
/// Integer powers are kept distinct from float and expression exponents so
/// the backend can emit inline multiplication chains for the common case.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant floating point value.
    Const(f64),
    /// A symbol, referenced by name.
    Var(String),
    /// Addition of two expressions.
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction of two expressions.
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication of two expressions.
    Mul(Box<Expr>, Box<Expr>),
    /// Division of two expressions.
    Div(Box<Expr>, Box<Expr>),
    /// Negation of an expression.
    Neg(Box<Expr>),
    /// Absolute value of an expression.
    Abs(Box<Expr>),
    /// Exponentiation by an integer constant.
    Pow(Box<Expr>, i64),
    /// Exponentiation by a floating point constant.
    PowFloat(Box<Expr>, f64),
    /// Exponentiation by another expression.
    PowExpr(Box<Expr>, Box<Expr>),
    /// Exponential function.
    Exp(Box<Expr>),
    /// Natural logarithm.
    Ln(Box<Expr>),
    /// Square root.
    Sqrt(Box<Expr>),
    /// Sine (radians).
    Sin(Box<Expr>),
    /// Cosine (radians).
    Cos(Box<Expr>),
}

/// Maps symbol names to their slot in the two numeric input arrays of a
/// generated function: the unknown vector `u` and the canonical parameter
/// vector `p`.
#[derive(Debug, Clone, Default)]
pub struct SymbolLayout {
    unknowns: HashMap<String, u32>,
    params: HashMap<String, u32>,
}

impl SymbolLayout {
    /// Builds a layout from ordered unknown and parameter slot names.
    pub fn new<S: AsRef<str>>(unknowns: &[S], params: &[S]) -> Self {
        Self {
            unknowns: unknowns
                .iter()
                .enumerate()
                .map(|(i, s)| (s.as_ref().to_string(), i as u32))
                .collect(),
            params: params
                .iter()
                .enumerate()
                .map(|(i, s)| (s.as_ref().to_string(), i as u32))
                .collect(),
        }
    }

    /// Resolves a symbol name to its slot.
    pub fn resolve(&self, name: &str) -> Result<Slot, ModelError> {
        if let Some(&i) = self.unknowns.get(name) {
            Ok(Slot::Unknown(i))
        } else if let Some(&i) = self.params.get(name) {
            Ok(Slot::Param(i))
        } else {
            Err(ModelError::UnresolvedSymbol(name.to_string()))
        }
    }

    /// Number of unknown slots.
    pub fn n_unknowns(&self) -> usize {
        self.unknowns.len()
    }

    /// Number of parameter slots.
    pub fn n_params(&self) -> usize {
        self.params.len()
    }
}

/// A resolved symbol position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Index into the unknown vector `u`.
    Unknown(u32),
    /// Index into the canonical parameter vector `p`.
    Param(u32),
}

/// One opcode of the flattened stack IR.
#[derive(Debug, Clone, PartialEq)]
pub enum LinearOp {
    /// Push a constant.
    LoadConst(f64),
    /// Push `u[i]`.
    LoadUnknown(u32),
    /// Push `p[i]`.
    LoadParam(u32),
    /// Pop two, push sum.
    Add,
    /// Pop two, push difference.
    Sub,
    /// Pop two, push product.
    Mul,
    /// Pop two, push quotient.
    Div,
    /// Pop one, push absolute value.
    Abs,
    /// Pop one, push negation.
    Neg,
    /// Pop one, push integer power.
    PowConst(i64),
    /// Pop one, push float power.
    PowFloat(f64),
    /// Pop two (base, exponent), push power.
    PowExpr,
    /// Pop one, push exp.
    Exp,
    /// Pop one, push ln.
    Ln,
    /// Pop one, push sqrt.
    Sqrt,
    /// Pop one, push sin.
    Sin,
    /// Pop one, push cos.
    Cos,
    /// Pop three (a, b, c), push `a * b + c`.
    Fma,
    /// Pop three (a, b, c), push `a * b - c`.
    Fmsub,
}

/// Flattened expression ready for the backend.
#[derive(Debug, Clone)]
pub struct LinearCode {
    /// Linear sequence of stack operations.
    pub ops: Vec<LinearOp>,
    /// Pre-computed result when the whole expression is constant.
    pub constant_result: Option<f64>,
}

impl Expr {
    /// Shorthand constructor for a variable node.
    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    /// Computes the exact symbolic derivative with respect to `symbol`.
    ///
    /// Standard calculus rules apply: sum, product, quotient, integer and
    /// general power rules, and the chain rule through `abs`, `exp`, `ln`,
    /// `sqrt`, `sin` and `cos`.
    pub fn derivative(&self, symbol: &str) -> Expr {
        use Expr::*;
        match self {
            Const(_) => Const(0.0),
            Var(name) => {
                if name == symbol {
                    Const(1.0)
                } else {
                    Const(0.0)
                }
            }
            Add(l, r) => Add(
                Box::new(l.derivative(symbol)),
                Box::new(r.derivative(symbol)),
            ),
            Sub(l, r) => Sub(
                Box::new(l.derivative(symbol)),
                Box::new(r.derivative(symbol)),
            ),
            // (f * g)' = f * g' + g * f'
            Mul(l, r) => Add(
                Box::new(Mul(l.clone(), Box::new(r.derivative(symbol)))),
                Box::new(Mul(r.clone(), Box::new(l.derivative(symbol)))),
            ),
            // (f / g)' = (g * f' - f * g') / g^2
            Div(l, r) => Div(
                Box::new(Sub(
                    Box::new(Mul(r.clone(), Box::new(l.derivative(symbol)))),
                    Box::new(Mul(l.clone(), Box::new(r.derivative(symbol)))),
                )),
                Box::new(Pow(r.clone(), 2)),
            ),
            Neg(e) => Neg(Box::new(e.derivative(symbol))),
            // |f|' = f / |f| * f'
            Abs(e) => Mul(
                Box::new(Div(e.clone(), Box::new(Abs(e.clone())))),
                Box::new(e.derivative(symbol)),
            ),
            // (f^n)' = n * f^(n-1) * f'
            Pow(base, n) => Mul(
                Box::new(Mul(
                    Box::new(Const(*n as f64)),
                    Box::new(Pow(base.clone(), n - 1)),
                )),
                Box::new(base.derivative(symbol)),
            ),
            PowFloat(base, c) => Mul(
                Box::new(Mul(
                    Box::new(Const(*c)),
                    Box::new(PowFloat(base.clone(), c - 1.0)),
                )),
                Box::new(base.derivative(symbol)),
            ),
            // (f^g)' = f^g * (g' * ln(f) + g * f' / f)
            PowExpr(base, exp) => Mul(
                Box::new(PowExpr(base.clone(), exp.clone())),
                Box::new(Add(
                    Box::new(Mul(
                        Box::new(exp.derivative(symbol)),
                        Box::new(Ln(base.clone())),
                    )),
                    Box::new(Mul(
                        exp.clone(),
                        Box::new(Div(Box::new(base.derivative(symbol)), base.clone())),
                    )),
                )),
            ),
            Exp(e) => Mul(Box::new(Exp(e.clone())), Box::new(e.derivative(symbol))),
            Ln(e) => Mul(
                Box::new(Div(Box::new(Const(1.0)), e.clone())),
                Box::new(e.derivative(symbol)),
            ),
            Sqrt(e) => Mul(
                Box::new(Div(
                    Box::new(Const(1.0)),
                    Box::new(Mul(Box::new(Const(2.0)), Box::new(Sqrt(e.clone())))),
                )),
                Box::new(e.derivative(symbol)),
            ),
            Sin(e) => Mul(Box::new(Cos(e.clone())), Box::new(e.derivative(symbol))),
            Cos(e) => Mul(
                Box::new(Neg(Box::new(Sin(e.clone())))),
                Box::new(e.derivative(symbol)),
            ),
        }
    }

    /// Simplifies the expression by constant folding and the usual identity
    /// and exponent rules. Best-effort normalisation; the numeric meaning is
    /// preserved.
    pub fn simplify(&self) -> Expr {
        use Expr::*;
        match self {
            Const(_) | Var(_) => self.clone(),

            Add(l, r) => {
                let l = l.simplify();
                let r = r.simplify();
                match (&l, &r) {
                    (Const(a), Const(b)) => Const(a + b),
                    (e, Const(c)) | (Const(c), e) if *c == 0.0 => e.clone(),
                    _ => Add(Box::new(l), Box::new(r)),
                }
            }

            Sub(l, r) => {
                let l = l.simplify();
                let r = r.simplify();
                match (&l, &r) {
                    (Const(a), Const(b)) => Const(a - b),
                    (e, Const(c)) if *c == 0.0 => e.clone(),
                    (Const(c), e) if *c == 0.0 => Neg(Box::new(e.clone())).simplify(),
                    (a, b) if a == b => Const(0.0),
                    _ => Sub(Box::new(l), Box::new(r)),
                }
            }

            Mul(l, r) => {
                let l = l.simplify();
                let r = r.simplify();
                if l == r {
                    return Pow(Box::new(l), 2);
                }
                match (&l, &r) {
                    (Const(a), Const(b)) => Const(a * b),
                    (Const(c), _) | (_, Const(c)) if *c == 0.0 => Const(0.0),
                    (e, Const(c)) | (Const(c), e) if *c == 1.0 => e.clone(),
                    (e, Const(c)) | (Const(c), e) if *c == -1.0 => Neg(Box::new(e.clone())),
                    (Pow(b1, e1), Pow(b2, e2)) if b1 == b2 => Pow(b1.clone(), e1 + e2),
                    _ => Mul(Box::new(l), Box::new(r)),
                }
            }

            Div(l, r) => {
                let l = l.simplify();
                let r = r.simplify();
                match (&l, &r) {
                    (Const(a), Const(b)) if *b != 0.0 => Const(a / b),
                    (Const(c), _) if *c == 0.0 => Const(0.0),
                    (e, Const(c)) if *c == 1.0 => e.clone(),
                    (e, Const(c)) if *c == -1.0 => Neg(Box::new(e.clone())),
                    (a, b) if a == b => Const(1.0),
                    (Pow(b1, e1), Pow(b2, e2)) if b1 == b2 => Pow(b1.clone(), e1 - e2),
                    _ => Div(Box::new(l), Box::new(r)),
                }
            }

            Neg(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) => Const(-a),
                    Neg(inner) => (**inner).clone(),
                    _ => Neg(Box::new(e)),
                }
            }

            Abs(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) => Const(a.abs()),
                    Abs(inner) => Abs(inner.clone()),
                    Neg(inner) => Abs(inner.clone()),
                    Pow(_, n) if n % 2 == 0 => e,
                    _ => Abs(Box::new(e)),
                }
            }

            Pow(base, n) => {
                let b = base.simplify();
                match (&b, n) {
                    (_, 0) => Const(1.0),
                    (e, 1) => e.clone(),
                    (Const(a), n) => Const(a.powi(*n as i32)),
                    (Pow(inner, m), n) => Pow(inner.clone(), m * n),
                    _ => Pow(Box::new(b), *n),
                }
            }

            PowFloat(base, c) => {
                let b = base.simplify();
                match (&b, c) {
                    (_, c) if *c == 0.0 => Const(1.0),
                    (e, c) if *c == 1.0 => e.clone(),
                    (Const(a), c) => Const(a.powf(*c)),
                    (e, c) if c.fract() == 0.0 => Pow(Box::new(e.clone()), *c as i64),
                    _ => PowFloat(Box::new(b), *c),
                }
            }

            PowExpr(base, exp) => {
                let b = base.simplify();
                let e = exp.simplify();
                match (&b, &e) {
                    (Const(a), Const(c)) => Const(a.powf(*c)),
                    (_, Const(c)) if *c == 0.0 => Const(1.0),
                    (expr, Const(c)) if *c == 1.0 => expr.clone(),
                    (expr, Const(c)) if c.fract() == 0.0 => Pow(Box::new(expr.clone()), *c as i64),
                    (expr, Const(c)) => PowFloat(Box::new(expr.clone()), *c),
                    _ => PowExpr(Box::new(b), Box::new(e)),
                }
            }

            Exp(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) => Const(a.exp()),
                    Ln(inner) => (**inner).clone(),
                    _ => Exp(Box::new(e)),
                }
            }

            Ln(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) if *a > 0.0 => Const(a.ln()),
                    Exp(inner) => (**inner).clone(),
                    _ => Ln(Box::new(e)),
                }
            }

            Sqrt(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) if *a >= 0.0 => Const(a.sqrt()),
                    Pow(x, 2) => Abs(x.clone()),
                    _ => Sqrt(Box::new(e)),
                }
            }

            Sin(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) => Const(a.sin()),
                    _ => Sin(Box::new(e)),
                }
            }

            Cos(e) => {
                let e = e.simplify();
                match &e {
                    Const(a) => Const(a.cos()),
                    _ => Cos(Box::new(e)),
                }
            }
        }
    }

    /// Replaces every variable whose name appears in `map` with the mapped
    /// expression. Single pass; transitive replacement is the caller's
    /// concern (see [`crate::observed`]).
    pub fn substitute(&self, map: &HashMap<String, Expr>) -> Expr {
        use Expr::*;
        let walk = |e: &Expr| Box::new(e.substitute(map));
        match self {
            Const(_) => self.clone(),
            Var(name) => match map.get(name) {
                Some(replacement) => replacement.clone(),
                None => self.clone(),
            },
            Add(l, r) => Add(walk(l), walk(r)),
            Sub(l, r) => Sub(walk(l), walk(r)),
            Mul(l, r) => Mul(walk(l), walk(r)),
            Div(l, r) => Div(walk(l), walk(r)),
            Neg(e) => Neg(walk(e)),
            Abs(e) => Abs(walk(e)),
            Pow(b, n) => Pow(walk(b), *n),
            PowFloat(b, c) => PowFloat(walk(b), *c),
            PowExpr(b, e) => PowExpr(walk(b), walk(e)),
            Exp(e) => Exp(walk(e)),
            Ln(e) => Ln(walk(e)),
            Sqrt(e) => Sqrt(walk(e)),
            Sin(e) => Sin(walk(e)),
            Cos(e) => Cos(walk(e)),
        }
    }

    /// Collects every symbol name appearing in the expression into `out`.
    pub fn free_symbols(&self, out: &mut BTreeSet<String>) {
        use Expr::*;
        match self {
            Const(_) => {}
            Var(name) => {
                out.insert(name.clone());
            }
            Add(l, r) | Sub(l, r) | Mul(l, r) | Div(l, r) | PowExpr(l, r) => {
                l.free_symbols(out);
                r.free_symbols(out);
            }
            Neg(e) | Abs(e) | Exp(e) | Ln(e) | Sqrt(e) | Sin(e) | Cos(e) => e.free_symbols(out),
            Pow(b, _) | PowFloat(b, _) => b.free_symbols(out),
        }
    }

    /// Returns true if `symbol` appears anywhere in the expression.
    pub fn depends_on(&self, symbol: &str) -> bool {
        use Expr::*;
        match self {
            Const(_) => false,
            Var(name) => name == symbol,
            Add(l, r) | Sub(l, r) | Mul(l, r) | Div(l, r) | PowExpr(l, r) => {
                l.depends_on(symbol) || r.depends_on(symbol)
            }
            Neg(e) | Abs(e) | Exp(e) | Ln(e) | Sqrt(e) | Sin(e) | Cos(e) => e.depends_on(symbol),
            Pow(b, _) | PowFloat(b, _) => b.depends_on(symbol),
        }
    }

    /// Tree-walking interpreter. `lookup` supplies values for symbols; a
    /// symbol it cannot resolve is an [`ModelError::UnresolvedSymbol`].
    ///
    /// Used for defaults and parameter-dependency resolution. The numeric
    /// hot path goes through the JIT backend instead.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, ModelError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        use Expr::*;
        Ok(match self {
            Const(c) => *c,
            Var(name) => lookup(name).ok_or_else(|| ModelError::UnresolvedSymbol(name.clone()))?,
            Add(l, r) => l.eval(lookup)? + r.eval(lookup)?,
            Sub(l, r) => l.eval(lookup)? - r.eval(lookup)?,
            Mul(l, r) => l.eval(lookup)? * r.eval(lookup)?,
            Div(l, r) => l.eval(lookup)? / r.eval(lookup)?,
            Neg(e) => -e.eval(lookup)?,
            Abs(e) => e.eval(lookup)?.abs(),
            Pow(b, n) => b.eval(lookup)?.powi(*n as i32),
            PowFloat(b, c) => b.eval(lookup)?.powf(*c),
            PowExpr(b, e) => b.eval(lookup)?.powf(e.eval(lookup)?),
            Exp(e) => e.eval(lookup)?.exp(),
            Ln(e) => e.eval(lookup)?.ln(),
            Sqrt(e) => e.eval(lookup)?.sqrt(),
            Sin(e) => e.eval(lookup)?.sin(),
            Cos(e) => e.eval(lookup)?.cos(),
        })
    }

    /// Evaluates the expression when it contains no variables.
    pub fn try_evaluate_constant(&self) -> Option<f64> {
        self.eval(&|_| None).ok()
    }

    /// Flattens the tree into linear stack code, resolving every symbol
    /// against `layout`. A symbol absent from the layout is an error; the
    /// generated code must be self-contained.
    pub fn flatten(&self, layout: &SymbolLayout) -> Result<LinearCode, ModelError> {
        if let Some(constant) = self.try_evaluate_constant() {
            return Ok(LinearCode {
                ops: vec![LinearOp::LoadConst(constant)],
                constant_result: Some(constant),
            });
        }
        let mut ops = Vec::new();
        self.flatten_into(layout, &mut ops)?;
        Ok(LinearCode {
            ops,
            constant_result: None,
        })
    }

    fn flatten_into(&self, layout: &SymbolLayout, ops: &mut Vec<LinearOp>) -> Result<(), ModelError> {
        use Expr::*;
        match self {
            Const(c) => ops.push(LinearOp::LoadConst(*c)),
            Var(name) => ops.push(match layout.resolve(name)? {
                Slot::Unknown(i) => LinearOp::LoadUnknown(i),
                Slot::Param(i) => LinearOp::LoadParam(i),
            }),
            Add(l, r) => {
                l.flatten_into(layout, ops)?;
                r.flatten_into(layout, ops)?;
                ops.push(LinearOp::Add);
            }
            Sub(l, r) => {
                l.flatten_into(layout, ops)?;
                r.flatten_into(layout, ops)?;
                ops.push(LinearOp::Sub);
            }
            Mul(l, r) => {
                l.flatten_into(layout, ops)?;
                r.flatten_into(layout, ops)?;
                ops.push(LinearOp::Mul);
            }
            Div(l, r) => {
                l.flatten_into(layout, ops)?;
                r.flatten_into(layout, ops)?;
                ops.push(LinearOp::Div);
            }
            Neg(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Neg);
            }
            Abs(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Abs);
            }
            Pow(b, n) => {
                b.flatten_into(layout, ops)?;
                ops.push(LinearOp::PowConst(*n));
            }
            PowFloat(b, c) => {
                b.flatten_into(layout, ops)?;
                ops.push(LinearOp::PowFloat(*c));
            }
            PowExpr(b, e) => {
                b.flatten_into(layout, ops)?;
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::PowExpr);
            }
            Exp(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Exp);
            }
            Ln(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Ln);
            }
            Sqrt(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Sqrt);
            }
            Sin(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Sin);
            }
            Cos(e) => {
                e.flatten_into(layout, ops)?;
                ops.push(LinearOp::Cos);
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(val) => write!(f, "{val}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Add(l, r) => write!(f, "({l} + {r})"),
            Expr::Sub(l, r) => write!(f, "({l} - {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
            Expr::Div(l, r) => write!(f, "({l} / {r})"),
            Expr::Neg(e) => write!(f, "-({e})"),
            Expr::Abs(e) => write!(f, "|{e}|"),
            Expr::Pow(b, n) => write!(f, "({b}^{n})"),
            Expr::PowFloat(b, c) => write!(f, "({b}^{c})"),
            Expr::PowExpr(b, e) => write!(f, "({b}^{e})"),
            Expr::Exp(e) => write!(f, "exp({e})"),
            Expr::Ln(e) => write!(f, "ln({e})"),
            Expr::Sqrt(e) => write!(f, "sqrt({e})"),
            Expr::Sin(e) => write!(f, "sin({e})"),
            Expr::Cos(e) => write!(f, "cos({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::var(name))
    }

    #[test]
    fn test_derivative_rules() {
        assert_eq!(Expr::Const(5.0).derivative("x"), Expr::Const(0.0));
        assert_eq!(Expr::var("x").derivative("x"), Expr::Const(1.0));
        assert_eq!(Expr::var("y").derivative("x"), Expr::Const(0.0));

        // (x * y) d/dx -> y after simplification
        let product = Expr::Mul(var("x"), var("y"));
        assert_eq!(product.derivative("x").simplify(), *var("y"));

        // (x^3) d/dx -> 3 * x^2
        let power = Expr::Pow(var("x"), 3);
        assert_eq!(
            power.derivative("x").simplify(),
            Expr::Mul(Box::new(Expr::Const(3.0)), Box::new(Expr::Pow(var("x"), 2)))
        );

        // sin(x) d/dx -> cos(x)
        let sine = Expr::Sin(var("x"));
        assert_eq!(sine.derivative("x").simplify(), Expr::Cos(var("x")));
    }

    #[test]
    fn test_simplify_identities() {
        assert_eq!(
            Expr::Add(var("x"), Box::new(Expr::Const(0.0))).simplify(),
            *var("x")
        );
        assert_eq!(
            Expr::Mul(var("x"), Box::new(Expr::Const(1.0))).simplify(),
            *var("x")
        );
        assert_eq!(
            Expr::Mul(var("x"), Box::new(Expr::Const(0.0))).simplify(),
            Expr::Const(0.0)
        );
        assert_eq!(Expr::Div(var("x"), var("x")).simplify(), Expr::Const(1.0));
        assert_eq!(Expr::Pow(var("x"), 0).simplify(), Expr::Const(1.0));
        assert_eq!(Expr::Pow(var("x"), 1).simplify(), *var("x"));
        assert_eq!(
            Expr::Neg(Box::new(Expr::Neg(var("x")))).simplify(),
            *var("x")
        );
        assert_eq!(
            Expr::Sqrt(Box::new(Expr::Pow(var("x"), 2))).simplify(),
            Expr::Abs(var("x"))
        );
    }

    #[test]
    fn test_substitute_replaces_symbols() {
        // x + y with x := 2*z
        let expr = Expr::Add(var("x"), var("y"));
        let mut map = HashMap::new();
        map.insert(
            "x".to_string(),
            Expr::Mul(Box::new(Expr::Const(2.0)), var("z")),
        );
        let result = expr.substitute(&map);
        assert_eq!(
            result,
            Expr::Add(
                Box::new(Expr::Mul(Box::new(Expr::Const(2.0)), var("z"))),
                var("y")
            )
        );
    }

    #[test]
    fn test_free_symbols() {
        let expr = Expr::Mul(
            Box::new(Expr::Add(var("x"), var("sigma"))),
            Box::new(Expr::Sin(var("x"))),
        );
        let mut symbols = BTreeSet::new();
        expr.free_symbols(&mut symbols);
        assert_eq!(
            symbols.into_iter().collect::<Vec<_>>(),
            vec!["sigma".to_string(), "x".to_string()]
        );
    }

    #[test]
    fn test_eval_interpreter() {
        // sigma * (y - x) at x=1, y=3, sigma=10 -> 20
        let expr = Expr::Mul(var("sigma"), Box::new(Expr::Sub(var("y"), var("x"))));
        let values: HashMap<&str, f64> = [("x", 1.0), ("y", 3.0), ("sigma", 10.0)].into();
        let result = expr.eval(&|s| values.get(s).copied()).unwrap();
        assert_eq!(result, 20.0);

        let missing = expr.eval(&|_| None);
        assert!(matches!(missing, Err(ModelError::UnresolvedSymbol(_))));
    }

    #[test]
    fn test_flatten_resolves_slots() {
        let layout = SymbolLayout::new(&["x", "y"], &["sigma"]);
        let expr = Expr::Mul(var("sigma"), Box::new(Expr::Sub(var("y"), var("x"))));
        let code = expr.flatten(&layout).unwrap();
        assert_eq!(
            code.ops,
            vec![
                LinearOp::LoadParam(0),
                LinearOp::LoadUnknown(1),
                LinearOp::LoadUnknown(0),
                LinearOp::Sub,
                LinearOp::Mul,
            ]
        );
        assert!(code.constant_result.is_none());

        let unresolved = Expr::var("rho").flatten(&layout);
        assert!(matches!(unresolved, Err(ModelError::UnresolvedSymbol(_))));
    }

    #[test]
    fn test_flatten_constant_fastpath() {
        let layout = SymbolLayout::default();
        let expr = Expr::Add(Box::new(Expr::Const(2.0)), Box::new(Expr::Const(3.0)));
        let code = expr.flatten(&layout).unwrap();
        assert_eq!(code.constant_result, Some(5.0));
        assert_eq!(code.ops, vec![LinearOp::LoadConst(5.0)]);
    }

    #[test]
    fn test_display() {
        let complex = Expr::Div(
            Box::new(Expr::Add(Box::new(Expr::Pow(var("x"), 2)), var("y"))),
            var("z"),
        );
        assert_eq!(format!("{complex}"), "(((x^2) + y) / z)");
        assert_eq!(format!("{}", Expr::Exp(var("x"))), "exp(x)");
        assert_eq!(format!("{}", Expr::Abs(var("x"))), "|x|");
    }
}
