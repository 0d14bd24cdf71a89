//! Elimination and introspection of observed (auxiliary) variables.
//!
//! Observed symbols are definitions, not residuals. Before differentiation
//! or code generation every reference to one is substituted away, resolved
//! transitively until no substitutable symbol remains. Substitution is
//! capped at `observed.len() + 1` passes; an acyclic definition chain always
//! resolves within that many, so hitting the cap means the definitions form
//! a cycle and the resolution fails instead of looping.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::builder;
use crate::errors::{CompileError, ModelError};
use crate::expr::{Expr, SymbolLayout};
use crate::model::ObservedEquation;
use crate::types::ScalarJitFn;

/// Replaces every observed-symbol reference in `expr` by its definition,
/// transitively, returning a self-contained expression.
pub fn eliminate_observed(
    expr: &Expr,
    observed: &[ObservedEquation],
) -> Result<Expr, ModelError> {
    if observed.is_empty() {
        return Ok(expr.clone());
    }
    let substitutions: HashMap<String, Expr> = observed
        .iter()
        .map(|def| (def.symbol.clone(), def.rhs.clone()))
        .collect();

    let mut current = expr.clone();
    for _ in 0..=observed.len() {
        let mut symbols = BTreeSet::new();
        current.free_symbols(&mut symbols);
        if !symbols.iter().any(|s| substitutions.contains_key(s)) {
            return Ok(current);
        }
        current = current.substitute(&substitutions);
    }

    let mut symbols = BTreeSet::new();
    current.free_symbols(&mut symbols);
    let culprit = symbols
        .into_iter()
        .find(|s| substitutions.contains_key(s))
        .unwrap_or_else(|| observed[0].symbol.clone());
    Err(ModelError::UnresolvedSymbol(culprit))
}

/// [`eliminate_observed`] over a vector of expressions.
pub fn eliminate_observed_all(
    exprs: &[Expr],
    observed: &[ObservedEquation],
) -> Result<Vec<Expr>, ModelError> {
    exprs
        .iter()
        .map(|e| eliminate_observed(e, observed))
        .collect()
}

/// Lazy per-symbol evaluator for observed quantities.
///
/// The first lookup of a symbol compiles a single-output function for its
/// resolved definition and memoises it; later lookups reuse the compiled
/// function. Symbols with no observed definition fail the lookup.
pub struct ObservedAccessor {
    definitions: Vec<ObservedEquation>,
    layout: SymbolLayout,
    compiled: Mutex<HashMap<String, ScalarJitFn>>,
}

impl ObservedAccessor {
    pub fn new(definitions: Vec<ObservedEquation>, layout: SymbolLayout) -> Self {
        Self {
            definitions,
            layout,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates the observed symbol at the given state and parameters.
    pub fn value(&self, symbol: &str, u: &[f64], p: &[f64]) -> Result<f64, CompileError> {
        let cached = {
            let compiled = self
                .compiled
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            compiled.get(symbol).cloned()
        };
        if let Some(fun) = cached {
            return Ok(fun(u, p));
        }

        let def = self
            .definitions
            .iter()
            .find(|d| d.symbol == symbol)
            .ok_or_else(|| ModelError::UnresolvedSymbol(symbol.to_string()))?;
        let resolved = eliminate_observed(&def.rhs, &self.definitions)?;
        let fun = builder::build_scalar_function(&resolved, &self.layout)?;

        self.compiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(symbol.to_string(), fun.clone());
        Ok(fun(u, p))
    }

    /// The symbols this accessor can resolve.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|d| d.symbol.as_str())
    }

    #[cfg(test)]
    fn n_compiled(&self) -> usize {
        self.compiled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::parse_expr;

    fn defs(srcs: &[&str]) -> Vec<ObservedEquation> {
        srcs.iter()
            .map(|s| ObservedEquation::parse(s).unwrap())
            .collect()
    }

    #[test]
    fn test_chained_definitions_reach_fixpoint() {
        let observed = defs(&["w = v + 1", "v = x * 2"]);
        let resolved = eliminate_observed(&parse_expr("w + x").unwrap(), &observed).unwrap();
        let mut symbols = BTreeSet::new();
        resolved.free_symbols(&mut symbols);
        assert_eq!(symbols.into_iter().collect::<Vec<_>>(), vec!["x"]);

        let value = resolved.eval(&|name| (name == "x").then_some(3.0)).unwrap();
        // w = v + 1 = 6 + 1, plus x
        assert_eq!(value, 10.0);
    }

    #[test]
    fn test_cycle_detected() {
        let observed = defs(&["a = b + 1", "b = a - 1"]);
        let result = eliminate_observed(&parse_expr("a").unwrap(), &observed);
        assert!(matches!(result, Err(ModelError::UnresolvedSymbol(_))));
    }

    #[test]
    fn test_untouched_expression_passes_through() {
        let observed = defs(&["w = x + 1"]);
        let expr = parse_expr("y * 2").unwrap();
        assert_eq!(eliminate_observed(&expr, &observed).unwrap(), expr);
    }

    #[test]
    fn test_accessor_compiles_lazily_and_caches() {
        let layout = SymbolLayout::new(&["x"], &["c"]);
        let accessor = ObservedAccessor::new(defs(&["w = v + c", "v = x * x"]), layout);
        assert_eq!(accessor.n_compiled(), 0);

        let first = accessor.value("w", &[3.0], &[1.0]).unwrap();
        assert_eq!(first, 10.0);
        assert_eq!(accessor.n_compiled(), 1);

        let second = accessor.value("w", &[2.0], &[1.0]).unwrap();
        assert_eq!(second, 5.0);
        assert_eq!(accessor.n_compiled(), 1);
    }

    #[test]
    fn test_accessor_unknown_symbol_fails() {
        let accessor = ObservedAccessor::new(vec![], SymbolLayout::default());
        let result = accessor.value("missing", &[], &[]);
        assert!(matches!(
            result,
            Err(CompileError::ModelError(ModelError::UnresolvedSymbol(_)))
        ));
    }
}
