//! Parameter canonicalization.
//!
//! Generated functions take parameters as one flat `f64` vector whose slots
//! follow the model's parameter order, with array parameters expanded into
//! consecutive component slots. This module maps caller-side layouts onto
//! that canonical order: flat vectors pass through, grouped containers
//! (a tunable slot plus a fixed slot) are concatenated per their recorded
//! canonical positions, and requested reorderings become pure index maps.
//! Values are never altered, only repositioned.

use std::collections::HashMap;

use crate::errors::{CompileError, ModelError};
use crate::model::NonlinearSystem;

/// The canonical scalar slot layout of a model's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterLayout {
    slots: Vec<String>,
}

impl ParameterLayout {
    pub fn of(model: &NonlinearSystem) -> Self {
        Self {
            slots: model
                .parameters()
                .iter()
                .flat_map(|p| p.component_names())
                .collect(),
        }
    }

    pub fn slots(&self) -> &[String] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn index_of(&self, symbol: &str) -> Result<usize, ModelError> {
        self.slots
            .iter()
            .position(|s| s == symbol)
            .ok_or_else(|| ModelError::UnresolvedSymbol(symbol.to_string()))
    }
}

/// Maps a requested parameter order onto canonical slot indices.
///
/// `result[k]` is the canonical slot of the k-th requested symbol; requests
/// keep their within-group order. An array parameter requested by its base
/// name expands to its component slots in component order. Requesting a
/// symbol the model does not have fails.
pub fn reorder(model: &NonlinearSystem, requested: &[String]) -> Result<Vec<usize>, ModelError> {
    let layout = ParameterLayout::of(model);
    let mut indices = Vec::with_capacity(requested.len());
    for symbol in requested {
        if let Ok(idx) = layout.index_of(symbol) {
            indices.push(idx);
            continue;
        }
        let array = model
            .parameters()
            .iter()
            .find(|p| p.name() == symbol && p.n_slots() > 1)
            .ok_or_else(|| ModelError::UnresolvedSymbol(symbol.clone()))?;
        for component in array.component_names() {
            indices.push(layout.index_of(&component)?);
        }
    }
    Ok(indices)
}

/// A structured parameter container with a tunable and a fixed group.
///
/// Each stored value remembers its canonical slot, so assembly into the flat
/// vector is a scatter, independent of the order values were pushed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedValues {
    tunable: Vec<f64>,
    tunable_slots: Vec<usize>,
    fixed: Vec<f64>,
    fixed_slots: Vec<usize>,
}

impl GroupedValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a container from named `(symbol, value)` pairs per group,
    /// resolving symbols against the model's canonical layout.
    pub fn from_groups(
        model: &NonlinearSystem,
        tunable: &[(String, f64)],
        fixed: &[(String, f64)],
    ) -> Result<Self, ModelError> {
        let layout = ParameterLayout::of(model);
        let mut grouped = Self::new();
        for (symbol, value) in tunable {
            grouped.push_tunable(layout.index_of(symbol)?, *value);
        }
        for (symbol, value) in fixed {
            grouped.push_fixed(layout.index_of(symbol)?, *value);
        }
        Ok(grouped)
    }

    pub fn push_tunable(&mut self, slot: usize, value: f64) {
        self.tunable.push(value);
        self.tunable_slots.push(slot);
    }

    pub fn push_fixed(&mut self, slot: usize, value: f64) {
        self.fixed.push(value);
        self.fixed_slots.push(slot);
    }

    /// The tunable group values in push order.
    pub fn tunable(&self) -> &[f64] {
        &self.tunable
    }

    /// The fixed group values in push order.
    pub fn fixed(&self) -> &[f64] {
        &self.fixed
    }

    pub fn n_values(&self) -> usize {
        self.tunable.len() + self.fixed.len()
    }

    /// Scatters both groups into the canonical flat vector.
    pub fn write_canonical(&self, out: &mut [f64]) -> Result<(), CompileError> {
        if self.n_values() != out.len() {
            return Err(CompileError::InvalidInputLength {
                expected: out.len(),
                got: self.n_values(),
            });
        }
        for (group, slots) in [
            (&self.tunable, &self.tunable_slots),
            (&self.fixed, &self.fixed_slots),
        ] {
            for (&value, &slot) in group.iter().zip(slots) {
                let target =
                    out.get_mut(slot)
                        .ok_or(CompileError::InvalidInputLength {
                            expected: self.n_values(),
                            got: slot + 1,
                        })?;
                *target = value;
            }
        }
        Ok(())
    }
}

/// Owned parameter values in either calling shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValues {
    Flat(Vec<f64>),
    Grouped(GroupedValues),
}

impl ParameterValues {
    pub fn as_input(&self) -> ParameterInput<'_> {
        match self {
            ParameterValues::Flat(values) => ParameterInput::Flat(values),
            ParameterValues::Grouped(grouped) => ParameterInput::Grouped(grouped),
        }
    }
}

impl From<Vec<f64>> for ParameterValues {
    fn from(values: Vec<f64>) -> Self {
        ParameterValues::Flat(values)
    }
}

impl From<GroupedValues> for ParameterValues {
    fn from(grouped: GroupedValues) -> Self {
        ParameterValues::Grouped(grouped)
    }
}

/// Borrowed parameter values in either calling shape. Both shapes work
/// identically everywhere a generated function is called.
#[derive(Debug, Clone, Copy)]
pub enum ParameterInput<'a> {
    Flat(&'a [f64]),
    Grouped(&'a GroupedValues),
}

impl<'a> From<&'a [f64]> for ParameterInput<'a> {
    fn from(values: &'a [f64]) -> Self {
        ParameterInput::Flat(values)
    }
}

impl<'a> From<&'a Vec<f64>> for ParameterInput<'a> {
    fn from(values: &'a Vec<f64>) -> Self {
        ParameterInput::Flat(values)
    }
}

impl<'a> From<&'a GroupedValues> for ParameterInput<'a> {
    fn from(grouped: &'a GroupedValues) -> Self {
        ParameterInput::Grouped(grouped)
    }
}

/// Evaluates the model's parameter-dependency equations in declaration
/// order, given values for the free parameters. Later dependencies may
/// reference earlier ones.
pub fn evaluate_dependencies(
    model: &NonlinearSystem,
    free: &HashMap<String, f64>,
) -> Result<Vec<(String, f64)>, ModelError> {
    let mut resolved: Vec<(String, f64)> = Vec::new();
    for dep in model.parameter_dependencies() {
        let lookup = |name: &str| {
            free.get(name).copied().or_else(|| {
                resolved
                    .iter()
                    .find(|(symbol, _)| symbol == name)
                    .map(|(_, value)| *value)
            })
        };
        let value = dep.rhs.eval(&lookup)?;
        resolved.push((dep.symbol.clone(), value));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Equation, NonlinearSystem, ParameterDependency};

    fn model_with_params(params: &[&str]) -> NonlinearSystem {
        NonlinearSystem::new(
            "m",
            vec![Equation::parse("x - 1").unwrap()],
            vec!["x".into()],
            params.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_layout_expands_array_components() {
        let model = model_with_params(&["a", "k[0]", "k[1]", "b"]);
        let layout = ParameterLayout::of(&model);
        assert_eq!(layout.slots(), &["a", "k[0]", "k[1]", "b"]);
        assert_eq!(layout.index_of("k[1]").unwrap(), 2);
        assert!(matches!(
            layout.index_of("q"),
            Err(ModelError::UnresolvedSymbol(_))
        ));
    }

    #[test]
    fn test_reorder_preserves_request_order() {
        let model = model_with_params(&["a", "b", "c"]);
        let indices = reorder(&model, &["c".into(), "a".into()]).unwrap();
        assert_eq!(indices, vec![2, 0]);
    }

    #[test]
    fn test_reorder_expands_array_base_name() {
        let model = model_with_params(&["a", "k[0]", "k[1]"]);
        let indices = reorder(&model, &["k".into(), "a".into()]).unwrap();
        assert_eq!(indices, vec![1, 2, 0]);
    }

    #[test]
    fn test_reorder_absent_symbol_fails() {
        let model = model_with_params(&["a"]);
        let result = reorder(&model, &["q".into()]);
        assert!(matches!(result, Err(ModelError::UnresolvedSymbol(s)) if s == "q"));
    }

    #[test]
    fn test_grouped_values_scatter() {
        let model = model_with_params(&["a", "b", "c"]);
        let grouped = GroupedValues::from_groups(
            &model,
            &[("c".to_string(), 3.0), ("a".to_string(), 1.0)],
            &[("b".to_string(), 2.0)],
        )
        .unwrap();
        assert_eq!(grouped.tunable(), &[3.0, 1.0]);

        let mut canonical = [0.0; 3];
        grouped.write_canonical(&mut canonical).unwrap();
        assert_eq!(canonical, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_grouped_values_length_mismatch() {
        let mut grouped = GroupedValues::new();
        grouped.push_tunable(0, 1.0);
        let mut canonical = [0.0; 2];
        assert!(matches!(
            grouped.write_canonical(&mut canonical),
            Err(CompileError::InvalidInputLength { .. })
        ));
    }

    #[test]
    fn test_dependency_evaluation_in_order() {
        let model = NonlinearSystem::from_equations(
            "m",
            vec![Equation::parse("x - a - b - c").unwrap()],
            vec![
                ParameterDependency::new(
                    "b",
                    crate::convert::parse_expr("a * 2").unwrap(),
                ),
                ParameterDependency::new(
                    "c",
                    crate::convert::parse_expr("b + 1").unwrap(),
                ),
            ],
        )
        .unwrap();

        let mut free = HashMap::new();
        free.insert("a".to_string(), 3.0);
        let resolved = evaluate_dependencies(&model, &free).unwrap();
        assert_eq!(
            resolved,
            vec![("b".to_string(), 6.0), ("c".to_string(), 7.0)]
        );
    }

    #[test]
    fn test_dependency_missing_free_value_fails() {
        let model = NonlinearSystem::from_equations(
            "m",
            vec![Equation::parse("x - b").unwrap()],
            vec![ParameterDependency::new(
                "b",
                crate::convert::parse_expr("a * 2").unwrap(),
            )],
        )
        .unwrap();
        let result = evaluate_dependencies(&model, &HashMap::new());
        assert!(matches!(result, Err(ModelError::UnresolvedSymbol(s)) if s == "a"));
    }
}
