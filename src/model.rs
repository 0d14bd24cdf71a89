//! The equation-system data model.
//!
//! A [`NonlinearSystem`] is a finite set of residual equations over unknowns
//! and parameters, together with observed (auxiliary) definitions, parameter
//! dependencies, default values and labeling data. Models are built once,
//! marked complete, and from then on treated as immutable by the pipeline.
//! The only mutation after completion is the internal Jacobian cache, which
//! is a performance detail hidden behind [`NonlinearSystem::cached_jacobian_or`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use colored::Colorize;
use itertools::Itertools;

use crate::convert;
use crate::derivative::{DerivativeOptions, JacobianMatrix};
use crate::errors::{CompileError, ModelError};
use crate::expr::Expr;

/// A single equation `lhs = rhs`.
///
/// Construction through [`NonlinearSystem`] normalises the left side to zero,
/// so stored equations always read `0 = rhs - lhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    pub fn new(lhs: Expr, rhs: Expr) -> Self {
        Self { lhs, rhs }
    }

    /// Parses an equation string. `lhs = rhs` keeps both sides; a bare
    /// expression is read as the residual form `0 = expr`.
    pub fn parse(src: &str) -> Result<Self, CompileError> {
        let (lhs, rhs) = convert::parse_equation(src)?;
        Ok(Self { lhs, rhs })
    }

    /// The residual expression `rhs - lhs`, simplified.
    pub fn residual(&self) -> Expr {
        Expr::Sub(Box::new(self.rhs.clone()), Box::new(self.lhs.clone())).simplify()
    }

    fn normalized(&self) -> Equation {
        Equation {
            lhs: Expr::Const(0.0),
            rhs: self.residual(),
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.lhs.to_string().cyan(),
            "=".dimmed(),
            self.rhs.to_string().cyan()
        )
    }
}

/// A named parameter slot.
///
/// Component symbols of the form `name[i]` collapse into a single array
/// parameter when every component `0..len` is present at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Scalar(String),
    Array { name: String, len: usize },
}

impl Parameter {
    pub fn name(&self) -> &str {
        match self {
            Parameter::Scalar(name) => name,
            Parameter::Array { name, .. } => name,
        }
    }

    /// Number of scalar slots this parameter occupies in the canonical
    /// parameter vector.
    pub fn n_slots(&self) -> usize {
        match self {
            Parameter::Scalar(_) => 1,
            Parameter::Array { len, .. } => *len,
        }
    }

    /// The scalar symbol for each slot: the bare name for scalars,
    /// `name[i]` for array components.
    pub fn component_names(&self) -> Vec<String> {
        match self {
            Parameter::Scalar(name) => vec![name.clone()],
            Parameter::Array { name, len } => {
                (0..*len).map(|i| format!("{name}[{i}]")).collect()
            }
        }
    }
}

/// An auxiliary definition `symbol = rhs`, substituted away before
/// differentiation and kept for post-solve introspection.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedEquation {
    pub symbol: String,
    pub rhs: Expr,
}

impl ObservedEquation {
    pub fn new(symbol: impl Into<String>, rhs: Expr) -> Self {
        Self {
            symbol: symbol.into(),
            rhs,
        }
    }

    /// Parses a definition string of the form `symbol = expr`.
    pub fn parse(src: &str) -> Result<Self, CompileError> {
        let (lhs, rhs) = convert::parse_equation(src)?;
        match lhs {
            Expr::Var(symbol) => Ok(Self { symbol, rhs }),
            other => Err(ModelError::Configuration(format!(
                "observed definition must have a bare symbol on the left side, got `{other}`"
            ))
            .into()),
        }
    }
}

/// A parameter defined in terms of other parameters, `symbol = h(params)`.
/// Dependent parameters are excluded from the free-parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDependency {
    pub symbol: String,
    pub rhs: Expr,
}

impl ParameterDependency {
    pub fn new(symbol: impl Into<String>, rhs: Expr) -> Self {
        Self {
            symbol: symbol.into(),
            rhs,
        }
    }
}

/// A default value for an unknown or parameter slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Numeric(f64),
    Symbolic(Expr),
}

/// Thread-safe source of structural tags.
///
/// Tags are process-unique monotonically increasing identifiers; two models
/// with equal tags are structurally identical (clones share their source
/// model's tag). Embedders and tests can run their own source instead of the
/// process-wide one.
#[derive(Debug)]
pub struct TagSource(AtomicU64);

impl TagSource {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// The process-wide source used when none is injected.
    pub fn global() -> &'static TagSource {
        static GLOBAL: OnceLock<TagSource> = OnceLock::new();
        GLOBAL.get_or_init(TagSource::new)
    }
}

impl Default for TagSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-slot Jacobian cache entry: the matrix plus the options that
/// produced it.
#[derive(Debug)]
pub(crate) struct JacobianCache {
    pub(crate) key: DerivativeOptions,
    pub(crate) matrix: Arc<JacobianMatrix>,
}

/// A nonlinear equation system.
#[derive(Debug)]
pub struct NonlinearSystem {
    name: String,
    description: String,
    metadata: HashMap<String, String>,
    equations: Vec<Equation>,
    unknowns: Vec<String>,
    parameters: Vec<Parameter>,
    observed: Vec<ObservedEquation>,
    parameter_dependencies: Vec<ParameterDependency>,
    defaults: HashMap<String, DefaultValue>,
    subsystems: Vec<NonlinearSystem>,
    structural_tag: u64,
    complete: bool,
    derivative_cache: Mutex<Option<JacobianCache>>,
}

impl NonlinearSystem {
    /// Builds a model from equations plus explicit unknown and parameter
    /// orders, using the process-wide tag source.
    ///
    /// Equation left sides are reduced to zero; parameter component symbols
    /// `name[i]` collapse into one array parameter when all components are
    /// present.
    pub fn new(
        name: impl Into<String>,
        equations: Vec<Equation>,
        unknowns: Vec<String>,
        parameters: Vec<String>,
    ) -> Result<Self, ModelError> {
        Self::new_with_source(name, equations, unknowns, parameters, TagSource::global())
    }

    /// Like [`NonlinearSystem::new`] with an injected tag source.
    pub fn new_with_source(
        name: impl Into<String>,
        equations: Vec<Equation>,
        unknowns: Vec<String>,
        parameters: Vec<String>,
        tags: &TagSource,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ModelError::Configuration(
                "system name must be nonempty".to_string(),
            ));
        }

        let duplicate_unknowns: Vec<_> = unknowns.iter().duplicates().collect();
        if !duplicate_unknowns.is_empty() {
            return Err(ModelError::Configuration(format!(
                "duplicate unknowns: {duplicate_unknowns:?}"
            )));
        }

        let parameters = collapse_array_components(&parameters);
        let duplicate_params: Vec<_> = parameters.iter().map(Parameter::name).duplicates().collect();
        if !duplicate_params.is_empty() {
            return Err(ModelError::Configuration(format!(
                "duplicate parameters: {duplicate_params:?}"
            )));
        }

        Ok(Self {
            name,
            description: String::new(),
            metadata: HashMap::new(),
            equations: equations.iter().map(Equation::normalized).collect(),
            unknowns,
            parameters,
            observed: Vec::new(),
            parameter_dependencies: Vec::new(),
            defaults: HashMap::new(),
            subsystems: Vec::new(),
            structural_tag: tags.next(),
            complete: false,
            derivative_cache: Mutex::new(None),
        })
    }

    /// Builds a model from equations alone, inferring unknowns and
    /// parameters.
    ///
    /// Dependency left sides and every symbol on a dependency right side are
    /// parameters; the remaining free symbols of the equations become
    /// unknowns in order of first appearance.
    pub fn from_equations(
        name: impl Into<String>,
        equations: Vec<Equation>,
        parameter_dependencies: Vec<ParameterDependency>,
    ) -> Result<Self, ModelError> {
        let mut parameters: Vec<String> = Vec::new();
        let mut parameter_set: HashSet<String> = HashSet::new();
        let mut push_param = |name: &str, out: &mut Vec<String>, set: &mut HashSet<String>| {
            if set.insert(name.to_string()) {
                out.push(name.to_string());
            }
        };
        for dep in &parameter_dependencies {
            push_param(&dep.symbol, &mut parameters, &mut parameter_set);
            let mut symbols = BTreeSet::new();
            dep.rhs.free_symbols(&mut symbols);
            for symbol in &symbols {
                push_param(symbol, &mut parameters, &mut parameter_set);
            }
        }

        let mut unknowns: Vec<String> = Vec::new();
        let mut unknown_set: HashSet<String> = HashSet::new();
        for eq in &equations {
            let mut symbols = BTreeSet::new();
            eq.residual().free_symbols(&mut symbols);
            for symbol in symbols {
                if !parameter_set.contains(&symbol) && unknown_set.insert(symbol.clone()) {
                    unknowns.push(symbol);
                }
            }
        }

        Self::new(name, equations, unknowns, parameters)?
            .with_parameter_dependencies(parameter_dependencies)
    }

    /// Attaches observed definitions. Every symbol on a right side must be
    /// an unknown, a parameter or another observed symbol.
    pub fn with_observed(mut self, observed: Vec<ObservedEquation>) -> Result<Self, ModelError> {
        let duplicates: Vec<_> = observed.iter().map(|o| &o.symbol).duplicates().collect();
        if !duplicates.is_empty() {
            return Err(ModelError::Configuration(format!(
                "duplicate observed symbols: {duplicates:?}"
            )));
        }
        let observed_names: HashSet<&str> = observed.iter().map(|o| o.symbol.as_str()).collect();
        for def in &observed {
            let mut symbols = BTreeSet::new();
            def.rhs.free_symbols(&mut symbols);
            for symbol in symbols {
                if !self.holds_symbol(&symbol) && !observed_names.contains(symbol.as_str()) {
                    return Err(ModelError::UnresolvedSymbol(symbol));
                }
            }
        }
        self.observed = observed;
        Ok(self)
    }

    /// Attaches parameter dependencies `p = h(other params)`. The defined
    /// symbol and every symbol on the right side must be model parameters.
    pub fn with_parameter_dependencies(
        mut self,
        dependencies: Vec<ParameterDependency>,
    ) -> Result<Self, ModelError> {
        for dep in &dependencies {
            if !self.is_parameter_symbol(&dep.symbol) {
                return Err(ModelError::UnresolvedSymbol(dep.symbol.clone()));
            }
            let mut symbols = BTreeSet::new();
            dep.rhs.free_symbols(&mut symbols);
            for symbol in symbols {
                if !self.is_parameter_symbol(&symbol) {
                    return Err(ModelError::UnresolvedSymbol(symbol));
                }
            }
        }
        self.parameter_dependencies = dependencies;
        Ok(self)
    }

    /// Attaches default values. Absent (`None`) defaults are dropped, never
    /// stored; every defaulted symbol must be an unknown or a parameter.
    pub fn with_defaults<I>(mut self, defaults: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = (String, Option<DefaultValue>)>,
    {
        for (symbol, value) in defaults {
            let Some(value) = value else { continue };
            if !self.is_unknown(&symbol) && !self.is_parameter_symbol(&symbol) {
                return Err(ModelError::UnresolvedSymbol(symbol));
            }
            self.defaults.insert(symbol, value);
        }
        Ok(self)
    }

    #[deprecated(note = "use `with_defaults`, which also drops absent values")]
    pub fn with_default_values(
        self,
        defaults: HashMap<String, DefaultValue>,
    ) -> Result<Self, ModelError> {
        self.with_defaults(defaults.into_iter().map(|(k, v)| (k, Some(v))))
    }

    /// Attaches nested subsystems. Their names must be pairwise distinct.
    /// Subsystems are labeling data only; the compilation pipeline never
    /// flattens them.
    pub fn with_subsystems(mut self, subsystems: Vec<NonlinearSystem>) -> Result<Self, ModelError> {
        let duplicates: Vec<_> = subsystems.iter().map(|s| s.name.as_str()).duplicates().collect();
        if !duplicates.is_empty() {
            return Err(ModelError::Configuration(format!(
                "duplicate subsystem names: {duplicates:?}"
            )));
        }
        self.subsystems = subsystems;
        Ok(self)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Marks the model complete. One-way; building numeric problems
    /// requires completeness.
    pub fn complete(mut self) -> Self {
        self.complete = true;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn equations(&self) -> &[Equation] {
        &self.equations
    }

    pub fn unknowns(&self) -> &[String] {
        &self.unknowns
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn observed(&self) -> &[ObservedEquation] {
        &self.observed
    }

    pub fn parameter_dependencies(&self) -> &[ParameterDependency] {
        &self.parameter_dependencies
    }

    pub fn defaults(&self) -> &HashMap<String, DefaultValue> {
        &self.defaults
    }

    pub fn subsystems(&self) -> &[NonlinearSystem] {
        &self.subsystems
    }

    pub fn structural_tag(&self) -> u64 {
        self.structural_tag
    }

    /// The residual expressions, one per equation, in equation order.
    pub fn residuals(&self) -> Vec<Expr> {
        self.equations.iter().map(|eq| eq.rhs.clone()).collect()
    }

    pub fn n_residuals(&self) -> usize {
        self.equations.len()
    }

    pub fn n_unknowns(&self) -> usize {
        self.unknowns.len()
    }

    /// A residual count different from the unknown count makes this a
    /// least-squares system; numeric buffers are sized by residual count.
    pub fn is_square(&self) -> bool {
        self.equations.len() == self.unknowns.len()
    }

    pub fn is_unknown(&self, symbol: &str) -> bool {
        self.unknowns.iter().any(|u| u == symbol)
    }

    /// True for a parameter name or any of its array component symbols.
    pub fn is_parameter_symbol(&self, symbol: &str) -> bool {
        self.parameters.iter().any(|p| {
            p.name() == symbol || p.component_names().iter().any(|c| c == symbol)
        })
    }

    fn holds_symbol(&self, symbol: &str) -> bool {
        self.is_unknown(symbol) || self.is_parameter_symbol(symbol)
    }

    /// Parameters not defined by a dependency equation. Only these carry
    /// caller-supplied values.
    pub fn free_parameters(&self) -> Vec<&Parameter> {
        let dependent: HashSet<&str> = self
            .parameter_dependencies
            .iter()
            .map(|d| d.symbol.as_str())
            .collect();
        self.parameters
            .iter()
            .filter(|p| !dependent.contains(p.name()))
            .collect()
    }

    /// Returns the cached Jacobian when the stored key matches exactly,
    /// otherwise computes, stores and returns a fresh one. The slot holds a
    /// single entry; a differing key replaces it.
    pub(crate) fn cached_jacobian_or<F>(
        &self,
        key: DerivativeOptions,
        compute: F,
    ) -> Result<Arc<JacobianMatrix>, CompileError>
    where
        F: FnOnce() -> Result<JacobianMatrix, CompileError>,
    {
        let mut slot = self
            .derivative_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = slot.as_ref() {
            if entry.key == key {
                return Ok(Arc::clone(&entry.matrix));
            }
        }
        let matrix = Arc::new(compute()?);
        *slot = Some(JacobianCache {
            key,
            matrix: Arc::clone(&matrix),
        });
        Ok(matrix)
    }
}

// Clones share the structural tag (they are structurally identical) but
// start with an empty Jacobian cache.
impl Clone for NonlinearSystem {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            metadata: self.metadata.clone(),
            equations: self.equations.clone(),
            unknowns: self.unknowns.clone(),
            parameters: self.parameters.clone(),
            observed: self.observed.clone(),
            parameter_dependencies: self.parameter_dependencies.clone(),
            defaults: self.defaults.clone(),
            subsystems: self.subsystems.clone(),
            structural_tag: self.structural_tag,
            complete: self.complete,
            derivative_cache: Mutex::new(None),
        }
    }
}

impl fmt::Display for NonlinearSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name.bold())?;
        for eq in &self.equations {
            writeln!(f, "  {eq}")?;
        }
        writeln!(
            f,
            "  {} {}",
            "unknowns:".dimmed(),
            self.unknowns.join(", ").green()
        )?;
        let params = self
            .parameters
            .iter()
            .map(|p| match p {
                Parameter::Scalar(name) => name.clone(),
                Parameter::Array { name, len } => format!("{name}[{len}]"),
            })
            .join(", ");
        write!(f, "  {} {}", "parameters:".dimmed(), params.yellow())
    }
}

fn split_indexed(name: &str) -> Option<(&str, usize)> {
    if !name.ends_with(']') {
        return None;
    }
    let open = name.find('[')?;
    let idx = name[open + 1..name.len() - 1].parse().ok()?;
    let base = &name[..open];
    (!base.is_empty()).then_some((base, idx))
}

// Groups `name[i]` symbols and collapses a group into one array parameter
// when its indices are exactly 0..len. Partial groups stay scalar slots.
fn collapse_array_components(names: &[String]) -> Vec<Parameter> {
    let mut groups: HashMap<&str, BTreeSet<usize>> = HashMap::new();
    for name in names {
        if let Some((base, idx)) = split_indexed(name) {
            groups.entry(base).or_default().insert(idx);
        }
    }
    let is_complete = |base: &str| {
        groups
            .get(base)
            .is_some_and(|idxs| idxs.iter().copied().eq(0..idxs.len()))
    };

    let mut emitted: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        match split_indexed(name) {
            Some((base, _)) if is_complete(base) => {
                if emitted.insert(base.to_string()) {
                    out.push(Parameter::Array {
                        name: base.to_string(),
                        len: groups[base].len(),
                    });
                }
            }
            _ => out.push(Parameter::Scalar(name.clone())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn test_equation_normalization() {
        let model = NonlinearSystem::new(
            "m",
            vec![Equation::parse("x * y = beta * z").unwrap()],
            vec!["x".into(), "y".into(), "z".into()],
            vec!["beta".into()],
        )
        .unwrap();
        let eq = &model.equations()[0];
        assert_eq!(eq.lhs, Expr::Const(0.0));
        // rhs is (beta*z) - (x*y)
        let mut symbols = BTreeSet::new();
        eq.rhs.free_symbols(&mut symbols);
        assert!(symbols.contains("beta"));
        assert!(symbols.contains("x"));
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = NonlinearSystem::new("", vec![], vec![], vec![]);
        assert!(matches!(result, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_unknowns_rejected() {
        let result = NonlinearSystem::new(
            "m",
            vec![],
            vec!["x".into(), "x".into()],
            vec![],
        );
        assert!(matches!(result, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_inference_from_equations() {
        let model = NonlinearSystem::from_equations(
            "inferred",
            vec![
                Equation::parse("a * x - y").unwrap(),
                Equation::parse("y - b").unwrap(),
            ],
            vec![
                ParameterDependency::new("b", Expr::Mul(
                    Box::new(Expr::Const(2.0)),
                    Box::new(Expr::var("a")),
                )),
            ],
        )
        .unwrap();
        let params: Vec<_> = model.parameters().iter().map(Parameter::name).collect();
        assert_eq!(params, vec!["b", "a"]);
        assert_eq!(model.unknowns(), &["x".to_string(), "y".to_string()]);
        assert_eq!(model.free_parameters().len(), 1);
        assert_eq!(model.free_parameters()[0].name(), "a");
    }

    #[test]
    fn test_array_parameter_collapsing() {
        let model = NonlinearSystem::new(
            "m",
            vec![],
            vec![],
            vec!["k[0]".into(), "k[1]".into(), "k[2]".into(), "c".into()],
        )
        .unwrap();
        assert_eq!(
            model.parameters(),
            &[
                Parameter::Array {
                    name: "k".into(),
                    len: 3
                },
                Parameter::Scalar("c".into())
            ]
        );
        assert_eq!(
            model.parameters()[0].component_names(),
            vec!["k[0]", "k[1]", "k[2]"]
        );
    }

    #[test]
    fn test_partial_array_stays_scalar() {
        let model = NonlinearSystem::new(
            "m",
            vec![],
            vec![],
            vec!["k[0]".into(), "k[2]".into()],
        )
        .unwrap();
        assert_eq!(
            model.parameters(),
            &[
                Parameter::Scalar("k[0]".into()),
                Parameter::Scalar("k[2]".into())
            ]
        );
    }

    #[test]
    fn test_duplicate_subsystem_names_rejected() {
        let a1 = NonlinearSystem::new("a", vec![], vec![], vec![]).unwrap();
        let a2 = NonlinearSystem::new("a", vec![], vec![], vec![]).unwrap();
        let result = NonlinearSystem::new("parent", vec![], vec![], vec![])
            .unwrap()
            .with_subsystems(vec![a1, a2]);
        assert!(matches!(result, Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_defaults_drop_absent_and_check_membership() {
        let model = lorenz()
            .with_defaults(vec![
                ("sigma".to_string(), Some(DefaultValue::Numeric(10.0))),
                ("rho".to_string(), None),
            ])
            .unwrap();
        assert_eq!(model.defaults().len(), 1);
        assert!(!model.defaults().contains_key("rho"));

        let result = lorenz().with_defaults(vec![(
            "not_a_symbol".to_string(),
            Some(DefaultValue::Numeric(1.0)),
        )]);
        assert!(matches!(result, Err(ModelError::UnresolvedSymbol(_))));
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_defaults_alias() {
        let mut defaults = HashMap::new();
        defaults.insert("sigma".to_string(), DefaultValue::Numeric(10.0));
        let model = lorenz().with_default_values(defaults).unwrap();
        assert_eq!(model.defaults().len(), 1);
    }

    #[test]
    fn test_observed_validation() {
        let model = lorenz()
            .with_observed(vec![ObservedEquation::parse("w = x + sigma").unwrap()])
            .unwrap();
        assert_eq!(model.observed().len(), 1);

        let result = lorenz().with_observed(vec![ObservedEquation::parse("w = q + 1").unwrap()]);
        assert!(matches!(result, Err(ModelError::UnresolvedSymbol(s)) if s == "q"));
    }

    #[test]
    fn test_tags_unique_and_injectable() {
        let source = TagSource::new();
        let a = NonlinearSystem::new_with_source("a", vec![], vec![], vec![], &source).unwrap();
        let b = NonlinearSystem::new_with_source("b", vec![], vec![], vec![], &source).unwrap();
        assert_ne!(a.structural_tag(), b.structural_tag());

        // clones keep the tag of their source model
        let c = a.clone();
        assert_eq!(a.structural_tag(), c.structural_tag());
    }

    #[test]
    fn test_completion_is_one_way() {
        let model = lorenz();
        assert!(!model.is_complete());
        let model = model.complete();
        assert!(model.is_complete());
    }

    #[test]
    fn test_least_squares_shape() {
        let model = NonlinearSystem::new(
            "lsq",
            vec![
                Equation::parse("x - 1").unwrap(),
                Equation::parse("y - 2").unwrap(),
                Equation::parse("x + y - 3").unwrap(),
            ],
            vec!["x".into(), "y".into()],
            vec![],
        )
        .unwrap();
        assert!(!model.is_square());
        assert_eq!(model.n_residuals(), 3);
        assert_eq!(model.n_unknowns(), 2);
    }
}
