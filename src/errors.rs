//! Error types for the nlsys-jit crate.
//!
//! Three layers of failure modes exist: conversion of parsed expressions into
//! the internal tree (`ConvertError`), Cranelift JIT compilation
//! (`BuilderError`), and model-level contract violations (`ModelError`).
//! `CompileError` is the top-level type returned by the pipeline entry points
//! and wraps all of them.

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use evalexpr::{DefaultNumericTypes, EvalexprError};
use thiserror::Error;

/// Errors that can occur while converting an evalexpr parse tree into the
/// internal expression representation.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The exponent of a `^` operator was not a numeric constant.
    #[error("could not convert exponent: {0}")]
    ExpOperator(String),
    /// The parse tree contained an operator the pipeline cannot compile.
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    /// The parse tree contained a function call the pipeline cannot compile.
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),
    /// The root node did not have exactly one child.
    #[error("expected single child for root node: {0}")]
    RootNode(String),
    /// A constant value was not numeric.
    #[error("expected numeric constant: {0}")]
    ConstOperator(String),
}

/// Errors that can occur during JIT compilation of expressions.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// The target machine architecture is not supported by Cranelift.
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during Cranelift code generation.
    #[error("codegen error: {0}")]
    CodegenError(CodegenError),
    /// Error in the Cranelift JIT module.
    #[error("module error: {0}")]
    ModuleError(ModuleError),
    /// Error when defining the JIT function.
    #[error("function error: {0}")]
    FunctionError(String),
    /// Error when declaring the JIT function.
    #[error("declaration error: {0}")]
    DeclarationError(String),
}

/// Model-level contract violations raised synchronously at the call that
/// detects them. The pipeline performs no retry: symbolic computation is
/// deterministic, so retrying with unchanged inputs cannot change the
/// outcome.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Missing required name, duplicate subsystem names, or a similar
    /// structural misconfiguration detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A problem-construction call was made on a system that has not been
    /// marked complete.
    #[error("system `{name}` has not been completed; call `NonlinearSystem::complete` before building problems")]
    NotCompleted { name: String },
    /// A requested unknown/parameter/observed symbol is absent from the
    /// system.
    #[error("symbol `{0}` is not part of the system")]
    UnresolvedSymbol(String),
    /// An unknown or parameter had neither an explicit value nor a default
    /// at problem-build time.
    #[error("no value or default provided for `{0}`")]
    MissingValue(String),
    /// Homotopy-continuation-style construction was attempted without an
    /// injected backend.
    #[error("homotopy continuation extension not loaded; inject a `HomotopyBackend` implementation")]
    ExtensionUnavailable,
}

/// Top-level error type returned by the compilation pipeline.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The expression string failed to parse.
    #[error("failed to parse expression")]
    ParseError(#[from] EvalexprError<DefaultNumericTypes>),
    /// The parse tree could not be converted into the internal tree.
    #[error("failed to convert expression")]
    ConvertError(#[from] ConvertError),
    /// JIT compilation failed.
    #[error("failed to build JIT function")]
    BuildFunctionError(#[from] BuilderError),
    /// A model contract was violated.
    #[error(transparent)]
    ModelError(#[from] ModelError),
    /// An input slice had the wrong length for the compiled function.
    #[error("invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// An output buffer had the wrong length for the compiled function.
    #[error("invalid output length: expected {expected}, got {got}")]
    InvalidOutputLength { expected: usize, got: usize },
}
