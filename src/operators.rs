//! Linking shims for libm-style math functions in JIT-compiled code.
//!
//! Transcendental operations (`exp`, `ln`, `sqrt`, `sin`, `cos`) and general
//! powers (`pow`) are not Cranelift instructions; they are imported as
//! external symbols registered on the JIT builder (see
//! [`crate::builder::create_module_and_context`]) and called through the
//! helpers here. All of them operate on `f64`.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

use crate::errors::BuilderError;

/// Declares an imported `f64 -> f64` function by name.
pub(crate) fn link_unary(module: &mut dyn Module, name: &str) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64));
    sig.returns.push(AbiParam::new(F64));
    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Declares an imported `(f64, f64) -> f64` function by name.
pub(crate) fn link_binary(module: &mut dyn Module, name: &str) -> Result<FuncId, BuilderError> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64));
    sig.params.push(AbiParam::new(F64));
    sig.returns.push(AbiParam::new(F64));
    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))
}

/// Emits a call to a previously linked unary function.
pub(crate) fn call_unary(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}

/// Emits a call to a previously linked binary function.
pub(crate) fn call_binary(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    lhs: Value,
    rhs: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[lhs, rhs]);
    builder.inst_results(call)[0]
}
