//! JIT compilation of expression vectors using Cranelift.
//!
//! Every generated function shares the calling convention
//! `fn(u: *const f64, p: *const f64, out: *mut f64)`: unknown values,
//! canonical parameter values, and an output buffer with one slot per
//! compiled expression. The allocating and in-place calling conventions of
//! [`crate::compiler::CompiledFunction`] are both thin wrappers over this
//! single native artifact, so they cannot diverge.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    errors::{BuilderError, CompileError},
    expr::{Expr, LinearOp, SymbolLayout},
    operators, opt,
    types::{ScalarJitFn, SystemJitFn},
};
use cranelift::prelude::*;
use cranelift_codegen::{ir::immediates::Offset32, Context};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use isa::TargetIsa;

struct ThreadSafeFn(*const u8);
unsafe impl Send for ThreadSafeFn {}
unsafe impl Sync for ThreadSafeFn {}

/// Creates an ISA target for the host machine.
pub(crate) fn create_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let mut flag_builder = settings::builder();

    // JITModule rejects position-independent code, and libcalls resolve
    // through the registered symbols rather than colocated stubs
    flag_builder.set("use_colocated_libcalls", "false").unwrap();
    flag_builder.set("is_pic", "false").unwrap();

    let isa_builder = cranelift_native::builder().map_err(|msg| {
        BuilderError::HostMachineNotSupported(format!(
            "{msg} (host triple: {})",
            target_lexicon::Triple::host()
        ))
    })?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(BuilderError::CodegenError)
}

/// Creates a JIT module with the external math symbols registered.
pub(crate) fn create_module_and_context(isa: Arc<dyn TargetIsa>) -> (JITModule, Context) {
    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());

    builder.symbol("exp", f64::exp as *const u8);
    builder.symbol("ln", f64::ln as *const u8);
    builder.symbol("sqrt", f64::sqrt as *const u8);
    builder.symbol("pow", f64::powf as *const u8);
    builder.symbol("sin", f64::sin as *const u8);
    builder.symbol("cos", f64::cos as *const u8);

    let module = JITModule::new(builder);
    let ctx = module.make_context();
    (module, ctx)
}

/// Compiles a vector of expressions into one native function writing
/// `exprs.len()` results into the output buffer.
///
/// Every symbol in `exprs` must resolve against `layout`; the caller is
/// expected to have eliminated observed symbols beforehand so the generated
/// code is self-contained.
pub fn build_system_function(
    exprs: &[Expr],
    layout: &SymbolLayout,
) -> Result<SystemJitFn, CompileError> {
    let n_outputs = exprs.len();
    let n_unknowns = layout.n_unknowns();
    let n_params = layout.n_params();

    let mut builder_context = FunctionBuilderContext::new();
    let isa = create_isa()?;
    let (mut module, mut codegen_context) = create_module_and_context(isa);

    // fn(u_ptr, p_ptr, out_ptr)
    let ptr_ty = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr_ty));
    sig.params.push(AbiParam::new(ptr_ty));
    sig.params.push(AbiParam::new(ptr_ty));

    let func_id = module
        .declare_function("system_fn", Linkage::Export, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))?;

    codegen_context.func.signature = sig;
    let mut builder = FunctionBuilder::new(&mut codegen_context.func, &mut builder_context);

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let u_ptr = builder.block_params(entry_block)[0];
    let p_ptr = builder.block_params(entry_block)[1];
    let out_ptr = builder.block_params(entry_block)[2];

    // loads of the same slot are emitted once per function
    let mut load_cache: HashMap<(bool, u32), Value> = HashMap::new();

    for (i, expr) in exprs.iter().enumerate() {
        let code = opt::optimize(expr.flatten(layout)?);
        let result = codegen_linear(
            &code.ops,
            &mut builder,
            &mut module,
            u_ptr,
            p_ptr,
            &mut load_cache,
        )?;
        builder.ins().store(
            MemFlags::new(),
            result,
            out_ptr,
            Offset32::new((i * 8) as i32),
        );
    }

    builder.ins().return_(&[]);
    builder.finalize();

    module
        .define_function(func_id, &mut codegen_context)
        .map_err(|e| BuilderError::FunctionError(e.to_string()))?;
    module.clear_context(&mut codegen_context);
    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    // Get function pointer
    let code = Arc::new(ThreadSafeFn(module.get_finalized_function(func_id)));
    let wrapper = move |u: &[f64], p: &[f64], out: &mut [f64]| {
        debug_assert_eq!(u.len(), n_unknowns, "unknown buffer has incorrect length");
        debug_assert_eq!(p.len(), n_params, "parameter buffer has incorrect length");
        debug_assert_eq!(out.len(), n_outputs, "output buffer has incorrect length");
        unsafe {
            // SAFETY: compiled with signature fn(*const f64, *const f64, *mut f64);
            // the JIT memory outlives the module handle.
            let f: extern "C" fn(*const f64, *const f64, *mut f64) = std::mem::transmute(code.0);
            f(u.as_ptr(), p.as_ptr(), out.as_mut_ptr());
        }
    };

    Ok(Arc::new(wrapper))
}

/// Compiles a single expression into a scalar-returning wrapper.
pub fn build_scalar_function(
    expr: &Expr,
    layout: &SymbolLayout,
) -> Result<ScalarJitFn, CompileError> {
    let fun = build_system_function(std::slice::from_ref(expr), layout)?;
    Ok(Arc::new(move |u: &[f64], p: &[f64]| {
        let mut out = [0.0];
        fun(u, p, &mut out);
        out[0]
    }))
}

/// Interprets the flattened stack IR, emitting Cranelift instructions.
fn codegen_linear(
    ops: &[LinearOp],
    builder: &mut FunctionBuilder,
    module: &mut JITModule,
    u_ptr: Value,
    p_ptr: Value,
    load_cache: &mut HashMap<(bool, u32), Value>,
) -> Result<Value, CompileError> {
    let mut stack: Vec<Value> = Vec::with_capacity(ops.len());
    let mem = MemFlags::new().with_aligned().with_readonly().with_notrap();

    for op in ops {
        match op {
            LinearOp::LoadConst(c) => {
                stack.push(builder.ins().f64const(*c));
            }
            LinearOp::LoadUnknown(idx) => {
                let val = *load_cache.entry((false, *idx)).or_insert_with(|| {
                    builder
                        .ins()
                        .load(types::F64, mem, u_ptr, Offset32::new((*idx * 8) as i32))
                });
                stack.push(val);
            }
            LinearOp::LoadParam(idx) => {
                let val = *load_cache.entry((true, *idx)).or_insert_with(|| {
                    builder
                        .ins()
                        .load(types::F64, mem, p_ptr, Offset32::new((*idx * 8) as i32))
                });
                stack.push(val);
            }

            LinearOp::Add => {
                let r = stack.pop().unwrap();
                let l = stack.pop().unwrap();
                stack.push(builder.ins().fadd(l, r));
            }
            LinearOp::Sub => {
                let r = stack.pop().unwrap();
                let l = stack.pop().unwrap();
                stack.push(builder.ins().fsub(l, r));
            }
            LinearOp::Mul => {
                let r = stack.pop().unwrap();
                let l = stack.pop().unwrap();
                stack.push(builder.ins().fmul(l, r));
            }
            LinearOp::Div => {
                let r = stack.pop().unwrap();
                let l = stack.pop().unwrap();
                stack.push(builder.ins().fdiv(l, r));
            }
            LinearOp::Abs => {
                let v = stack.pop().unwrap();
                stack.push(builder.ins().fabs(v));
            }
            LinearOp::Neg => {
                let v = stack.pop().unwrap();
                stack.push(builder.ins().fneg(v));
            }

            LinearOp::PowConst(exp) => {
                let base = stack.pop().unwrap();
                stack.push(emit_integer_power(builder, base, *exp));
            }
            LinearOp::PowFloat(exp) => {
                let base = stack.pop().unwrap();
                let expv = builder.ins().f64const(*exp);
                let fid = operators::link_binary(module, "pow")?;
                stack.push(operators::call_binary(builder, module, fid, base, expv));
            }
            LinearOp::PowExpr => {
                let expv = stack.pop().unwrap();
                let base = stack.pop().unwrap();
                let fid = operators::link_binary(module, "pow")?;
                stack.push(operators::call_binary(builder, module, fid, base, expv));
            }
            LinearOp::Exp => {
                let v = stack.pop().unwrap();
                let fid = operators::link_unary(module, "exp")?;
                stack.push(operators::call_unary(builder, module, fid, v));
            }
            LinearOp::Ln => {
                let v = stack.pop().unwrap();
                let fid = operators::link_unary(module, "ln")?;
                stack.push(operators::call_unary(builder, module, fid, v));
            }
            LinearOp::Sqrt => {
                let v = stack.pop().unwrap();
                let fid = operators::link_unary(module, "sqrt")?;
                stack.push(operators::call_unary(builder, module, fid, v));
            }
            LinearOp::Sin => {
                let v = stack.pop().unwrap();
                let fid = operators::link_unary(module, "sin")?;
                stack.push(operators::call_unary(builder, module, fid, v));
            }
            LinearOp::Cos => {
                let v = stack.pop().unwrap();
                let fid = operators::link_unary(module, "cos")?;
                stack.push(operators::call_unary(builder, module, fid, v));
            }

            LinearOp::Fma => {
                let c = stack.pop().unwrap();
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                stack.push(builder.ins().fma(a, b, c));
            }
            LinearOp::Fmsub => {
                let c = stack.pop().unwrap();
                let b = stack.pop().unwrap();
                let a = stack.pop().unwrap();
                let neg_c = builder.ins().fneg(c);
                stack.push(builder.ins().fma(a, b, neg_c));
            }
        }
    }

    // the stack holds exactly one value for well-formed IR
    Ok(stack.pop().expect("flattened expression left an empty stack"))
}

/// Inline multiplication chains for common integer exponents, binary
/// exponentiation for the rest.
fn emit_integer_power(builder: &mut FunctionBuilder, base: Value, exp: i64) -> Value {
    match exp {
        0 => builder.ins().f64const(1.0),
        1 => base,
        2 => builder.ins().fmul(base, base),
        3 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, base)
        }
        4 => {
            let square = builder.ins().fmul(base, base);
            builder.ins().fmul(square, square)
        }
        -1 => {
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, base)
        }
        -2 => {
            let square = builder.ins().fmul(base, base);
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, square)
        }
        _ => {
            let mut result = builder.ins().f64const(1.0);
            let mut current_base = base;
            let mut remaining = exp.abs();
            while remaining > 0 {
                if remaining & 1 == 1 {
                    result = builder.ins().fmul(result, current_base);
                }
                if remaining > 1 {
                    current_base = builder.ins().fmul(current_base, current_base);
                }
                remaining >>= 1;
            }
            if exp < 0 {
                let one = builder.ins().f64const(1.0);
                builder.ins().fdiv(one, result)
            } else {
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::parse_expr;

    fn layout() -> SymbolLayout {
        SymbolLayout::new(&["x", "y", "z"], &["sigma", "rho", "beta"])
    }

    #[test]
    fn test_system_function_evaluates_residuals() {
        let exprs = vec![
            parse_expr("sigma * (y - x)").unwrap(),
            parse_expr("x * (rho - z) - y").unwrap(),
            parse_expr("x * y - beta * z").unwrap(),
        ];
        let fun = build_system_function(&exprs, &layout()).unwrap();

        let u = [1.0, 1.0, 1.0];
        let p = [10.0, 8.0, 8.0 / 3.0];
        let mut out = [0.0; 3];
        fun(&u, &p, &mut out);

        assert_eq!(out[0], 0.0); // sigma * (1 - 1)
        assert_eq!(out[1], 6.0); // 1 * (8 - 1) - 1
        assert!((out[2] - (1.0 - 8.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_scalar_function() {
        let expr = parse_expr("x^2 + sigma").unwrap();
        let fun = build_scalar_function(&expr, &layout()).unwrap();
        let result = fun(&[3.0, 0.0, 0.0], &[4.0, 0.0, 0.0]);
        assert_eq!(result, 13.0);
    }

    #[test]
    fn test_transcendental_calls() {
        let expr = parse_expr("exp(x) + ln(y) + sqrt(z) + sin(sigma) + cos(rho)").unwrap();
        let fun = build_scalar_function(&expr, &layout()).unwrap();
        let result = fun(&[0.0, 1.0, 4.0], &[0.0, 0.0, 0.0]);
        // exp(0) + ln(1) + sqrt(4) + sin(0) + cos(0) = 1 + 0 + 2 + 0 + 1
        assert_eq!(result, 4.0);
    }

    #[test]
    fn test_isa_flags_accepted_by_jit() {
        let isa = create_isa().unwrap();
        assert!(!isa.flags().is_pic());
        // module construction asserts on incompatible flags
        let (_module, _ctx) = create_module_and_context(isa);
    }

    #[test]
    fn test_constant_expression() {
        let expr = parse_expr("2 + 3 * 4").unwrap();
        let fun = build_scalar_function(&expr, &SymbolLayout::default()).unwrap();
        assert_eq!(fun(&[], &[]), 14.0);
    }
}
