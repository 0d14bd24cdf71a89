//! Peephole optimiser for the flattened stack IR.
//!
//! Two passes run to a fixpoint:
//!  1. `fold_consts`: constant propagation over the stack effect of each
//!     opcode.
//!  2. `fuse_fma`: recognises `a*b+c` / `a*b-c` windows and emits the fused
//!     `Fma` / `Fmsub` opcodes.
//!
//! The module is pure Rust with no Cranelift dependencies.

use crate::expr::{LinearCode, LinearOp};

/// Runs all passes until nothing changes.
pub fn optimize(code: LinearCode) -> LinearCode {
    let mut ops = code.ops;
    loop {
        let len_before = ops.len();
        ops = fold_consts(ops);
        ops = fuse_fma(ops);
        if ops.len() == len_before {
            break;
        }
    }
    LinearCode { ops, ..code }
}

// Mirrors the stack effect of the instruction stream on an auxiliary stack of
// `Option<f64>` (Some when the value is a compile-time constant).
fn fold_consts(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    use LinearOp::*;

    let mut out: Vec<LinearOp> = Vec::with_capacity(ops.len());
    let mut cstk: Vec<Option<f64>> = Vec::with_capacity(8);

    let push_const = |c: f64, out: &mut Vec<LinearOp>, cstk: &mut Vec<Option<f64>>| {
        out.push(LoadConst(c));
        cstk.push(Some(c));
    };

    for op in ops {
        match op {
            LoadConst(c) => push_const(c, &mut out, &mut cstk),
            LoadUnknown(_) | LoadParam(_) => {
                out.push(op);
                cstk.push(None);
            }

            Abs | Neg => {
                let v = cstk.pop().unwrap_or(None);
                if let Some(cv) = v {
                    let res = if matches!(op, Abs) { cv.abs() } else { -cv };
                    out.pop();
                    push_const(res, &mut out, &mut cstk);
                } else {
                    out.push(op);
                    cstk.push(None);
                }
            }

            Add | Sub | Mul | Div => {
                let rhs = cstk.pop().unwrap_or(None);
                let lhs = cstk.pop().unwrap_or(None);
                match (lhs, rhs) {
                    // division by a constant zero keeps the original
                    // instruction to preserve IEEE semantics
                    (Some(a), Some(b)) if !(matches!(op, Div) && b == 0.0) => {
                        let res = match op {
                            Add => a + b,
                            Sub => a - b,
                            Mul => a * b,
                            Div => a / b,
                            _ => unreachable!(),
                        };
                        out.truncate(out.len() - 2);
                        push_const(res, &mut out, &mut cstk);
                    }
                    _ => {
                        out.push(op);
                        cstk.push(None);
                    }
                }
            }

            Fma | Fmsub => {
                let c = cstk.pop().unwrap_or(None);
                let b = cstk.pop().unwrap_or(None);
                let a = cstk.pop().unwrap_or(None);
                if let (Some(aa), Some(bb), Some(cc)) = (a, b, c) {
                    let res = if matches!(op, Fma) {
                        aa * bb + cc
                    } else {
                        aa * bb - cc
                    };
                    out.truncate(out.len() - 3);
                    push_const(res, &mut out, &mut cstk);
                } else {
                    out.push(op);
                    cstk.push(None);
                }
            }

            // heavier ops are not folded here; keep the stack balanced
            PowConst(_) | PowFloat(_) | PowExpr | Exp | Ln | Sqrt | Sin | Cos => {
                let _ = cstk.pop();
                if matches!(op, PowExpr) {
                    let _ = cstk.pop();
                }
                out.push(op);
                cstk.push(None);
            }
        }
    }
    out
}

// Pattern window is exactly five ops: load, load, Mul, load, Add/Sub.
fn fuse_fma(ops: Vec<LinearOp>) -> Vec<LinearOp> {
    use LinearOp::*;
    let is_load = |op: &LinearOp| matches!(op, LoadUnknown(_) | LoadParam(_) | LoadConst(_));

    let mut out = Vec::with_capacity(ops.len());
    let mut i = 0;
    while i < ops.len() {
        if i + 4 < ops.len()
            && is_load(&ops[i])
            && is_load(&ops[i + 1])
            && matches!(ops[i + 2], Mul)
            && is_load(&ops[i + 3])
            && matches!(ops[i + 4], Add | Sub)
        {
            out.extend_from_slice(&ops[i..i + 2]);
            out.push(ops[i + 3].clone());
            out.push(if matches!(ops[i + 4], Add) { Fma } else { Fmsub });
            i += 5;
            continue;
        }
        out.push(ops[i].clone());
        i += 1;
    }
    out
}
