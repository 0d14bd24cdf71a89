//! Conversion from evalexpr parse trees into the internal expression tree.
//!
//! Parsing itself is delegated to the [evalexpr](https://docs.rs/evalexpr)
//! crate; this module maps its `Node`/`Operator` tree onto [`Expr`].
//! Symbols stay referenced by name; slot resolution is a compile-time
//! concern handled by [`crate::expr::SymbolLayout`], not a parse-time one.

use crate::errors::{CompileError, ConvertError};
use crate::expr::Expr;
use evalexpr::{build_operator_tree, Node, Operator};

/// Parses an expression string into an [`Expr`].
pub fn parse_expr(src: &str) -> Result<Expr, CompileError> {
    let node = build_operator_tree(src)?;
    Ok(build_expr(&node)?)
}

/// Converts an evalexpr AST node into an [`Expr`].
pub fn build_expr(node: &Node) -> Result<Expr, ConvertError> {
    match node.operator() {
        // n-ary in evalexpr; folded into binary nodes
        Operator::Add => {
            let children = node.children();
            children
                .iter()
                .skip(1)
                .try_fold(build_expr(&children[0])?, |acc, child| {
                    Ok(Expr::Add(Box::new(acc), Box::new(build_expr(child)?)))
                })
        }
        Operator::Mul => {
            let children = node.children();
            children
                .iter()
                .skip(1)
                .try_fold(build_expr(&children[0])?, |acc, child| {
                    Ok(Expr::Mul(Box::new(acc), Box::new(build_expr(child)?)))
                })
        }
        Operator::Sub => {
            let children = node.children();
            Ok(Expr::Sub(
                Box::new(build_expr(&children[0])?),
                Box::new(build_expr(&children[1])?),
            ))
        }
        Operator::Div => {
            let children = node.children();
            Ok(Expr::Div(
                Box::new(build_expr(&children[0])?),
                Box::new(build_expr(&children[1])?),
            ))
        }
        Operator::Neg => {
            let children = node.children();
            Ok(Expr::Neg(Box::new(build_expr(&children[0])?)))
        }
        Operator::Const { value } => match value {
            evalexpr::Value::Float(f) => Ok(Expr::Const(*f)),
            evalexpr::Value::Int(i) => Ok(Expr::Const(*i as f64)),
            _ => Err(ConvertError::ConstOperator(format!(
                "expected numeric constant: {value:?}"
            ))),
        },
        Operator::VariableIdentifierRead { identifier } => Ok(Expr::Var(identifier.to_string())),
        Operator::FunctionIdentifier { identifier } => {
            let children = node.children();
            let arg = Box::new(build_expr(&children[0])?);
            match identifier.as_str() {
                "abs" => Ok(Expr::Abs(arg)),
                "exp" => Ok(Expr::Exp(arg)),
                "ln" | "log" => Ok(Expr::Ln(arg)),
                "sqrt" => Ok(Expr::Sqrt(arg)),
                "sin" => Ok(Expr::Sin(arg)),
                "cos" => Ok(Expr::Cos(arg)),
                _ => Err(ConvertError::UnsupportedFunction(format!(
                    "unsupported function: {identifier:?}"
                ))),
            }
        }
        // exponent must be a numeric constant; expression exponents reach us
        // via explicit Expr construction instead
        Operator::Exp => {
            let children = node.children();
            let base = Box::new(build_expr(&children[0])?);
            match children[1].operator() {
                Operator::Const {
                    value: evalexpr::Value::Int(exp),
                } => Ok(Expr::Pow(base, *exp)),
                Operator::Const {
                    value: evalexpr::Value::Float(exp),
                } => Ok(Expr::PowFloat(base, *exp)),
                other => {
                    let exponent = build_expr(&children[1])
                        .map_err(|_| ConvertError::ExpOperator(format!("{other:?}")))?;
                    Ok(Expr::PowExpr(base, Box::new(exponent)))
                }
            }
        }
        Operator::RootNode => {
            let children = node.children();
            if children.len() == 1 {
                build_expr(&children[0])
            } else {
                Err(ConvertError::RootNode(format!(
                    "expected single child for root node: {children:?}"
                )))
            }
        }
        other => Err(ConvertError::UnsupportedOperator(format!(
            "unsupported operator: {other:?}"
        ))),
    }
}

/// Splits an equation string of the form `lhs = rhs` into both sides; a
/// plain expression is treated as a residual (`0 = expr`).
///
/// The split happens before parsing because both sides are arbitrary
/// expressions, which assignment syntax does not allow.
pub fn parse_equation(src: &str) -> Result<(Expr, Expr), CompileError> {
    if let Some(pos) = find_equation_sign(src) {
        let lhs = parse_expr(&src[..pos])?;
        let rhs = parse_expr(&src[pos + 1..])?;
        return Ok((lhs, rhs));
    }
    Ok((Expr::Const(0.0), parse_expr(src)?))
}

// A bare `=`, as opposed to `==`, `<=`, `>=` or `!=`.
fn find_equation_sign(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'=' {
            continue;
        }
        let prev = i.checked_sub(1).map(|j| bytes[j]);
        if matches!(prev, Some(b'=') | Some(b'<') | Some(b'>') | Some(b'!')) {
            continue;
        }
        if bytes.get(i + 1) == Some(&b'=') {
            continue;
        }
        return Some(i);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arithmetic() {
        let expr = parse_expr("sigma * (y - x)").unwrap();
        assert_eq!(
            expr,
            Expr::Mul(
                Box::new(Expr::var("sigma")),
                Box::new(Expr::Sub(
                    Box::new(Expr::var("y")),
                    Box::new(Expr::var("x"))
                ))
            )
        );
    }

    #[test]
    fn test_parse_integer_power() {
        let expr = parse_expr("x^3").unwrap();
        assert_eq!(expr, Expr::Pow(Box::new(Expr::var("x")), 3));
    }

    #[test]
    fn test_parse_functions() {
        assert_eq!(
            parse_expr("sin(x)").unwrap(),
            Expr::Sin(Box::new(Expr::var("x")))
        );
        assert_eq!(
            parse_expr("sqrt(x)").unwrap(),
            Expr::Sqrt(Box::new(Expr::var("x")))
        );
        assert!(matches!(
            parse_expr("gamma(x)"),
            Err(CompileError::ConvertError(
                ConvertError::UnsupportedFunction(_)
            ))
        ));
    }

    #[test]
    fn test_parse_equation_sides() {
        let (lhs, rhs) = parse_equation("x * y = beta * z").unwrap();
        assert_eq!(
            lhs,
            Expr::Mul(Box::new(Expr::var("x")), Box::new(Expr::var("y")))
        );
        assert_eq!(
            rhs,
            Expr::Mul(Box::new(Expr::var("beta")), Box::new(Expr::var("z")))
        );
    }

    #[test]
    fn test_parse_equation_residual_form() {
        let (lhs, rhs) = parse_equation("x - 1").unwrap();
        assert_eq!(lhs, Expr::Const(0.0));
        assert_eq!(
            rhs,
            Expr::Sub(Box::new(Expr::var("x")), Box::new(Expr::Const(1.0)))
        );
    }
}
