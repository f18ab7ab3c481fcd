//! Integer coefficient extraction from affine access expressions.
//!
//! After floor-div/mod elimination every access expression is an integer
//! affine combination of named indices plus a constant. This pass returns
//! that combination as a map from index name to coefficient, with the
//! constant under the reserved [`CONST_TAG`] key.

use rustc_hash::FxHashMap;

use crate::core::error::{Result, TensorError};
use crate::core::ir::{BinaryOp, Expr, ExprKind, UnaryOp};

/// Reserved key holding the constant term; `$` keeps it out of the index
/// namespace.
pub const CONST_TAG: &str = "$const";

fn is_constant(map: &FxHashMap<String, i64>) -> bool {
    map.keys().all(|k| k == CONST_TAG)
}

fn constant_of(map: &FxHashMap<String, i64>) -> i64 {
    map.get(CONST_TAG).copied().unwrap_or(0)
}

/// Extract `name -> coefficient` (plus [`CONST_TAG`]) from an affine
/// expression. Fails on any non-affine shape, including a product of two
/// non-constant subexpressions.
pub fn extract_coefficients(expr: &Expr) -> Result<FxHashMap<String, i64>> {
    let mut map = walk(expr)?;
    map.entry(CONST_TAG.to_string()).or_insert(0);
    Ok(map)
}

fn walk(expr: &Expr) -> Result<FxHashMap<String, i64>> {
    let mut out = FxHashMap::default();
    match expr.kind() {
        ExprKind::IntImm(v) => {
            out.insert(CONST_TAG.to_string(), *v);
        }
        ExprKind::UIntImm(v) => {
            out.insert(CONST_TAG.to_string(), *v as i64);
        }
        ExprKind::Index { name, .. } => {
            out.insert(name.clone(), 1);
        }
        ExprKind::Unary {
            op: UnaryOp::Neg,
            a,
        } => {
            out = walk(a)?;
            for v in out.values_mut() {
                *v = -*v;
            }
        }
        ExprKind::Binary { op, a, b } => match op {
            BinaryOp::Add => {
                out = walk(a)?;
                for (k, v) in walk(b)? {
                    *out.entry(k).or_insert(0) += v;
                }
            }
            BinaryOp::Sub => {
                out = walk(a)?;
                for (k, v) in walk(b)? {
                    *out.entry(k).or_insert(0) -= v;
                }
            }
            BinaryOp::Mul => {
                let ma = walk(a)?;
                let mb = walk(b)?;
                if is_constant(&mb) {
                    let c = constant_of(&mb);
                    out = ma;
                    for v in out.values_mut() {
                        *v *= c;
                    }
                } else if is_constant(&ma) {
                    let c = constant_of(&ma);
                    out = mb;
                    for v in out.values_mut() {
                        *v *= c;
                    }
                } else {
                    return Err(TensorError::unsupported(
                        "ExtractIndexCoefficients",
                        expr.to_string(),
                    ));
                }
            }
            _ => {
                return Err(TensorError::unsupported(
                    "ExtractIndexCoefficients",
                    expr.to_string(),
                ));
            }
        },
        _ => {
            return Err(TensorError::unsupported(
                "ExtractIndexCoefficients",
                expr.to_string(),
            ));
        }
    }
    Ok(out)
}
