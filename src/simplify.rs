//! Unit-element elimination and constant folding.
//!
//! This is deliberately *not* an algebraic normalizer: it removes the
//! additive/multiplicative units and folds immediate operands, nothing more.
//! The gradient engine leans on it to erase the `0 +`, `* 1` and `* 0`
//! scaffolding its rewrites leave behind; every rule preserves the value of
//! the expression under any valuation of its indices.

use crate::core::error::Result;
use crate::core::ir::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::core::visitor::IrMutator;

const FLOAT_EPS: f64 = 1e-20;

fn float_value(e: &Expr) -> Option<f64> {
    match e.kind() {
        ExprKind::FloatImm(v) => Some(*v),
        _ => None,
    }
}

fn bool_value(e: &Expr) -> Option<bool> {
    match e.kind() {
        ExprKind::IntImm(v) => Some(*v != 0),
        ExprKind::UIntImm(v) => Some(*v != 0),
        _ => None,
    }
}

struct SimplifyUnitElement;

impl IrMutator for SimplifyUnitElement {
    fn mutate_unary(&mut self, expr: &Expr, op: UnaryOp, a: &Expr) -> Result<Expr> {
        let new_a = self.mutate_expr(a)?;
        match op {
            UnaryOp::Neg => {
                if let Some(v) = new_a.int_value() {
                    return Ok(Expr::int(new_a.ty(), -v));
                }
                if let Some(v) = float_value(&new_a) {
                    return Ok(Expr::float(new_a.ty(), -v));
                }
                if let ExprKind::Unary {
                    op: UnaryOp::Neg,
                    a: inner,
                } = new_a.kind()
                {
                    return Ok(inner.clone());
                }
            }
            UnaryOp::Not => {
                if let Some(v) = new_a.int_value() {
                    return Ok(Expr::int(expr.ty(), i64::from(v == 0)));
                }
                if let ExprKind::Unary {
                    op: UnaryOp::Not,
                    a: inner,
                } = new_a.kind()
                {
                    return Ok(inner.clone());
                }
            }
        }
        if new_a.same_as(a) {
            Ok(expr.clone())
        } else {
            Ok(Expr::unary(expr.ty(), op, new_a))
        }
    }

    fn mutate_binary(&mut self, expr: &Expr, op: BinaryOp, a: &Expr, b: &Expr) -> Result<Expr> {
        let new_a = self.mutate_expr(a)?;
        let new_b = self.mutate_expr(b)?;
        let a_int = new_a.int_value();
        let b_int = new_b.int_value();
        let a_float = float_value(&new_a);
        let b_float = float_value(&new_b);

        match op {
            BinaryOp::Add => {
                if let (Some(x), Some(y)) = (a_int, b_int) {
                    return Ok(Expr::int(new_a.ty(), x + y));
                }
                if let (Some(x), Some(y)) = (a_float, b_float) {
                    return Ok(Expr::float(new_a.ty(), x + y));
                }
                if a_int == Some(0) || a_float.is_some_and(|v| v.abs() < FLOAT_EPS) {
                    return Ok(new_b);
                }
                if b_int == Some(0) || b_float.is_some_and(|v| v.abs() < FLOAT_EPS) {
                    return Ok(new_a);
                }
            }
            BinaryOp::Sub => {
                if let (Some(x), Some(y)) = (a_int, b_int) {
                    return Ok(Expr::int(new_a.ty(), x - y));
                }
                if let (Some(x), Some(y)) = (a_float, b_float) {
                    return Ok(Expr::float(new_a.ty(), x - y));
                }
                if a_int == Some(0) || a_float.is_some_and(|v| v.abs() < FLOAT_EPS) {
                    return Ok(Expr::unary(new_b.ty(), UnaryOp::Neg, new_b));
                }
                if b_int == Some(0) || b_float.is_some_and(|v| v.abs() < FLOAT_EPS) {
                    return Ok(new_a);
                }
            }
            BinaryOp::Mul => {
                if let (Some(x), Some(y)) = (a_int, b_int) {
                    return Ok(Expr::int(new_a.ty(), x * y));
                }
                if let (Some(x), Some(y)) = (a_float, b_float) {
                    return Ok(Expr::float(new_a.ty(), x * y));
                }
                if let Some(x) = a_int {
                    match x {
                        0 => return Ok(new_b.zero_like()),
                        1 => return Ok(new_b),
                        -1 => return Ok(Expr::unary(new_b.ty(), UnaryOp::Neg, new_b)),
                        _ => {}
                    }
                }
                if let Some(y) = b_int {
                    match y {
                        0 => return Ok(new_a.zero_like()),
                        1 => return Ok(new_a),
                        -1 => return Ok(Expr::unary(new_a.ty(), UnaryOp::Neg, new_a)),
                        _ => {}
                    }
                }
                if let Some(x) = a_float {
                    if x.abs() < FLOAT_EPS {
                        return Ok(new_b.zero_like());
                    }
                    if (x - 1.0).abs() < FLOAT_EPS {
                        return Ok(new_b);
                    }
                    if (x + 1.0).abs() < FLOAT_EPS {
                        return Ok(Expr::unary(new_b.ty(), UnaryOp::Neg, new_b));
                    }
                }
                if let Some(y) = b_float {
                    if y.abs() < FLOAT_EPS {
                        return Ok(new_a.zero_like());
                    }
                    if (y - 1.0).abs() < FLOAT_EPS {
                        return Ok(new_a);
                    }
                    if (y + 1.0).abs() < FLOAT_EPS {
                        return Ok(Expr::unary(new_a.ty(), UnaryOp::Neg, new_a));
                    }
                }
            }
            BinaryOp::Div => {
                if let (Some(x), Some(y)) = (a_int, b_int) {
                    if y != 0 {
                        return Ok(Expr::int(new_a.ty(), x / y));
                    }
                }
                if let (Some(x), Some(y)) = (a_float, b_float) {
                    return Ok(Expr::float(new_a.ty(), x / y));
                }
                if a_int == Some(0) || a_float.is_some_and(|v| v.abs() < FLOAT_EPS) {
                    return Ok(new_a);
                }
                match b_int {
                    Some(1) => return Ok(new_a),
                    Some(-1) => return Ok(Expr::unary(new_a.ty(), UnaryOp::Neg, new_a)),
                    _ => {}
                }
                if let Some(y) = b_float {
                    if (y - 1.0).abs() < FLOAT_EPS {
                        return Ok(new_a);
                    }
                    if (y + 1.0).abs() < FLOAT_EPS {
                        return Ok(Expr::unary(new_a.ty(), UnaryOp::Neg, new_a));
                    }
                }
            }
            BinaryOp::Mod | BinaryOp::FloorMod => {
                // integer semantics only
                if let (Some(x), Some(y)) = (a_int, b_int) {
                    if y != 0 {
                        let r = if op == BinaryOp::Mod {
                            x % y
                        } else {
                            x.rem_euclid(y.abs())
                        };
                        return Ok(Expr::int(new_a.ty(), r));
                    }
                }
                if a_int == Some(0) {
                    return Ok(new_a);
                }
                if b_int == Some(1) || b_int == Some(-1) {
                    return Ok(Expr::int(new_a.ty(), 0));
                }
            }
            BinaryOp::FloorDiv => {
                if let (Some(x), Some(y)) = (a_int, b_int) {
                    if y != 0 {
                        return Ok(Expr::int(new_a.ty(), x.div_euclid(y)));
                    }
                }
                if a_int == Some(0) {
                    return Ok(new_a);
                }
                match b_int {
                    Some(1) => return Ok(new_a),
                    Some(-1) => return Ok(Expr::unary(new_a.ty(), UnaryOp::Neg, new_a)),
                    _ => {}
                }
            }
            BinaryOp::And => {
                match (bool_value(&new_a), bool_value(&new_b)) {
                    (Some(false), _) | (_, Some(false)) => {
                        return Ok(Expr::bool_const(false));
                    }
                    (Some(true), _) => return Ok(new_b),
                    (_, Some(true)) => return Ok(new_a),
                    _ => {}
                }
            }
            BinaryOp::Or => {
                match (bool_value(&new_a), bool_value(&new_b)) {
                    (Some(true), _) | (_, Some(true)) => {
                        return Ok(Expr::bool_const(true));
                    }
                    (Some(false), _) => return Ok(new_b),
                    (_, Some(false)) => return Ok(new_a),
                    _ => {}
                }
            }
        }

        if new_a.same_as(a) && new_b.same_as(b) {
            Ok(expr.clone())
        } else {
            Ok(Expr::binary(expr.ty(), op, new_a, new_b))
        }
    }
}

/// Simplify an expression by unit elimination and constant folding.
pub fn simplify(expr: &Expr) -> Result<Expr> {
    SimplifyUnitElement.mutate_expr(expr)
}

#[cfg(test)]
mod tests {
    use crate::arith::{add, div, floordiv, modulo, mul, neg, sub};
    use crate::core::ir::IndexKind;
    use crate::core::types::Type;

    use super::*;

    fn index(name: &str) -> Expr {
        Expr::index(
            Type::int_scalar(32),
            name,
            Expr::dom_i32(0, 16),
            IndexKind::Spatial,
        )
    }

    #[test]
    fn folds_integer_constants() {
        let e = mul(&add(&Expr::int32(1), &Expr::int32(2)), &Expr::int32(4));
        assert_eq!(simplify(&e).expect("simplify"), Expr::int32(12));
    }

    #[test]
    fn removes_units() {
        let i = index("i");
        assert_eq!(simplify(&add(&Expr::int32(0), &i)).expect("ok"), i);
        assert_eq!(simplify(&mul(&i, &Expr::int32(1))).expect("ok"), i);
        assert_eq!(simplify(&div(&i, &Expr::int32(1))).expect("ok"), i);
        let z = simplify(&mul(&i, &Expr::int32(0))).expect("ok");
        assert_eq!(z.int_value(), Some(0));
    }

    #[test]
    fn zero_minus_becomes_negation() {
        let i = index("i");
        let s = simplify(&sub(&Expr::int32(0), &i)).expect("ok");
        assert_eq!(s, neg(&i));
    }

    #[test]
    fn double_negation_cancels() {
        let i = index("i");
        assert_eq!(simplify(&neg(&neg(&i))).expect("ok"), i);
    }

    #[test]
    fn mul_by_minus_one_negates() {
        let i = index("i");
        assert_eq!(simplify(&mul(&i, &Expr::int32(-1))).expect("ok"), neg(&i));
    }

    #[test]
    fn mod_by_unit_is_zero() {
        let i = index("i");
        assert_eq!(
            simplify(&modulo(&i, &Expr::int32(1))).expect("ok").int_value(),
            Some(0)
        );
    }

    #[test]
    fn floordiv_untouched_by_larger_literals() {
        let i = index("i");
        let e = floordiv(&i, &Expr::int32(8));
        assert_eq!(simplify(&e).expect("ok"), e);
    }

    #[test]
    fn true_seed_vanishes_from_conjunction() {
        let i = index("i");
        let cond = crate::arith::lt(&i, &Expr::int32(5));
        let seeded = crate::arith::logic_and(&Expr::bool_const(true), &cond);
        assert_eq!(simplify(&seeded).expect("ok"), cond);
    }

    #[test]
    fn float_units() {
        let ty = Type::float_scalar(32);
        let i = index("i");
        let e = add(&Expr::float(ty, 0.0), &i);
        assert_eq!(simplify(&e).expect("ok"), i);
        let e = mul(&Expr::float(ty, 2.0), &Expr::float(ty, 3.0));
        assert_eq!(simplify(&e).expect("ok"), Expr::float(ty, 6.0));
    }
}
