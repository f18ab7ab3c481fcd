//! Symbolic arithmetic over IR expressions.
//!
//! Thin constructors for `Binary` / `Unary` / `Compare` nodes, operator
//! overloading on [`Expr`], integer matrices with Smith Normal Form, the
//! [`ExtRange`] interval type and range inference.

pub mod infer;
pub mod matrix;
pub mod range;

pub use infer::{RangeInference, eval_expr_range};
pub use matrix::{Matrix, ext_euclidean, smith_normalize};
pub use range::{ExtRange, ExtRangeKind};

use crate::core::error::{Result, TensorError};
use crate::core::ir::{BinaryOp, CompareOp, Expr, UnaryOp};
use crate::core::types::Type;

/// `a + b`, typed like `a`.
#[must_use]
pub fn add(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::Add, a.clone(), b.clone())
}

/// `a - b`, typed like `a`.
#[must_use]
pub fn sub(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::Sub, a.clone(), b.clone())
}

/// `-a`.
#[must_use]
pub fn neg(a: &Expr) -> Expr {
    Expr::unary(a.ty(), UnaryOp::Neg, a.clone())
}

/// `a * b`, typed like `a`.
#[must_use]
pub fn mul(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::Mul, a.clone(), b.clone())
}

/// `a / b`, typed like `a`.
#[must_use]
pub fn div(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::Div, a.clone(), b.clone())
}

/// `a % b` (truncating remainder), typed like `a`.
#[must_use]
pub fn modulo(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::Mod, a.clone(), b.clone())
}

/// `a // b` (flooring division), typed like `a`.
#[must_use]
pub fn floordiv(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::FloorDiv, a.clone(), b.clone())
}

/// Flooring remainder, typed like `a`.
#[must_use]
pub fn floormod(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(a.ty(), BinaryOp::FloorMod, a.clone(), b.clone())
}

/// Boolean `a && b`.
#[must_use]
pub fn logic_and(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(Type::bool_scalar(), BinaryOp::And, a.clone(), b.clone())
}

/// Boolean `a || b`.
#[must_use]
pub fn logic_or(a: &Expr, b: &Expr) -> Expr {
    Expr::binary(Type::bool_scalar(), BinaryOp::Or, a.clone(), b.clone())
}

/// `a == b`.
#[must_use]
pub fn eq(a: &Expr, b: &Expr) -> Expr {
    Expr::compare(CompareOp::EQ, a.clone(), b.clone())
}

/// `a != b`.
#[must_use]
pub fn ne(a: &Expr, b: &Expr) -> Expr {
    Expr::compare(CompareOp::NE, a.clone(), b.clone())
}

/// `a > b`.
#[must_use]
pub fn gt(a: &Expr, b: &Expr) -> Expr {
    Expr::compare(CompareOp::GT, a.clone(), b.clone())
}

/// `a >= b`.
#[must_use]
pub fn ge(a: &Expr, b: &Expr) -> Expr {
    Expr::compare(CompareOp::GE, a.clone(), b.clone())
}

/// `a < b`.
#[must_use]
pub fn lt(a: &Expr, b: &Expr) -> Expr {
    Expr::compare(CompareOp::LT, a.clone(), b.clone())
}

/// `a <= b`.
#[must_use]
pub fn le(a: &Expr, b: &Expr) -> Expr {
    Expr::compare(CompareOp::LE, a.clone(), b.clone())
}

/// Symbolic product of an integer matrix with an expression vector.
///
/// Zero entries are skipped, so the result rows stay small; every row starts
/// from a literal zero that the simplifier later removes.
pub fn relax_matrix_array_product(m: &Matrix<i64>, v: &[Expr]) -> Result<Vec<Expr>> {
    if m.width() > v.len() {
        return Err(TensorError::shape_mismatch(format!(
            "matrix-array product: {} columns vs. {} entries",
            m.width(),
            v.len()
        )));
    }
    let mut res = Vec::with_capacity(m.height());
    for i in 0..m.height() {
        let mut acc = Expr::int32(0);
        for (j, item) in v.iter().enumerate().take(m.width()) {
            let c = m[(i, j)];
            if c != 0 {
                acc = add(&acc, &mul(item, &Expr::int32(c)));
            }
        }
        res.push(acc);
    }
    Ok(res)
}

// Operator overloading on expression handles; all four ref/value pairings
// delegate to the borrowing builders above.

macro_rules! impl_expr_binop {
    ($trait:ident, $method:ident, $builder:ident) => {
        impl std::ops::$trait<&Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                $builder(self, rhs)
            }
        }

        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                $builder(&self, &rhs)
            }
        }

        impl std::ops::$trait<i64> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                $builder(self, &Expr::int(self.ty(), rhs))
            }
        }

        impl std::ops::$trait<i64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                $builder(&self, &Expr::int(self.ty(), rhs))
            }
        }
    };
}

impl_expr_binop!(Add, add, add);
impl_expr_binop!(Sub, sub, sub);
impl_expr_binop!(Mul, mul, mul);
impl_expr_binop!(Div, div, div);

impl std::ops::Neg for &Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        neg(self)
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        neg(&self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ir::ExprKind;

    #[test]
    fn builders_type_propagation() {
        let a = Expr::int32(1);
        let b = Expr::int32(2);
        let s = add(&a, &b);
        assert_eq!(s.ty(), Type::int_scalar(32));
        assert!(matches!(
            s.kind(),
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
        let c = lt(&a, &b);
        assert!(c.ty().is_bool());
    }

    #[test]
    fn operator_overloads() {
        let a = Expr::int32(3);
        let b = Expr::int32(4);
        assert_eq!(&a + &b, add(&a, &b));
        assert_eq!(&a * 2, mul(&a, &Expr::int32(2)));
        assert_eq!(-&a, neg(&a));
    }

    #[test]
    fn matrix_vector_product_skips_zeros() {
        let m = Matrix::from_rows(&[vec![1, 0], vec![0, -2]]).expect("matrix");
        let v = vec![Expr::int32(5), Expr::int32(7)];
        let rows = relax_matrix_array_product(&m, &v).expect("product");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].to_string(), "(0 + (5 * 1))");
        assert_eq!(rows[1].to_string(), "(0 + (7 * -2))");
    }

    #[test]
    fn matrix_vector_product_shape_check() {
        let m = Matrix::from_rows(&[vec![1, 2, 3]]).expect("matrix");
        let v = vec![Expr::int32(0)];
        assert!(relax_matrix_array_product(&m, &v).is_err());
    }
}
