//! Range inference over symbolic index expressions.
//!
//! Two directions are provided:
//!
//! - [`RangeInference`] walks an expression *backwards*: given the range the
//!   whole expression is known to take, it pushes per-operand expectation
//!   frames down the tree and records the implied range of every `Index` it
//!   reaches. This is how fresh reduction axes acquire bounds.
//! - [`eval_expr_range`] walks *forwards*: it computes a conservative range
//!   of an affine expression from the known ranges of its indices. The
//!   gradient engine uses it to drop bound checks that are provably
//!   redundant.
//!
//! Back-propagation only understands the shapes the gradient engine emits:
//! add/sub/mul with one integer-literal operand, floor division by an
//! integer literal, and negation. Anything else is a fatal inference error
//! (or, for flooring remainders, an unbounded fallback with a warning).

use rustc_hash::FxHashMap;

use crate::core::error::{Result, TensorError};
use crate::core::ir::{BinaryOp, Expr, ExprKind, IndexKind, UnaryOp};
use crate::core::visitor::IrVisitor;

use super::range::{ExtRange, ExtRangeKind};

/// Back-propagates an expected result range onto named indices.
pub struct RangeInference {
    scope: Vec<ExtRange>,
    /// Ranges recorded for every index reached by the walk.
    pub range_map: FxHashMap<String, ExtRange>,
}

impl RangeInference {
    /// Start an inference with the expected range of the root expression.
    #[must_use]
    pub fn new(init: ExtRange) -> Self {
        RangeInference {
            scope: vec![init],
            range_map: FxHashMap::default(),
        }
    }

    /// Infer ranges for all indices reachable in `expr`.
    pub fn infer(&mut self, expr: &Expr) -> Result<()> {
        self.visit_expr(expr)
    }

    fn current(&self) -> ExtRange {
        *self.scope.last().unwrap_or(&ExtRange::unbounded())
    }

    fn descend(&mut self, frame: ExtRange, child: &Expr) -> Result<()> {
        self.scope.push(frame);
        let out = self.visit_expr(child);
        self.scope.pop();
        out
    }
}

impl IrVisitor for RangeInference {
    fn visit_index(&mut self, _expr: &Expr, name: &str, _dom: &Expr, _kind: IndexKind) -> Result<()> {
        let frame = self.current();
        self.range_map
            .entry(name.to_string())
            .and_modify(|r| *r = r.intersect(&frame))
            .or_insert(frame);
        Ok(())
    }

    fn visit_unary(&mut self, _expr: &Expr, op: UnaryOp, a: &Expr) -> Result<()> {
        if op != UnaryOp::Neg {
            return Ok(());
        }
        let cur = self.current();
        let frame = match cur.kind() {
            ExtRangeKind::LCRC => ExtRange::bounded(-cur.right, -cur.left),
            ExtRangeKind::LCRO => ExtRange {
                left: 0,
                right: -cur.left,
                left_inf: true,
                right_inf: false,
            },
            ExtRangeKind::LORC => ExtRange {
                left: -cur.right,
                right: 0,
                left_inf: false,
                right_inf: true,
            },
            ExtRangeKind::LORO => cur,
        };
        self.descend(frame, a)
    }

    fn visit_binary(&mut self, expr: &Expr, op: BinaryOp, a: &Expr, b: &Expr) -> Result<()> {
        let cur = self.current();
        match op {
            BinaryOp::Add => {
                if let Some(bias) = a.int_value() {
                    self.descend(cur.shift(-bias), b)
                } else if let Some(bias) = b.int_value() {
                    self.descend(cur.shift(-bias), a)
                } else {
                    Ok(())
                }
            }
            BinaryOp::Sub => {
                if let Some(bias) = a.int_value() {
                    // bias - x in cur
                    let frame = match cur.kind() {
                        ExtRangeKind::LCRC => {
                            ExtRange::bounded(bias - cur.right, bias - cur.left)
                        }
                        ExtRangeKind::LCRO => ExtRange {
                            left: 0,
                            right: bias - cur.left,
                            left_inf: true,
                            right_inf: false,
                        },
                        ExtRangeKind::LORC => ExtRange {
                            left: bias - cur.right,
                            right: 0,
                            left_inf: false,
                            right_inf: true,
                        },
                        ExtRangeKind::LORO => cur,
                    };
                    self.descend(frame, b)
                } else if let Some(bias) = b.int_value() {
                    self.descend(cur.shift(bias), a)
                } else {
                    Ok(())
                }
            }
            BinaryOp::Mul => {
                let (bias, other) = if let Some(v) = a.int_value() {
                    (Some(v), b)
                } else if let Some(v) = b.int_value() {
                    (Some(v), a)
                } else {
                    (None, a)
                };
                let Some(bias) = bias else { return Ok(()) };
                let frame = mul_frame(cur, bias);
                self.descend(frame, other)
            }
            BinaryOp::FloorDiv => {
                if a.int_value().is_some() {
                    eprintln!(
                        "Warning: no concrete bound for a constant dividend in {expr}"
                    );
                    self.descend(ExtRange::unbounded(), b)
                } else if let Some(bias) = b.int_value() {
                    if bias == 0 {
                        return Err(TensorError::DivisionByZero {
                            node: expr.to_string(),
                        });
                    }
                    self.descend(floordiv_frame(cur, bias), a)
                } else {
                    Ok(())
                }
            }
            BinaryOp::FloorMod => {
                eprintln!("Warning: flooring remainder is not inverted in {expr}");
                Ok(())
            }
            _ => Err(TensorError::unsupported("RangeInference", expr.to_string())),
        }
    }
}

// Expected range of x given that x * bias lies in cur.
fn mul_frame(cur: ExtRange, bias: i64) -> ExtRange {
    if bias == 0 {
        return ExtRange::bounded(0, 1);
    }
    if bias > 0 {
        match cur.kind() {
            ExtRangeKind::LCRC => ExtRange::bounded(
                cur.left.div_euclid(bias),
                (cur.right + bias - 1).div_euclid(bias),
            ),
            ExtRangeKind::LCRO => ExtRange {
                left: cur.left.div_euclid(bias),
                right: 0,
                left_inf: false,
                right_inf: true,
            },
            ExtRangeKind::LORC => ExtRange {
                left: 0,
                right: (cur.right + bias - 1).div_euclid(bias),
                left_inf: true,
                right_inf: false,
            },
            ExtRangeKind::LORO => cur,
        }
    } else {
        let m = -bias;
        match cur.kind() {
            ExtRangeKind::LCRC => ExtRange::bounded(
                -((cur.right + m - 1).div_euclid(m) - 1),
                -(cur.left.div_euclid(m) - 1),
            ),
            ExtRangeKind::LCRO => ExtRange {
                left: 0,
                right: -(cur.left.div_euclid(m) - 1),
                left_inf: true,
                right_inf: false,
            },
            ExtRangeKind::LORC => ExtRange {
                left: -((cur.right + m - 1).div_euclid(m) - 1),
                right: 0,
                left_inf: false,
                right_inf: true,
            },
            ExtRangeKind::LORO => cur,
        }
    }
}

// Expected range of x given that x // bias lies in cur; truncation widens
// the upper side by bias - 1.
fn floordiv_frame(cur: ExtRange, bias: i64) -> ExtRange {
    if bias > 0 {
        match cur.kind() {
            ExtRangeKind::LCRC => {
                ExtRange::bounded(cur.left * bias, cur.right * bias + bias - 1)
            }
            ExtRangeKind::LORC => ExtRange {
                left: 0,
                right: cur.right * bias + bias - 1,
                left_inf: true,
                right_inf: false,
            },
            ExtRangeKind::LCRO => ExtRange {
                left: cur.left * bias,
                right: 0,
                left_inf: false,
                right_inf: true,
            },
            ExtRangeKind::LORO => cur,
        }
    } else {
        match cur.kind() {
            ExtRangeKind::LCRC => ExtRange::bounded(
                cur.right * bias + bias - 1,
                cur.left * bias + 1,
            ),
            ExtRangeKind::LORC => ExtRange {
                left: cur.right * bias + bias - 1,
                right: 0,
                left_inf: false,
                right_inf: true,
            },
            ExtRangeKind::LCRO => ExtRange {
                left: 0,
                right: cur.left * bias + 1,
                left_inf: true,
                right_inf: false,
            },
            ExtRangeKind::LORO => cur,
        }
    }
}

fn neg_range(r: ExtRange) -> ExtRange {
    ExtRange {
        left: if r.right_inf { 0 } else { 1 - r.right },
        right: if r.left_inf { 0 } else { 1 - r.left },
        left_inf: r.right_inf,
        right_inf: r.left_inf,
    }
}

fn add_ranges(a: ExtRange, b: ExtRange) -> ExtRange {
    ExtRange {
        left: if a.left_inf || b.left_inf {
            0
        } else {
            a.left + b.left
        },
        right: if a.right_inf || b.right_inf {
            0
        } else {
            a.right + b.right - 1
        },
        left_inf: a.left_inf || b.left_inf,
        right_inf: a.right_inf || b.right_inf,
    }
}

fn scale_range(r: ExtRange, c: i64) -> ExtRange {
    if c == 0 {
        return ExtRange::bounded(0, 1);
    }
    if c > 0 {
        ExtRange {
            left: if r.left_inf { 0 } else { r.left * c },
            right: if r.right_inf { 0 } else { (r.right - 1) * c + 1 },
            left_inf: r.left_inf,
            right_inf: r.right_inf,
        }
    } else {
        ExtRange {
            left: if r.right_inf { 0 } else { (r.right - 1) * c },
            right: if r.left_inf { 0 } else { r.left * c + 1 },
            left_inf: r.right_inf,
            right_inf: r.left_inf,
        }
    }
}

/// Conservative forward range of an affine expression over known indices.
///
/// Every returned interval is a superset of the values `expr` can take, so
/// containment in a target range proves a bound check redundant. Unknown
/// shapes degrade to unbounded, never to a narrower interval.
#[must_use]
pub fn eval_expr_range(expr: &Expr, range_map: &FxHashMap<String, ExtRange>) -> ExtRange {
    match expr.kind() {
        ExprKind::IntImm(v) => ExtRange::bounded(*v, *v + 1),
        ExprKind::UIntImm(v) => {
            let v = *v as i64;
            ExtRange::bounded(v, v + 1)
        }
        ExprKind::Index { name, .. } => range_map
            .get(name)
            .copied()
            .unwrap_or_else(ExtRange::unbounded),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            a,
        } => neg_range(eval_expr_range(a, range_map)),
        ExprKind::Binary { op, a, b } => {
            let ra = eval_expr_range(a, range_map);
            let rb = eval_expr_range(b, range_map);
            match op {
                BinaryOp::Add => add_ranges(ra, rb),
                BinaryOp::Sub => add_ranges(ra, neg_range(rb)),
                BinaryOp::Mul => {
                    if let Some(c) = a.int_value() {
                        scale_range(rb, c)
                    } else if let Some(c) = b.int_value() {
                        scale_range(ra, c)
                    } else {
                        ExtRange::unbounded()
                    }
                }
                BinaryOp::FloorDiv => match b.int_value() {
                    Some(c) if c > 0 => ExtRange {
                        left: if ra.left_inf { 0 } else { ra.left.div_euclid(c) },
                        right: if ra.right_inf {
                            0
                        } else {
                            (ra.right - 1).div_euclid(c) + 1
                        },
                        left_inf: ra.left_inf,
                        right_inf: ra.right_inf,
                    },
                    _ => ExtRange::unbounded(),
                },
                BinaryOp::FloorMod => match b.int_value() {
                    Some(c) if c > 0 => ExtRange::bounded(0, c),
                    _ => ExtRange::unbounded(),
                },
                _ => ExtRange::unbounded(),
            }
        }
        _ => ExtRange::unbounded(),
    }
}

#[cfg(test)]
mod tests {
    use crate::arith::{floordiv, mul, sub};
    use crate::core::types::Type;

    use super::*;

    fn index(name: &str, begin: i64, extent: i64) -> Expr {
        Expr::index(
            Type::int_scalar(32),
            name,
            Expr::dom_i32(begin, extent),
            IndexKind::Reduce,
        )
    }

    #[test]
    fn plain_index_takes_target_range() {
        let r0 = index("r0", 0, 0);
        let mut inf = RangeInference::new(ExtRange::bounded(0, 512));
        inf.infer(&r0).expect("infer");
        assert_eq!(inf.range_map["r0"], ExtRange::bounded(0, 512));
    }

    #[test]
    fn add_literal_shifts() {
        let r0 = index("r0", 0, 0);
        let e = &r0 + 3;
        let mut inf = RangeInference::new(ExtRange::bounded(0, 10));
        inf.infer(&e).expect("infer");
        assert_eq!(inf.range_map["r0"], ExtRange::bounded(-3, 7));
    }

    #[test]
    fn mul_literal_divides_bounds() {
        let r0 = index("r0", 0, 0);
        let e = mul(&r0, &Expr::int32(4));
        let mut inf = RangeInference::new(ExtRange::bounded(0, 64));
        inf.infer(&e).expect("infer");
        // target [0, 64) under x*4 gives [0, (64+3)//4) = [0, 16)
        assert_eq!(inf.range_map["r0"], ExtRange::bounded(0, 16));
    }

    #[test]
    fn floordiv_literal_multiplies_and_widens() {
        let r0 = index("r0", 0, 0);
        let e = floordiv(&r0, &Expr::int32(8));
        let mut inf = RangeInference::new(ExtRange::bounded(0, 8));
        inf.infer(&e).expect("infer");
        assert_eq!(inf.range_map["r0"], ExtRange::bounded(0, 71));
    }

    #[test]
    fn floordiv_by_zero_is_fatal() {
        let r0 = index("r0", 0, 0);
        let e = floordiv(&r0, &Expr::int32(0));
        let mut inf = RangeInference::new(ExtRange::bounded(0, 8));
        assert!(matches!(
            inf.infer(&e),
            Err(TensorError::DivisionByZero { .. })
        ));
    }

    #[test]
    fn unsupported_binary_is_fatal() {
        let r0 = index("r0", 0, 0);
        let e = crate::arith::modulo(&r0, &Expr::int32(3));
        let mut inf = RangeInference::new(ExtRange::bounded(0, 8));
        assert!(inf.infer(&e).is_err());
    }

    #[test]
    fn forward_eval_affine() {
        let mut map = FxHashMap::default();
        map.insert("z2".to_string(), ExtRange::bounded(0, 7));
        map.insert("r".to_string(), ExtRange::bounded(0, 3));
        let z2 = index("z2", 0, 7);
        let r = index("r", 0, 3);
        // z2 - r over [0,7) x [0,3) = [-2, 7)
        let e = sub(&z2, &r);
        assert_eq!(eval_expr_range(&e, &map), ExtRange::bounded(-2, 7));
    }

    #[test]
    fn forward_eval_scaled_sum_is_tight() {
        let mut map = FxHashMap::default();
        map.insert("z0".to_string(), ExtRange::bounded(0, 8));
        map.insert("r0".to_string(), ExtRange::bounded(0, 8));
        let z0 = index("z0", 0, 8);
        let r0 = index("r0", 0, 8);
        // z0*8 + r0 over [0,8) x [0,8) = [0, 64)
        let e = mul(&z0, &Expr::int32(8)) + r0;
        assert_eq!(eval_expr_range(&e, &map), ExtRange::bounded(0, 64));
    }
}
