//! Floor-div / floor-mod elimination inside access expressions.
//!
//! The system inversion only understands integer-affine access expressions,
//! so `e // c` and `e mod c` (with `c` an integer literal) are rewritten
//! bottom-up into fresh synthetic indices:
//!
//! - a non-index dividend `e` is first bound to a synthetic index of
//!   unknown range (reusing an existing binding when `e` was seen before);
//! - the whole `s // c` (or `s mod c`) is then bound to another synthetic
//!   index whose range derives from the dividend's via
//!   [`ExtRange::floor_div`] / [`ExtRange::floor_mod`].
//!
//! Afterwards every access expression is affine over named indices, and the
//! recorded bindings let the resolver reconstruct `v = s·c + s'` later.

use crate::arith::{ExtRange, floordiv, floormod};
use crate::core::error::{Result, TensorError};
use crate::core::ir::{BinaryOp, Expr, ExprKind};
use crate::core::visitor::IrMutator;

use super::context::{NameGenerator, SubstituteContext, placeholder_reduce_index};

/// Rewrites `// c` and `mod c` into synthetic indices recorded in the
/// substitution context.
pub struct EliminateFloorDivMod<'a> {
    namer: &'a mut NameGenerator,
    hint: &'a str,
    ctx: &'a mut SubstituteContext,
}

impl<'a> EliminateFloorDivMod<'a> {
    /// Create an eliminator allocating synthetic names from `hint`.
    pub fn new(
        namer: &'a mut NameGenerator,
        hint: &'a str,
        ctx: &'a mut SubstituteContext,
    ) -> Self {
        EliminateFloorDivMod { namer, hint, ctx }
    }

    /// Rewrite one access expression.
    pub fn eliminate(&mut self, expr: &Expr) -> Result<Expr> {
        self.mutate_expr(expr)
    }

    // The synthetic index already standing for `expr`, or a fresh one.
    fn bind(&mut self, expr: &Expr, range: ExtRange) -> Expr {
        if let Some(name) = self.ctx.find_bound(expr) {
            return self.ctx.index_map[name].clone();
        }
        let name = self.namer.unique_name(self.hint);
        let index = placeholder_reduce_index(&name, range);
        self.ctx.add_bound(&name, index.clone(), expr.clone(), range);
        index
    }
}

impl IrMutator for EliminateFloorDivMod<'_> {
    fn mutate_string_imm(&mut self, expr: &Expr, _value: &str) -> Result<Expr> {
        Err(TensorError::unsupported(
            "EliminateFloorDivMod",
            expr.to_string(),
        ))
    }

    fn mutate_binary(&mut self, expr: &Expr, op: BinaryOp, a: &Expr, b: &Expr) -> Result<Expr> {
        if !matches!(op, BinaryOp::FloorDiv | BinaryOp::FloorMod) {
            let na = self.mutate_expr(a)?;
            let nb = self.mutate_expr(b)?;
            if na.same_as(a) && nb.same_as(b) {
                return Ok(expr.clone());
            }
            return Ok(Expr::binary(expr.ty(), op, na, nb));
        }

        let Some(factor) = b.int_value() else {
            return Err(TensorError::unsupported(
                "EliminateFloorDivMod",
                expr.to_string(),
            ));
        };

        let dividend = self.mutate_expr(a)?;
        let dividend_index = match dividend.kind() {
            ExprKind::Index { .. } => dividend,
            _ => self.bind(&dividend, ExtRange::unbounded()),
        };
        let dividend_range = self
            .ctx
            .range_of(dividend_index.index_name().unwrap_or_default());

        let factor_imm = Expr::int(expr.ty(), factor);
        let (whole, range) = if op == BinaryOp::FloorDiv {
            (
                floordiv(&dividend_index, &factor_imm),
                dividend_range.floor_div(factor),
            )
        } else {
            (
                floormod(&dividend_index, &factor_imm),
                dividend_range.floor_mod(factor),
            )
        };
        Ok(self.bind(&whole, range))
    }
}

#[cfg(test)]
mod tests {
    use crate::arith::add;
    use crate::core::ir::IndexKind;
    use crate::core::types::Type;

    use super::*;

    fn setup(extent: i64) -> (NameGenerator, SubstituteContext, Expr) {
        let mut namer = NameGenerator::new();
        let mut ctx = SubstituteContext::new();
        let name = namer.unique_name("i");
        let i = Expr::index(
            Type::int_scalar(32),
            name.clone(),
            Expr::dom_i32(0, extent),
            IndexKind::Spatial,
        );
        ctx.add_index(&name, i.clone(), ExtRange::bounded(0, extent));
        (namer, ctx, i)
    }

    #[test]
    fn binds_floordiv_of_index() {
        let (mut namer, mut ctx, i) = setup(64);
        let e = floordiv(&i, &Expr::int32(8));
        let out = EliminateFloorDivMod::new(&mut namer, "s", &mut ctx)
            .eliminate(&e)
            .expect("eliminate");
        assert_eq!(out.index_name(), Some("s0"));
        assert_eq!(ctx.range_of("s0"), ExtRange::bounded(0, 8));
        assert_eq!(ctx.bound_names(), ["s0".to_string()]);
        assert_eq!(ctx.find_bound(&e), Some("s0"));
    }

    #[test]
    fn reuses_existing_binding() {
        let (mut namer, mut ctx, i) = setup(64);
        let e = floordiv(&i, &Expr::int32(8));
        let twice = add(&e, &e);
        let out = EliminateFloorDivMod::new(&mut namer, "s", &mut ctx)
            .eliminate(&twice)
            .expect("eliminate");
        assert_eq!(out.to_string(), "(s0 + s0)");
        assert_eq!(ctx.bound_names().len(), 1);
    }

    #[test]
    fn compound_dividend_gets_inner_binding() {
        let (mut namer, mut ctx, i) = setup(64);
        let e = floordiv(&(&i + 1), &Expr::int32(4));
        let out = EliminateFloorDivMod::new(&mut namer, "s", &mut ctx)
            .eliminate(&e)
            .expect("eliminate");
        // inner i + 1 becomes s0 with unknown range, the division s1
        assert_eq!(out.index_name(), Some("s1"));
        assert_eq!(ctx.bound_names(), ["s0".to_string(), "s1".to_string()]);
        assert!(ctx.range_of("s0").is_fully_unbounded());
        assert!(ctx.range_of("s1").is_fully_unbounded());
    }

    #[test]
    fn floormod_range_is_zero_to_factor() {
        let (mut namer, mut ctx, i) = setup(64);
        let e = floormod(&i, &Expr::int32(8));
        let out = EliminateFloorDivMod::new(&mut namer, "s", &mut ctx)
            .eliminate(&e)
            .expect("eliminate");
        assert_eq!(out.index_name(), Some("s0"));
        assert_eq!(ctx.range_of("s0"), ExtRange::bounded(0, 8));
    }
}
