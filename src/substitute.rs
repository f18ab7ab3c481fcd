//! Capture-free index substitution.
//!
//! Two flavors, both sharing unchanged subtrees:
//!
//! - [`substitute_index`] replaces `Index` nodes by **pointer identity** —
//!   the precise tool when distinct loops reuse a name.
//! - [`substitute_index_by_name`] replaces any `Index` whose **name**
//!   matches — the tool once the gradient engine has made names unique.

use rustc_hash::FxHashMap;

use crate::core::error::Result;
use crate::core::ir::{Expr, IndexKind};
use crate::core::visitor::IrMutator;

struct SubstituteIndex<'a> {
    vmap: &'a [(Expr, Expr)],
}

impl IrMutator for SubstituteIndex<'_> {
    fn mutate_index(&mut self, expr: &Expr, _name: &str, _dom: &Expr, _kind: IndexKind) -> Result<Expr> {
        for (key, replacement) in self.vmap {
            if expr.same_as(key) {
                return Ok(replacement.clone());
            }
        }
        Ok(expr.clone())
    }
}

/// Replace every `Index` node pointer-identical to a key in `vmap`.
pub fn substitute_index(expr: &Expr, vmap: &[(Expr, Expr)]) -> Result<Expr> {
    SubstituteIndex { vmap }.mutate_expr(expr)
}

struct SubstituteIndexByName<'a> {
    vmap: &'a FxHashMap<String, Expr>,
}

impl IrMutator for SubstituteIndexByName<'_> {
    fn mutate_index(&mut self, expr: &Expr, name: &str, _dom: &Expr, _kind: IndexKind) -> Result<Expr> {
        if let Some(replacement) = self.vmap.get(name) {
            Ok(replacement.clone())
        } else {
            Ok(expr.clone())
        }
    }
}

/// Replace every `Index` whose name is a key in `vmap`.
pub fn substitute_index_by_name(expr: &Expr, vmap: &FxHashMap<String, Expr>) -> Result<Expr> {
    SubstituteIndexByName { vmap }.mutate_expr(expr)
}
