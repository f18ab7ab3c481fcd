//! Work-state for a single gradient synthesis.
//!
//! [`NameGenerator`] hands out globally unique index names (a monotone
//! counter per hint), and [`SubstituteContext`] records every axis the
//! inversion knows about: its node, its currently known range, and — for
//! synthetic substitution names — the expression the name stands for.

use rustc_hash::FxHashMap;

use crate::arith::ExtRange;
use crate::core::ir::{Expr, IndexKind};
use crate::core::types::Type;

/// Produces unique names by appending a per-hint monotone counter.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counters: FxHashMap<String, u32>,
}

impl NameGenerator {
    /// A fresh generator with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        NameGenerator::default()
    }

    /// The next unique name for `hint`: `hint0`, `hint1`, ...
    pub fn unique_name(&mut self, hint: &str) -> String {
        let counter = self.counters.entry(hint.to_string()).or_insert(0);
        let name = format!("{hint}{counter}");
        *counter += 1;
        name
    }
}

/// A sequenced record of every axis participating in an inversion.
///
/// Invariant: `var2expr` and `expr2var` are kept in lockstep — every
/// synthetic name appears in both, and `bound_begin` marks where the
/// synthetic suffix of `index_names` starts (negative before any exists).
#[derive(Debug, Default)]
pub struct SubstituteContext {
    /// All axis names in insertion order: forward axes first, then the
    /// synthetic suffix.
    pub index_names: Vec<String>,
    /// Name to its `Index` node.
    pub index_map: FxHashMap<String, Expr>,
    /// Name to its currently known range.
    pub range_map: FxHashMap<String, ExtRange>,
    /// Synthetic name to the expression it denotes.
    pub var2expr: FxHashMap<String, Expr>,
    /// Reverse lookup of `var2expr` by structural value.
    pub expr2var: FxHashMap<Expr, String>,
    /// Position in `index_names` where synthetic names begin; negative
    /// while none exist.
    pub bound_begin: isize,
}

impl SubstituteContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        SubstituteContext {
            bound_begin: -1,
            ..SubstituteContext::default()
        }
    }

    /// Register a plain axis (forward index or fresh reduction axis).
    pub fn add_index(&mut self, name: &str, index: Expr, range: ExtRange) {
        self.index_names.push(name.to_string());
        self.index_map.insert(name.to_string(), index);
        self.range_map.insert(name.to_string(), range);
    }

    /// Register a synthetic substitution name standing for `expr`.
    pub fn add_bound(&mut self, name: &str, index: Expr, expr: Expr, range: ExtRange) {
        if self.bound_begin < 0 {
            self.bound_begin = self.index_names.len() as isize;
        }
        self.index_names.push(name.to_string());
        self.index_map.insert(name.to_string(), index);
        self.range_map.insert(name.to_string(), range);
        self.var2expr.insert(name.to_string(), expr.clone());
        self.expr2var.insert(expr, name.to_string());
    }

    /// The synthetic name already standing for `expr`, by value equality.
    #[must_use]
    pub fn find_bound(&self, expr: &Expr) -> Option<&str> {
        self.expr2var.get(expr).map(String::as_str)
    }

    /// The known range of `name`, unbounded when unknown.
    #[must_use]
    pub fn range_of(&self, name: &str) -> ExtRange {
        self.range_map
            .get(name)
            .copied()
            .unwrap_or_else(ExtRange::unbounded)
    }

    /// Tighten the known range of `name` by intersection.
    pub fn narrow_range(&mut self, name: &str, range: ExtRange) {
        self.range_map
            .entry(name.to_string())
            .and_modify(|r| *r = r.intersect(&range))
            .or_insert(range);
    }

    /// Names in the synthetic suffix, in insertion order.
    #[must_use]
    pub fn bound_names(&self) -> &[String] {
        if self.bound_begin < 0 {
            &[]
        } else {
            &self.index_names[self.bound_begin as usize..]
        }
    }
}

/// A reduction-axis node with a placeholder domain; the real domain is
/// attached once the axis range is known.
#[must_use]
pub fn placeholder_reduce_index(name: &str, range: ExtRange) -> Expr {
    let ty = Type::int_scalar(32);
    let dom = if range.is_bounded() {
        Expr::dom(
            ty,
            Expr::int(ty, range.left),
            Expr::int(ty, range.right - range.left),
        )
    } else {
        Expr::dom(ty, Expr::int(ty, 0), Expr::int(ty, 0))
    };
    Expr::index(ty, name, dom, IndexKind::Reduce)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_counts_per_hint() {
        let mut namer = NameGenerator::new();
        assert_eq!(namer.unique_name("z"), "z0");
        assert_eq!(namer.unique_name("z"), "z1");
        assert_eq!(namer.unique_name("i"), "i0");
        assert_eq!(namer.unique_name("z"), "z2");
    }

    #[test]
    fn bound_begin_marks_synthetic_suffix() {
        let mut ctx = SubstituteContext::new();
        assert!(ctx.bound_begin < 0);
        let i = placeholder_reduce_index("i0", ExtRange::bounded(0, 4));
        ctx.add_index("i0", i, ExtRange::bounded(0, 4));
        assert!(ctx.bound_names().is_empty());

        let s = placeholder_reduce_index("s0", ExtRange::unbounded());
        let def = Expr::int32(0);
        ctx.add_bound("s0", s, def.clone(), ExtRange::unbounded());
        assert_eq!(ctx.bound_begin, 1);
        assert_eq!(ctx.bound_names(), ["s0".to_string()]);
        assert_eq!(ctx.find_bound(&def), Some("s0"));
    }

    #[test]
    fn narrow_range_intersects() {
        let mut ctx = SubstituteContext::new();
        let i = placeholder_reduce_index("r0", ExtRange::unbounded());
        ctx.add_index("r0", i, ExtRange::unbounded());
        ctx.narrow_range("r0", ExtRange::bounded(0, 10));
        ctx.narrow_range("r0", ExtRange::bounded(2, 20));
        assert_eq!(ctx.range_of("r0"), ExtRange::bounded(2, 10));
    }
}
