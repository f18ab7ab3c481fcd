//! Binding resolution for the inverted index system.
//!
//! After Smith-normalizing the access system, every axis may hold several
//! candidate bindings: one from the inversion and one from each
//! floor-div/mod identity. This module reconciles them:
//!
//! - [`collect_floor_div_mod`] groups the synthetic `v // c` / `v mod c`
//!   names by their shared dividend and factor, so the caller can rebuild
//!   the identity `v = quotient·c + remainder`.
//! - [`solve_multi_bindings`] picks one canonical binding per axis and
//!   turns the survivors into equality conditions (or discards unbounded
//!   leftovers).
//! - [`solve_substitutions`] runs the axes in reverse insertion order,
//!   back-substituting every resolution through the remaining candidate
//!   lists.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arith::{ExtRange, eq};
use crate::core::error::{Result, TensorError};
use crate::core::ir::{BinaryOp, Expr, ExprKind};
use crate::simplify::simplify;
use crate::substitute::substitute_index_by_name;

use super::context::SubstituteContext;

/// One reconstructed flooring identity `var_name = first·factor + second`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorDivModEntry {
    /// The literal divisor.
    pub factor: i64,
    /// The divided axis name.
    pub var_name: String,
    /// Synthetic name of the quotient, when one exists.
    pub first: Option<String>,
    /// Synthetic name of the remainder, when one exists.
    pub second: Option<String>,
}

/// Group the synthetic bindings recorded at or after `from` (an offset into
/// `index_names`) by `(var_name, factor)`.
pub fn collect_floor_div_mod(
    ctx: &SubstituteContext,
    from: usize,
) -> Result<Vec<FloorDivModEntry>> {
    let mut entries: Vec<FloorDivModEntry> = Vec::new();
    for name in ctx.index_names.iter().skip(from) {
        let Some(def) = ctx.var2expr.get(name) else {
            continue;
        };
        let ExprKind::Binary { op, a, b } = def.kind() else {
            continue;
        };
        if !matches!(op, BinaryOp::FloorDiv | BinaryOp::FloorMod) {
            continue;
        }
        let (Some(var_name), Some(factor)) = (a.index_name(), b.int_value()) else {
            continue;
        };
        let position = match entries
            .iter()
            .position(|e| e.var_name == var_name && e.factor == factor)
        {
            Some(p) => p,
            None => {
                entries.push(FloorDivModEntry {
                    factor,
                    var_name: var_name.to_string(),
                    first: None,
                    second: None,
                });
                entries.len() - 1
            }
        };
        let entry = &mut entries[position];
        let slot = if *op == BinaryOp::FloorDiv {
            &mut entry.first
        } else {
            &mut entry.second
        };
        if let Some(existing) = slot {
            if existing != name {
                return Err(TensorError::malformed(format!(
                    "axes '{existing}' and '{name}' both stand for {def}"
                )));
            }
        } else {
            *slot = Some(name.clone());
        }
    }
    Ok(entries)
}

// The name and range of a bare index candidate.
fn as_bare_index<'e>(ctx: &SubstituteContext, e: &'e Expr) -> Option<(&'e str, ExtRange)> {
    let name = e.index_name()?;
    Some((name, ctx.range_of(name)))
}

/// Pick the canonical binding among `candidates` for one axis.
///
/// Preference order: a bounded bare index, then the first candidate that is
/// not a fully-unbounded bare index, then the first candidate. Discarded
/// unbounded bare indices land in `unused`; every other leftover becomes an
/// equality condition against the canonical choice. A bare index with a
/// half-open infinite range indicates a malformed substitution.
pub fn solve_multi_bindings(
    ctx: &SubstituteContext,
    candidates: &[Expr],
    unused: &mut FxHashSet<String>,
    conditions: &mut Vec<Expr>,
) -> Result<Expr> {
    debug_assert!(!candidates.is_empty());
    let mut unique: Vec<&Expr> = Vec::new();
    for c in candidates {
        if !unique.iter().any(|u| *u == c) {
            unique.push(c);
        }
    }

    for c in &unique {
        if let Some((name, range)) = as_bare_index(ctx, c) {
            if range.is_half_open() {
                return Err(TensorError::malformed(format!(
                    "candidate '{name}' has half-open range {range}"
                )));
            }
        }
    }

    let canonical = unique
        .iter()
        .find(|c| as_bare_index(ctx, c).is_some_and(|(_, r)| r.is_bounded()))
        .or_else(|| {
            unique
                .iter()
                .find(|c| !as_bare_index(ctx, c).is_some_and(|(_, r)| r.is_fully_unbounded()))
        })
        .unwrap_or(&unique[0]);
    let canonical = (*canonical).clone();

    for c in unique {
        if *c == canonical {
            continue;
        }
        match as_bare_index(ctx, c) {
            Some((name, range)) if range.is_fully_unbounded() => {
                unused.insert(name.to_string());
            }
            _ => conditions.push(eq(&canonical, c)),
        }
    }
    Ok(canonical)
}

/// Resolve every axis with candidates, back-substituting in reverse
/// insertion order so synthetic names disappear from earlier bindings.
pub fn solve_substitutions(
    ctx: &SubstituteContext,
    bindings: &mut FxHashMap<String, Vec<Expr>>,
    unused: &mut FxHashSet<String>,
    conditions: &mut Vec<Expr>,
) -> Result<FxHashMap<String, Expr>> {
    let mut result = FxHashMap::default();
    for name in ctx.index_names.iter().rev() {
        let Some(candidates) = bindings.remove(name) else {
            continue;
        };
        if candidates.is_empty() {
            continue;
        }
        let canonical = solve_multi_bindings(ctx, &candidates, unused, conditions)?;
        let canonical = simplify(&canonical)?;

        let mut single = FxHashMap::default();
        single.insert(name.clone(), canonical.clone());
        for list in bindings.values_mut() {
            for e in list.iter_mut() {
                *e = substitute_index_by_name(e, &single)?;
            }
        }
        result.insert(name.clone(), canonical);
    }
    Ok(result)
}
