//! Reverse-mode autodiff at the index-expression level.
//!
//! Given the right-hand side of a forward tensor assignment, the loop axes
//! that parameterise it, and the tensor to differentiate with respect to,
//! [`grad_stmt`] produces the *reversed* statement: for every point of the
//! gradient tensor it reduces over exactly the forward iterations whose
//! accesses touched that point.
//!
//! The crux is inverting each access pattern. An access `X[e0, …, e_{m-1}]`
//! with affine `e_j` defines an integer linear system `A·x = z − c`; Smith
//! normalization (`U·A·V = D`) solves it, its null space becomes fresh
//! reduction axes, over-determined rows become runtime equality conditions,
//! and flooring divisions re-enter through `v = q·c + r` identities. See
//! the phase functions below for the exact pipeline.

pub mod coeff;
pub mod context;
pub mod eliminate;
pub mod solve;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::arith::{
    self, ExtRange, Matrix, RangeInference, add, eq, eval_expr_range, floordiv, floormod, le, lt,
    mul, relax_matrix_array_product, smith_normalize, sub,
};
use crate::core::error::{Result, TensorError};
use crate::core::ir::{
    BinaryOp, Expr, ExprKind, IndexKind, MoveKind, Stmt, UnaryOp,
};
use crate::core::types::Type;
use crate::core::visitor::IndexCollector;
use crate::simplify::simplify;
use crate::substitute::{substitute_index, substitute_index_by_name};

use coeff::{CONST_TAG, extract_coefficients};
use context::{NameGenerator, SubstituteContext, placeholder_reduce_index};
use eliminate::EliminateFloorDivMod;
use solve::{collect_floor_div_mod, solve_substitutions};

/// The result of one gradient synthesis.
#[derive(Debug, Clone)]
pub struct Gradient {
    /// The `Move` writing the gradient expression into the fresh output.
    pub stmt: Stmt,
    /// Fresh spatial axes indexing the gradient tensor, in dimension order.
    pub spatial: Vec<Expr>,
    /// Synthesised reduction axes, zero-based.
    pub reduces: Vec<Expr>,
    /// Conjoined bound conditions; a literal `true` when none apply.
    pub condition: Expr,
}

impl Gradient {
    /// True when no runtime guard is required.
    #[must_use]
    pub fn condition_is_trivial(&self) -> bool {
        matches!(self.condition.kind(), ExprKind::UIntImm(1) | ExprKind::IntImm(1))
    }

    /// The full accumulation loop nest: spatial then reduction axes around
    /// `dst = dst + src`, guarded by the condition when one exists.
    #[must_use]
    pub fn as_loop_nest(&self) -> Stmt {
        let (dst, src) = match self.stmt.kind() {
            crate::core::ir::StmtKind::Move { dst, src, .. } => (dst.clone(), src.clone()),
            _ => unreachable!("Gradient::stmt is always a Move"),
        };
        let accumulate = Stmt::move_data(dst.clone(), add(&dst, &src), MoveKind::MemToMem);
        let body = if self.condition_is_trivial() {
            accumulate
        } else {
            Stmt::if_then_else(self.condition.clone(), accumulate, None)
        };
        let mut indices = self.spatial.clone();
        indices.extend(self.reduces.iter().cloned());
        Stmt::loop_nest(indices, vec![body])
    }
}

type VMap = FxHashMap<String, Expr>;

struct GradOp {
    namer: NameGenerator,
    ctx: SubstituteContext,
    zs: Vec<Expr>,
    call_args: Vec<Expr>,
    grad_name: String,
    doutput_name: String,
    doutput_shape: Vec<u64>,
    doutput_ty: Type,
    conditions: Vec<Expr>,
    new_reduces: Vec<Expr>,
    unused: FxHashSet<String>,
    floordiv_warned: bool,
}

impl GradOp {
    fn merge_vmaps(&self, into: &mut VMap, other: VMap) {
        for (name, expr) in other {
            match into.get(&name) {
                Some(existing) if *existing != expr => {
                    eprintln!(
                        "Warning: overlapping bindings for axis '{name}': {existing} vs. {expr}"
                    );
                }
                Some(_) => {}
                None => {
                    into.insert(name, expr);
                }
            }
        }
    }

    // Structural differentiation: returns the derivative expression and the
    // axis bindings accumulated while inverting accesses below it.
    fn grad_expr(&mut self, expr: &Expr) -> Result<(Expr, VMap)> {
        match expr.kind() {
            ExprKind::IntImm(_) | ExprKind::UIntImm(_) | ExprKind::FloatImm(_) => {
                Ok((expr.zero_like(), VMap::default()))
            }
            ExprKind::Unary {
                op: UnaryOp::Neg,
                a,
            } => {
                let (da, vmap) = self.grad_expr(a)?;
                Ok((Expr::unary(expr.ty(), UnaryOp::Neg, da), vmap))
            }
            ExprKind::Binary { op, a, b } => match op {
                BinaryOp::Add | BinaryOp::Sub => {
                    let (da, mut vmap) = self.grad_expr(a)?;
                    let (db, vb) = self.grad_expr(b)?;
                    self.merge_vmaps(&mut vmap, vb);
                    Ok((Expr::binary(expr.ty(), *op, da, db), vmap))
                }
                BinaryOp::Mul => {
                    let (da, va) = self.grad_expr(a)?;
                    let b_sub = substitute_index_by_name(b, &va)?;
                    let (db, vb) = self.grad_expr(b)?;
                    let a_sub = substitute_index_by_name(a, &vb)?;
                    let mut vmap = va;
                    self.merge_vmaps(&mut vmap, vb);
                    let out = Expr::binary(
                        expr.ty(),
                        BinaryOp::Add,
                        Expr::binary(expr.ty(), BinaryOp::Mul, da, b_sub),
                        Expr::binary(expr.ty(), BinaryOp::Mul, a_sub, db),
                    );
                    Ok((out, vmap))
                }
                BinaryOp::Div | BinaryOp::FloorDiv => {
                    if *op == BinaryOp::FloorDiv && !self.floordiv_warned {
                        self.floordiv_warned = true;
                        eprintln!(
                            "Warning: differentiating a flooring division as its exact quotient in {expr}"
                        );
                    }
                    let (da, va) = self.grad_expr(a)?;
                    let b_sub = substitute_index_by_name(b, &va)?;
                    let (db, vb) = self.grad_expr(b)?;
                    let a_sub = substitute_index_by_name(a, &vb)?;
                    let mut vmap = va;
                    self.merge_vmaps(&mut vmap, vb);
                    let b_all = substitute_index_by_name(b, &vmap)?;
                    let num = Expr::binary(
                        expr.ty(),
                        BinaryOp::Sub,
                        Expr::binary(expr.ty(), BinaryOp::Mul, da, b_sub),
                        Expr::binary(expr.ty(), BinaryOp::Mul, a_sub, db),
                    );
                    let den = Expr::binary(expr.ty(), BinaryOp::Mul, b_all.clone(), b_all);
                    Ok((Expr::binary(expr.ty(), *op, num, den), vmap))
                }
                _ => Err(TensorError::UnsupportedInGradient {
                    node: expr.to_string(),
                }),
            },
            ExprKind::Var { name, args, .. } => {
                if *name == self.grad_name {
                    self.grad_access(args)
                } else {
                    Ok((expr.zero_like(), VMap::default()))
                }
            }
            _ => Err(TensorError::UnsupportedInGradient {
                node: expr.to_string(),
            }),
        }
    }

    // Invert one access of the differentiand: the key case.
    fn grad_access(&mut self, access_args: &[Expr]) -> Result<(Expr, VMap)> {
        if access_args.len() != self.zs.len() {
            return Err(TensorError::shape_mismatch(format!(
                "access arity {} vs. gradient rank {}",
                access_args.len(),
                self.zs.len()
            )));
        }
        let scope_start = self.ctx.index_names.len();

        // eliminate flooring ops so every access argument is affine
        let rewritten: Vec<Expr> = {
            let mut elim = EliminateFloorDivMod::new(&mut self.namer, "s", &mut self.ctx);
            access_args
                .iter()
                .map(|a| elim.eliminate(a))
                .collect::<Result<_>>()?
        };

        // coefficient matrix over every axis known so far
        let names: Vec<String> = self.ctx.index_names.clone();
        let col_of: FxHashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let rows = rewritten.len();
        let cols = names.len();
        let mut system = Matrix::<i64>::zeros(rows, cols);
        let mut consts = vec![0i64; rows];
        for (r, arg) in rewritten.iter().enumerate() {
            for (name, value) in extract_coefficients(arg)? {
                if name == CONST_TAG {
                    consts[r] = value;
                } else {
                    let col = col_of.get(name.as_str()).copied().ok_or_else(|| {
                        TensorError::malformed(format!("unknown axis '{name}' in access"))
                    })?;
                    system[(r, col)] = value;
                }
            }
        }

        // right-hand side z - c, then U·b and the diagonal solve
        let b: Vec<Expr> = self
            .zs
            .iter()
            .zip(&consts)
            .map(|(z, c)| sub(z, &Expr::int32(*c)))
            .collect();
        let mut diag = system;
        let mut u = Matrix::<i64>::zeros(rows, rows);
        let mut v = Matrix::<i64>::zeros(cols, cols);
        let dim = smith_normalize(&mut diag, &mut u, &mut v)?;
        let b2 = relax_matrix_array_product(&u, &b)?;

        for item in b2.iter().take(rows).skip(dim) {
            self.conditions.push(eq(&simplify(item)?, &Expr::int32(0)));
        }

        let mut y = Vec::with_capacity(cols);
        for (i, _) in names.iter().enumerate() {
            if i < dim {
                let d = diag[(i, i)];
                let solved = simplify(&b2[i])?;
                if d == 1 {
                    y.push(solved);
                } else {
                    self.conditions
                        .push(eq(&floormod(&solved, &Expr::int32(d)), &Expr::int32(0)));
                    y.push(floordiv(&solved, &Expr::int32(d)));
                }
            } else {
                let name = self.namer.unique_name("r");
                let idx = placeholder_reduce_index(&name, ExtRange::unbounded());
                self.ctx.add_index(&name, idx.clone(), ExtRange::unbounded());
                self.new_reduces.push(idx.clone());
                y.push(idx);
            }
        }
        let xs = relax_matrix_array_product(&v, &y)?;

        let mut bindings: FxHashMap<String, Vec<Expr>> = FxHashMap::default();
        for (c, name) in names.iter().enumerate() {
            bindings
                .entry(name.clone())
                .or_default()
                .push(simplify(&xs[c])?);
        }

        // flooring identities v = q·factor + r, synthesizing missing halves
        for entry in collect_floor_div_mod(&self.ctx, scope_start)? {
            let var_range = self.ctx.range_of(&entry.var_name);
            let first = match entry.first {
                Some(name) => self.ctx.index_map[&name].clone(),
                None => {
                    let name = self.namer.unique_name("r");
                    let range = var_range.floor_div(entry.factor);
                    let idx = placeholder_reduce_index(&name, range);
                    self.ctx.add_index(&name, idx.clone(), range);
                    self.new_reduces.push(idx.clone());
                    idx
                }
            };
            let second = match entry.second {
                Some(name) => self.ctx.index_map[&name].clone(),
                None => {
                    let name = self.namer.unique_name("r");
                    let range = var_range.floor_mod(entry.factor);
                    let idx = placeholder_reduce_index(&name, range);
                    self.ctx.add_index(&name, idx.clone(), range);
                    self.new_reduces.push(idx.clone());
                    idx
                }
            };
            let identity = add(&mul(&first, &Expr::int32(entry.factor)), &second);
            bindings
                .entry(entry.var_name.clone())
                .or_default()
                .push(identity);
        }

        let result = solve_substitutions(
            &self.ctx,
            &mut bindings,
            &mut self.unused,
            &mut self.conditions,
        )?;

        // refine ranges of fresh axes through each binding; axes with a
        // fixed loop domain (the z's) keep their recorded range
        for name in &names {
            let Some(binding) = result.get(name) else {
                continue;
            };
            let target = self.ctx.range_of(name);
            let mut inference = RangeInference::new(target);
            inference.infer(binding)?;
            for (n, r) in inference.range_map {
                if self.ctx.index_map.contains_key(&n) {
                    self.ctx.narrow_range(&n, r);
                }
            }
        }

        // bound conditions for bindings that may escape the forward domain,
        // per side, skipping what interval evaluation proves redundant
        for name in &names {
            let Some(binding) = result.get(name) else {
                continue;
            };
            let target = self.ctx.range_of(name);
            let actual = eval_expr_range(binding, &self.ctx.range_map);
            if !target.left_inf && (actual.left_inf || actual.left < target.left) {
                self.conditions
                    .push(le(&Expr::int32(target.left), binding));
            }
            if !target.right_inf && (actual.right_inf || actual.right > target.right) {
                self.conditions
                    .push(lt(binding, &Expr::int32(target.right)));
            }
        }

        // reconcile compound dividend definitions with their resolutions
        for name in self.ctx.bound_names().to_vec() {
            let def = self.ctx.var2expr[&name].clone();
            if let ExprKind::Binary { op, a, b } = def.kind() {
                let is_flooring = matches!(op, BinaryOp::FloorDiv | BinaryOp::FloorMod)
                    && a.index_name().is_some()
                    && b.int_value().is_some();
                if is_flooring {
                    continue;
                }
            }
            let Some(resolved) = result.get(&name) else {
                continue;
            };
            let substituted_def = substitute_index_by_name(&def, &result)?;
            self.conditions.push(eq(&substituted_def, resolved));
        }

        // the upstream-gradient access at the resolved forward coordinates
        let mut dout_args = Vec::with_capacity(self.call_args.len());
        for arg in &self.call_args {
            dout_args.push(substitute_index_by_name(arg, &result)?);
        }
        let dout = Expr::var(
            self.doutput_ty,
            self.doutput_name.clone(),
            dout_args,
            self.doutput_shape.clone(),
        );
        Ok((dout, result))
    }
}

/// Differentiate `body` with respect to `grad_to`.
///
/// * `body` — right-hand side of the forward statement.
/// * `all_args` — the spatial and reduction `Index` nodes parameterising
///   the forward loop nest.
/// * `call_args_index` — positions in `all_args` of the axes indexing the
///   forward output (the upstream gradient is accessed at those axes).
/// * `grad_to` — the differentiand, a `Var` access.
/// * `doutput` — the upstream gradient, a `Var` of the forward output's
///   shape.
///
/// The produced `Move` writes `d<name>[z0, …]` with `grad_to`'s shape; the
/// synthesised reduction axes and the bound condition ride along in the
/// returned [`Gradient`].
pub fn grad_stmt(
    body: &Expr,
    all_args: &[Expr],
    call_args_index: &[usize],
    grad_to: &Expr,
    doutput: &Expr,
) -> Result<Gradient> {
    let ExprKind::Var {
        name: grad_name,
        shape: grad_shape,
        ..
    } = grad_to.kind()
    else {
        return Err(TensorError::shape_mismatch(
            "the differentiand must be a Var access",
        ));
    };
    let ExprKind::Var {
        name: dout_name,
        shape: dout_shape,
        ..
    } = doutput.kind()
    else {
        return Err(TensorError::shape_mismatch(
            "the upstream gradient must be a Var access",
        ));
    };

    let mut namer = NameGenerator::new();
    let mut ctx = SubstituteContext::new();

    // Phase A: rename the forward axes apart and record their ranges.
    let mut renames: Vec<(Expr, Expr)> = Vec::with_capacity(all_args.len());
    let mut renamed: Vec<Expr> = Vec::with_capacity(all_args.len());
    for (pos, arg) in all_args.iter().enumerate() {
        let ExprKind::Index { name, dom, kind } = arg.kind() else {
            return Err(TensorError::unsupported("grad_stmt", arg.to_string()));
        };
        if all_args[..pos].iter().any(|earlier| earlier.same_as(arg)) {
            return Err(TensorError::RepeatedAxis { name: name.clone() });
        }
        let new_name = namer.unique_name(name);
        let new_index = Expr::index(arg.ty(), new_name.clone(), dom.clone(), *kind);
        let range = dom
            .dom_literal()
            .map_or_else(ExtRange::unbounded, |(b, e)| ExtRange::bounded(b, b + e));
        if ctx.index_map.contains_key(&new_name) {
            return Err(TensorError::RepeatedAxis { name: new_name });
        }
        ctx.add_index(&new_name, new_index.clone(), range);
        renames.push((arg.clone(), new_index.clone()));
        renamed.push(new_index);
    }
    let body = substitute_index(body, &renames)?;

    // Phase B: fresh spatial axes over the gradient tensor's shape. Their
    // ranges are recorded for bound reasoning, but they are not unknowns of
    // the access systems, so they stay out of `index_names`.
    let index_ty = Type::int_scalar(32);
    let mut zs = Vec::with_capacity(grad_shape.len());
    for extent in grad_shape {
        let name = namer.unique_name("z");
        ctx.narrow_range(&name, ExtRange::bounded(0, *extent as i64));
        zs.push(Expr::index(
            index_ty,
            name,
            Expr::dom_i32(0, *extent as i64),
            IndexKind::Spatial,
        ));
    }

    let mut call_args = Vec::with_capacity(call_args_index.len());
    for &i in call_args_index {
        let arg = renamed.get(i).ok_or_else(|| {
            TensorError::shape_mismatch(format!("output axis position {i} out of range"))
        })?;
        call_args.push(arg.clone());
    }

    // Phases C and D.
    let mut grader = GradOp {
        namer,
        ctx,
        zs,
        call_args,
        grad_name: grad_name.clone(),
        doutput_name: dout_name.clone(),
        doutput_shape: dout_shape.clone(),
        doutput_ty: doutput.ty(),
        conditions: Vec::new(),
        new_reduces: Vec::new(),
        unused: FxHashSet::default(),
        floordiv_warned: false,
    };
    let (dexpr, _) = grader.grad_expr(&body)?;
    let GradOp {
        ctx,
        zs,
        conditions,
        new_reduces,
        mut unused,
        ..
    } = grader;

    // A discarded axis that still occurs somewhere must be kept: it carries
    // real iteration multiplicity.
    let mut occurring: FxHashSet<String> = FxHashSet::default();
    for idx in IndexCollector::new(|_| true).collect_expr(&dexpr)? {
        occurring.insert(idx.index_name().unwrap_or_default().to_string());
    }
    for cond in &conditions {
        for idx in IndexCollector::new(|_| true).collect_expr(cond)? {
            occurring.insert(idx.index_name().unwrap_or_default().to_string());
        }
    }
    unused.retain(|name| !occurring.contains(name));

    // Phase E: zero-base the reduction axes and assemble the statement.
    let mut reduces = Vec::new();
    let mut rebase: VMap = VMap::default();
    for placeholder in &new_reduces {
        let name = placeholder.index_name().unwrap_or_default().to_string();
        if unused.contains(&name) {
            continue;
        }
        let range = ctx.range_of(&name);
        if !range.is_bounded() {
            return Err(TensorError::IndeterminateRange { index: name });
        }
        let final_index = Expr::index(
            index_ty,
            name.clone(),
            Expr::dom_i32(0, range.right - range.left),
            IndexKind::Reduce,
        );
        let replacement = if range.left == 0 {
            final_index.clone()
        } else {
            add(&final_index, &Expr::int(index_ty, range.left))
        };
        rebase.insert(name, replacement);
        reduces.push(final_index);
    }

    let src = simplify(&substitute_index_by_name(&dexpr, &rebase)?)?;
    let mut condition = Expr::bool_const(true);
    for cond in &conditions {
        let rebased = substitute_index_by_name(cond, &rebase)?;
        condition = arith::logic_and(&condition, &rebased);
    }
    let condition = simplify(&condition)?;

    let dst = Expr::var(
        grad_to.ty(),
        format!("d{grad_name}"),
        zs.clone(),
        grad_shape.clone(),
    );
    let stmt = Stmt::move_data(dst, src, MoveKind::MemToMem);

    Ok(Gradient {
        stmt,
        spatial: zs,
        reduces,
        condition,
    })
}
