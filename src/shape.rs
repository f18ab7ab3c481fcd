//! Dimension compatibility checking and lowering to IR.
//!
//! The parser leaves index extents implicit: an index's loop domain comes
//! from the tensor dimensions it touches. This pass resolves every extent,
//! classifies indices as spatial (on the left-hand side) or reduce
//! (right-hand side only), and lowers the surface AST into shared IR nodes
//! ready for the loop builder and the gradient engine.
//!
//! Extent resolution runs to a fixpoint:
//! - a bare index argument pins the index to the accessed dimension
//!   (conflicts are `ExtentMismatch`);
//! - an affine argument with one unknown index bounds that index so the
//!   access stays inside the dimension;
//! - a `i // c` argument, as a last resort, allows `dim · c` iterations.

use rustc_hash::FxHashMap;

use crate::arith::add;
use crate::core::error::{Result, TensorError};
use crate::core::ir::{BinaryOp, Expr, Group, IndexKind, KernelTarget, MoveKind, Stmt};
use crate::core::types::Type;
use crate::core::visitor::IrVisitor;
use crate::parser::{Assignment, Program, SurfaceExpr, SurfaceOp, TensorRef};

/// One shape-checked assignment, lowered to IR.
#[derive(Debug, Clone)]
pub struct CheckedStmt {
    /// Destination access (a `Var`).
    pub dst: Expr,
    /// Full right-hand side including the read-modify-write `dst +`.
    pub rhs: Expr,
    /// Loop axes: spatial first, then reduce, each a shared `Index` node.
    pub all_args: Vec<Expr>,
    /// Positions in `all_args` of the axes indexing `dst`.
    pub call_args_index: Vec<usize>,
    /// Representative accesses of the tensors read by `rhs`.
    pub inputs: Vec<Expr>,
}

impl CheckedStmt {
    /// The first access of tensor `name` inside `rhs`, if any.
    #[must_use]
    pub fn find_access(&self, name: &str) -> Option<Expr> {
        struct FindVar<'a> {
            name: &'a str,
            found: Option<Expr>,
        }
        impl IrVisitor for FindVar<'_> {
            fn visit_var(
                &mut self,
                expr: &Expr,
                name: &str,
                args: &[Expr],
                _shape: &[u64],
            ) -> Result<()> {
                if self.found.is_none() && name == self.name {
                    self.found = Some(expr.clone());
                }
                for arg in args {
                    self.visit_expr(arg)?;
                }
                Ok(())
            }
        }
        let mut finder = FindVar { name, found: None };
        finder.visit_expr(&self.rhs).ok()?;
        finder.found
    }
}

fn collect_accesses<'e>(e: &'e SurfaceExpr, out: &mut Vec<&'e TensorRef>) {
    match e {
        SurfaceExpr::Tensor(t) => {
            out.push(t);
            for arg in &t.args {
                collect_accesses(arg, out);
            }
        }
        SurfaceExpr::Binary { a, b, .. } => {
            collect_accesses(a, out);
            collect_accesses(b, out);
        }
        _ => {}
    }
}

fn collect_idents(e: &SurfaceExpr, out: &mut Vec<String>) {
    match e {
        SurfaceExpr::Ident(name) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        SurfaceExpr::Binary { a, b, .. } => {
            collect_idents(a, out);
            collect_idents(b, out);
        }
        SurfaceExpr::Tensor(t) => {
            for arg in &t.args {
                collect_idents(arg, out);
            }
        }
        _ => {}
    }
}

// name -> coefficient plus constant, or None when not affine.
fn surface_coefficients(e: &SurfaceExpr) -> Option<(FxHashMap<String, i64>, i64)> {
    match e {
        SurfaceExpr::Int(v) => Some((FxHashMap::default(), *v)),
        SurfaceExpr::Ident(name) => {
            let mut m = FxHashMap::default();
            m.insert(name.clone(), 1);
            Some((m, 0))
        }
        SurfaceExpr::Binary { op, a, b } => {
            let (ma, ca) = surface_coefficients(a)?;
            let (mb, cb) = surface_coefficients(b)?;
            match op {
                SurfaceOp::Add | SurfaceOp::Sub => {
                    let sign = if *op == SurfaceOp::Add { 1 } else { -1 };
                    let mut m = ma;
                    for (k, v) in mb {
                        *m.entry(k).or_insert(0) += sign * v;
                    }
                    Some((m, ca + sign * cb))
                }
                SurfaceOp::Mul => {
                    if ma.is_empty() {
                        let mut m = mb;
                        for v in m.values_mut() {
                            *v *= ca;
                        }
                        Some((m, ca * cb))
                    } else if mb.is_empty() {
                        let mut m = ma;
                        for v in m.values_mut() {
                            *v *= cb;
                        }
                        Some((m, ca * cb))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

fn resolve_extents(accesses: &[&TensorRef]) -> Result<FxHashMap<String, u64>> {
    let mut extents: FxHashMap<String, u64> = FxHashMap::default();

    // bare arguments pin extents exactly
    for access in accesses {
        for (arg, dim) in access.args.iter().zip(&access.shape) {
            if let SurfaceExpr::Ident(name) = arg {
                match extents.get(name) {
                    Some(known) if known != dim => {
                        return Err(TensorError::ExtentMismatch {
                            index: name.clone(),
                            expected: *known,
                            got: *dim,
                        });
                    }
                    Some(_) => {}
                    None => {
                        extents.insert(name.clone(), *dim);
                    }
                }
            }
        }
    }

    // affine arguments bound one unknown at a time
    let mut changed = true;
    while changed {
        changed = false;
        for access in accesses {
            for (arg, dim) in access.args.iter().zip(&access.shape) {
                let Some((coeffs, constant)) = surface_coefficients(arg) else {
                    continue;
                };
                let unknown: Vec<(&String, i64)> = coeffs
                    .iter()
                    .filter(|(name, _)| !extents.contains_key(*name))
                    .map(|(name, c)| (name, *c))
                    .collect();
                let [(name, c)] = unknown[..] else { continue };
                if c <= 0 {
                    continue;
                }
                // largest value the known part can take
                let mut rest_max = constant;
                for (other, oc) in &coeffs {
                    if other == name {
                        continue;
                    }
                    let ext = extents[other] as i64;
                    if *oc > 0 {
                        rest_max += oc * (ext - 1);
                    }
                }
                let slack = *dim as i64 - 1 - rest_max;
                if slack < 0 {
                    return Err(TensorError::shape_mismatch(format!(
                        "access of '{}' can never stay within dimension {}",
                        access.name, dim
                    )));
                }
                extents.insert(name.clone(), (slack.div_euclid(c) + 1) as u64);
                changed = true;
            }
        }
    }

    // a lone `i // c` argument admits dim * c iterations
    for access in accesses {
        for (arg, dim) in access.args.iter().zip(&access.shape) {
            if let SurfaceExpr::Binary {
                op: SurfaceOp::FloorDiv,
                a,
                b,
            } = arg
            {
                if let (SurfaceExpr::Ident(name), SurfaceExpr::Int(c)) = (&**a, &**b) {
                    if *c > 0 && !extents.contains_key(name) {
                        extents.insert(name.clone(), dim * (*c as u64));
                    }
                }
            }
        }
    }

    Ok(extents)
}

fn lower_index_expr(
    e: &SurfaceExpr,
    indices: &FxHashMap<String, Expr>,
) -> Result<Expr> {
    match e {
        SurfaceExpr::Ident(name) => indices.get(name).cloned().ok_or_else(|| {
            TensorError::UnresolvedExtent {
                index: name.clone(),
            }
        }),
        SurfaceExpr::Int(v) => Ok(Expr::int32(*v)),
        SurfaceExpr::Binary { op, a, b } => {
            let ty = Type::int_scalar(32);
            let ir_op = match op {
                SurfaceOp::Add => BinaryOp::Add,
                SurfaceOp::Sub => BinaryOp::Sub,
                SurfaceOp::Mul => BinaryOp::Mul,
                SurfaceOp::Div => BinaryOp::Div,
                SurfaceOp::FloorDiv => BinaryOp::FloorDiv,
                SurfaceOp::Mod => BinaryOp::FloorMod,
            };
            Ok(Expr::binary(
                ty,
                ir_op,
                lower_index_expr(a, indices)?,
                lower_index_expr(b, indices)?,
            ))
        }
        _ => Err(TensorError::shape_mismatch(
            "only affine index expressions may index a tensor",
        )),
    }
}

fn lower_value_expr(
    e: &SurfaceExpr,
    indices: &FxHashMap<String, Expr>,
    data_ty: Type,
) -> Result<Expr> {
    match e {
        SurfaceExpr::Tensor(t) => {
            let args = t
                .args
                .iter()
                .map(|a| lower_index_expr(a, indices))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::var(data_ty, t.name.clone(), args, t.shape.clone()))
        }
        SurfaceExpr::Int(v) => Ok(Expr::float(data_ty, *v as f64)),
        SurfaceExpr::Float(v) => Ok(Expr::float(data_ty, *v)),
        SurfaceExpr::Ident(name) => Err(TensorError::UnresolvedExtent {
            index: name.clone(),
        }),
        SurfaceExpr::Binary { op, a, b } => {
            let ir_op = match op {
                SurfaceOp::Add => BinaryOp::Add,
                SurfaceOp::Sub => BinaryOp::Sub,
                SurfaceOp::Mul => BinaryOp::Mul,
                SurfaceOp::Div => BinaryOp::Div,
                SurfaceOp::FloorDiv => BinaryOp::FloorDiv,
                SurfaceOp::Mod => BinaryOp::FloorMod,
            };
            Ok(Expr::binary(
                data_ty,
                ir_op,
                lower_value_expr(a, indices, data_ty)?,
                lower_value_expr(b, indices, data_ty)?,
            ))
        }
    }
}

fn check_stmt(stmt: &Assignment, data_ty: Type) -> Result<CheckedStmt> {
    let mut accesses: Vec<&TensorRef> = vec![&stmt.lhs];
    collect_accesses(&stmt.rhs, &mut accesses);
    let extents = resolve_extents(&accesses)?;

    // spatial axes are the left-hand side's bare indices, in order
    let mut spatial_names = Vec::new();
    for arg in &stmt.lhs.args {
        let SurfaceExpr::Ident(name) = arg else {
            return Err(TensorError::shape_mismatch(
                "output accesses must use bare indices",
            ));
        };
        if spatial_names.contains(name) {
            return Err(TensorError::RepeatedAxis { name: name.clone() });
        }
        spatial_names.push(name.clone());
    }

    let mut all_names = spatial_names.clone();
    collect_idents(&stmt.rhs, &mut all_names);

    let index_ty = Type::int_scalar(32);
    let mut index_nodes: FxHashMap<String, Expr> = FxHashMap::default();
    let mut all_args = Vec::with_capacity(all_names.len());
    for (pos, name) in all_names.iter().enumerate() {
        let extent = *extents
            .get(name)
            .ok_or_else(|| TensorError::UnresolvedExtent {
                index: name.clone(),
            })?;
        let kind = if pos < spatial_names.len() {
            IndexKind::Spatial
        } else {
            IndexKind::Reduce
        };
        let node = Expr::index(
            index_ty,
            name.clone(),
            Expr::dom_i32(0, extent as i64),
            kind,
        );
        index_nodes.insert(name.clone(), node.clone());
        all_args.push(node);
    }

    let dst = lower_value_expr(&SurfaceExpr::Tensor(stmt.lhs.clone()), &index_nodes, data_ty)?;
    let plain_rhs = lower_value_expr(&stmt.rhs, &index_nodes, data_ty)?;
    let rhs = add(&dst, &plain_rhs);

    let mut inputs: Vec<Expr> = Vec::new();
    for access in accesses.iter().skip(1) {
        if access.name == stmt.lhs.name
            || inputs.iter().any(|v| v.var_name() == Some(access.name.as_str()))
        {
            continue;
        }
        let args = access
            .args
            .iter()
            .map(|a| lower_index_expr(a, &index_nodes))
            .collect::<Result<Vec<_>>>()?;
        inputs.push(Expr::var(
            data_ty,
            access.name.clone(),
            args,
            access.shape.clone(),
        ));
    }

    Ok(CheckedStmt {
        dst,
        rhs,
        call_args_index: (0..spatial_names.len()).collect(),
        all_args,
        inputs,
    })
}

/// Shape-check a parsed program and lower every statement to IR.
pub fn check_program(program: &Program) -> Result<Vec<CheckedStmt>> {
    let data_ty = Type::float_scalar(32);
    program
        .stmts
        .iter()
        .map(|s| check_stmt(s, data_ty))
        .collect()
}

/// Assemble the forward kernel for a checked program.
#[must_use]
pub fn build_kernel(name: &str, stmts: &[CheckedStmt]) -> Group {
    let mut body = Vec::with_capacity(stmts.len());
    let mut inputs: Vec<Expr> = Vec::new();
    let mut outputs: Vec<Expr> = Vec::new();
    for stmt in stmts {
        body.push(Stmt::loop_nest(
            stmt.all_args.clone(),
            vec![Stmt::move_data(
                stmt.dst.clone(),
                stmt.rhs.clone(),
                MoveKind::MemToMem,
            )],
        ));
        for input in &stmt.inputs {
            if !inputs.iter().any(|v| v.var_name() == input.var_name()) {
                inputs.push(input.clone());
            }
        }
        if !outputs.iter().any(|v| v.var_name() == stmt.dst.var_name()) {
            outputs.push(stmt.dst.clone());
        }
    }
    inputs.retain(|v| !outputs.iter().any(|o| o.var_name() == v.var_name()));
    Group::kernel(name, inputs, outputs, body, KernelTarget::Cpu)
}

#[cfg(test)]
mod tests {
    use crate::core::ir::ExprKind;
    use crate::parser::parse;

    use super::*;

    fn dom_of(index: &Expr) -> (i64, i64) {
        let ExprKind::Index { dom, .. } = index.kind() else {
            panic!("not an index");
        };
        dom.dom_literal().expect("literal dom")
    }

    #[test]
    fn gemm_extents_and_kinds() {
        let prog = parse("C<1024,512>[i,j] = A<1024,256>[i,k] * B<256,512>[k,j];")
            .expect("parse");
        let checked = check_program(&prog).expect("check");
        let stmt = &checked[0];
        let names: Vec<_> = stmt
            .all_args
            .iter()
            .map(|a| a.index_name().expect("index").to_string())
            .collect();
        assert_eq!(names, ["i", "j", "k"]);
        assert_eq!(dom_of(&stmt.all_args[0]), (0, 1024));
        assert_eq!(dom_of(&stmt.all_args[1]), (0, 512));
        assert_eq!(dom_of(&stmt.all_args[2]), (0, 256));
        assert_eq!(stmt.call_args_index, [0, 1]);
        let ExprKind::Index { kind, .. } = stmt.all_args[2].kind() else {
            panic!("not an index");
        };
        assert_eq!(*kind, IndexKind::Reduce);
    }

    #[test]
    fn conv_extent_from_affine_argument() {
        let prog = parse("O<2,5>[n,p] = I<2,7>[n, p + r] * W<3>[r];").expect("parse");
        let checked = check_program(&prog).expect("check");
        let stmt = &checked[0];
        // r is bare in W, so it pins to 3; p + r stays within 7
        let r = stmt
            .all_args
            .iter()
            .find(|a| a.index_name() == Some("r"))
            .expect("r exists");
        assert_eq!(dom_of(r), (0, 3));
    }

    #[test]
    fn affine_bound_without_bare_use() {
        let prog = parse("O<5>[p] = I<7>[p + r];").expect("parse");
        let checked = check_program(&prog).expect("check");
        let r = checked[0]
            .all_args
            .iter()
            .find(|a| a.index_name() == Some("r"))
            .expect("r exists");
        // p in [0,5) leaves 7 - 1 - 4 = 2 of slack, so r gets [0, 3)
        assert_eq!(dom_of(r), (0, 3));
    }

    #[test]
    fn floordiv_extent_fallback() {
        let prog = parse("Y<8>[q] = X<8>[i // 8] * Y<8>[q];").expect("parse");
        // i only ever appears under // 8, so it runs over 8 * 8 iterations
        let checked = check_program(&prog).expect("check");
        let i = checked[0]
            .all_args
            .iter()
            .find(|a| a.index_name() == Some("i"))
            .expect("i exists");
        assert_eq!(dom_of(i), (0, 64));
    }

    #[test]
    fn conflicting_extents_are_rejected() {
        let prog = parse("C<4>[i] = A<4>[i] + B<5>[i];").expect("parse");
        assert!(matches!(
            check_program(&prog),
            Err(TensorError::ExtentMismatch { .. })
        ));
    }

    #[test]
    fn shared_index_nodes() {
        let prog = parse("C<4,4>[i,j] = A<4,4>[i,j] * B<4,4>[i,j];").expect("parse");
        let checked = check_program(&prog).expect("check");
        let stmt = &checked[0];
        let ExprKind::Binary { b: product, .. } = stmt.rhs.kind() else {
            panic!("expected dst + product");
        };
        let ExprKind::Binary { a: access_a, .. } = product.kind() else {
            panic!("expected a product");
        };
        let ExprKind::Var { args, .. } = access_a.kind() else {
            panic!("expected an access");
        };
        assert!(args[0].same_as(&stmt.all_args[0]));
    }

    #[test]
    fn rhs_includes_accumulation() {
        let prog = parse("C<4>[i] = A<4>[i];").expect("parse");
        let checked = check_program(&prog).expect("check");
        let ExprKind::Binary {
            op: BinaryOp::Add,
            a,
            ..
        } = checked[0].rhs.kind()
        else {
            panic!("expected dst + rhs");
        };
        assert_eq!(a.var_name(), Some("C"));
    }

    #[test]
    fn kernel_splits_inputs_and_outputs() {
        let prog = parse("C<4>[i] = A<4>[i] * B<4>[i];").expect("parse");
        let checked = check_program(&prog).expect("check");
        let kernel = build_kernel("mul4", &checked);
        let crate::core::ir::GroupKind::Kernel {
            inputs, outputs, ..
        } = kernel.kind();
        let input_names: Vec<_> = inputs.iter().filter_map(Expr::var_name).collect();
        assert_eq!(input_names, ["A", "B"]);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].var_name(), Some("C"));
    }
}
