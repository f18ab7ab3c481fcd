//! Polymorphic traversal over IR trees.
//!
//! Two capability sets cover every pass in the crate:
//!
//! - [`IrVisitor`] — read-only walk. One method per node kind; the default
//!   for each recurses into the children in their natural order.
//! - [`IrMutator`] — rebuilding walk. One method per node kind; the default
//!   reconstructs the node from mutated children, returning the *original*
//!   handle when no child changed so untouched subtrees stay shared.
//!
//! Both are fallible: a pass that refuses a node kind overrides its method
//! with an [`UnsupportedNode`](crate::TensorError::UnsupportedNode) error,
//! and the failure propagates out of the dispatch.

use super::error::Result;
use super::ir::{
    BinaryOp, CallKind, CompareOp, Expr, ExprKind, Group, GroupKind, IndexKind, MoveKind, Stmt,
    StmtKind, UnaryOp,
};
use super::types::Type;

/// Read-only traversal with one overridable method per node kind.
#[allow(unused_variables, reason = "default impls ignore most arguments")]
pub trait IrVisitor {
    /// Dispatch on an expression's kind.
    fn visit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr.kind() {
            ExprKind::IntImm(v) => self.visit_int_imm(expr, *v),
            ExprKind::UIntImm(v) => self.visit_uint_imm(expr, *v),
            ExprKind::FloatImm(v) => self.visit_float_imm(expr, *v),
            ExprKind::StringImm(s) => self.visit_string_imm(expr, s),
            ExprKind::Unary { op, a } => self.visit_unary(expr, *op, a),
            ExprKind::Binary { op, a, b } => self.visit_binary(expr, *op, a, b),
            ExprKind::Compare { op, a, b } => self.visit_compare(expr, *op, a, b),
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            } => self.visit_select(expr, cond, true_value, false_value),
            ExprKind::Call {
                func_name,
                args,
                call_kind,
            } => self.visit_call(expr, func_name, args, *call_kind),
            ExprKind::Cast { new_type, val } => self.visit_cast(expr, *new_type, val),
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => self.visit_ramp(expr, base, *stride, *lanes),
            ExprKind::Var { name, args, shape } => self.visit_var(expr, name, args, shape),
            ExprKind::Dom { begin, extent } => self.visit_dom(expr, begin, extent),
            ExprKind::Index { name, dom, kind } => self.visit_index(expr, name, dom, *kind),
        }
    }

    /// Visit a signed integer immediate.
    fn visit_int_imm(&mut self, expr: &Expr, value: i64) -> Result<()> {
        Ok(())
    }

    /// Visit an unsigned integer immediate.
    fn visit_uint_imm(&mut self, expr: &Expr, value: u64) -> Result<()> {
        Ok(())
    }

    /// Visit a floating point immediate.
    fn visit_float_imm(&mut self, expr: &Expr, value: f64) -> Result<()> {
        Ok(())
    }

    /// Visit a string immediate.
    fn visit_string_imm(&mut self, expr: &Expr, value: &str) -> Result<()> {
        Ok(())
    }

    /// Visit a unary operation.
    fn visit_unary(&mut self, expr: &Expr, op: UnaryOp, a: &Expr) -> Result<()> {
        self.visit_expr(a)
    }

    /// Visit a binary operation.
    fn visit_binary(&mut self, expr: &Expr, op: BinaryOp, a: &Expr, b: &Expr) -> Result<()> {
        self.visit_expr(a)?;
        self.visit_expr(b)
    }

    /// Visit a comparison.
    fn visit_compare(&mut self, expr: &Expr, op: CompareOp, a: &Expr, b: &Expr) -> Result<()> {
        self.visit_expr(a)?;
        self.visit_expr(b)
    }

    /// Visit a conditional value.
    fn visit_select(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        true_value: &Expr,
        false_value: &Expr,
    ) -> Result<()> {
        self.visit_expr(cond)?;
        self.visit_expr(true_value)?;
        self.visit_expr(false_value)
    }

    /// Visit a call.
    fn visit_call(
        &mut self,
        expr: &Expr,
        func_name: &str,
        args: &[Expr],
        call_kind: CallKind,
    ) -> Result<()> {
        for arg in args {
            self.visit_expr(arg)?;
        }
        Ok(())
    }

    /// Visit a cast.
    fn visit_cast(&mut self, expr: &Expr, new_type: Type, val: &Expr) -> Result<()> {
        self.visit_expr(val)
    }

    /// Visit a ramp.
    fn visit_ramp(&mut self, expr: &Expr, base: &Expr, stride: u16, lanes: u16) -> Result<()> {
        self.visit_expr(base)
    }

    /// Visit a tensor access.
    fn visit_var(&mut self, expr: &Expr, name: &str, args: &[Expr], shape: &[u64]) -> Result<()> {
        for arg in args {
            self.visit_expr(arg)?;
        }
        Ok(())
    }

    /// Visit an iteration domain.
    fn visit_dom(&mut self, expr: &Expr, begin: &Expr, extent: &Expr) -> Result<()> {
        self.visit_expr(begin)?;
        self.visit_expr(extent)
    }

    /// Visit a loop index.
    fn visit_index(&mut self, expr: &Expr, name: &str, dom: &Expr, kind: IndexKind) -> Result<()> {
        self.visit_expr(dom)
    }

    /// Dispatch on a statement's kind.
    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt.kind() {
            StmtKind::LoopNest { indices, body } => self.visit_loop_nest(stmt, indices, body),
            StmtKind::IfThenElse {
                cond,
                true_case,
                false_case,
            } => self.visit_if_then_else(stmt, cond, true_case, false_case.as_ref()),
            StmtKind::Move {
                dst,
                src,
                move_kind,
            } => self.visit_move(stmt, dst, src, *move_kind),
        }
    }

    /// Visit a loop nest.
    fn visit_loop_nest(&mut self, stmt: &Stmt, indices: &[Expr], body: &[Stmt]) -> Result<()> {
        for index in indices {
            self.visit_expr(index)?;
        }
        for s in body {
            self.visit_stmt(s)?;
        }
        Ok(())
    }

    /// Visit a conditional statement.
    fn visit_if_then_else(
        &mut self,
        stmt: &Stmt,
        cond: &Expr,
        true_case: &Stmt,
        false_case: Option<&Stmt>,
    ) -> Result<()> {
        self.visit_expr(cond)?;
        self.visit_stmt(true_case)?;
        if let Some(fc) = false_case {
            self.visit_stmt(fc)?;
        }
        Ok(())
    }

    /// Visit an assignment.
    fn visit_move(&mut self, stmt: &Stmt, dst: &Expr, src: &Expr, move_kind: MoveKind) -> Result<()> {
        self.visit_expr(dst)?;
        self.visit_expr(src)
    }

    /// Dispatch on a group's kind.
    fn visit_group(&mut self, group: &Group) -> Result<()> {
        let GroupKind::Kernel {
            inputs,
            outputs,
            body,
            ..
        } = group.kind();
        for v in inputs.iter().chain(outputs) {
            self.visit_expr(v)?;
        }
        for s in body {
            self.visit_stmt(s)?;
        }
        Ok(())
    }
}

fn mutate_all<M: IrMutator + ?Sized>(m: &mut M, exprs: &[Expr]) -> Result<(Vec<Expr>, bool)> {
    let mut changed = false;
    let mut out = Vec::with_capacity(exprs.len());
    for e in exprs {
        let ne = m.mutate_expr(e)?;
        changed |= !ne.same_as(e);
        out.push(ne);
    }
    Ok((out, changed))
}

/// Rebuilding traversal; defaults share every unchanged subtree.
#[allow(unused_variables, reason = "default impls ignore most arguments")]
pub trait IrMutator {
    /// Dispatch on an expression's kind, returning the (possibly new) node.
    fn mutate_expr(&mut self, expr: &Expr) -> Result<Expr> {
        match expr.kind() {
            ExprKind::IntImm(v) => self.mutate_int_imm(expr, *v),
            ExprKind::UIntImm(v) => self.mutate_uint_imm(expr, *v),
            ExprKind::FloatImm(v) => self.mutate_float_imm(expr, *v),
            ExprKind::StringImm(s) => self.mutate_string_imm(expr, s),
            ExprKind::Unary { op, a } => self.mutate_unary(expr, *op, a),
            ExprKind::Binary { op, a, b } => self.mutate_binary(expr, *op, a, b),
            ExprKind::Compare { op, a, b } => self.mutate_compare(expr, *op, a, b),
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            } => self.mutate_select(expr, cond, true_value, false_value),
            ExprKind::Call {
                func_name,
                args,
                call_kind,
            } => self.mutate_call(expr, func_name, args, *call_kind),
            ExprKind::Cast { new_type, val } => self.mutate_cast(expr, *new_type, val),
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => self.mutate_ramp(expr, base, *stride, *lanes),
            ExprKind::Var { name, args, shape } => self.mutate_var(expr, name, args, shape),
            ExprKind::Dom { begin, extent } => self.mutate_dom(expr, begin, extent),
            ExprKind::Index { name, dom, kind } => self.mutate_index(expr, name, dom, *kind),
        }
    }

    /// Mutate a signed integer immediate.
    fn mutate_int_imm(&mut self, expr: &Expr, value: i64) -> Result<Expr> {
        Ok(expr.clone())
    }

    /// Mutate an unsigned integer immediate.
    fn mutate_uint_imm(&mut self, expr: &Expr, value: u64) -> Result<Expr> {
        Ok(expr.clone())
    }

    /// Mutate a floating point immediate.
    fn mutate_float_imm(&mut self, expr: &Expr, value: f64) -> Result<Expr> {
        Ok(expr.clone())
    }

    /// Mutate a string immediate.
    fn mutate_string_imm(&mut self, expr: &Expr, value: &str) -> Result<Expr> {
        Ok(expr.clone())
    }

    /// Mutate a unary operation.
    fn mutate_unary(&mut self, expr: &Expr, op: UnaryOp, a: &Expr) -> Result<Expr> {
        let na = self.mutate_expr(a)?;
        if na.same_as(a) {
            Ok(expr.clone())
        } else {
            Ok(Expr::unary(expr.ty(), op, na))
        }
    }

    /// Mutate a binary operation.
    fn mutate_binary(&mut self, expr: &Expr, op: BinaryOp, a: &Expr, b: &Expr) -> Result<Expr> {
        let na = self.mutate_expr(a)?;
        let nb = self.mutate_expr(b)?;
        if na.same_as(a) && nb.same_as(b) {
            Ok(expr.clone())
        } else {
            Ok(Expr::binary(expr.ty(), op, na, nb))
        }
    }

    /// Mutate a comparison.
    fn mutate_compare(&mut self, expr: &Expr, op: CompareOp, a: &Expr, b: &Expr) -> Result<Expr> {
        let na = self.mutate_expr(a)?;
        let nb = self.mutate_expr(b)?;
        if na.same_as(a) && nb.same_as(b) {
            Ok(expr.clone())
        } else {
            Ok(Expr::compare(op, na, nb))
        }
    }

    /// Mutate a conditional value.
    fn mutate_select(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        true_value: &Expr,
        false_value: &Expr,
    ) -> Result<Expr> {
        let nc = self.mutate_expr(cond)?;
        let nt = self.mutate_expr(true_value)?;
        let nf = self.mutate_expr(false_value)?;
        if nc.same_as(cond) && nt.same_as(true_value) && nf.same_as(false_value) {
            Ok(expr.clone())
        } else {
            Ok(Expr::select(expr.ty(), nc, nt, nf))
        }
    }

    /// Mutate a call.
    fn mutate_call(
        &mut self,
        expr: &Expr,
        func_name: &str,
        args: &[Expr],
        call_kind: CallKind,
    ) -> Result<Expr> {
        let (new_args, changed) = mutate_all(self, args)?;
        if changed {
            Ok(Expr::call(expr.ty(), func_name, new_args, call_kind))
        } else {
            Ok(expr.clone())
        }
    }

    /// Mutate a cast.
    fn mutate_cast(&mut self, expr: &Expr, new_type: Type, val: &Expr) -> Result<Expr> {
        let nv = self.mutate_expr(val)?;
        if nv.same_as(val) {
            Ok(expr.clone())
        } else {
            Ok(Expr::cast(new_type, nv))
        }
    }

    /// Mutate a ramp.
    fn mutate_ramp(&mut self, expr: &Expr, base: &Expr, stride: u16, lanes: u16) -> Result<Expr> {
        let nb = self.mutate_expr(base)?;
        if nb.same_as(base) {
            Ok(expr.clone())
        } else {
            Ok(Expr::ramp(expr.ty(), nb, stride, lanes))
        }
    }

    /// Mutate a tensor access.
    fn mutate_var(&mut self, expr: &Expr, name: &str, args: &[Expr], shape: &[u64]) -> Result<Expr> {
        let (new_args, changed) = mutate_all(self, args)?;
        if changed {
            Ok(Expr::var(expr.ty(), name, new_args, shape.to_vec()))
        } else {
            Ok(expr.clone())
        }
    }

    /// Mutate an iteration domain.
    fn mutate_dom(&mut self, expr: &Expr, begin: &Expr, extent: &Expr) -> Result<Expr> {
        let nb = self.mutate_expr(begin)?;
        let ne = self.mutate_expr(extent)?;
        if nb.same_as(begin) && ne.same_as(extent) {
            Ok(expr.clone())
        } else {
            Ok(Expr::dom(expr.ty(), nb, ne))
        }
    }

    /// Mutate a loop index.
    fn mutate_index(&mut self, expr: &Expr, name: &str, dom: &Expr, kind: IndexKind) -> Result<Expr> {
        let nd = self.mutate_expr(dom)?;
        if nd.same_as(dom) {
            Ok(expr.clone())
        } else {
            Ok(Expr::index(expr.ty(), name, nd, kind))
        }
    }

    /// Dispatch on a statement's kind.
    fn mutate_stmt(&mut self, stmt: &Stmt) -> Result<Stmt> {
        match stmt.kind() {
            StmtKind::LoopNest { indices, body } => {
                let (new_indices, ic) = mutate_all(self, indices)?;
                let mut bc = false;
                let mut new_body = Vec::with_capacity(body.len());
                for s in body {
                    let ns = self.mutate_stmt(s)?;
                    bc |= !ns.same_as(s);
                    new_body.push(ns);
                }
                if ic || bc {
                    Ok(Stmt::loop_nest(new_indices, new_body))
                } else {
                    Ok(stmt.clone())
                }
            }
            StmtKind::IfThenElse {
                cond,
                true_case,
                false_case,
            } => {
                let nc = self.mutate_expr(cond)?;
                let nt = self.mutate_stmt(true_case)?;
                let nf = match false_case {
                    Some(fc) => Some(self.mutate_stmt(fc)?),
                    None => None,
                };
                let unchanged = nc.same_as(cond)
                    && nt.same_as(true_case)
                    && match (&nf, false_case) {
                        (Some(a), Some(b)) => a.same_as(b),
                        (None, None) => true,
                        _ => false,
                    };
                if unchanged {
                    Ok(stmt.clone())
                } else {
                    Ok(Stmt::if_then_else(nc, nt, nf))
                }
            }
            StmtKind::Move {
                dst,
                src,
                move_kind,
            } => {
                let nd = self.mutate_expr(dst)?;
                let ns = self.mutate_expr(src)?;
                if nd.same_as(dst) && ns.same_as(src) {
                    Ok(stmt.clone())
                } else {
                    Ok(Stmt::move_data(nd, ns, *move_kind))
                }
            }
        }
    }

    /// Dispatch on a group's kind.
    fn mutate_group(&mut self, group: &Group) -> Result<Group> {
        let GroupKind::Kernel {
            name,
            inputs,
            outputs,
            body,
            target,
        } = group.kind();
        let (new_inputs, c1) = mutate_all(self, inputs)?;
        let (new_outputs, c2) = mutate_all(self, outputs)?;
        let mut c3 = false;
        let mut new_body = Vec::with_capacity(body.len());
        for s in body {
            let ns = self.mutate_stmt(s)?;
            c3 |= !ns.same_as(s);
            new_body.push(ns);
        }
        if c1 || c2 || c3 {
            Ok(Group::kernel(
                name.clone(),
                new_inputs,
                new_outputs,
                new_body,
                *target,
            ))
        } else {
            Ok(group.clone())
        }
    }
}

/// Collects `Index` nodes satisfying a predicate, in visit order.
pub struct IndexCollector<F: FnMut(&Expr) -> bool> {
    predicate: F,
    /// Matching index nodes, deduplicated by name.
    pub results: Vec<Expr>,
}

impl<F: FnMut(&Expr) -> bool> IndexCollector<F> {
    /// Create a collector with the given predicate over `Index` nodes.
    pub fn new(predicate: F) -> Self {
        IndexCollector {
            predicate,
            results: Vec::new(),
        }
    }

    /// Collect matching indices from an expression tree.
    pub fn collect_expr(mut self, expr: &Expr) -> Result<Vec<Expr>> {
        self.visit_expr(expr)?;
        Ok(self.results)
    }

    /// Collect matching indices from a statement tree.
    pub fn collect_stmt(mut self, stmt: &Stmt) -> Result<Vec<Expr>> {
        self.visit_stmt(stmt)?;
        Ok(self.results)
    }
}

impl<F: FnMut(&Expr) -> bool> IrVisitor for IndexCollector<F> {
    fn visit_index(&mut self, expr: &Expr, name: &str, _dom: &Expr, _kind: IndexKind) -> Result<()> {
        if (self.predicate)(expr)
            && !self
                .results
                .iter()
                .any(|r| r.index_name() == Some(name))
        {
            self.results.push(expr.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NodeCounter {
        count: usize,
    }

    impl IrVisitor for NodeCounter {
        fn visit_int_imm(&mut self, _expr: &Expr, _value: i64) -> Result<()> {
            self.count += 1;
            Ok(())
        }

        fn visit_binary(&mut self, _e: &Expr, _op: BinaryOp, a: &Expr, b: &Expr) -> Result<()> {
            self.count += 1;
            self.visit_expr(a)?;
            self.visit_expr(b)
        }
    }

    struct Identity;
    impl IrMutator for Identity {}

    #[test]
    fn visitor_counts_nodes() {
        let e = Expr::binary(
            Type::int_scalar(32),
            BinaryOp::Add,
            Expr::int32(1),
            Expr::int32(2),
        );
        let mut counter = NodeCounter { count: 0 };
        counter.visit_expr(&e).expect("visit");
        assert_eq!(counter.count, 3);
    }

    #[test]
    fn identity_mutation_shares_tree() {
        let i = Expr::index(
            Type::int_scalar(32),
            "i",
            Expr::dom_i32(0, 8),
            IndexKind::Reduce,
        );
        let e = Expr::binary(Type::int_scalar(32), BinaryOp::Mul, i.clone(), Expr::int32(3));
        let out = Identity.mutate_expr(&e).expect("mutate");
        assert!(out.same_as(&e));
    }

    #[test]
    fn collector_finds_reduce_indices() {
        let ty = Type::int_scalar(32);
        let i = Expr::index(ty, "i", Expr::dom_i32(0, 8), IndexKind::Spatial);
        let k = Expr::index(ty, "k", Expr::dom_i32(0, 4), IndexKind::Reduce);
        let e = Expr::binary(ty, BinaryOp::Add, i, k);
        let found = IndexCollector::new(|ix| {
            matches!(
                ix.kind(),
                ExprKind::Index {
                    kind: IndexKind::Reduce,
                    ..
                }
            )
        })
        .collect_expr(&e)
        .expect("collect");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].index_name(), Some("k"));
    }
}
