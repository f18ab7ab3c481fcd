#![forbid(unsafe_code)]
//! Index-space reverse-mode autodiff for tensor expressions
//!
//! A small tensor-expression compiler: it parses assignment statements like
//! `C<1024,512>[i,j] = A<1024,256>[i,k] * B<256,512>[k,j];`, lowers them to
//! a typed loop-nest IR, differentiates them **at the index-expression
//! level** (inverting the integer linear system behind every tensor access
//! via Smith Normal Form), and emits C source for either direction.
//!
//! # Usage Examples
//!
//! ## Forward kernel
//! ```
//! let code = tensordiff::compile_forward("C<4>[i] = A<4>[i];", "copy4").unwrap();
//! assert!(code.contains("void copy4"));
//! assert!(code.contains("C[i] = (C[i] + A[i]);"));
//! ```
//!
//! ## Gradient kernel
//! ```
//! let code =
//!     tensordiff::compile_gradient("Y<4>[i] = X<4>[i];", "copy_grad", "X").unwrap();
//! assert!(code.contains("dX[z0] = (dX[z0] + dY[z0]);"));
//! ```
//!
//! ## IR-level API
//! The surface syntax is a convenience; [`grad_stmt`] works on IR you build
//! yourself, and returns the reversed `Move` together with the synthesised
//! reduction axes and bound conditions.

pub mod arith;
pub mod autodiff;
pub mod codegen;
pub mod core;
pub mod parser;
pub mod shape;
pub mod simplify;
pub mod substitute;

#[cfg(test)]
mod tests;

pub use autodiff::{Gradient, grad_stmt};
pub use codegen::codegen_c;
pub use crate::core::{
    BinaryOp, CallKind, CompareOp, Expr, ExprKind, Group, GroupKind, IndexKind, KernelTarget,
    MoveKind, Result, Span, Stmt, StmtKind, TensorError, Type, TypeCode, UnaryOp,
};
pub use parser::parse;
pub use shape::{CheckedStmt, build_kernel, check_program};
pub use simplify::simplify;

use crate::core::visitor::IrVisitor;

/// Compile a source program into the C implementation of its forward
/// computation.
pub fn compile_forward(source: &str, kernel_name: &str) -> Result<String> {
    let program = parse(source)?;
    let checked = check_program(&program)?;
    codegen_c(&build_kernel(kernel_name, &checked))
}

/// The gradient of one checked statement with respect to `tensor`.
pub fn gradient_of(stmt: &CheckedStmt, tensor: &str) -> Result<Gradient> {
    let grad_to = stmt.find_access(tensor).ok_or_else(|| {
        TensorError::shape_mismatch(format!(
            "tensor '{tensor}' is not read by the statement"
        ))
    })?;
    let dst_name = stmt.dst.var_name().unwrap_or_default();
    let ExprKind::Var { args, shape, .. } = stmt.dst.kind() else {
        return Err(TensorError::shape_mismatch("statement has no Var output"));
    };
    let doutput = Expr::var(
        stmt.dst.ty(),
        format!("d{dst_name}"),
        args.clone(),
        shape.clone(),
    );
    grad_stmt(
        &stmt.rhs,
        &stmt.all_args,
        &stmt.call_args_index,
        &grad_to,
        &doutput,
    )
}

// Distinct tensor accesses in an expression, in visit order.
fn collect_accesses(expr: &Expr) -> Result<Vec<Expr>> {
    struct Vars {
        seen: Vec<Expr>,
    }
    impl IrVisitor for Vars {
        fn visit_var(
            &mut self,
            expr: &Expr,
            name: &str,
            args: &[Expr],
            _shape: &[u64],
        ) -> Result<()> {
            if !self
                .seen
                .iter()
                .any(|v| v.var_name() == Some(name))
            {
                self.seen.push(expr.clone());
            }
            for arg in args {
                self.visit_expr(arg)?;
            }
            Ok(())
        }
    }
    let mut vars = Vars { seen: Vec::new() };
    vars.visit_expr(expr)?;
    Ok(vars.seen)
}

/// Wrap a gradient into a standalone kernel group.
pub fn gradient_kernel(kernel_name: &str, gradient: &Gradient) -> Result<Group> {
    let StmtKind::Move { dst, src, .. } = gradient.stmt.kind() else {
        return Err(TensorError::shape_mismatch("gradient without a Move"));
    };
    let mut inputs = collect_accesses(src)?;
    for cond in collect_accesses(&gradient.condition)? {
        if !inputs.iter().any(|v| v.var_name() == cond.var_name()) {
            inputs.push(cond);
        }
    }
    inputs.retain(|v| v.var_name() != dst.var_name());
    Ok(Group::kernel(
        kernel_name,
        inputs,
        vec![dst.clone()],
        vec![gradient.as_loop_nest()],
        KernelTarget::Cpu,
    ))
}

/// Compile a source program into the C implementation of the gradient of
/// its first statement reading `tensor`.
pub fn compile_gradient(source: &str, kernel_name: &str, tensor: &str) -> Result<String> {
    let program = parse(source)?;
    let checked = check_program(&program)?;
    let stmt = checked
        .iter()
        .find(|s| s.find_access(tensor).is_some())
        .ok_or_else(|| {
            TensorError::shape_mismatch(format!(
                "no statement reads tensor '{tensor}'"
            ))
        })?;
    let gradient = gradient_of(stmt, tensor)?;
    codegen_c(&gradient_kernel(kernel_name, &gradient)?)
}
