//! C source emission for kernels.
//!
//! Lowers a [`Group`] into a free C++ function whose tensor parameters are
//! references to fixed-size arrays, `LoopNest` statements into `for` loops
//! and `Move` statements into assignments. `Select` and `Ramp` have no C
//! lowering here and must be eliminated before emission.
//!
//! Set the `DB_DEBUG_CODEGEN` environment variable (read once, at first
//! use) to a level ≥ 1 to trace emitted kernels on stderr.

use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::core::error::{Result, TensorError};
use crate::core::ir::{
    BinaryOp, CompareOp, Expr, ExprKind, Group, GroupKind, Stmt, StmtKind, UnaryOp,
};
use crate::core::types::{Type, TypeCode};

fn debug_level() -> i64 {
    static LEVEL: OnceLock<i64> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        std::env::var("DB_DEBUG_CODEGEN")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    })
}

/// Emits C source from IR.
#[derive(Debug, Default)]
pub struct CodeGenC {
    out: String,
}

fn print_type(ty: Type) -> Result<String> {
    if !ty.is_scalar() {
        return Err(TensorError::unsupported("CodeGenC", ty.to_string()));
    }
    Ok(match ty.code {
        TypeCode::Int => format!("int{}_t", ty.bits),
        TypeCode::UInt => format!("uint{}_t", ty.bits),
        TypeCode::Float => match ty.bits {
            32 => "float".to_string(),
            64 => "double".to_string(),
            _ => {
                return Err(TensorError::unsupported("CodeGenC", ty.to_string()));
            }
        },
        TypeCode::Bool => "bool".to_string(),
        TypeCode::String | TypeCode::Handle => {
            return Err(TensorError::unsupported("CodeGenC", ty.to_string()));
        }
    })
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div | BinaryOp::FloorDiv => "/",
        BinaryOp::Mod | BinaryOp::FloorMod => "%",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

fn compare_symbol(op: CompareOp) -> &'static str {
    match op {
        CompareOp::LT => "<",
        CompareOp::LE => "<=",
        CompareOp::EQ => "==",
        CompareOp::NE => "!=",
        CompareOp::GE => ">=",
        CompareOp::GT => ">",
    }
}

impl CodeGenC {
    /// A fresh emitter.
    #[must_use]
    pub fn new() -> Self {
        CodeGenC::default()
    }

    /// Emit a kernel group as a complete C function.
    pub fn print_group(mut self, group: &Group) -> Result<String> {
        let GroupKind::Kernel {
            name,
            inputs,
            outputs,
            body,
            ..
        } = group.kind();
        if debug_level() >= 1 {
            eprintln!("[codegen] emitting kernel '{name}'");
        }
        let _ = write!(self.out, "void {name}(");
        let mut first = true;
        for tensor in inputs.iter().chain(outputs) {
            if !first {
                let _ = write!(self.out, ", ");
            }
            first = false;
            self.emit_param(tensor)?;
        }
        let _ = writeln!(self.out, ") {{");
        for stmt in body {
            self.emit_stmt(stmt, 1)?;
        }
        let _ = writeln!(self.out, "}}");
        Ok(self.out)
    }

    fn emit_param(&mut self, tensor: &Expr) -> Result<()> {
        let ExprKind::Var { name, shape, .. } = tensor.kind() else {
            return Err(TensorError::unsupported("CodeGenC", tensor.to_string()));
        };
        let elem = print_type(tensor.ty())?;
        if shape.is_empty() {
            let _ = write!(self.out, "{elem} &{name}");
        } else {
            let _ = write!(self.out, "{elem} (&{name})");
            for dim in shape {
                let _ = write!(self.out, "[{dim}]");
            }
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt, indent: usize) -> Result<()> {
        let pad = "  ".repeat(indent);
        match stmt.kind() {
            StmtKind::LoopNest { indices, body } => {
                let mut level = indent;
                for index in indices {
                    let ExprKind::Index { name, dom, .. } = index.kind() else {
                        return Err(TensorError::unsupported("CodeGenC", index.to_string()));
                    };
                    let ExprKind::Dom { begin, extent } = dom.kind() else {
                        return Err(TensorError::unsupported("CodeGenC", dom.to_string()));
                    };
                    let ty = print_type(index.ty())?;
                    let pad = "  ".repeat(level);
                    let _ = write!(self.out, "{pad}for ({ty} {name} = ");
                    self.emit_expr(begin)?;
                    let _ = write!(self.out, "; {name} < ");
                    if let Some((b, e)) = dom.dom_literal() {
                        let _ = write!(self.out, "{}", b + e);
                    } else {
                        self.emit_expr(begin)?;
                        let _ = write!(self.out, " + ");
                        self.emit_expr(extent)?;
                    }
                    let _ = writeln!(self.out, "; ++{name}) {{");
                    level += 1;
                }
                for s in body {
                    self.emit_stmt(s, level)?;
                }
                for l in (indent..level).rev() {
                    let _ = writeln!(self.out, "{}}}", "  ".repeat(l));
                }
                Ok(())
            }
            StmtKind::IfThenElse {
                cond,
                true_case,
                false_case,
            } => {
                let _ = write!(self.out, "{pad}if (");
                self.emit_expr(cond)?;
                let _ = writeln!(self.out, ") {{");
                self.emit_stmt(true_case, indent + 1)?;
                if let Some(fc) = false_case {
                    let _ = writeln!(self.out, "{pad}}} else {{");
                    self.emit_stmt(fc, indent + 1)?;
                }
                let _ = writeln!(self.out, "{pad}}}");
                Ok(())
            }
            StmtKind::Move { dst, src, .. } => {
                let _ = write!(self.out, "{pad}");
                self.emit_expr(dst)?;
                let _ = write!(self.out, " = ");
                self.emit_expr(src)?;
                let _ = writeln!(self.out, ";");
                Ok(())
            }
        }
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr.kind() {
            ExprKind::IntImm(v) => {
                let _ = write!(self.out, "{v}");
                Ok(())
            }
            ExprKind::UIntImm(v) => {
                let _ = write!(self.out, "{v}");
                Ok(())
            }
            ExprKind::FloatImm(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    let _ = write!(self.out, "{v:.1}");
                } else {
                    let _ = write!(self.out, "{v}");
                }
                Ok(())
            }
            ExprKind::StringImm(s) => {
                let _ = write!(self.out, "{s}");
                Ok(())
            }
            ExprKind::Unary { op, a } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                };
                let _ = write!(self.out, "{symbol}");
                let needs_parens = !matches!(
                    a.kind(),
                    ExprKind::IntImm(_)
                        | ExprKind::UIntImm(_)
                        | ExprKind::FloatImm(_)
                        | ExprKind::Index { .. }
                        | ExprKind::Var { .. }
                );
                if needs_parens {
                    let _ = write!(self.out, "(");
                }
                self.emit_expr(a)?;
                if needs_parens {
                    let _ = write!(self.out, ")");
                }
                Ok(())
            }
            ExprKind::Binary { op, a, b } => {
                let _ = write!(self.out, "(");
                self.emit_expr(a)?;
                let _ = write!(self.out, " {} ", binary_symbol(*op));
                self.emit_expr(b)?;
                let _ = write!(self.out, ")");
                Ok(())
            }
            ExprKind::Compare { op, a, b } => {
                let _ = write!(self.out, "(");
                self.emit_expr(a)?;
                let _ = write!(self.out, " {} ", compare_symbol(*op));
                self.emit_expr(b)?;
                let _ = write!(self.out, ")");
                Ok(())
            }
            ExprKind::Call {
                func_name, args, ..
            } => {
                let _ = write!(self.out, "{func_name}(");
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        let _ = write!(self.out, ", ");
                    }
                    self.emit_expr(arg)?;
                }
                let _ = write!(self.out, ")");
                Ok(())
            }
            ExprKind::Cast { new_type, val } => {
                let _ = write!(self.out, "({})(", print_type(*new_type)?);
                self.emit_expr(val)?;
                let _ = write!(self.out, ")");
                Ok(())
            }
            ExprKind::Var { name, args, .. } => {
                let _ = write!(self.out, "{name}");
                for arg in args {
                    let _ = write!(self.out, "[");
                    self.emit_expr(arg)?;
                    let _ = write!(self.out, "]");
                }
                Ok(())
            }
            ExprKind::Index { name, .. } => {
                let _ = write!(self.out, "{name}");
                Ok(())
            }
            ExprKind::Select { .. } | ExprKind::Ramp { .. } | ExprKind::Dom { .. } => Err(
                TensorError::unsupported("CodeGenC", expr.to_string()),
            ),
        }
    }
}

/// Emit a kernel group as C source.
pub fn codegen_c(group: &Group) -> Result<String> {
    CodeGenC::new().print_group(group)
}

#[cfg(test)]
mod tests {
    use crate::parser::parse;
    use crate::shape::{build_kernel, check_program};

    use super::*;

    #[test]
    fn emits_gemm_kernel() {
        let prog = parse("C<8,4>[i,j] = A<8,2>[i,k] * B<2,4>[k,j];").expect("parse");
        let checked = check_program(&prog).expect("check");
        let kernel = build_kernel("gemm", &checked);
        let code = codegen_c(&kernel).expect("codegen");
        assert!(code.starts_with(
            "void gemm(float (&A)[8][2], float (&B)[2][4], float (&C)[8][4]) {"
        ));
        assert!(code.contains("for (int32_t i = 0; i < 8; ++i) {"));
        assert!(code.contains("for (int32_t k = 0; k < 2; ++k) {"));
        assert!(code.contains("C[i][j] = (C[i][j] + (A[i][k] * B[k][j]));"));
        assert_eq!(code.matches('{').count(), code.matches('}').count());
    }

    #[test]
    fn select_is_rejected() {
        let ty = Type::float_scalar(32);
        let sel = Expr::select(
            ty,
            Expr::bool_const(true),
            Expr::float(ty, 1.0),
            Expr::float(ty, 0.0),
        );
        let dst = Expr::var(ty, "Y", vec![], vec![]);
        let kernel = Group::kernel(
            "bad",
            vec![],
            vec![dst.clone()],
            vec![Stmt::move_data(dst, sel, crate::core::ir::MoveKind::MemToMem)],
            crate::core::ir::KernelTarget::Cpu,
        );
        assert!(matches!(
            codegen_c(&kernel),
            Err(TensorError::UnsupportedNode { .. })
        ));
    }

    #[test]
    fn float_literals_keep_a_decimal_point() {
        let ty = Type::float_scalar(32);
        let dst = Expr::var(ty, "Y", vec![], vec![]);
        let kernel = Group::kernel(
            "fill",
            vec![],
            vec![dst.clone()],
            vec![Stmt::move_data(
                dst,
                Expr::float(ty, 2.0),
                crate::core::ir::MoveKind::MemToMem,
            )],
            crate::core::ir::KernelTarget::Cpu,
        );
        let code = codegen_c(&kernel).expect("codegen");
        assert!(code.contains("Y = 2.0;"));
    }
}
