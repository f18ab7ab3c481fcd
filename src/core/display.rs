//! Human-readable printing for IR trees.
//!
//! The textual form is for diagnostics and tests; the C emitter in
//! [`crate::codegen`] is the only authoritative lowering.

use std::fmt;

use super::ir::{
    BinaryOp, CompareOp, Expr, ExprKind, Group, GroupKind, Stmt, StmtKind, UnaryOp,
};

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::FloorDiv => "//",
        BinaryOp::FloorMod => "%%",
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

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (pos, item) in items.iter().enumerate() {
        if pos > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::IntImm(v) => write!(f, "{v}"),
            ExprKind::UIntImm(v) => write!(f, "{v}"),
            ExprKind::FloatImm(v) => write!(f, "{v}"),
            ExprKind::StringImm(s) => write!(f, "\"{s}\""),
            ExprKind::Unary { op, a } => match op {
                UnaryOp::Neg => write!(f, "-{a}"),
                UnaryOp::Not => write!(f, "!{a}"),
            },
            ExprKind::Binary { op, a, b } => {
                write!(f, "({a} {} {b})", binary_symbol(*op))
            }
            ExprKind::Compare { op, a, b } => {
                write!(f, "({a} {} {b})", compare_symbol(*op))
            }
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            } => write!(f, "select({cond}, {true_value}, {false_value})"),
            ExprKind::Call {
                func_name, args, ..
            } => {
                write!(f, "{func_name}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Cast { new_type, val } => write!(f, "cast<{new_type}>({val})"),
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => write!(f, "ramp({base}, {stride}, {lanes})"),
            ExprKind::Var { name, args, .. } => {
                write!(f, "{name}[")?;
                write_list(f, args)?;
                write!(f, "]")
            }
            ExprKind::Dom { begin, extent } => {
                if let (Some(b), Some(e)) = (begin.int_value(), extent.int_value()) {
                    write!(f, "[{}, {})", b, b + e)
                } else {
                    write!(f, "[{begin}, {begin}+{extent})")
                }
            }
            ExprKind::Index { name, .. } => write!(f, "{name}"),
        }
    }
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    let pad = "  ".repeat(indent);
    match stmt.kind() {
        StmtKind::LoopNest { indices, body } => {
            let mut level = indent;
            for index in indices {
                let ExprKind::Index { name, dom, .. } = index.kind() else {
                    continue;
                };
                writeln!(f, "{}for {name} in {dom} {{", "  ".repeat(level))?;
                level += 1;
            }
            for s in body {
                write_stmt(f, s, level)?;
            }
            for level in (indent..indent + indices.len()).rev() {
                writeln!(f, "{}}}", "  ".repeat(level))?;
            }
            Ok(())
        }
        StmtKind::IfThenElse {
            cond,
            true_case,
            false_case,
        } => {
            writeln!(f, "{pad}if {cond} {{")?;
            write_stmt(f, true_case, indent + 1)?;
            if let Some(fc) = false_case {
                writeln!(f, "{pad}}} else {{")?;
                write_stmt(f, fc, indent + 1)?;
            }
            writeln!(f, "{pad}}}")
        }
        StmtKind::Move { dst, src, .. } => writeln!(f, "{pad}{dst} = {src};"),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let GroupKind::Kernel {
            name,
            inputs,
            outputs,
            body,
            ..
        } = self.kind();
        write!(f, "kernel {name}(")?;
        write_list(f, inputs)?;
        write!(f, ") -> (")?;
        write_list(f, outputs)?;
        writeln!(f, ") {{")?;
        for stmt in body {
            write_stmt(f, stmt, 1)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use crate::core::ir::{IndexKind, MoveKind};
    use crate::core::types::Type;

    use super::*;

    #[test]
    fn expr_printing() {
        let ty = Type::int_scalar(32);
        let i = Expr::index(ty, "i", Expr::dom_i32(0, 16), IndexKind::Spatial);
        let access = Expr::var(Type::float_scalar(32), "A", vec![i.clone()], vec![16]);
        assert_eq!(access.to_string(), "A[i]");
        let sum = Expr::binary(ty, BinaryOp::Add, i.clone(), Expr::int32(1));
        assert_eq!(sum.to_string(), "(i + 1)");
    }

    #[test]
    fn loop_nest_printing() {
        let ty = Type::int_scalar(32);
        let i = Expr::index(ty, "i", Expr::dom_i32(0, 4), IndexKind::Spatial);
        let dst = Expr::var(Type::float_scalar(32), "Y", vec![i.clone()], vec![4]);
        let src = Expr::var(Type::float_scalar(32), "X", vec![i.clone()], vec![4]);
        let nest = Stmt::loop_nest(
            vec![i],
            vec![Stmt::move_data(dst, src, MoveKind::MemToMem)],
        );
        let text = nest.to_string();
        assert!(text.contains("for i in [0, 4)"));
        assert!(text.contains("Y[i] = X[i];"));
    }
}
