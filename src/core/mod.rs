//! Core types: IR nodes, scalar types, errors, traversal, display.

mod display;
pub mod error;
pub mod ir;
pub mod types;
pub mod visitor;

pub use error::{Result, Span, TensorError};
pub use ir::{
    BinaryOp, CallKind, CompareOp, Expr, ExprKind, Group, GroupKind, IndexKind, KernelTarget,
    MoveKind, Stmt, StmtKind, UnaryOp,
};
pub use types::{Type, TypeCode};
