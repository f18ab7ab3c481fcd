//! The tensor IR: expressions, statements and kernel groups.
//!
//! # Architecture
//!
//! Nodes are immutable and shared. The public handles [`Expr`], [`Stmt`] and
//! [`Group`] are thin `Arc` wrappers around tagged sums ([`ExprKind`],
//! [`StmtKind`], [`GroupKind`]); cloning a handle is a reference-count bump,
//! and transforms rebuild only the spine they change, sharing every untouched
//! subtree.
//!
//! ## Structural hashing
//! Every expression node carries a pre-computed structural hash for O(1)
//! equality rejection: two expressions with different hashes are definitely
//! not equal, so deep comparisons only run on probable matches. The hash also
//! lets expressions serve as map keys (the substitution bookkeeping in the
//! gradient engine relies on this).
//!
//! ## Identity vs. value
//! `PartialEq` is structural (value) equality. Pointer identity is exposed
//! separately as [`Expr::same_as`] and is the canonical notion of "the same
//! node": a loop's `Index` is one node referenced from every use site.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use super::types::Type;

/// Unary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Logical not.
    Not,
}

/// Binary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division (truncating on integers).
    Div,
    /// Remainder.
    Mod,
    /// Flooring division.
    FloorDiv,
    /// Flooring remainder.
    FloorMod,
    /// Logical and.
    And,
    /// Logical or.
    Or,
}

/// Comparison operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Less than.
    LT,
    /// Less than or equal.
    LE,
    /// Equal.
    EQ,
    /// Not equal.
    NE,
    /// Greater than or equal.
    GE,
    /// Greater than.
    GT,
}

/// Whether a call may have side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Referentially transparent.
    Pure,
    /// May observe or mutate external state.
    SideEffect,
}

/// The role of a loop index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Appears on both sides of the forward assignment (an output axis).
    Spatial,
    /// Appears only on the right-hand side (an accumulation axis).
    Reduce,
    /// Not yet classified.
    Unknown,
}

/// The memory direction of a [`StmtKind::Move`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveKind {
    /// Plain memory-to-memory assignment.
    MemToMem,
    /// Load into a local temporary.
    MemToLocal,
    /// Store from a local temporary.
    LocalToMem,
}

/// The device a kernel targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelTarget {
    /// Host CPU.
    Cpu,
    /// Accelerator (unused by the C emitter).
    Gpu,
}

// =============================================================================
// EXPR
// =============================================================================

/// A shared, immutable expression handle.
#[derive(Debug, Clone)]
pub struct Expr(Arc<ExprNode>);

/// The payload of an [`Expr`]: structural hash, type, and node kind.
#[derive(Debug)]
pub struct ExprNode {
    hash: u64,
    ty: Type,
    kind: ExprKind,
}

/// The kind (structure) of an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Signed integer immediate.
    IntImm(i64),
    /// Unsigned integer immediate.
    UIntImm(u64),
    /// Floating point immediate.
    FloatImm(f64),
    /// String immediate.
    StringImm(String),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        a: Expr,
    },
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        a: Expr,
        /// Right operand.
        b: Expr,
    },
    /// Comparison, always boolean-typed.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        a: Expr,
        /// Right operand.
        b: Expr,
    },
    /// Conditional value.
    Select {
        /// Boolean condition.
        cond: Expr,
        /// Value when the condition holds.
        true_value: Expr,
        /// Value otherwise.
        false_value: Expr,
    },
    /// Call to a named function.
    Call {
        /// Callee name.
        func_name: String,
        /// Argument expressions.
        args: Vec<Expr>,
        /// Purity marker.
        call_kind: CallKind,
    },
    /// Type conversion.
    Cast {
        /// The target type (duplicated in the node's own type).
        new_type: Type,
        /// The converted value.
        val: Expr,
    },
    /// Strided vector of lane values.
    Ramp {
        /// First lane value.
        base: Expr,
        /// Stride between lanes.
        stride: u16,
        /// Lane count.
        lanes: u16,
    },
    /// A tensor access `name[args]` with a static shape.
    Var {
        /// Tensor name.
        name: String,
        /// One index expression per dimension.
        args: Vec<Expr>,
        /// Static extent of each dimension.
        shape: Vec<u64>,
    },
    /// A half-open iteration domain `[begin, begin + extent)`.
    Dom {
        /// Inclusive lower bound.
        begin: Expr,
        /// Number of iterations.
        extent: Expr,
    },
    /// A named loop variable over a [`ExprKind::Dom`].
    Index {
        /// Loop variable name.
        name: String,
        /// The iteration domain (always a `Dom` node).
        dom: Expr,
        /// Spatial or reduction role.
        kind: IndexKind,
    },
}

fn compute_hash(ty: Type, kind: &ExprKind) -> u64 {
    let mut h = FxHasher::default();
    ty.hash(&mut h);
    std::mem::discriminant(kind).hash(&mut h);
    match kind {
        ExprKind::IntImm(v) => v.hash(&mut h),
        ExprKind::UIntImm(v) => v.hash(&mut h),
        ExprKind::FloatImm(v) => v.to_bits().hash(&mut h),
        ExprKind::StringImm(s) => s.hash(&mut h),
        ExprKind::Unary { op, a } => {
            op.hash(&mut h);
            h.write_u64(a.structural_hash());
        }
        ExprKind::Binary { op, a, b } => {
            op.hash(&mut h);
            h.write_u64(a.structural_hash());
            h.write_u64(b.structural_hash());
        }
        ExprKind::Compare { op, a, b } => {
            op.hash(&mut h);
            h.write_u64(a.structural_hash());
            h.write_u64(b.structural_hash());
        }
        ExprKind::Select {
            cond,
            true_value,
            false_value,
        } => {
            h.write_u64(cond.structural_hash());
            h.write_u64(true_value.structural_hash());
            h.write_u64(false_value.structural_hash());
        }
        ExprKind::Call {
            func_name,
            args,
            call_kind,
        } => {
            func_name.hash(&mut h);
            call_kind.hash(&mut h);
            for a in args {
                h.write_u64(a.structural_hash());
            }
        }
        ExprKind::Cast { new_type, val } => {
            new_type.hash(&mut h);
            h.write_u64(val.structural_hash());
        }
        ExprKind::Ramp {
            base,
            stride,
            lanes,
        } => {
            h.write_u64(base.structural_hash());
            stride.hash(&mut h);
            lanes.hash(&mut h);
        }
        ExprKind::Var { name, args, shape } => {
            name.hash(&mut h);
            shape.hash(&mut h);
            for a in args {
                h.write_u64(a.structural_hash());
            }
        }
        ExprKind::Dom { begin, extent } => {
            h.write_u64(begin.structural_hash());
            h.write_u64(extent.structural_hash());
        }
        ExprKind::Index { name, dom, kind } => {
            name.hash(&mut h);
            h.write_u64(dom.structural_hash());
            kind.hash(&mut h);
        }
    }
    h.finish()
}

impl Expr {
    /// Generic factory; the kind-specific constructors below are preferred.
    #[must_use]
    pub fn make(ty: Type, kind: ExprKind) -> Self {
        let hash = compute_hash(ty, &kind);
        Expr(Arc::new(ExprNode { hash, ty, kind }))
    }

    /// Signed integer immediate of the given type.
    #[must_use]
    pub fn int(ty: Type, value: i64) -> Self {
        Expr::make(ty, ExprKind::IntImm(value))
    }

    /// Signed 32-bit integer immediate, the default index arithmetic type.
    #[must_use]
    pub fn int32(value: i64) -> Self {
        Expr::int(Type::int_scalar(32), value)
    }

    /// Unsigned integer immediate.
    #[must_use]
    pub fn uint(ty: Type, value: u64) -> Self {
        Expr::make(ty, ExprKind::UIntImm(value))
    }

    /// Floating point immediate.
    #[must_use]
    pub fn float(ty: Type, value: f64) -> Self {
        Expr::make(ty, ExprKind::FloatImm(value))
    }

    /// String immediate.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Expr::make(Type::string_type(), ExprKind::StringImm(value.into()))
    }

    /// Boolean constant as a one-bit unsigned immediate.
    #[must_use]
    pub fn bool_const(value: bool) -> Self {
        Expr::uint(Type::bool_scalar(), u64::from(value))
    }

    /// Unary operation.
    #[must_use]
    pub fn unary(ty: Type, op: UnaryOp, a: Expr) -> Self {
        Expr::make(ty, ExprKind::Unary { op, a })
    }

    /// Binary operation.
    #[must_use]
    pub fn binary(ty: Type, op: BinaryOp, a: Expr, b: Expr) -> Self {
        Expr::make(ty, ExprKind::Binary { op, a, b })
    }

    /// Comparison; the node type is boolean.
    #[must_use]
    pub fn compare(op: CompareOp, a: Expr, b: Expr) -> Self {
        Expr::make(Type::bool_scalar(), ExprKind::Compare { op, a, b })
    }

    /// Conditional value.
    #[must_use]
    pub fn select(ty: Type, cond: Expr, true_value: Expr, false_value: Expr) -> Self {
        Expr::make(
            ty,
            ExprKind::Select {
                cond,
                true_value,
                false_value,
            },
        )
    }

    /// Call to a named function.
    #[must_use]
    pub fn call(ty: Type, func_name: impl Into<String>, args: Vec<Expr>, call_kind: CallKind) -> Self {
        Expr::make(
            ty,
            ExprKind::Call {
                func_name: func_name.into(),
                args,
                call_kind,
            },
        )
    }

    /// Type conversion to `new_type`.
    #[must_use]
    pub fn cast(new_type: Type, val: Expr) -> Self {
        Expr::make(new_type, ExprKind::Cast { new_type, val })
    }

    /// Strided lane vector.
    #[must_use]
    pub fn ramp(ty: Type, base: Expr, stride: u16, lanes: u16) -> Self {
        Expr::make(
            ty,
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            },
        )
    }

    /// Tensor access. `args` and `shape` must have matching arity.
    #[must_use]
    pub fn var(ty: Type, name: impl Into<String>, args: Vec<Expr>, shape: Vec<u64>) -> Self {
        debug_assert_eq!(
            args.len(),
            shape.len(),
            "Var arity must match its shape rank"
        );
        Expr::make(
            ty,
            ExprKind::Var {
                name: name.into(),
                args,
                shape,
            },
        )
    }

    /// Iteration domain `[begin, begin + extent)`.
    #[must_use]
    pub fn dom(ty: Type, begin: Expr, extent: Expr) -> Self {
        Expr::make(ty, ExprKind::Dom { begin, extent })
    }

    /// Integer-literal iteration domain with the default index type.
    #[must_use]
    pub fn dom_i32(begin: i64, extent: i64) -> Self {
        let ty = Type::int_scalar(32);
        Expr::dom(ty, Expr::int(ty, begin), Expr::int(ty, extent))
    }

    /// Named loop variable over `dom`.
    #[must_use]
    pub fn index(ty: Type, name: impl Into<String>, dom: Expr, kind: IndexKind) -> Self {
        debug_assert!(
            matches!(dom.kind(), ExprKind::Dom { .. }),
            "an Index must be built over a Dom"
        );
        Expr::make(
            ty,
            ExprKind::Index {
                name: name.into(),
                dom,
                kind,
            },
        )
    }

    /// The node's type.
    #[inline]
    #[must_use]
    pub fn ty(&self) -> Type {
        self.0.ty
    }

    /// The node's kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.0.kind
    }

    /// The pre-computed structural hash.
    #[inline]
    #[must_use]
    pub fn structural_hash(&self) -> u64 {
        self.0.hash
    }

    /// Pointer identity: true when both handles refer to the same node.
    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// The value of a signed integer immediate, if this is one.
    #[must_use]
    pub fn int_value(&self) -> Option<i64> {
        match self.kind() {
            ExprKind::IntImm(v) => Some(*v),
            _ => None,
        }
    }

    /// The name of an index node, if this is one.
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        match self.kind() {
            ExprKind::Index { name, .. } => Some(name),
            _ => None,
        }
    }

    /// The name of a tensor access, if this is one.
    #[must_use]
    pub fn var_name(&self) -> Option<&str> {
        match self.kind() {
            ExprKind::Var { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Literal `(begin, extent)` of a `Dom` node when both are `IntImm`.
    #[must_use]
    pub fn dom_literal(&self) -> Option<(i64, i64)> {
        if let ExprKind::Dom { begin, extent } = self.kind() {
            Some((begin.int_value()?, extent.int_value()?))
        } else {
            None
        }
    }

    /// Zero immediate matching this node's type family.
    #[must_use]
    pub fn zero_like(&self) -> Expr {
        let ty = self.ty();
        if ty.is_float() {
            Expr::float(ty, 0.0)
        } else if matches!(ty.code, super::types::TypeCode::UInt) {
            Expr::uint(ty, 0)
        } else {
            Expr::int(ty, 0)
        }
    }
}

// Structural equality with hash fast-reject; pointer-equal handles short-circuit.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        if self.same_as(other) {
            return true;
        }
        if self.0.hash != other.0.hash {
            return false;
        }
        self.0.ty == other.0.ty && self.0.kind == other.0.kind
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

// =============================================================================
// STMT
// =============================================================================

/// A shared, immutable statement handle.
#[derive(Debug, Clone)]
pub struct Stmt(Arc<StmtKind>);

/// The kind (structure) of a statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// A perfect nest of loops over `indices` running `body` in sequence.
    LoopNest {
        /// Loop variables, outermost first; each is an `Index` node owned
        /// by this nest and referenced (never redefined) by the body.
        indices: Vec<Expr>,
        /// Statements executed at every point of the iteration space.
        body: Vec<Stmt>,
    },
    /// Conditional statement.
    IfThenElse {
        /// Boolean condition.
        cond: Expr,
        /// Taken branch.
        true_case: Stmt,
        /// Optional fallthrough branch.
        false_case: Option<Stmt>,
    },
    /// Assignment of `src` into the tensor access `dst`.
    Move {
        /// Destination; always a `Var` reference.
        dst: Expr,
        /// Source value, type-compatible with `dst`.
        src: Expr,
        /// Memory direction.
        move_kind: MoveKind,
    },
}

impl Stmt {
    /// A loop nest over `indices` (each must be an `Index` node).
    #[must_use]
    pub fn loop_nest(indices: Vec<Expr>, body: Vec<Stmt>) -> Self {
        debug_assert!(
            indices
                .iter()
                .all(|i| matches!(i.kind(), ExprKind::Index { .. })),
            "LoopNest indices must be Index nodes"
        );
        Stmt(Arc::new(StmtKind::LoopNest { indices, body }))
    }

    /// A conditional statement.
    #[must_use]
    pub fn if_then_else(cond: Expr, true_case: Stmt, false_case: Option<Stmt>) -> Self {
        Stmt(Arc::new(StmtKind::IfThenElse {
            cond,
            true_case,
            false_case,
        }))
    }

    /// An assignment statement; `dst` must be a `Var` access.
    #[must_use]
    pub fn move_data(dst: Expr, src: Expr, move_kind: MoveKind) -> Self {
        debug_assert!(
            matches!(dst.kind(), ExprKind::Var { .. }),
            "Move destination must be a Var"
        );
        Stmt(Arc::new(StmtKind::Move {
            dst,
            src,
            move_kind,
        }))
    }

    /// The node's kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &StmtKind {
        &self.0
    }

    /// Pointer identity.
    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &Stmt) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other) || *self.0 == *other.0
    }
}

// =============================================================================
// GROUP
// =============================================================================

/// A shared, immutable kernel-group handle.
#[derive(Debug, Clone)]
pub struct Group(Arc<GroupKind>);

/// The kind (structure) of a group node.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKind {
    /// A named kernel with explicit tensor parameters.
    Kernel {
        /// Kernel (function) name.
        name: String,
        /// Input tensors, as representative `Var` accesses.
        inputs: Vec<Expr>,
        /// Output tensors, as representative `Var` accesses.
        outputs: Vec<Expr>,
        /// Kernel body.
        body: Vec<Stmt>,
        /// Target device.
        target: KernelTarget,
    },
}

impl Group {
    /// A named kernel.
    #[must_use]
    pub fn kernel(
        name: impl Into<String>,
        inputs: Vec<Expr>,
        outputs: Vec<Expr>,
        body: Vec<Stmt>,
        target: KernelTarget,
    ) -> Self {
        Group(Arc::new(GroupKind::Kernel {
            name: name.into(),
            inputs,
            outputs,
            body,
            target,
        }))
    }

    /// The node's kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &GroupKind {
        &self.0
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}
