//! Flooring accesses and degenerate (rank-deficient) accesses.

use crate::core::ir::{Expr, ExprKind, IndexKind};
use crate::core::types::Type;
use crate::{check_program, grad_stmt, gradient_of, parse};

#[test]
fn floordiv_access_unrolls_into_quotient_times_factor() {
    // Y[i] = X[i // 8]: every dX cell collects the 8 forward iterations
    // that landed on it, with no bound conditions
    let prog = parse("Y<64>[i] = X<8>[i // 8];").expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "X").expect("gradient");

    assert_eq!(
        gradient.stmt.to_string(),
        "dX[z0] = dY[((z0 * 8) + r1)];\n"
    );
    assert_eq!(gradient.reduces.len(), 1);
    let ExprKind::Index { name, dom, .. } = gradient.reduces[0].kind() else {
        panic!("not an index");
    };
    assert_eq!(name, "r1");
    assert_eq!(dom.dom_literal(), Some((0, 8)));
    assert!(gradient.condition_is_trivial());
}

#[test]
fn floormod_access_pairs_with_quotient() {
    // Y[i] = X[i % 8]: the quotient axis is synthesized instead
    let prog = parse("Y<64>[i] = X<8>[i % 8];").expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "X").expect("gradient");

    // i = q*8 + z0 with q a fresh reduce axis over [0, 8)
    let text = gradient.stmt.to_string();
    assert!(text.starts_with("dX[z0] = dY["));
    assert!(text.contains("* 8)"));
    assert_eq!(gradient.reduces.len(), 1);
    let ExprKind::Index { dom, .. } = gradient.reduces[0].kind() else {
        panic!("not an index");
    };
    assert_eq!(dom.dom_literal(), Some((0, 8)));
    assert!(gradient.condition_is_trivial());
}

#[test]
fn rank_deficient_access_guards_with_equality() {
    // Y[i] = X[0]: dX[z0] sums every dY entry, but only where z0 == 0
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);
    let i = Expr::index(index_ty, "i", Expr::dom_i32(0, 64), IndexKind::Spatial);
    let x = Expr::var(data_ty, "X", vec![Expr::int32(0)], vec![8]);
    let dy = Expr::var(data_ty, "dY", vec![i.clone()], vec![64]);

    let gradient = grad_stmt(&x, &[i], &[0], &x, &dy).expect("gradient");
    assert_eq!(gradient.stmt.to_string(), "dX[z0] = dY[r0];\n");
    assert_eq!(gradient.condition.to_string(), "(z0 == 0)");
    assert_eq!(gradient.reduces.len(), 1);
    let ExprKind::Index { dom, .. } = gradient.reduces[0].kind() else {
        panic!("not an index");
    };
    assert_eq!(dom.dom_literal(), Some((0, 64)));
}

#[test]
fn scaled_access_requires_divisibility() {
    // Y[i] = X[2*i]: only even gradient cells receive anything
    let prog = parse("Y<4>[i] = X<8>[2 * i];").expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "X").expect("gradient");
    let cond = gradient.condition.to_string();
    assert!(cond.contains("%% 2) == 0)"), "missing divisibility guard: {cond}");
    assert!(gradient.reduces.is_empty());
}

#[test]
fn unbounded_reduction_axis_is_fatal() {
    // the forward extent is not a literal, so the synthesized reduction
    // axis over it can never be bounded
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);
    let opaque = Expr::cast(index_ty, Expr::int32(64));
    let dom = Expr::dom(index_ty, Expr::int32(0), opaque);
    let i = Expr::index(index_ty, "i", dom, IndexKind::Spatial);
    let x = Expr::var(data_ty, "X", vec![Expr::int32(0)], vec![8]);
    let dy = Expr::var(data_ty, "dY", vec![i.clone()], vec![64]);

    assert!(matches!(
        grad_stmt(&x, &[i], &[0], &x, &dy),
        Err(crate::TensorError::IndeterminateRange { .. })
    ));
}
