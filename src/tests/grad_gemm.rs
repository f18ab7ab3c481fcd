//! Gradient synthesis for matrix multiplication shapes.

use crate::arith::{add, mul};
use crate::core::ir::{Expr, ExprKind, IndexKind, StmtKind};
use crate::core::types::Type;
use crate::{check_program, grad_stmt, gradient_of, parse};

fn gemm_gradient() -> crate::Gradient {
    let prog = parse("C<1024,512>[i,j] = A<1024,256>[i,k] * B<256,512>[k,j];")
        .expect("parse");
    let checked = check_program(&prog).expect("check");
    gradient_of(&checked[0], "A").expect("gradient")
}

#[test]
fn gemm_backward_to_a() {
    let gradient = gemm_gradient();
    assert_eq!(
        gradient.stmt.to_string(),
        "dA[z0, z1] = (dC[z0, r0] * B[z1, r0]);\n"
    );
    assert_eq!(gradient.reduces.len(), 1);
    let ExprKind::Index { dom, kind, .. } = gradient.reduces[0].kind() else {
        panic!("reduce axis is not an index");
    };
    assert_eq!(dom.dom_literal(), Some((0, 512)));
    assert_eq!(*kind, IndexKind::Reduce);
    assert!(gradient.condition_is_trivial());
}

#[test]
fn gemm_gradient_shape_preservation() {
    // P1: dst is "d" + name with the differentiand's shape and fresh
    // spatial axes of matching extents
    let gradient = gemm_gradient();
    let StmtKind::Move { dst, .. } = gradient.stmt.kind() else {
        panic!("gradient without a Move");
    };
    let ExprKind::Var { name, args, shape } = dst.kind() else {
        panic!("Move destination is not a Var");
    };
    assert_eq!(name, "dA");
    assert_eq!(shape, &[1024, 256]);
    assert_eq!(args.len(), 2);
    for (arg, (z, extent)) in args
        .iter()
        .zip(gradient.spatial.iter().zip([1024i64, 256]))
    {
        assert!(arg.same_as(z));
        let ExprKind::Index { dom, kind, .. } = z.kind() else {
            panic!("spatial axis is not an index");
        };
        assert_eq!(*kind, IndexKind::Spatial);
        assert_eq!(dom.dom_literal(), Some((0, extent)));
    }
}

#[test]
fn gemm_loop_nest_accumulates_under_reduction() {
    let nest = gemm_gradient().as_loop_nest();
    let text = nest.to_string();
    assert!(text.contains("for z0 in [0, 1024)"));
    assert!(text.contains("for z1 in [0, 256)"));
    assert!(text.contains("for r0 in [0, 512)"));
    assert!(text.contains("dA[z0, z1] = (dA[z0, z1] + (dC[z0, r0] * B[z1, r0]));"));
}

#[test]
fn identity_access_round_trips() {
    // P2: differentiating X[i, j] copies the upstream gradient through
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);
    let i = Expr::index(index_ty, "i", Expr::dom_i32(0, 16), IndexKind::Spatial);
    let j = Expr::index(index_ty, "j", Expr::dom_i32(0, 32), IndexKind::Spatial);
    let x = Expr::var(data_ty, "X", vec![i.clone(), j.clone()], vec![16, 32]);
    let dy = Expr::var(data_ty, "dY", vec![i.clone(), j.clone()], vec![16, 32]);

    let gradient = grad_stmt(&x, &[i, j], &[0, 1], &x, &dy).expect("gradient");
    assert_eq!(gradient.stmt.to_string(), "dX[z0, z1] = dY[z0, z1];\n");
    assert!(gradient.reduces.is_empty());
    assert!(gradient.condition_is_trivial());
}

#[test]
fn paired_gemm_inherits_both_reduction_ranges() {
    let prog = parse(
        "C<1024,512>[i,j] = (A<1024,256>[i,k] * B<256,512>[k,j]) * D<1024,64>[i,l];",
    )
    .expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "A").expect("gradient");

    assert_eq!(
        gradient.stmt.to_string(),
        "dA[z0, z1] = ((dC[z0, r0] * B[z1, r0]) * D[z0, r1]);\n"
    );
    let extents: Vec<_> = gradient
        .reduces
        .iter()
        .map(|r| {
            let ExprKind::Index { dom, .. } = r.kind() else {
                panic!("not an index");
            };
            dom.dom_literal().expect("literal dom")
        })
        .collect();
    assert_eq!(extents, [(0, 512), (0, 64)]);
    assert!(gradient.condition_is_trivial());
}

#[test]
fn accumulating_forward_contributes_nothing_extra() {
    // the read-modify-write C[i,j] term differentiates to zero w.r.t. A
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);
    let i = Expr::index(index_ty, "i", Expr::dom_i32(0, 8), IndexKind::Spatial);
    let j = Expr::index(index_ty, "j", Expr::dom_i32(0, 8), IndexKind::Spatial);
    let k = Expr::index(index_ty, "k", Expr::dom_i32(0, 8), IndexKind::Reduce);
    let a = Expr::var(data_ty, "A", vec![i.clone(), k.clone()], vec![8, 8]);
    let b = Expr::var(data_ty, "B", vec![k.clone(), j.clone()], vec![8, 8]);
    let c = Expr::var(data_ty, "C", vec![i.clone(), j.clone()], vec![8, 8]);
    let dy = Expr::var(data_ty, "dC", vec![i.clone(), j.clone()], vec![8, 8]);
    let rhs = add(&c, &mul(&a, &b));

    let gradient = grad_stmt(&rhs, &[i, j, k], &[0, 1], &a, &dy).expect("gradient");
    assert_eq!(
        gradient.stmt.to_string(),
        "dA[z0, z1] = (dC[z0, r0] * B[z1, r0]);\n"
    );
}

#[test]
fn repeated_axis_is_rejected() {
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);
    let i = Expr::index(index_ty, "i", Expr::dom_i32(0, 8), IndexKind::Spatial);
    let x = Expr::var(data_ty, "X", vec![i.clone()], vec![8]);
    let dy = Expr::var(data_ty, "dY", vec![i.clone()], vec![8]);
    assert!(matches!(
        grad_stmt(&x, &[i.clone(), i], &[0], &x, &dy),
        Err(crate::TensorError::RepeatedAxis { .. })
    ));
}

#[test]
fn select_cannot_be_differentiated() {
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);
    let i = Expr::index(index_ty, "i", Expr::dom_i32(0, 8), IndexKind::Spatial);
    let x = Expr::var(data_ty, "X", vec![i.clone()], vec![8]);
    let dy = Expr::var(data_ty, "dY", vec![i.clone()], vec![8]);
    let body = Expr::select(
        data_ty,
        crate::arith::lt(&i, &Expr::int32(4)),
        x.clone(),
        Expr::float(data_ty, 0.0),
    );
    assert!(matches!(
        grad_stmt(&body, &[i], &[0], &x, &dy),
        Err(crate::TensorError::UnsupportedInGradient { .. })
    ));
}
