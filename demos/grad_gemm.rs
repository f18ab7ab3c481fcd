//! GEMM forward and backward, driven at the IR level.
//!
//! Mirrors the classic `C[i,j] += A[i,k] * B[k,j]` kernel: builds the
//! forward IR by hand, differentiates with respect to `A`, and prints both
//! the IR and the emitted C.

use tensordiff::arith::{add, mul};
use tensordiff::{Expr, IndexKind, Type, codegen_c, grad_stmt, gradient_kernel};

fn main() -> tensordiff::Result<()> {
    const M: i64 = 1024;
    const N: i64 = 512;
    const K: i64 = 256;
    let index_ty = Type::int_scalar(32);
    let data_ty = Type::float_scalar(32);

    let i = Expr::index(index_ty, "i", Expr::dom_i32(0, M), IndexKind::Spatial);
    let j = Expr::index(index_ty, "j", Expr::dom_i32(0, N), IndexKind::Spatial);
    let k = Expr::index(index_ty, "k", Expr::dom_i32(0, K), IndexKind::Reduce);

    let a = Expr::var(
        data_ty,
        "A",
        vec![i.clone(), k.clone()],
        vec![M as u64, K as u64],
    );
    let b = Expr::var(
        data_ty,
        "B",
        vec![k.clone(), j.clone()],
        vec![K as u64, N as u64],
    );
    let c = Expr::var(
        data_ty,
        "C",
        vec![i.clone(), j.clone()],
        vec![M as u64, N as u64],
    );
    let rhs = add(&c, &mul(&a, &b));

    let dc = Expr::var(
        data_ty,
        "dC",
        vec![i.clone(), j.clone()],
        vec![M as u64, N as u64],
    );

    let gradient = grad_stmt(&rhs, &[i, j, k], &[0, 1], &a, &dc)?;
    println!("gradient statement:\n{}", gradient.stmt);
    println!("loop nest:\n{}", gradient.as_loop_nest());

    let kernel = gradient_kernel("grad_gemm_to_A", &gradient)?;
    println!("emitted C:\n{}", codegen_c(&kernel)?);
    Ok(())
}
