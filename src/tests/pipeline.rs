//! Source-to-C pipeline tests.

use crate::{TensorError, compile_forward, compile_gradient};

#[test]
fn forward_gemm_compiles_to_c() {
    let code = compile_forward(
        "C<1024,512>[i,j] = A<1024,256>[i,k] * B<256,512>[k,j];",
        "gemm",
    )
    .expect("compile");
    assert!(code.starts_with(
        "void gemm(float (&A)[1024][256], float (&B)[256][512], float (&C)[1024][512]) {"
    ));
    assert!(code.contains("for (int32_t i = 0; i < 1024; ++i) {"));
    assert!(code.contains("for (int32_t j = 0; j < 512; ++j) {"));
    assert!(code.contains("for (int32_t k = 0; k < 256; ++k) {"));
    assert!(code.contains("C[i][j] = (C[i][j] + (A[i][k] * B[k][j]));"));
    assert_eq!(code.matches('{').count(), code.matches('}').count());
}

#[test]
fn gradient_gemm_compiles_to_c() {
    let code = compile_gradient(
        "C<1024,512>[i,j] = A<1024,256>[i,k] * B<256,512>[k,j];",
        "grad_gemm_to_A",
        "A",
    )
    .expect("compile");
    assert!(code.starts_with(
        "void grad_gemm_to_A(float (&dC)[1024][512], float (&B)[256][512], float (&dA)[1024][256]) {"
    ));
    assert!(code.contains("for (int32_t z0 = 0; z0 < 1024; ++z0) {"));
    assert!(code.contains("for (int32_t z1 = 0; z1 < 256; ++z1) {"));
    assert!(code.contains("for (int32_t r0 = 0; r0 < 512; ++r0) {"));
    assert!(code.contains("dA[z0][z1] = (dA[z0][z1] + (dC[z0][r0] * B[z1][r0]));"));
}

#[test]
fn gradient_conv2d_is_guarded_in_c() {
    let code = compile_gradient(
        "O<2,8,5,5>[n,k,p,q] = I<2,16,7,7>[n, c, p + r, q + s] * W<8,16,3,3>[k, c, r, s];",
        "grad_conv",
        "I",
    )
    .expect("compile");
    assert!(code.contains("if ("));
    assert!(code.contains("(0 <= (z2 - r2))"));
    assert!(code.contains("((z3 - r3) < 5)"));
    assert!(code.contains("dI[z0][z1][z2][z3] = (dI[z0][z1][z2][z3] + "));
    assert!(code.contains("dO[z0][r1][(z2 - r2)][(z3 - r3)]"));
    assert_eq!(code.matches('{').count(), code.matches('}').count());
}

#[test]
fn gradient_floordiv_strides_the_upstream_access() {
    let code = compile_gradient("Y<64>[i] = X<8>[i // 8];", "grad_fold", "X")
        .expect("compile");
    assert!(code.contains("for (int32_t z0 = 0; z0 < 8; ++z0) {"));
    assert!(code.contains("for (int32_t r1 = 0; r1 < 8; ++r1) {"));
    assert!(code.contains("dX[z0] = (dX[z0] + dY[((z0 * 8) + r1)]);"));
    assert!(!code.contains("if ("));
}

#[test]
fn gradient_of_partial_read_is_guarded() {
    // the forward loop reads only X[0..4]; the rest of dX must stay zero
    let code = compile_gradient("Y<4>[i] = X<8>[i];", "grad_partial", "X")
        .expect("compile");
    assert!(code.contains("for (int32_t z0 = 0; z0 < 8; ++z0) {"));
    assert!(code.contains("if ((z0 < 4)) {"));
    assert!(code.contains("dX[z0] = (dX[z0] + dY[z0]);"));
}

#[test]
fn gradient_of_unknown_tensor_fails() {
    assert!(matches!(
        compile_gradient("C<4>[i] = A<4>[i];", "bad", "Q"),
        Err(TensorError::ShapeMismatch { .. })
    ));
}

#[test]
fn gradient_picks_the_statement_reading_the_tensor() {
    let source = "\
C<4>[i] = A<4>[i];
Y<6>[j] = X<6>[j];
";
    let code = compile_gradient(source, "grad_x", "X").expect("compile");
    assert!(code.contains("dX[z0] = (dX[z0] + dY[z0]);"));
    assert!(code.contains("z0 < 6"));
}

#[test]
fn multiple_statements_compile_in_order() {
    let source = "\
T<4>[i] = A<4>[i] * A<4>[i];
U<4>[i] = T<4>[i] + A<4>[i];
";
    let code = compile_forward(source, "two_step").expect("compile");
    let first = code.find("T[i] = (T[i] + (A[i] * A[i]));").expect("first stmt");
    let second = code
        .find("U[i] = (U[i] + (T[i] + A[i]));")
        .expect("second stmt");
    assert!(first < second);
}
