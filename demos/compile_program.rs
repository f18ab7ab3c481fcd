//! Compile a multi-statement program end to end.

fn main() -> tensordiff::Result<()> {
    let source = "\
# paired GEMM
C<1024,512>[i,j] = (A<1024,256>[i,k] * B<256,512>[k,j]) * D<1024,64>[i,l];
Y<64>[v] = X<8>[v // 8];
";
    println!("{}", tensordiff::compile_forward(source, "pair_gemm")?);
    println!("{}", tensordiff::compile_gradient(source, "grad_to_A", "A")?);
    println!("{}", tensordiff::compile_gradient(source, "grad_to_X", "X")?);
    Ok(())
}
