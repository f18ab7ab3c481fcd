//! NCHW conv2d backward with respect to the input feature map.
//!
//! The access `I[n, c, p+r, q+s]` makes the inversion interesting: the
//! gradient loops over `z2 - r` / `z3 - s` and guards the border with
//! bound conditions.

fn main() -> tensordiff::Result<()> {
    let source = "\
O<2,8,5,5>[n,k,p,q] = I<2,16,7,7>[n, c, p + r, q + s] * W<8,16,3,3>[k, c, r, s];
";
    println!("forward:\n{}", tensordiff::compile_forward(source, "conv2d")?);
    println!(
        "backward w.r.t. I:\n{}",
        tensordiff::compile_gradient(source, "grad_conv2d_to_I", "I")?
    );
    Ok(())
}
