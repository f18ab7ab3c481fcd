//! Conv2d NCHW backward: shifted accesses produce guarded gradients.

use crate::core::ir::ExprKind;
use crate::{check_program, gradient_of, parse};

const CONV: &str =
    "O<2,8,5,5>[n,k,p,q] = I<2,16,7,7>[n, c, p + r, q + s] * W<8,16,3,3>[k, c, r, s];";

#[test]
fn conv2d_backward_to_input() {
    let prog = parse(CONV).expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "I").expect("gradient");

    assert_eq!(
        gradient.stmt.to_string(),
        "dI[z0, z1, z2, z3] = (dO[z0, r1, (z2 - r2), (z3 - r3)] * W[r1, z1, r2, r3]);\n"
    );

    // one reduction over the output channels, two over the kernel window
    let extents: Vec<_> = gradient
        .reduces
        .iter()
        .map(|r| {
            let ExprKind::Index { name, dom, .. } = r.kind() else {
                panic!("not an index");
            };
            (name.as_str(), dom.dom_literal().expect("literal dom"))
        })
        .collect();
    assert_eq!(extents, [("r1", (0, 8)), ("r2", (0, 3)), ("r3", (0, 3))]);

    // the shifted spatial accesses are guarded against the border
    assert!(!gradient.condition_is_trivial());
    let cond = gradient.condition.to_string();
    assert!(cond.contains("(0 <= (z2 - r2))"));
    assert!(cond.contains("((z2 - r2) < 5)"));
    assert!(cond.contains("(0 <= (z3 - r3))"));
    assert!(cond.contains("((z3 - r3) < 5)"));
}

#[test]
fn conv2d_loop_nest_is_guarded() {
    let prog = parse(CONV).expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "I").expect("gradient");
    let text = gradient.as_loop_nest().to_string();
    assert!(text.contains("for z3 in [0, 7)"));
    assert!(text.contains("for r3 in [0, 3)"));
    assert!(text.contains("if ("));
    assert!(
        text.contains("dI[z0, z1, z2, z3] = (dI[z0, z1, z2, z3] + ")
    );
}

#[test]
fn conv2d_backward_to_weights() {
    let prog = parse(CONV).expect("parse");
    let checked = check_program(&prog).expect("check");
    let gradient = gradient_of(&checked[0], "W").expect("gradient");

    // dW[k, c, r, s] sums over the batch and the output plane; the input
    // is read at the shifted coordinates
    let text = gradient.stmt.to_string();
    assert!(text.starts_with("dW[z0, z1, z2, z3] = "));
    assert!(text.contains("dO[") && text.contains("I["));
    assert_eq!(gradient.reduces.len(), 3);
}
