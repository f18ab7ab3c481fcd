//! Command-line driver: compile a tensor program to C.
//!
//! ```text
//! tensordiff <file> [--name <kernel>] [--grad <tensor>]
//! ```
//!
//! Without `--grad` the forward kernel is emitted; with it, the gradient of
//! the program with respect to the named tensor. The C source goes to
//! stdout; errors go to stderr with a non-zero exit code.

use std::process::ExitCode;

fn usage() -> ExitCode {
    eprintln!("usage: tensordiff <file> [--name <kernel>] [--grad <tensor>]");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut file = None;
    let mut kernel_name = String::from("kernel");
    let mut grad_tensor: Option<String> = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--name" => match iter.next() {
                Some(v) => kernel_name = v,
                None => return usage(),
            },
            "--grad" => match iter.next() {
                Some(v) => grad_tensor = Some(v),
                None => return usage(),
            },
            "--help" | "-h" => return usage(),
            _ if file.is_none() => file = Some(arg),
            _ => return usage(),
        }
    }
    let Some(file) = file else {
        return usage();
    };

    let source = match std::fs::read_to_string(&file) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: cannot read '{file}': {err}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &grad_tensor {
        Some(tensor) => tensordiff::compile_gradient(&source, &kernel_name, tensor),
        None => tensordiff::compile_forward(&source, &kernel_name),
    };
    match result {
        Ok(code) => {
            print!("{code}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
