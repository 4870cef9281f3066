#![allow(dead_code)]

use hls_core::{Literal, Type};
use hls_ir::analysis::{Interpreter, RtValue};
use hls_ir::Function;
use similar::{ChangeTag, TextDiff};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn assert_ir_eq(expected: &str, actual: &str) {
    let expected_trimmed = expected.trim();
    let actual_trimmed = actual.trim();

    if actual_trimmed != expected_trimmed {
        let diff = TextDiff::from_lines(expected_trimmed, actual_trimmed);
        let mut diff_str = String::new();
        for change in diff.iter_all_changes() {
            let sign = match change.tag() {
                ChangeTag::Delete => "-",
                ChangeTag::Insert => "+",
                ChangeTag::Equal => " ",
            };
            diff_str.push_str(&format!("{}{}", sign, change));
        }
        panic!("IR mismatch\nDIFF:\n{}", diff_str);
    }
}

/// `i`-th element of a deterministic input ramp.
pub fn ramp(element: Type, i: usize) -> Literal {
    match element {
        Type::F32 => Literal::F32(i as f32 * 0.5),
        Type::F64 => Literal::F64(i as f64 * 0.25),
        Type::I64 => Literal::I64(i as i64 * 3 - 7),
        Type::INDEX => Literal::Index(i as i64),
        Type::I1 => Literal::Bool(i % 2 == 1),
        _ => Literal::I32(i as i32 * 3 - 7),
    }
}

/// What a run of a function makes visible: returned scalars and the final
/// contents of every buffer argument.
#[derive(Debug, PartialEq)]
pub struct Observation {
    pub results: Vec<Literal>,
    pub buffers: Vec<Vec<Literal>>,
}

/// Runs `func`, filling buffer arguments with a ramp and taking scalar
/// arguments from `scalars` in order.
pub fn observe(func: &Function, scalars: &[Literal]) -> Observation {
    let mut interp = Interpreter::new(func);
    let mut args = Vec::new();
    let mut next_scalar = scalars.iter();
    for ty in func.argument_types() {
        match ty.memref_info() {
            Some(info) => {
                let init = (0..info.num_elements()).map(|i| ramp(info.element, i)).collect();
                args.push(interp.alloc_buffer(ty, Some(init)).unwrap());
            }
            None => {
                let value = next_scalar.next().copied().expect("missing scalar argument");
                args.push(RtValue::Scalar(value));
            }
        }
    }
    let returned = interp.run(&args).unwrap();
    let results = returned
        .into_iter()
        .map(|v| match v {
            RtValue::Scalar(l) => l,
            RtValue::Buffer(_) => panic!("buffers are not returned"),
        })
        .collect();
    let buffers = args
        .iter()
        .filter_map(|&a| interp.buffer(a).map(|b| b.to_vec()))
        .collect();
    Observation { results, buffers }
}
