pub mod access;
pub mod constraints;
pub mod dependence;
pub mod interference;
pub mod interpreter;
pub mod loops;

pub use access::{LinearExpr, MemRefAccess};
pub use dependence::{check_memref_access_dependence, DependenceResult};
pub use interference::has_effect_between;
pub use interpreter::{Interpreter, RtValue};
