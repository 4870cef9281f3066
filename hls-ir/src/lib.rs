pub mod affine;
pub mod analysis;
pub mod builder;
pub mod dataflow;
pub mod effects;
pub mod error;
pub mod graph;
pub mod module;
pub mod ops;
pub mod pass;
pub mod passes;
pub mod printer;
pub mod validation;
pub mod visitor;

pub use affine::{AffineExpr, AffineMap, IntegerSet};
pub use builder::Builder;
pub use error::{InterpError, PerfectionError};
pub use graph::{BlockId, Graph, OpId, RegionId, ValueId};
pub use module::{Function, Module};
pub use ops::{ArithOp, CmpPredicate, OpKind};
pub use pass::{OptimizationOptions, Pass, PassRunner};
pub use printer::{print_function, print_module};
pub use validation::Validator;
