pub mod affine_loop_perfection;
pub mod affine_store_forward;
pub mod print;

pub use affine_loop_perfection::AffineLoopPerfection;
pub use affine_store_forward::{AffineStoreForward, ForwardStats};
pub use print::Print;
