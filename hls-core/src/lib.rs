mod r#type;
pub use r#type::*;

mod literal;
pub use literal::*;

pub mod type_store;
