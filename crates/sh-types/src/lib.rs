pub mod errors;
pub mod objective;
pub mod value;

pub use errors::*;
pub use objective::*;
pub use value::*;
