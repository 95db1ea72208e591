pub mod field;
pub mod identity;
pub mod record;

pub use field::*;
pub use identity::*;
pub use record::*;
