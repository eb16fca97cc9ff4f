pub mod enums;
pub mod records;

pub use enums::*;
pub use records::*;
