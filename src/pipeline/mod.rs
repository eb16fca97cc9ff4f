pub mod import;
pub mod processing;
