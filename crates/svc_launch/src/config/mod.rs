//! Service record batches and run configuration

mod records;
mod settings;

pub use records::*;
pub use settings::*;
