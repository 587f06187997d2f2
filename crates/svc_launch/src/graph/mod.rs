//! Dependency graph: vertex store, builder, sorter and selection

pub mod build;
pub mod select;
pub mod sort;
pub mod store;

pub use build::*;
pub use select::*;
pub use sort::*;
pub use store::*;
