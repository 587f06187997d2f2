//! Runtime components: pipes, workers and the launch coordinator

pub mod coordinator;
pub mod notify;
pub mod plan;
pub mod report;
pub mod supervisor;
pub mod worker;

pub use coordinator::*;
pub use notify::*;
pub use plan::*;
pub use report::*;
pub use supervisor::*;
pub use worker::*;
