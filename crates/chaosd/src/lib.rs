pub mod deadline;
pub mod orchestrator;
pub mod report;
pub mod scheduler;

pub use deadline::*;
pub use orchestrator::*;
pub use report::*;
pub use scheduler::*;
