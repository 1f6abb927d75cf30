pub mod config;
pub mod plan;
pub mod validation;

pub use config::*;
pub use plan::*;
pub use validation::*;
