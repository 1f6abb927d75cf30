pub mod command;
pub mod error;
pub mod logs;

pub use command::*;
pub use error::*;
pub use logs::*;
