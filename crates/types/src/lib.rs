// crates/types/src/lib.rs
pub mod error;
pub mod events;
pub mod job;

pub use error::*;
pub use events::*;
pub use job::*;
