//! Core domain model and contracts for devscope.

pub mod protocol;
pub mod verdict;

pub use protocol::*;
pub use verdict::*;
