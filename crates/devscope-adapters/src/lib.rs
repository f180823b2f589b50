//! Runtime adapters for devscope (git, config, metrics, persistence).

pub mod config;
pub mod repo;
pub mod scorer;
pub mod store;
pub mod util;
