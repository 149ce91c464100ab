pub mod cli;
pub mod load_config;
pub mod repo;

pub use cli::{run, Cli, Commands};
