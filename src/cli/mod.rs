//! Command-line interface: argument parsing and command execution.

pub mod commands;
pub mod parser;

pub use commands::{CommandOutput, EXIT_INTERRUPTED, execute};
pub use parser::{Cli, Commands};
