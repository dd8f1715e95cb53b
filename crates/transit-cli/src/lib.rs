//! POSDAO Transit command line
//!
//! Argument parsing and run preparation for the `posdao-transit` binary.

pub mod app;
pub mod cli;

pub use app::{prepare, run, Prepared};
pub use cli::Cli;
