//! Command Line Interface (CLI) layer for bandwise.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`) for each subcommand. It wires
//! user-provided options to the library functionality exposed via
//! `bandwise::api`, running against the in-memory backend loaded from JSON.
//!
//! If you are embedding bandwise into another application, prefer using
//! the high-level `bandwise::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
