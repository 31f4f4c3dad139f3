//! Command-line front end: flag parsing, logging setup and signal-driven shutdown.

pub mod cli;
pub mod logging;
pub mod runner;
