//! Configuration, logging and the run loop behind the `darwin` binary.
//!
//! - [`config`] - the JSON run configuration and its validation
//! - [`runner`] - builds evaluator and population from a configuration and drives the
//!   engine to completion
//! - [`logging`] - `env_logger` setup
//! - [`util`] - JSON file input and output helpers

pub mod config;
pub mod logging;
pub mod runner;
pub mod util;
