//! Thin library half of the CLI crate, split out purely so `tests/*.rs`
//! integration tests can exercise argument resolution and config parsing the
//! same way unit tests inside each module already do, without duplicating
//! the module tree into the binary.

pub mod cli;
pub mod config;
pub mod ini;
pub mod logfile;
pub mod privilege;
pub mod render;
