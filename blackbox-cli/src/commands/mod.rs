//! Command implementations.
//!
//! Each subcommand is implemented in its own module; `session` holds the
//! driver shared by `run` and `send`.

pub(crate) mod completions;
pub(crate) mod ports;
pub(crate) mod run;
pub(crate) mod send;
pub(crate) mod session;
