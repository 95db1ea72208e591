//! Portico CLI library: command implementations shared by the `portico`
//! binary and its integration tests.

pub mod commands;
