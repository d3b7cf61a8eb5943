//! CLI command implementations.

pub mod common;
pub mod register;
pub mod status;
pub mod unregister;
pub mod update;
