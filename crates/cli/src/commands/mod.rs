//! CLI Commands

pub mod env;
pub mod exec;
pub mod servers;
