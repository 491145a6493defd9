//! VBoxDash host layer
//!
//! Everything that touches the local machine: platform detection, executable
//! lookup, environment probing and provisioning script execution.

pub mod classify;
pub mod command;
pub mod executor;
pub mod locate;
pub mod platform;
pub mod probe;

pub use classify::{classify, extract_diagnostic, strip_ansi, Classification};
pub use command::ScriptCommand;
pub use executor::{ScriptExecutor, ScriptOutcome, ScriptRunner};
pub use platform::{HostConfig, Platform};
pub use probe::{Check, CheckStatus, EnvironmentProber, EnvironmentSummary};
