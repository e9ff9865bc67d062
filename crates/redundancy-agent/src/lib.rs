//! Redundancy agent
//!
//! Entry point keepalived's notify hooks and the provisioning pipeline
//! call. Each invocation loads the agent settings, the router state and
//! the interface inventory, runs one operation and exits.
//!
//! # Components
//!
//! - **Config**: YAML agent settings with validation
//! - **Cli**: command-line surface (`set`, `master`, `backup`, `fault`,
//!   `disable`, `status`)
//! - **Agent**: maps a command onto the redundancy controller

pub mod agent;
pub mod cli;
pub mod config;

pub use agent::{Agent, Outcome, StatusReport};
pub use cli::{Cli, Command};
pub use config::{Config, ConfigError};
