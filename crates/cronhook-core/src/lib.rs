//! `cronhook-core` — configuration and shared error types for the cronhook
//! workspace.

pub mod config;
pub mod error;

pub use config::{CronhookConfig, SchedulerConfig};
pub use error::{CronhookError, Result};
