//! Common utilities shared across the workspace.
//!
//! This crate provides:
//! - The error taxonomy used by repositories, adapters and services
//! - Configuration structures
//! - Tracing initialization for binaries

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::*;
pub use error::{AppError, AppResult, OptionExt};
