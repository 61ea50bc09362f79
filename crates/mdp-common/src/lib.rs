//! MDP Common Library
//!
//! Shared error handling and logging for the MDP workspace members.
//!
//! # Overview
//!
//! - **Error Handling**: the pipeline error taxonomy ([`EtlError`]) and the
//!   workspace [`Result`] alias
//! - **Logging**: `tracing` initialization shared by the CLI and services

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{EtlError, Result};
