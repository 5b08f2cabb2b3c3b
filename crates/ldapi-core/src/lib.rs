//! # ldapi-core
//!
//! Core types and utilities for the LDAPi directory client.
//!
//! This crate holds the pieces that do not depend on a protocol engine: the failure
//! taxonomy, connection configuration, typed connection options and the filter/DN
//! escaping helpers.
//!
//! ## Modules
//!
//! - [`error`] - Failure kinds and engine diagnostics
//! - [`config`] - Connection and transport configuration
//! - [`option`] - Typed connection options
//! - [`escape`] - Filter and DN value escaping

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod escape;
pub mod option;

// Re-export commonly used types
pub use error::{Diagnostic, Error, Result};
