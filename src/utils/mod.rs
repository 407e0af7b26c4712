//! The `utils` module provides a collection of utility functions and common
//! definitions used across the crate.
//!
//! It holds the shared error types and the logging bootstrap.

pub mod error;
pub mod logging;
