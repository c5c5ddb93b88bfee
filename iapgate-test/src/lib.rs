//! Test utilities for iapgate.
//!
//! This crate provides utilities to facilitate end-to-end testing of the iapgate server: an
//! in-process server backed by an in-memory bucket, and signed assertions it accepts. See the
//! modules for all available utilities.

pub mod server;
pub mod tokens;
pub mod tracing;
