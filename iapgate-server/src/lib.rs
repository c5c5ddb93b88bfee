//! The iapgate server.
//!
//! This builds on top of [`iapgate_service`] and exposes a bucket over `HTTP`. Every request must
//! carry a valid Identity-Aware Proxy assertion. The request path is mapped onto an object name,
//! and the object is streamed back as the response body.

pub mod auth;
pub mod cli;
pub mod config;
pub mod endpoints;
pub mod healthcheck;
pub mod observability;
pub mod request_log;
pub mod state;
pub mod web;
