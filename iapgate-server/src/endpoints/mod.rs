//! Contains all HTTP endpoint handlers.
//!
//! Use [`routes`] to create a router with all endpoints.

use axum::Router;

use crate::state::ServiceState;

pub mod common;
mod objects;

/// Creates the router serving objects for every path and method.
pub fn routes() -> Router<ServiceState> {
    objects::router()
}
