//! gRPC service implementation.
//!
//! - [`handler`] - gRPC service entry point (`TodoHandler`).

pub mod handler;
