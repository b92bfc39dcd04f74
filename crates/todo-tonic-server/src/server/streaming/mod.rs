//! Server-side producer for the `ListTodo` stream.
//!
//! - [`coordinator`] - pulls documents off the store cursor one at a time and
//!   forwards them to the gRPC response channel.

pub mod coordinator;
