#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can access the store adapter via
// `todo_tonic_core::todo_store`
pub use todo_store;
