#![doc = include_str!("../README.md")]

mod document;
mod error;
mod interface;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;

pub use crate::document::*;
pub use crate::error::*;
pub use crate::interface::*;
pub use crate::memory::*;
#[cfg(feature = "mongodb")]
pub use crate::mongo::*;
// Public re-export so downstream crates share the exact `ObjectId` type.
pub use bson;
