pub mod convert;
pub mod error;

pub use error::{Error, Result};

/// Messages and the `TodoService` gRPC service generated from
/// `proto/todo.proto`.
pub mod proto {
    tonic::include_proto!("todo");

    /// Encoded descriptor set for `tonic-reflection`.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("todo_descriptor");
}
