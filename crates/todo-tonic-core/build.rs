/// Builds the gRPC client and server code for the `todo.proto` definition
/// using `tonic-prost-build`.
///
/// # Files and Paths
///
/// - Proto file: `proto/todo.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/todo_descriptor.bin`, embedded for gRPC
///   reflection.
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
///
/// # Output
///
/// Generated code is included via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("todo");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("todo_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/todo.proto"], &["proto"])
        .unwrap();
}
