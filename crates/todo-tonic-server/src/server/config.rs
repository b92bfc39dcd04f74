use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;

/// Runtime configuration for the `todo-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults matching a local MongoDB.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "todo-tonic-server",
    version,
    about = "A gRPC CRUD service for todos backed by a document store"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/todo-uds.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Which document store backs the service.
    ///
    /// `memory` keeps todos in process and loses them on exit.
    ///
    /// Environment variable: `STORE`
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreBackend::Mongodb)]
    pub store: StoreBackend,

    /// MongoDB connection string.
    ///
    /// Environment variable: `MONGODB_URI`
    #[arg(long, env = "MONGODB_URI", default_value_t = String::from("mongodb://localhost:27017"))]
    pub mongodb_uri: String,

    /// Logical database holding the todo collection.
    ///
    /// Environment variable: `MONGODB_DATABASE`
    #[arg(long, env = "MONGODB_DATABASE", default_value_t = String::from("mydb"))]
    pub mongodb_database: String,

    /// Collection the todos are stored in.
    ///
    /// Environment variable: `MONGODB_COLLECTION`
    #[arg(long, env = "MONGODB_COLLECTION", default_value_t = String::from("blog"))]
    pub mongodb_collection: String,

    /// Capacity of the buffer between the list producer and the gRPC stream.
    ///
    /// With the default of 1 at most one decoded todo waits between the store
    /// cursor and the transport.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 1)]
    pub stream_buffer_size: usize,

    /// Server-side deadline for each RPC, in milliseconds. `0` disables it.
    ///
    /// Client deadlines (`grpc-timeout`) are honoured either way.
    ///
    /// Environment variable: `REQUEST_TIMEOUT_MS`
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = 0)]
    pub request_timeout_ms: u64,

    /// Emit logs as JSON lines instead of the human-readable format.
    ///
    /// Environment variable: `LOG_JSON`
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Seconds to wait for in-flight list streams during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongodb,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Mongo {
        uri: String,
        database: String,
        collection: String,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub store: StoreConfig,
    pub stream_buffer_size: usize,
    pub request_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub log_json: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let store = match args.store {
            StoreBackend::Memory => StoreConfig::Memory,
            StoreBackend::Mongodb => {
                if !(args.mongodb_uri.starts_with("mongodb://")
                    || args.mongodb_uri.starts_with("mongodb+srv://"))
                {
                    bail!("MONGODB_URI must start with mongodb:// or mongodb+srv://");
                }
                if args.mongodb_database.is_empty() {
                    bail!("MONGODB_DATABASE must not be empty");
                }
                if args.mongodb_collection.is_empty() {
                    bail!("MONGODB_COLLECTION must not be empty");
                }
                StoreConfig::Mongo {
                    uri: args.mongodb_uri,
                    database: args.mongodb_database,
                    collection: args.mongodb_collection,
                }
            }
        };

        let request_timeout =
            (args.request_timeout_ms > 0).then(|| Duration::from_millis(args.request_timeout_ms));

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            store,
            stream_buffer_size: args.stream_buffer_size,
            request_timeout,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            log_json: args.log_json,
        })
    }
}

#[cfg(test)]
pub(crate) fn memory_config(extra: &[&str]) -> ServerConfig {
    let argv = ["todo-tonic-server", "--store", "memory"]
        .iter()
        .chain(extra)
        .copied();
    ServerConfig::try_from(CliArgs::parse_from(argv)).unwrap()
}
