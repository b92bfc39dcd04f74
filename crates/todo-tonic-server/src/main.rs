#![doc = include_str!("../README.md")]

mod server;

use anyhow::Context;
use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, ServerConfig, StoreConfig};
use server::service::handler::{SharedStore, TodoHandler};
use server::telemetry::{TelemetryProviders, init_telemetry};
use std::sync::Arc;
use todo_tonic_core::proto::{FILE_DESCRIPTOR_SET, todo_service_server::TodoServiceServer};
use todo_tonic_core::todo_store::{MemoryStore, MongoStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_json)?;
    let store = open_store(&config.store).await?;

    if config.uds {
        #[cfg(unix)]
        {
            use tokio::net::UnixListener;
            use tokio_stream::wrappers::UnixListenerStream;
            let uds_path = config.server_addr.clone();
            let uds = UnixListener::bind(&uds_path)?;
            let incoming = UnixListenerStream::new(uds);
            log_startup_info(&uds_path, &config);
            let res = run_server_with_incoming(providers, incoming, store, config).await;
            // A panic can still leave the socket file behind.
            let _ = std::fs::remove_file(&uds_path);
            res
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("Unix domain sockets are not supported on this platform");
        }
    } else {
        let tcp_path = config.server_addr.clone();
        let tcp = TcpListener::bind(&tcp_path).await?;
        let incoming = TcpListenerStream::new(tcp);
        log_startup_info(&tcp_path, &config);
        run_server_with_incoming(providers, incoming, store, config).await
    }
}

/// Builds the store handle every RPC shares.
async fn open_store(config: &StoreConfig) -> anyhow::Result<SharedStore> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Mongo {
            uri,
            database,
            collection,
        } => {
            let store = MongoStore::connect(uri, database, collection)
                .await
                .context("failed to configure MongoDB client")?;
            Ok(Arc::new(store))
        }
    }
}

async fn run_server_with_incoming<I, IO, IE>(
    providers: TelemetryProviders,
    incoming: I,
    store: SharedStore,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<TodoServiceServer<TodoHandler>>()
        .await;

    let service = TodoHandler::new(store, config.clone());

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let mut builder = Server::builder();
    if let Some(deadline) = config.request_timeout {
        builder = builder.timeout(deadline);
    }

    builder
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_todo_service(service.clone()))
        .serve_with_incoming_shutdown(
            incoming,
            shutdown_signal(service, health_reporter, providers),
        )
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Todo service shut down");
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting todo service on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting todo service on {} ({} store)",
            _addr,
            match _config.store {
                StoreConfig::Memory => "memory",
                StoreConfig::Mongo { .. } => "mongodb",
            }
        );
    }
}

fn build_todo_service(service: TodoHandler) -> TodoServiceServer<TodoHandler> {
    TodoServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn shutdown_signal(
    service: TodoHandler,
    health_reporter: HealthReporter,
    providers: TelemetryProviders,
) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    health_reporter
        .set_not_serving::<TodoServiceServer<TodoHandler>>()
        .await;

    service.shutdown().await;

    providers.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::memory_config;
    use todo_tonic_core::proto::{
        CreateTodoRequest, DeleteTodoRequest, ListTodoRequest, ReadTodoRequest, Todo,
        UpdateTodoRequest, todo_service_client::TodoServiceClient,
    };
    use tokio_stream::StreamExt;
    use tonic::Code;

    /// Serves a memory-backed handler on an ephemeral port and returns a
    /// connected client.
    async fn spawn_server() -> TodoServiceClient<tonic::transport::Channel> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = TodoHandler::new(Arc::new(MemoryStore::new()), memory_config(&[]));

        tokio::spawn(
            Server::builder()
                .add_service(build_todo_service(handler))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );

        TodoServiceClient::connect(format!("http://{addr}"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn smoke_sequence_over_the_wire() {
        let mut client = spawn_server().await;

        let created = client
            .create_todo(CreateTodoRequest {
                todo: Some(Todo {
                    id: String::new(),
                    author_id: "selfnote".into(),
                    title: "First Post".into(),
                    content: "Fist Post for US!".into(),
                }),
            })
            .await
            .unwrap()
            .into_inner()
            .todo
            .unwrap();
        assert_eq!(created.id.len(), 24);

        let read = client
            .read_todo(ReadTodoRequest {
                todo_id: created.id.clone(),
            })
            .await
            .unwrap()
            .into_inner()
            .todo
            .unwrap();
        assert_eq!(read, created);

        let edited = Todo {
            id: created.id.clone(),
            author_id: "Change Author".into(),
            title: "First Post(edit)".into(),
            content: "First Post for US!(edit)".into(),
        };
        client
            .update_todo(UpdateTodoRequest {
                todo: Some(edited.clone()),
            })
            .await
            .unwrap();

        let mut stream = client
            .list_todo(ListTodoRequest {})
            .await
            .unwrap()
            .into_inner();
        let mut listed = Vec::new();
        while let Some(msg) = stream.next().await {
            listed.push(msg.unwrap().todo.unwrap());
        }
        assert_eq!(listed, vec![edited]);

        let deleted = client
            .delete_todo(DeleteTodoRequest {
                todo_id: created.id.clone(),
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(deleted.todo_id, created.id);

        let status = client
            .read_todo(ReadTodoRequest {
                todo_id: created.id,
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn malformed_id_over_the_wire_is_invalid_argument() {
        let mut client = spawn_server().await;
        let status = client
            .delete_todo(DeleteTodoRequest {
                todo_id: "not-an-id".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
