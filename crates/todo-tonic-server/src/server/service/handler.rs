//! gRPC service implementation for todo CRUD over a document store.
//!
//! This module defines [`TodoHandler`], the concrete implementation of the
//! [`TodoService`] gRPC service defined in `todo.proto`. Every RPC parses and
//! validates its identifier before touching the store, delegates to the
//! injected [`DocumentStore`], and maps the outcome onto a status code through
//! [`Error`].
//!
//! ## Concurrency
//!
//! Each RPC runs in its own task and shares one store handle. No locks are
//! taken around `UpdateTodo`'s read-modify-write: two concurrent updates of
//! the same todo are last-write-wins, and an update racing a delete may fail
//! either `NOT_FOUND` (lookup missed) or `INVALID_ARGUMENT` (replace matched
//! nothing). Callers must not rely on anything stronger.
//!
//! ## Cancellation
//!
//! Unary store calls are plain futures owned by the RPC; when the client
//! cancels or its deadline passes, tonic drops the RPC future and the store
//! call with it. `ListTodo` runs its producer in a separate task which stops
//! and closes the store cursor as soon as the client hangs up (see
//! [`feed_todos`]).

use crate::server::{
    config::ServerConfig,
    streaming::coordinator::feed_todos,
    telemetry::{
        decrement_streams_inflight, increment_errors, increment_requests,
        increment_streams_inflight, increment_todos_streamed, record_stream_duration,
    },
};
use core::{pin::Pin, time::Duration};
use futures::TryStreamExt;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use todo_tonic_core::{
    Error,
    convert::{document_to_todo_with_id, parse_todo_id, todo_to_document},
    proto::{
        CreateTodoRequest, CreateTodoResponse, DeleteTodoRequest, DeleteTodoResponse,
        ListTodoRequest, ListTodoResponse, ReadTodoRequest, ReadTodoResponse, UpdateTodoRequest,
        UpdateTodoResponse, todo_service_server::TodoService,
    },
    todo_store::DocumentStore,
};
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

/// Store handle shared by every in-flight RPC.
pub type SharedStore = Arc<dyn DocumentStore>;

/// Shutdown state shared between the handler clones tonic hands out.
#[derive(Debug, Default)]
struct Lifecycle {
    shutting_down: AtomicBool,
    streams_inflight: AtomicUsize,
    shutdown_token: CancellationToken,
}

/// Counts a list stream as in flight until its producer task ends.
struct StreamGuard(Arc<Lifecycle>);

impl StreamGuard {
    fn new(lifecycle: Arc<Lifecycle>) -> Self {
        lifecycle.streams_inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Self(lifecycle)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.streams_inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

/// The `TodoService` gRPC service.
///
/// Cheap to clone; clones share the store handle and shutdown state.
#[derive(Clone)]
pub struct TodoHandler {
    store: SharedStore,
    config: ServerConfig,
    lifecycle: Arc<Lifecycle>,
}

impl TodoHandler {
    /// Creates a handler over an already constructed store.
    pub fn new(store: SharedStore, config: ServerConfig) -> Self {
        Self {
            store,
            config,
            lifecycle: Arc::new(Lifecycle::default()),
        }
    }

    /// Number of list streams whose producer is still running.
    pub fn streams_inflight(&self) -> usize {
        self.lifecycle.streams_inflight.load(Ordering::Acquire)
    }

    /// Gracefully shuts the service down.
    ///
    /// - New RPCs are refused with `UNAVAILABLE` from here on.
    /// - In-flight list streams get up to `shutdown_timeout` to finish.
    /// - Streams still running after that are cancelled.
    pub async fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.lifecycle.shutting_down.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight list streams ({} active)",
            self.streams_inflight()
        );
        let drained = timeout(self.config.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All list streams drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Drain timed out, cancelling {} list streams",
                    self.streams_inflight()
                );
            }
        }

        self.lifecycle.shutdown_token.cancel();
    }

    fn ensure_serving(&self) -> todo_tonic_core::Result<()> {
        if self.lifecycle.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }

    async fn create(&self, req: CreateTodoRequest) -> todo_tonic_core::Result<CreateTodoResponse> {
        self.ensure_serving()?;
        let document = todo_to_document(req.todo.unwrap_or_default());
        let id = self.store.insert(document.clone()).await?;

        Ok(CreateTodoResponse {
            todo: Some(document_to_todo_with_id(document, id)),
        })
    }

    async fn read(&self, req: ReadTodoRequest) -> todo_tonic_core::Result<ReadTodoResponse> {
        self.ensure_serving()?;
        let id = parse_todo_id(&req.todo_id)?;
        let document = self
            .store
            .find_one(id)
            .await?
            .ok_or(Error::NotFound { id: req.todo_id })?;

        Ok(ReadTodoResponse {
            todo: Some(document_to_todo_with_id(document, id)),
        })
    }

    async fn update(&self, req: UpdateTodoRequest) -> todo_tonic_core::Result<UpdateTodoResponse> {
        self.ensure_serving()?;
        let todo = req.todo.unwrap_or_default();
        let id = parse_todo_id(&todo.id)?;

        let mut document = self
            .store
            .find_one(id)
            .await?
            .ok_or(Error::NotFound { id: todo.id })?;
        document.id = Some(id);
        document.author_id = todo.author_id;
        document.title = todo.title;
        document.content = todo.content;

        self.store
            .replace_one(id, document.clone())
            .await
            .map_err(|source| Error::ReplaceRejected {
                id: id.to_hex(),
                source,
            })?;

        Ok(UpdateTodoResponse {
            todo: Some(document_to_todo_with_id(document, id)),
        })
    }

    async fn delete(&self, req: DeleteTodoRequest) -> todo_tonic_core::Result<DeleteTodoResponse> {
        self.ensure_serving()?;
        let id = parse_todo_id(&req.todo_id)?;

        match self.store.delete_one(id).await? {
            0 => Err(Error::NotFound { id: req.todo_id }),
            _ => Ok(DeleteTodoResponse {
                todo_id: req.todo_id,
            }),
        }
    }
}

/// Records a failed RPC and converts the error for the wire.
fn reject(method: &'static str, err: Error) -> Status {
    increment_errors(method);
    #[cfg(feature = "tracing")]
    tracing::warn!(method, "Request failed: {err}");
    err.into()
}

#[tonic::async_trait]
impl TodoService for TodoHandler {
    type ListTodoStream = Pin<Box<dyn Stream<Item = Result<ListTodoResponse, Status>> + Send>>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn create_todo(
        &self,
        req: Request<CreateTodoRequest>,
    ) -> Result<Response<CreateTodoResponse>, Status> {
        increment_requests("create_todo");
        self.create(req.into_inner())
            .await
            .map(Response::new)
            .map_err(|e| reject("create_todo", e))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(todo_id = %req.get_ref().todo_id)))]
    async fn read_todo(
        &self,
        req: Request<ReadTodoRequest>,
    ) -> Result<Response<ReadTodoResponse>, Status> {
        increment_requests("read_todo");
        self.read(req.into_inner())
            .await
            .map(Response::new)
            .map_err(|e| reject("read_todo", e))
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            skip_all,
            fields(todo_id = req.get_ref().todo.as_ref().map(|t| t.id.as_str()).unwrap_or_default())
        )
    )]
    async fn update_todo(
        &self,
        req: Request<UpdateTodoRequest>,
    ) -> Result<Response<UpdateTodoResponse>, Status> {
        increment_requests("update_todo");
        self.update(req.into_inner())
            .await
            .map(Response::new)
            .map_err(|e| reject("update_todo", e))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(todo_id = %req.get_ref().todo_id)))]
    async fn delete_todo(
        &self,
        req: Request<DeleteTodoRequest>,
    ) -> Result<Response<DeleteTodoResponse>, Status> {
        increment_requests("delete_todo");
        self.delete(req.into_inner())
            .await
            .map(Response::new)
            .map_err(|e| reject("delete_todo", e))
    }

    /// Streams every stored todo.
    ///
    /// The store cursor is opened before responding, so a store that cannot
    /// start the enumeration fails the call with `INTERNAL` instead of
    /// returning a stream. Order is whatever the store iterates in.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
    async fn list_todo(
        &self,
        _req: Request<ListTodoRequest>,
    ) -> Result<Response<Self::ListTodoStream>, Status> {
        increment_requests("list_todo");
        self.ensure_serving()
            .map_err(|e| reject("list_todo", e))?;

        let cursor = self
            .store
            .find_all()
            .await
            .map_err(|e| reject("list_todo", e.into()))?;

        let start = std::time::Instant::now();
        let guard = StreamGuard::new(Arc::clone(&self.lifecycle));
        let shutdown = self.lifecycle.shutdown_token.child_token();
        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<ListTodoResponse, Status>>(self.config.stream_buffer_size);

        let fut = async move {
            let _guard = guard;
            match feed_todos(cursor, resp_tx, shutdown).await {
                Ok(_sent) => {
                    record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
                    #[cfg(feature = "tracing")]
                    tracing::debug!("List stream finished after {_sent} todos");
                }
                Err(_status) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("List stream aborted: {}", _status.message());
                }
            }
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            fut.instrument(tracing::info_span!("streaming"))
        };

        tokio::spawn(fut);

        let stream = ReceiverStream::new(resp_rx)
            .inspect_ok(|_| increment_todos_streamed(1))
            .inspect_err(|_| increment_errors("list_todo"));

        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::memory_config;
    use futures::{StreamExt, stream};
    use std::collections::HashSet;
    use todo_tonic_core::{
        proto::Todo,
        todo_store::{
            DocumentStream, Error as StoreError, MemoryStore, Result as StoreResult,
            TodoDocument, TodoId,
        },
    };
    use tonic::Code;

    /// Wraps a [`MemoryStore`], counting calls and optionally failing some.
    #[derive(Default)]
    struct ProbeStore {
        inner: MemoryStore,
        calls: AtomicUsize,
        fail_insert: bool,
        fail_find_one: bool,
        fail_replace: bool,
        fail_delete: bool,
        fail_find_all: bool,
        hang_find_all: bool,
    }

    impl ProbeStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::Acquire)
        }

        fn touch(&self) {
            self.calls.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn unreachable() -> StoreError {
        StoreError::Backend {
            reason: "store unreachable".into(),
        }
    }

    #[async_trait::async_trait]
    impl DocumentStore for ProbeStore {
        async fn insert(&self, document: TodoDocument) -> StoreResult<TodoId> {
            self.touch();
            if self.fail_insert {
                return Err(unreachable());
            }
            self.inner.insert(document).await
        }

        async fn find_one(&self, id: TodoId) -> StoreResult<Option<TodoDocument>> {
            self.touch();
            if self.fail_find_one {
                return Err(unreachable());
            }
            self.inner.find_one(id).await
        }

        async fn replace_one(&self, id: TodoId, document: TodoDocument) -> StoreResult<()> {
            self.touch();
            if self.fail_replace {
                return Err(StoreError::NoMatch { id: id.to_hex() });
            }
            self.inner.replace_one(id, document).await
        }

        async fn delete_one(&self, id: TodoId) -> StoreResult<u64> {
            self.touch();
            if self.fail_delete {
                return Err(unreachable());
            }
            self.inner.delete_one(id).await
        }

        async fn find_all(&self) -> StoreResult<DocumentStream> {
            self.touch();
            if self.fail_find_all {
                return Err(unreachable());
            }
            if self.hang_find_all {
                return Ok(stream::pending().boxed());
            }
            self.inner.find_all().await
        }
    }

    fn handler() -> TodoHandler {
        TodoHandler::new(Arc::new(MemoryStore::new()), memory_config(&[]))
    }

    fn probe(store: ProbeStore) -> (TodoHandler, Arc<ProbeStore>) {
        let store = Arc::new(store);
        let handler = TodoHandler::new(store.clone(), memory_config(&["--shutdown-timeout", "0"]));
        (handler, store)
    }

    fn todo(author_id: &str, title: &str, content: &str) -> Todo {
        Todo {
            id: String::new(),
            author_id: author_id.into(),
            title: title.into(),
            content: content.into(),
        }
    }

    fn todo_with_id(id: &str, author_id: &str, title: &str, content: &str) -> Todo {
        Todo {
            id: id.to_string(),
            ..todo(author_id, title, content)
        }
    }

    async fn create(h: &TodoHandler, todo: Todo) -> Todo {
        h.create_todo(Request::new(CreateTodoRequest { todo: Some(todo) }))
            .await
            .unwrap()
            .into_inner()
            .todo
            .unwrap()
    }

    async fn read(h: &TodoHandler, id: &str) -> Result<Todo, Status> {
        h.read_todo(Request::new(ReadTodoRequest {
            todo_id: id.to_string(),
        }))
        .await
        .map(|r| r.into_inner().todo.unwrap())
    }

    async fn update(h: &TodoHandler, todo: Todo) -> Result<Todo, Status> {
        h.update_todo(Request::new(UpdateTodoRequest { todo: Some(todo) }))
            .await
            .map(|r| r.into_inner().todo.unwrap())
    }

    async fn delete(h: &TodoHandler, id: &str) -> Result<String, Status> {
        h.delete_todo(Request::new(DeleteTodoRequest {
            todo_id: id.to_string(),
        }))
        .await
        .map(|r| r.into_inner().todo_id)
    }

    async fn list(h: &TodoHandler) -> Result<Vec<Todo>, Status> {
        let stream = h
            .list_todo(Request::new(ListTodoRequest {}))
            .await?
            .into_inner();
        stream.map_ok(|r| r.todo.unwrap()).try_collect().await
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let h = handler();
        let created = create(&h, todo("selfnote", "First Post", "Fist Post for US!")).await;

        assert_eq!(created.id.len(), 24);
        assert!(created.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(read(&h, &created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn create_ignores_request_id() {
        let h = handler();
        let mut input = todo("a", "t", "c");
        input.id = TodoId::new().to_hex();

        let created = create(&h, input.clone()).await;
        assert_ne!(created.id, input.id);
        assert_eq!(read(&h, &input.id).await.unwrap_err().code(), Code::NotFound);
    }

    #[tokio::test]
    async fn create_without_todo_stores_empty_fields() {
        let h = handler();
        let created = h
            .create_todo(Request::new(CreateTodoRequest { todo: None }))
            .await
            .unwrap()
            .into_inner()
            .todo
            .unwrap();
        assert_eq!(read(&h, &created.id).await.unwrap(), todo_with_id(&created.id, "", "", ""));
    }

    #[tokio::test]
    async fn update_overwrites_every_field() {
        let h = handler();
        let created = create(&h, todo("selfnote", "First Post", "Fist Post for US!")).await;

        let edited = todo_with_id(
            &created.id,
            "Change Author",
            "First Post(edit)",
            "First Post for US!(edit)",
        );
        assert_eq!(update(&h, edited.clone()).await.unwrap(), edited);
        assert_eq!(read(&h, &created.id).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let h = handler();
        let ghost = todo_with_id(&TodoId::new().to_hex(), "a", "t", "c");
        assert_eq!(update(&h, ghost).await.unwrap_err().code(), Code::NotFound);
    }

    #[tokio::test]
    async fn update_without_todo_is_invalid() {
        let h = handler();
        let status = h
            .update_todo(Request::new(UpdateTodoRequest { todo: None }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn delete_is_final() {
        let h = handler();
        let created = create(&h, todo("a", "t", "c")).await;

        assert_eq!(delete(&h, &created.id).await.unwrap(), created.id);
        assert_eq!(read(&h, &created.id).await.unwrap_err().code(), Code::NotFound);
        assert_eq!(delete(&h, &created.id).await.unwrap_err().code(), Code::NotFound);
    }

    #[tokio::test]
    async fn malformed_ids_never_reach_the_store() {
        let (h, store) = probe(ProbeStore::default());

        for raw in ["not-an-id", "", "5f1d7f1c2b3a4d5e6f70819"] {
            assert_eq!(read(&h, raw).await.unwrap_err().code(), Code::InvalidArgument);
            assert_eq!(
                update(&h, todo_with_id(raw, "a", "t", "c"))
                    .await
                    .unwrap_err()
                    .code(),
                Code::InvalidArgument
            );
            assert_eq!(delete(&h, raw).await.unwrap_err().code(), Code::InvalidArgument);
        }

        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn list_yields_each_created_todo_once() {
        let h = handler();
        let mut created = HashSet::new();
        for i in 0..7 {
            let t = create(&h, todo(&format!("author-{i}"), "t", "c")).await;
            created.insert(t.id.clone());
        }

        let listed = list(&h).await.unwrap();
        assert_eq!(listed.len(), created.len());
        let ids: HashSet<String> = listed.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, created);
    }

    #[tokio::test]
    async fn list_on_empty_store_ends_immediately() {
        assert!(list(&handler()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_failure_is_internal() {
        let (h, _) = probe(ProbeStore {
            fail_insert: true,
            ..Default::default()
        });
        let status = h
            .create_todo(Request::new(CreateTodoRequest {
                todo: Some(todo("a", "t", "c")),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn rejected_replace_is_invalid_argument() {
        let (h, _) = probe(ProbeStore {
            fail_replace: true,
            ..Default::default()
        });
        let created = create(&h, todo("a", "t", "c")).await;

        let status = update(&h, todo_with_id(&created.id, "b", "u", "d"))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
        // The stored todo is untouched.
        assert_eq!(read(&h, &created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn lookup_failure_is_internal_not_not_found() {
        let (h, store) = probe(ProbeStore {
            fail_find_one: true,
            ..Default::default()
        });
        let id = TodoId::new().to_hex();

        assert_eq!(read(&h, &id).await.unwrap_err().code(), Code::Internal);
        assert_eq!(
            update(&h, todo_with_id(&id, "a", "t", "c"))
                .await
                .unwrap_err()
                .code(),
            Code::Internal
        );
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn delete_failure_is_internal() {
        let (h, _) = probe(ProbeStore {
            fail_delete: true,
            ..Default::default()
        });
        let created = create(&h, todo("a", "t", "c")).await;

        assert_eq!(delete(&h, &created.id).await.unwrap_err().code(), Code::Internal);
        assert_eq!(read(&h, &created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn list_that_cannot_start_is_internal() {
        let (h, _) = probe(ProbeStore {
            fail_find_all: true,
            ..Default::default()
        });
        let Err(status) = h.list_todo(Request::new(ListTodoRequest {})).await else {
            panic!("expected list to fail before streaming");
        };
        assert_eq!(status.code(), Code::Internal);
    }

    #[tokio::test]
    async fn dropping_list_stream_releases_cursor() {
        let (h, _) = probe(ProbeStore {
            hang_find_all: true,
            ..Default::default()
        });

        let stream = h
            .list_todo(Request::new(ListTodoRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(h.streams_inflight(), 1);
        drop(stream);

        timeout(Duration::from_secs(5), async {
            while h.streams_inflight() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("list producer did not stop after the client went away");
    }

    #[tokio::test]
    async fn shutdown_refuses_new_calls_and_cancels_streams() {
        let (h, _) = probe(ProbeStore {
            hang_find_all: true,
            ..Default::default()
        });
        let mut stream = h
            .list_todo(Request::new(ListTodoRequest {}))
            .await
            .unwrap()
            .into_inner();

        h.shutdown().await;

        let last = stream.next().await.unwrap();
        assert_eq!(last.unwrap_err().code(), Code::Unavailable);
        assert_eq!(
            read(&h, &TodoId::new().to_hex()).await.unwrap_err().code(),
            Code::Unavailable
        );
    }

    #[tokio::test]
    async fn shutdown_stops_a_stream_that_is_never_polled() {
        let (h, _) = probe(ProbeStore::default());
        for i in 0..3 {
            create(&h, todo(&format!("a{i}"), "t", "c")).await;
        }

        let _stream = h
            .list_todo(Request::new(ListTodoRequest {}))
            .await
            .unwrap()
            .into_inner();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(h.streams_inflight(), 1);

        h.shutdown().await;

        timeout(Duration::from_secs(5), async {
            while h.streams_inflight() > 0 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("list producer kept running after shutdown");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_get_distinct_ids() {
        let h = handler();
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let h = h.clone();
                tokio::spawn(async move { create(&h, todo(&format!("a{i}"), "t", "c")).await.id })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }
        assert_eq!(list(&h).await.unwrap().len(), 32);
    }
}
