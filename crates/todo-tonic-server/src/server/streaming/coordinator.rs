use futures::StreamExt;
use todo_tonic_core::{
    Error,
    convert::document_to_todo,
    proto::ListTodoResponse,
    todo_store::DocumentStream,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Drains `cursor` into the response channel, one todo per message.
///
/// The next document is only requested from the store once the previous
/// message has been accepted by `resp_tx`, so a slow client holds the cursor
/// still instead of buffering the collection.
///
/// # Termination
///
/// - Cursor exhausted: returns the number of todos sent.
/// - Cursor or decode error: the error is offered to the client as the final
///   `INTERNAL` status and returned.
/// - Client disconnected (`resp_tx` closed): returns `CANCELLED` without
///   sending anything.
/// - `shutdown` cancelled, whether waiting on the cursor or on a client that
///   stopped reading: a best-effort `UNAVAILABLE` is offered and returned.
///
/// In every case `cursor` is dropped on return, which closes it on the store.
pub async fn feed_todos(
    mut cursor: DocumentStream,
    resp_tx: mpsc::Sender<Result<ListTodoResponse, Status>>,
    shutdown: CancellationToken,
) -> Result<u64, Status> {
    let mut sent = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                return Err(forward_err(&resp_tx, Error::ServiceShutdown.into()));
            }
            () = resp_tx.closed() => {
                return Err(Status::cancelled("Client disconnected"));
            }
            next = cursor.next() => next,
        };

        let Some(item) = next else {
            return Ok(sent);
        };

        let todo = match item.map_err(Error::from).and_then(document_to_todo) {
            Ok(todo) => todo,
            Err(e) => return Err(forward_err(&resp_tx, e.into())),
        };

        let accepted = tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                return Err(forward_err(&resp_tx, Error::ServiceShutdown.into()));
            }
            res = resp_tx.send(Ok(ListTodoResponse { todo: Some(todo) })) => res.is_ok(),
        };
        if !accepted {
            return Err(Status::cancelled("Client disconnected"));
        }
        sent += 1;
    }
}

/// Offers `status` to the client without waiting, since the client may be
/// gone or no longer reading, and hands it back for logging upstream.
fn forward_err(
    resp_tx: &mpsc::Sender<Result<ListTodoResponse, Status>>,
    status: Status,
) -> Status {
    if let Err(_e) = resp_tx.try_send(Err(status.clone())) {
        #[cfg(feature = "tracing")]
        tracing::debug!("Failed to forward list error: {_e}");
    }
    status
}
