//! Smoke-test client for `todo-tonic-server`.
//!
//! Runs Create -> Read -> Update -> List -> Delete against a running server
//! and prints every response. Exits non-zero on the first failed call.

use anyhow::Context;
use clap::Parser;
use todo_tonic_core::proto::{
    CreateTodoRequest, DeleteTodoRequest, ListTodoRequest, ReadTodoRequest, Todo,
    UpdateTodoRequest, todo_service_client::TodoServiceClient,
};
use tokio_stream::StreamExt;
use tonic::{codec::CompressionEncoding, transport::Channel};

#[derive(Parser, Debug)]
#[command(
    name = "todo-tonic-client",
    version,
    about = "Runs a create/read/update/list/delete sequence against the todo service"
)]
struct ClientArgs {
    /// Server endpoint.
    ///
    /// Environment variable: `TODO_SERVER`
    #[arg(long, env = "TODO_SERVER", default_value_t = String::from("http://127.0.0.1:50051"))]
    server_addr: String,
}

type Client = TodoServiceClient<Channel>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = ClientArgs::parse();

    let channel = Channel::from_shared(args.server_addr.clone())?
        .connect()
        .await
        .with_context(|| format!("could not connect to {}", args.server_addr))?;
    let mut client = TodoServiceClient::new(channel)
        .send_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Zstd);

    let id = create_todo(&mut client).await?;
    read_todo(&mut client, &id).await?;
    update_todo(&mut client, &id).await?;
    list_todos(&mut client).await?;
    delete_todo(&mut client, &id).await?;
    Ok(())
}

async fn create_todo(client: &mut Client) -> anyhow::Result<String> {
    println!("Creating the todo");
    let todo = Todo {
        id: String::new(),
        author_id: "selfnote".into(),
        title: "First Post".into(),
        content: "Fist Post for US!".into(),
    };

    let created = client
        .create_todo(CreateTodoRequest { todo: Some(todo) })
        .await
        .context("failed to create todo")?
        .into_inner();
    println!("Todo has been created: {created:?}");

    created
        .todo
        .map(|t| t.id)
        .context("create response carried no todo")
}

async fn read_todo(client: &mut Client, id: &str) -> anyhow::Result<()> {
    println!("Reading the todo with id {id}");
    let read = client
        .read_todo(ReadTodoRequest {
            todo_id: id.to_string(),
        })
        .await
        .context("failed to read todo")?
        .into_inner();
    println!("Todo was read: {read:?}");
    Ok(())
}

async fn update_todo(client: &mut Client, id: &str) -> anyhow::Result<()> {
    println!("Updating the todo with id {id}");
    let edited = Todo {
        id: id.to_string(),
        author_id: "Change Author".into(),
        title: "First Post(edit)".into(),
        content: "First Post for US!(edit)".into(),
    };
    let updated = client
        .update_todo(UpdateTodoRequest { todo: Some(edited) })
        .await
        .context("failed to update todo")?
        .into_inner();
    println!("Todo was updated: {updated:?}");
    Ok(())
}

async fn list_todos(client: &mut Client) -> anyhow::Result<()> {
    println!("Listing todos");
    let mut stream = client
        .list_todo(ListTodoRequest {})
        .await
        .context("failed to start listing todos")?
        .into_inner();

    while let Some(resp) = stream.next().await {
        let resp = resp.context("list stream aborted")?;
        println!("{:?}", resp.todo);
    }
    Ok(())
}

async fn delete_todo(client: &mut Client, id: &str) -> anyhow::Result<()> {
    println!("Deleting the todo with id {id}");
    let deleted = client
        .delete_todo(DeleteTodoRequest {
            todo_id: id.to_string(),
        })
        .await
        .context("failed to delete todo")?
        .into_inner();
    println!("Todo was deleted: {deleted:?}");
    Ok(())
}
