use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/server.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates the account, or prints the existing one.
    CreateUser {
        username: String,
        #[arg(long)]
        full_name: Option<String>,
    },
    ListUsers,
    /// Deletes every message between two users.
    DeleteChat { first: String, second: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser {
            username,
            full_name,
        } => {
            let user = storage
                .create_or_get_user(&username, full_name.as_deref())
                .await?;
            println!("user_id={} username={}", user.id, user.username);
        }
        Command::ListUsers => {
            for user in storage.list_users().await? {
                println!("{}\t{}\t{}", user.id, user.username, user.full_name);
            }
        }
        Command::DeleteChat { first, second } => {
            let first = find_user(&storage, &first).await?;
            let second = find_user(&storage, &second).await?;
            let removed = storage.delete_conversation(&first.id, &second.id).await?;
            println!("removed {removed} messages");
        }
    }

    Ok(())
}

async fn find_user(storage: &Storage, username: &str) -> Result<shared::domain::UserProfile> {
    storage
        .user_by_username(username)
        .await?
        .ok_or_else(|| anyhow!("no user named '{username}'"))
}
