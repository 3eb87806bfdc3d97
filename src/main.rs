//! gridrunners - console client for the maze race server

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use gridrunners::client::{self, GameClient};
use gridrunners::config::Config;
use gridrunners::game::UserId;
use gridrunners::protocol::{ClientMessage, ServerMessage};

#[derive(Parser)]
#[command(name = "gridrunners")]
#[command(about = "Race other players through a generated maze")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Server address (defaults to the configured bind address)
    #[arg(short, long)]
    addr: Option<String>,

    /// Your user id
    #[arg(short, long)]
    user: i64,

    /// Name shown to other players
    #[arg(short, long, default_value = "Runner")]
    name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive console (default)
    Play,
    /// List open games
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let addr = cli.addr.clone().unwrap_or(config.server.bind);
    let user = UserId(cli.user);

    match cli.command.unwrap_or(Commands::Play) {
        Commands::Play => client::play(&addr, user, &cli.name).await,
        Commands::List => {
            let mut client = GameClient::connect(&addr, user, &cli.name).await?;
            match client.request(&ClientMessage::ListGames).await? {
                ServerMessage::GameList { games } if games.is_empty() => {
                    println!("No open games.")
                }
                ServerMessage::GameList { games } => {
                    for game in games {
                        println!(
                            "{}  {}  {}/{}",
                            game.id,
                            game.name,
                            game.total_participants(),
                            game.max_players
                        );
                    }
                }
                other => bail!("Unexpected reply: {:?}", other),
            }
            Ok(())
        }
    }
}
