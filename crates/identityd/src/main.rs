mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "identityd", version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the authorization server.
    Serve(commands::serve::ServeParams),
    /// Create tenant resources.
    #[command(subcommand)]
    Create(commands::create::CreateCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::logging::configure_logging()?;

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(params) => commands::serve::cmd_serve(params).await,
        Commands::Create(command) => commands::create::cmd_create(command).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e.public_message());
        std::process::exit(1);
    }

    Ok(())
}
