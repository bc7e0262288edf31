use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod config;
pub mod flow;
pub mod schema;
pub mod serve;

use config::ConfigArgs;
use flow::FlowArgs;
use schema::SchemaArgs;
use serve::ServeArgs;

use botflow::config::ConfigManager;

#[derive(Parser, Debug)]
#[command(
    name = "botflow",
    about = "Published chatbot flow runtime",
    version = "0.1.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API
    Serve(ServeArgs),

    /// Emit JSON‐Schema
    Schema(SchemaArgs),

    /// Inspect flows
    Flow(FlowArgs),

    /// Handle configuration
    Config(ConfigArgs),
}

#[derive(Clone, Debug)]
pub struct CliContext {
    pub root: PathBuf,
    pub config_manager: ConfigManager,
}

impl CliContext {
    pub fn new(root: PathBuf, config_manager: ConfigManager) -> Self {
        Self {
            root,
            config_manager,
        }
    }

    pub fn flows_dir(&self) -> PathBuf {
        self.root.join("flows")
    }
}

pub async fn execute(context: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve(args) => serve::execute(args, context).await,
        Commands::Schema(args) => schema::execute(args, context).await,
        Commands::Flow(args) => flow::execute(args, context).await,
        Commands::Config(args) => config::execute(args, context).await,
    }
}

pub fn default_command() -> Commands {
    Commands::Serve(ServeArgs::default_server())
}
