mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "orgflow",
    version,
    about = "Migrate configuration records between orgs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a migration template against a source/target org pair
    Run {
        /// Path to template YAML file
        template: PathBuf,
        /// Path to connections YAML file
        #[arg(short, long, default_value = "connections.yaml")]
        connections: PathBuf,
        /// Restrict the run to these source record ids
        #[arg(long = "select", value_delimiter = ',')]
        select: Vec<String>,
        /// Path to the run history database
        #[arg(long, default_value = "orgflow.db")]
        state: PathBuf,
    },
    /// Dry-run validation: run every declared check, write nothing
    Validate {
        /// Path to template YAML file
        template: PathBuf,
        /// Path to connections YAML file
        #[arg(short, long, default_value = "connections.yaml")]
        connections: PathBuf,
        /// Restrict validation to these source record ids
        #[arg(long = "select", value_delimiter = ',')]
        select: Vec<String>,
    },
    /// List templates in a directory
    Templates {
        /// Directory containing template YAML files
        #[arg(default_value = "templates")]
        dir: PathBuf,
    },
    /// Show past runs, or one run's steps and record errors
    History {
        /// Path to the run history database
        #[arg(long, default_value = "orgflow.db")]
        state: PathBuf,
        /// Inspect a single run by id
        #[arg(long)]
        run: Option<i64>,
        /// Maximum rows to display
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            template,
            connections,
            select,
            state,
        } => commands::run::execute(&template, &connections, select, &state).await,
        Commands::Validate {
            template,
            connections,
            select,
        } => commands::validate::execute(&template, &connections, select).await,
        Commands::Templates { dir } => commands::templates::execute(&dir),
        Commands::History { state, run, limit } => commands::history::execute(&state, run, limit),
    }
}
