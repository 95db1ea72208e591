//! Portico CLI: run the workflow server, inspect and simulate workflows.
//!
//! Reuses the same engine (portico-core) and server bootstrap
//! (portico-server) that back the HTTP API.

use clap::{Parser, Subcommand};

use portico_cli::commands;

/// Portico: guarded multi-step workflows
#[derive(Parser)]
#[command(name = "portico", version, about = "Portico: guarded multi-step workflows")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "PORTICO_DB_PATH", default_value = "portico.db")]
    db: String,

    /// Directory of additional workflow YAML files
    #[arg(long, env = "PORTICO_WORKFLOWS_DIR")]
    workflows_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Portico HTTP backend server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3310)]
        port: u16,
        /// Accounts file for the local identity provider
        #[arg(long, env = "PORTICO_ACCOUNTS")]
        accounts: Option<String>,
        /// YAML file of view guards layered over the defaults
        #[arg(long, env = "PORTICO_GUARDS")]
        guards: Option<String>,
        /// Base URL of a remote record service (records stay local if unset)
        #[arg(long, env = "PORTICO_RECORD_STORE_URL")]
        record_store_url: Option<String>,
        /// Path to static frontend directory
        #[arg(long)]
        static_dir: Option<String>,
        /// Drop sessions unused for this many seconds
        #[arg(long, env = "PORTICO_SESSION_IDLE_SECS", default_value_t = 1800)]
        session_idle_secs: u64,
    },

    /// Inspect, validate and simulate workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List built-in and loaded workflows
    List,
    /// Validate a workflow YAML file
    Validate {
        /// Path to the workflow YAML file
        file: String,
    },
    /// Print the step graph of a workflow
    Show {
        /// Workflow name
        name: String,
    },
    /// Run a sequence of step submissions through a workflow
    Simulate {
        /// Workflow name
        name: String,
        /// YAML or JSON file holding a list of partial records
        #[arg(long)]
        input: String,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "portico_core=warn,portico_server=info,portico_cli=info,tower_http=info".into()
            }),
        )
        .init();

    let result = match cli.command {
        Some(Commands::Server {
            host,
            port,
            accounts,
            guards,
            record_store_url,
            static_dir,
            session_idle_secs,
        }) => {
            commands::server::run(portico_server::ServerConfig {
                host,
                port,
                db_path: cli.db,
                workflows_dir: cli.workflows_dir,
                accounts_path: accounts,
                guards_path: guards,
                record_store_url,
                static_dir,
                session_idle_secs,
            })
            .await
        }

        Some(Commands::Workflow { action }) => {
            let workflows_dir = cli.workflows_dir.as_deref();
            match action {
                WorkflowAction::Validate { file } => {
                    commands::workflow::validate(&file).map(|_| ())
                }
                WorkflowAction::List => commands::load_registry(workflows_dir)
                    .and_then(|registry| commands::workflow::list(&registry)),
                WorkflowAction::Show { name } => commands::load_registry(workflows_dir)
                    .and_then(|registry| commands::workflow::show(&registry, &name)),
                WorkflowAction::Simulate { name, input, json } => {
                    commands::load_registry(workflows_dir).and_then(|registry| {
                        commands::workflow::run_simulation(&registry, &name, &input, json)
                    })
                }
            }
        }

        None => {
            // No subcommand: show help
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
