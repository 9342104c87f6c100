//! The `ragforge` binary.

mod app;
mod config;
mod config_watcher;

use app::App;
use clap::{Parser, Subcommand};
use config::RagforgeConfig;
use config_watcher::{apply_reload, ConfigWatcher};
use ragforge_gateway::{AuthConfig, GatewayServer};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragforge", about = "RagForge: retrieval-augmented generation backend")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ragforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not watch the config file for `[rag]` changes
        #[arg(long)]
        no_watch: bool,
    },
    /// Manage knowledge bases
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },
    /// Attach a local file to a knowledge base and ingest it
    Ingest {
        #[arg(long)]
        user: String,
        #[arg(long)]
        kb: String,
        file: PathBuf,
    },
    /// Search one or more knowledge bases
    Retrieve {
        #[arg(long)]
        user: String,
        /// Knowledge base id; repeat for several
        #[arg(long = "kb", required = true)]
        kbs: Vec<String>,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        query: String,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Create a knowledge base bound to an embedding model
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List a user's knowledge bases
    List {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = RagforgeConfig::load(&cli.config)?;

    let shutdown = CancellationToken::new();
    let app = App::build(&config, shutdown.clone())?;
    app.seed_models(&config).await?;

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_watch,
        } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);

            let auth = AuthConfig::new(config.server.api_keys.clone());
            if auth.is_enabled() {
                info!(keys = config.server.api_keys.len(), "API key auth enabled");
            }

            let _watcher = if no_watch {
                None
            } else {
                let settings = app.settings.clone();
                match ConfigWatcher::start(cli.config.clone(), 500, move |reloaded| {
                    if let Err(e) = apply_reload(&settings, reloaded) {
                        warn!(error = %e, "Rejected reloaded [rag] section");
                    }
                }) {
                    Ok(watcher) => Some(watcher),
                    Err(e) => {
                        warn!(error = %e, "Config hot-reload disabled");
                        None
                    }
                }
            };

            let router = GatewayServer::build(
                app.gateway_state(&config),
                auth,
                config.server.max_concurrent_requests,
            );
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("RagForge gateway listening on {}", addr);

            let signal = shutdown.clone();
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                    signal.cancel();
                })
                .await?;
        }
        Commands::Kb { action } => match action {
            KbAction::Create {
                user,
                name,
                model,
                description,
            } => {
                let kb = app
                    .knowledge
                    .create_knowledge_base(&user, &name, &description, &model)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&kb)?);
            }
            KbAction::List { user } => {
                let page = app.knowledge.list_knowledge_bases(&user, 1, 100).await?;
                if page.items.is_empty() {
                    println!("No knowledge bases.");
                } else {
                    for kb in &page.items {
                        println!("  {}  {} ({})", kb.id, kb.name, kb.collection_name);
                    }
                    println!("\nTotal: {} knowledge base(s)", page.total);
                }
            }
        },
        Commands::Ingest { user, kb, file } => {
            if config.vector.driver == config::VectorDriverKind::Memory {
                warn!("The memory vector driver keeps nothing after this command exits");
            }
            let (document_id, chunks) = app.ingest_file(&user, &kb, &file).await?;
            println!("Ingested {} as document {document_id}: {chunks} chunk(s)", file.display());
        }
        Commands::Retrieve {
            user,
            kbs,
            top_k,
            query,
        } => {
            let chunks = app.retriever.retrieve(&kbs, &user, &query, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
    }

    shutdown.cancel();
    Ok(())
}
