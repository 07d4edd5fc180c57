use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use xenote_bridge::transport::inbound_channel;
use xenote_bridge::{
    BridgeOptions, EVENT_LOAD, EVENT_LOAD_ERROR, MessageBridge, StorageSerializer,
};
use xenote_core::config::Config;
use xenote_core::document::StagedDocument;
use xenote_core::protocol::ANY_ORIGIN;

mod stdio;

#[derive(Parser)]
#[command(
    name = "xenote",
    about = "Embedded editor bridge — exchange document state with a parent frame over stdin/stdout",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a bridge whose parent frame speaks JSON lines on stdin/stdout
    Serve {
        /// Referrer URL of the embedding document (overrides config)
        #[arg(long)]
        referrer: Option<String>,

        /// Stage this document (JSON: elements, appState, files) at startup
        #[arg(long)]
        document: Option<PathBuf>,

        /// Skip the initial load request
        #[arg(long)]
        no_load: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the default config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    // Initialize logging. Stdout carries the protocol, so logs go to stderr.
    let level = if cli.verbose { "debug" } else { config.log_level() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Serve {
            referrer,
            document,
            no_load,
        } => serve(config, referrer, document, no_load).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", config_path.display());
                Ok(())
            }
        },
    }
}

async fn serve(
    config: Config,
    referrer: Option<String>,
    document: Option<PathBuf>,
    no_load: bool,
) -> anyhow::Result<()> {
    let mut options = BridgeOptions::from_config(&config);
    options.referrer = resolve_referrer(referrer, &options.referrer);
    info!(referrer = %options.referrer, debounce_ms = options.stage_debounce.as_millis() as u64, "Starting bridge");

    let bridge = Arc::new(MessageBridge::new(
        Arc::new(stdio::StdioTransport::new()),
        Arc::new(StorageSerializer::from_config(&config)),
        options,
    ));

    let weak = Arc::downgrade(&bridge);
    bridge.on_fn(EVENT_LOAD, move |_| {
        if let Some(bridge) = weak.upgrade() {
            let state = bridge.get_local_data_state();
            info!(
                elements = state.elements.len(),
                has_app_state = state.app_state.is_some(),
                "Document loaded"
            );
        }
    });
    bridge.on_fn(EVENT_LOAD_ERROR, |_| warn!("Parent frame could not load the document"));

    let (inbound_tx, inbound_rx) = inbound_channel();
    bridge.listen(inbound_rx);

    if let Some(path) = document {
        let raw = std::fs::read_to_string(&path)?;
        let doc: StagedDocument = serde_json::from_str(&raw)?;
        info!(path = %path.display(), elements = doc.elements.len(), "Staging document");
        bridge.stage_for_save(doc.elements, doc.app_state, doc.files);
    }

    if !no_load {
        bridge.load();
    }

    tokio::select! {
        result = stdio::pump_stdin(inbound_tx) => {
            if let Err(e) = result {
                warn!(error = %e, "Stdin read failed");
            }
            bridge.join_listener().await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    bridge.dispose();
    info!("Bridge stopped");
    Ok(())
}

/// Referrer for the stdio parent: `--referrer`, then the config file.
///
/// Stdout only reaches the process on the other end of the pipe, so with no
/// referrer at all messages target any origin.
fn resolve_referrer(flag: Option<String>, configured: &str) -> String {
    match flag.filter(|r| !r.is_empty()) {
        Some(referrer) => referrer,
        None if !configured.is_empty() => configured.to_string(),
        None => {
            debug!("No referrer configured, targeting any origin");
            ANY_ORIGIN.to_string()
        }
    }
}
