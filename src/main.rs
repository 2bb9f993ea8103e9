use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use trevor::banner::{BannerInfo, print_banner};
use trevor::config::ServerConfig;
use trevor::consts::{
    DEFAULT_ENDPOINT, DEFAULT_HOST, DEFAULT_INPUT_FIELD, DEFAULT_LOG_FILTER, DEFAULT_PORT,
    default_db_path,
};
use trevor::engine::Engine;
use trevor::middleware::Middleware;
use trevor::middleware::trace::TraceMiddleware;
use trevor::plugin::Plugin;
use trevor::plugin::echo::EchoPlugin;
use trevor::plugin::phrases::PhrasePlugin;
use trevor::plugin::visits::VisitsPlugin;
use trevor::server;
use trevor::service::Service;
use trevor::service::memory::{DEFAULT_TOKEN_HEADER, TokenMemory};
use trevor::service::sqlite::SqliteStore;
use trevor::service::store::InMemoryStore;

#[derive(Parser)]
#[command(
    name = "trevor",
    version,
    about = "Scores text against plugins and answers with the best one."
)]
struct Cli {
    /// Host to bind
    #[arg(long, env = "TREVOR_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind
    #[arg(short, long, env = "TREVOR_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path segment of the processing endpoint
    #[arg(short, long, env = "TREVOR_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// JSON key holding the input text
    #[arg(short, long, env = "TREVOR_INPUT_FIELD", default_value = DEFAULT_INPUT_FIELD)]
    input_field: String,

    /// Comma-separated CORS origins (`*` for any)
    #[arg(long, env = "TREVOR_CORS_ORIGIN")]
    cors_origin: Option<String>,

    /// SQLite database for session data (use :memory: for ephemeral)
    #[arg(short, long, env = "TREVOR_DB")]
    db: Option<String>,

    /// Keep session data in ~/.trevor/trevor.db unless --db is given
    #[arg(long, default_value_t = false)]
    persist: bool,

    /// Header carrying the session token
    #[arg(long, env = "TREVOR_TOKEN_HEADER", default_value = DEFAULT_TOKEN_HEADER)]
    token_header: String,

    /// Seconds a session may stay idle before it is forgotten
    #[arg(long, env = "TREVOR_SESSION_TTL", default_value_t = 86_400)]
    session_ttl: u64,

    /// JSON file of `{"phrase": "reply"}` pairs (replaces the built-in greetings)
    #[arg(long)]
    phrases: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, env = "TREVOR_LOG_JSON", default_value_t = false)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_store(cli: &Cli) -> anyhow::Result<(Arc<dyn Service>, String)> {
    let path = match (&cli.db, cli.persist) {
        (Some(db), _) => Some(db.clone()),
        (None, true) => {
            let path = default_db_path().context("cannot determine home directory")?;
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
            Some(path.to_string_lossy().into_owned())
        }
        (None, false) => None,
    };

    let store: Arc<dyn Service> = match &path {
        Some(path) if path != ":memory:" => Arc::new(SqliteStore::open(path)?),
        Some(_) => Arc::new(SqliteStore::in_memory()?),
        None => Arc::new(InMemoryStore::new()),
    };
    let label = match path {
        Some(path) if path != ":memory:" => path,
        Some(_) => "sqlite (ephemeral)".to_string(),
        None => "in-process".to_string(),
    };
    Ok((store, label))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let (store, store_label) = open_store(&cli)?;
    let ttl = Duration::from_secs(cli.session_ttl);
    let memory = TokenMemory::new()
        .with_header(cli.token_header.clone())
        .with_ttl(ttl, (ttl / 10).max(Duration::from_secs(1)));

    let phrases = match &cli.phrases {
        Some(path) => PhrasePlugin::from_json_file("phrases", 2, path)?,
        None => PhrasePlugin::greetings(),
    };

    let plugins: Vec<Box<dyn Plugin>> = vec![
        Box::new(phrases),
        Box::new(VisitsPlugin::new().with_triggers(["visit", "visits"])),
        Box::new(EchoPlugin),
    ];
    let middleware: Vec<Arc<dyn Middleware>> = vec![Arc::new(TraceMiddleware)];

    let services: Vec<Arc<dyn Service>> = vec![store, Arc::new(memory)];

    let mut engine = Engine::new();
    engine.set_services(services)?;
    engine.set_plugins(plugins)?;
    engine.set_middleware(middleware);

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        endpoint: cli.endpoint,
        input_field: cli.input_field,
        cors_origin: cli.cors_origin,
    };

    let plugin_names: Vec<String> = engine
        .plugins()
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    let memory_label = format!("{} via {}", cli.token_header, store_label);
    print_banner(&BannerInfo {
        addr: &config.addr(),
        endpoint: &config.endpoint_path(),
        input_field: config.input_field(),
        plugins: &plugin_names,
        services: &engine.service_names(),
        memory: &memory_label,
    });

    server::serve(Arc::new(engine), &config).await
}
