use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use groovy_docs::api::{self, AppState};
use groovy_docs::config::Config;
use groovy_docs_core::auth::{Claims, Hs256Verifier};
use groovy_docs_core::Store;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "groovy-docs")]
#[command(about = "Document workspace server with folder sharing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Listen address, overrides GROOVY_ADDR
        #[arg(short, long)]
        addr: Option<String>,

        /// Data directory, overrides GROOVY_DATA_DIR
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Mint a development token signed with GROOVY_JWT_SECRET
    Token {
        /// User id (`sub` claim)
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        org: Option<String>,

        /// `admin` or `member`
        #[arg(short, long)]
        role: Option<String>,

        /// Hours until the token expires
        #[arg(long, default_value_t = 24)]
        ttl_hours: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Serve { addr, data_dir } => {
            if let Some(addr) = addr {
                config.addr = addr;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            serve(config).await
        }
        Commands::Token {
            user,
            org,
            role,
            ttl_hours,
        } => {
            let secret = config
                .jwt_secret
                .context("GROOVY_JWT_SECRET must be set to mint tokens")?;
            if ttl_hours <= 0 {
                anyhow::bail!("--ttl-hours must be positive");
            }
            let exp = (Utc::now() + Duration::hours(ttl_hours)).timestamp();
            let token = Hs256Verifier::new(secret).sign(&Claims {
                sub: user,
                org_id: org,
                org_role: role,
                exp: Some(exp as u64),
            })?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let mut store = Store::new(&config.data_dir)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    store.set_member_role(config.member_role);

    let state = AppState::new(store, config.verifier(), config.dev_headers);
    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.addr).await?;
    info!(
        addr = %config.addr,
        data_dir = %config.data_dir.display(),
        dev_headers = config.dev_headers,
        member_role = %config.member_role,
        "groovy-docs listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
