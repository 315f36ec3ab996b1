//! renkei server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens an
//! in-process SQLite store, connects the messaging-platform client, and
//! serves the linkage and notification API over HTTP.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth.password_hash` in config.toml:
//!
//! ```
//! cargo run -p renkei-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use renkei_gateway::{GatewayConfig, PlatformClient};
use renkei_server::{AppState, ServerConfig};
use renkei_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Renkei linkage and notification server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print an argon2 PHC hash for a password read from stdin, then exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // --hash-password: print a PHC string for `auth.password_hash` and exit.
  // The prompt goes to stderr so the hash on stdout can be piped.
  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  // Load configuration. Environment variables override the file, with `__`
  // separating nesting levels (`RENKEI_AUTH__USERNAME`).
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("RENKEI").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  server_cfg
    .validate()
    .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

  // Open the SQLite store, expanding `~` in the configured path.
  let store_path = expand_tilde(&server_cfg.store.path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  // Connect the messaging-platform client.
  let gateway = PlatformClient::new(GatewayConfig {
    base_url:      server_cfg.gateway.base_url.clone(),
    channel_token: server_cfg.gateway.channel_token.clone(),
    timeout:       Duration::from_secs(server_cfg.gateway.timeout_secs),
  })
  .map_err(|e| anyhow::anyhow!("failed to build gateway client: {e}"))?;

  let address =
    format!("{}:{}", server_cfg.server.host, server_cfg.server.port);
  let state = AppState::new(Arc::new(store), Arc::new(gateway), server_cfg);
  let app = renkei_server::router(state);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read one line from stdin, prompting on stderr.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  eprint!("Password: ");
  io::stderr().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Expand `~` or a leading `~/` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  let Ok(home) = std::env::var("HOME") else {
    return path.to_path_buf();
  };
  if s == "~" {
    return PathBuf::from(home);
  }
  if let Some(rest) = s.strip_prefix("~/") {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
