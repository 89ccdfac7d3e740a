//! tls-reloader
//!
//! Serves, probes and checks hot-reloadable TLS material.
//!
//! # Architecture Overview
//!
//! ```text
//!   files on disk ──notify──▶ CertWatcher ──debounce──▶ Reloader::reload
//!                                                          │
//!                                            ArcSwap<CredentialBundle>
//!                                                          │
//!          ┌───────────────────────────────────────────────┴──────────────┐
//!          ▼                                                              ▼
//!   ServerTlsAcceptor (per handshake)                    ClientTlsConnector (per dial)
//!          │                                                              │
//!   net::Listener → http::HttpServer  (serve)            probe::probe  (probe)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rustls::pki_types::ServerName;

use tls_reloader::config::validation::validate_config;
use tls_reloader::config::{load_config, AppConfig, ConfigError};
use tls_reloader::http::HttpServer;
use tls_reloader::lifecycle::{signals, Shutdown};
use tls_reloader::net::Listener;
use tls_reloader::observability::init_logging;
use tls_reloader::probe::{inspecting_customizer, probe};
use tls_reloader::tls::{build_client_transport_config, Reloader, TlsContext};

#[derive(Parser)]
#[command(name = "tls-reloader", version)]
#[command(about = "HTTPS server and client with hot-reloaded TLS material", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "TLS_RELOADER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TLS_RELOADER_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    /// Log format (pretty or json).
    #[arg(long, env = "TLS_RELOADER_LOG_FORMAT", global = true)]
    log_format: Option<String>,

    #[command(flatten)]
    tls: TlsArgs,

    #[command(subcommand)]
    command: Command,
}

/// TLS flags; each overrides the `[tls]` section of the config file.
#[derive(Args)]
struct TlsArgs {
    /// Disable TLS entirely.
    #[arg(long, env = "TLS_RELOADER_INSECURE", global = true)]
    insecure: bool,

    /// Certificate chain (PEM).
    #[arg(long, env = "TLS_RELOADER_TLS_CERT", global = true)]
    tls_cert: Option<PathBuf>,

    /// Private key (PEM).
    #[arg(long, env = "TLS_RELOADER_TLS_KEY", global = true)]
    tls_key: Option<PathBuf>,

    /// CA bundle for verifying servers. Repeatable.
    #[arg(long, env = "TLS_RELOADER_TLS_CA", value_delimiter = ',', global = true)]
    tls_ca: Vec<PathBuf>,

    /// CA bundle for verifying clients. Repeatable.
    #[arg(long, env = "TLS_RELOADER_TLS_CLIENT_CA", value_delimiter = ',', global = true)]
    tls_client_ca: Vec<PathBuf>,

    /// Minimum protocol version (tls12 or tls13).
    #[arg(long, env = "TLS_RELOADER_TLS_MIN_VERSION", global = true)]
    tls_min_version: Option<String>,

    /// Client authentication mode.
    #[arg(long, env = "TLS_RELOADER_TLS_CLIENT_AUTH", global = true)]
    tls_client_auth: Option<String>,

    /// Accept any server certificate.
    #[arg(long, env = "TLS_RELOADER_TLS_SKIP_VERIFY", global = true)]
    tls_skip_verify: bool,

    /// Do not watch the material for changes.
    #[arg(long, env = "TLS_RELOADER_NO_WATCH", global = true)]
    no_watch: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTPS demo server
    Serve {
        /// Address to bind, overriding the config file.
        #[arg(long, env = "TLS_RELOADER_BIND")]
        bind: Option<String>,
    },
    /// Dial a server and report the certificate it presents
    Probe {
        /// Address to connect to.
        #[arg(long, default_value = "127.0.0.1:8443")]
        connect: String,

        /// Name to verify the server certificate against.
        #[arg(long, default_value = "localhost")]
        server_name: String,

        /// Number of connections to make.
        #[arg(long, default_value_t = 1)]
        attempts: u32,

        /// Delay between connections.
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Build the TLS material once and print a summary
    Check,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => AppConfig::default(),
        };

        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.observability.log_format = format.clone();
        }
        if let Command::Serve { bind: Some(bind) } = &self.command {
            config.listener.bind_address = bind.clone();
        }
        self.tls.apply(&mut config);

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

impl TlsArgs {
    fn apply(&self, config: &mut AppConfig) {
        let tls = &mut config.tls;
        if self.insecure {
            tls.insecure = true;
        }
        if let Some(cert) = &self.tls_cert {
            tls.cert_path = Some(cert.clone());
        }
        if let Some(key) = &self.tls_key {
            tls.key_path = Some(key.clone());
        }
        if !self.tls_ca.is_empty() {
            tls.server_ca_paths = self.tls_ca.clone();
        }
        if !self.tls_client_ca.is_empty() {
            tls.client_ca_paths = self.tls_client_ca.clone();
        }
        if let Some(version) = &self.tls_min_version {
            tls.min_version = version.clone();
        }
        if let Some(mode) = &self.tls_client_auth {
            tls.client_auth = mode.clone();
        }
        if self.tls_skip_verify {
            tls.skip_verify = true;
        }
        if self.no_watch {
            tls.watch = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tls-reloader starting");

    match cli.command {
        Command::Serve { .. } => serve(config).await,
        Command::Probe {
            connect,
            server_name,
            attempts,
            interval_ms,
        } => {
            run_probe(
                config,
                &connect,
                &server_name,
                attempts,
                Duration::from_millis(interval_ms),
            )
            .await
        }
        Command::Check => check(config),
    }
}

async fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    let tls = TlsContext::start(config.tls.clone(), &shutdown)?;

    let listener = Listener::bind(&config.listener).await?;
    let acceptor = tls.as_ref().map(TlsContext::server_acceptor);

    if let Some(tls) = &tls {
        tokio::spawn(signals::reload_on_hangup(
            Arc::clone(tls.reloader()),
            shutdown.clone(),
        ));
    }
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(
        listener,
        acceptor,
        Duration::from_secs(config.listener.drain_timeout_secs),
    );
    server.run(shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_probe(
    config: AppConfig,
    connect: &str,
    server_name: &str,
    attempts: u32,
    interval: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    let connector =
        build_client_transport_config(config.tls, &shutdown, Some(inspecting_customizer()))?
            .ok_or("probe needs TLS; remove --insecure")?;
    let server_name = ServerName::try_from(server_name.to_string())?;

    let results = probe(&connector, connect, server_name, attempts, interval).await;
    for result in &results {
        println!("{}", serde_json::to_string(result)?);
    }
    shutdown.trigger();

    let failures = results.iter().filter(|r| !r.ok).count();
    if failures > 0 {
        return Err(format!("{failures} of {attempts} probe attempts failed").into());
    }
    Ok(())
}

fn check(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.tls.insecure {
        println!("{}", serde_json::json!({ "insecure": true }));
        return Ok(());
    }

    let reloader = Reloader::new(config.tls)?;
    println!("{}", serde_json::to_string_pretty(&reloader.summary())?);
    Ok(())
}
