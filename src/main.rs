use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rttp_cache::config::{ConfigError, DEFAULT_HOST, DEFAULT_PORT, ProxyConfig};
use rttp_cache::proxy::{CachingProxy, admin};
use rttp_cache::server::Server;

/// Read-through caching reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "rttp-cache", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Base URL of the origin server, e.g. http://localhost:3000
    #[arg(long)]
    origin: Option<String>,

    /// Interface to bind.
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Serve cache stats (GET) and clearing (DELETE) at this path.
    #[arg(long)]
    admin_path: Option<String>,

    /// Allow cross-origin requests from any origin, with any method and headers.
    #[arg(long)]
    cors: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Clear the cache of a running proxy.
    ClearCache {
        /// Port the proxy is listening on.
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Host the proxy is listening on.
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Admin path the proxy was started with.
        #[arg(long, default_value = "/__cache")]
        admin_path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::ClearCache {
            port,
            host,
            admin_path,
        }) => {
            let addr = format!("{host}:{port}");
            let cleared = admin::clear_remote(&addr, &admin_path)
                .await
                .with_context(|| format!("clearing the cache of the proxy at {addr}"))?;
            println!("Cleared {cleared} cached responses.");
            Ok(())
        }
        None => {
            let origin = cli.origin.ok_or(ConfigError::MissingOrigin)?;
            let config = ProxyConfig::new(cli.port, &origin, cli.admin_path)?
                .with_host(cli.host)
                .with_cors(cli.cors);
            serve(config).await
        }
    }
}

async fn serve(config: ProxyConfig) -> anyhow::Result<()> {
    let proxy = Arc::new(CachingProxy::from_config(&config)?);
    let server = Server::bind(config.listen_addr()).await?;

    info!(
        address = %server.local_addr(),
        origin = config.origin.as_str(),
        admin_path = config.admin_path.as_deref().unwrap_or("-"),
        cors = config.cors,
        "caching proxy started"
    );

    server
        .run_until_shutdown(
            move |req| {
                let proxy = Arc::clone(&proxy);
                async move { proxy.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "could not listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;

    info!("proxy stopped");
    Ok(())
}
