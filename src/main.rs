use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tunnel_dns::{
    DnsServer, ReplyAssembler, ZoneResolver,
    config::{ConfigLayer, DnsConfig, resolve_bind_addr},
    ns_check,
    store::RedisStore,
};

#[derive(Parser, Debug)]
#[command(name = "tunnel-dns")]
#[command(version)]
#[command(about = "Authoritative DNS server answering from Redis")]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Bind address for UDP and TCP, e.g. 0.0.0.0:53, localhost:53 or :53
    #[arg(short = 'b', long)]
    bind: Option<String>,

    /// Zone this server is authoritative for
    #[arg(short = 'd', long)]
    domain: Option<String>,

    /// This nameserver's own hostname
    #[arg(long)]
    hostname: Option<String>,

    /// Zone contact address for the SOA record
    #[arg(long)]
    email: Option<String>,

    /// Redis connection string
    #[arg(long)]
    redis: Option<String>,

    /// Log level (trace, debug, info, warn, error, crit)
    #[arg(long)]
    log_level: Option<String>,

    /// Skip the startup NS record check
    #[arg(long)]
    no_ns_check: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigLayer {
        ConfigLayer {
            log_level: self.log_level.clone(),
            bind: self.bind.clone(),
            domain: self.domain.clone(),
            hostname: self.hostname.clone(),
            email: self.email.clone(),
            redis: self.redis.clone(),
            ns_check: self.no_ns_check.then_some(false),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| DnsConfig::path_from_env().map(PathBuf::from));
    let config = DnsConfig::load(config_path.as_deref(), cli.overrides())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting tunnel-dns v{}", env!("CARGO_PKG_VERSION"));
    info!(
        domain = %config.zone.domain,
        hostname = %config.zone.hostname,
        bind = %config.bind,
        "Loaded configuration"
    );

    let zone = Arc::new(config.zone.clone());

    if config.ns_check_enabled {
        let zone = zone.clone();
        let resolver = config.ns_check_resolver;
        let wait = config.ns_check_timeout;
        tokio::spawn(async move {
            ns_check::check_delegation(&zone, resolver, wait).await;
        });
    }

    let store = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => store,
        Err(e) => {
            error!("Unable to connect to the Redis server: {}", e);
            return Err(e.into());
        }
    };

    let assembler = Arc::new(ReplyAssembler::new(ZoneResolver::new(zone, Arc::new(store))));

    let bind_addr = resolve_bind_addr(&config.bind).await?;
    let server = match DnsServer::bind(bind_addr, assembler).await {
        Ok(server) => server.with_tcp_idle_timeout(config.tcp_idle_timeout),
        Err(e) => {
            error!("Failed to bind DNS listeners on {}: {}", bind_addr, e);
            return Err(e.into());
        }
    };

    let shutdown_tx = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown_tx.send(());
        }
    });

    if let Err(e) = server.run().await {
        error!("DNS server stopped with an error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
