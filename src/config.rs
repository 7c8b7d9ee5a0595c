use crate::dns::common::{encode_name, to_fqdn};
use crate::error::ConfigError;
use redis::IntoConnectionInfo;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variables are read with this prefix, e.g. `TUNNEL_DNS_DOMAIN`
pub const ENV_PREFIX: &str = "TUNNEL_DNS_";

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "crit"];

/// The zone this server is authoritative for.
///
/// `domain` and `hostname` are kept in trailing-dot form; query names are
/// compared against `domain` byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneConfig {
    pub domain: String,
    pub hostname: String,
    pub email: String,
}

impl ZoneConfig {
    pub fn new(
        domain: impl AsRef<str>,
        hostname: impl AsRef<str>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            domain: to_fqdn(domain.as_ref()),
            hostname: to_fqdn(hostname.as_ref()),
            email: email.into(),
        }
    }

    /// The contact address as an SOA RNAME: `hello@pgp.st` becomes
    /// `hello.pgp.st.`. Values without an `@` are taken as already in
    /// mailbox form.
    pub fn mailbox(&self) -> String {
        to_fqdn(&self.email.replacen('@', ".", 1))
    }
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// One of trace, debug, info, warn, error, crit
    pub log_level: String,

    /// `host:port` both the UDP and TCP listeners bind to. The host may be a
    /// name; it is resolved by `resolve_bind_addr` at startup.
    pub bind: String,

    pub zone: ZoneConfig,

    /// Connection string for the record store
    pub redis_url: String,

    /// Idle TCP connections are closed after this long
    pub tcp_idle_timeout: Duration,

    /// Whether to look up the zone's public NS records at startup
    pub ns_check_enabled: bool,

    /// Resolver used for the startup NS lookup
    pub ns_check_resolver: SocketAddr,

    pub ns_check_timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            log_level: "debug".to_string(),
            bind: "0.0.0.0:53".to_string(),
            zone: ZoneConfig::new("pgp.re.", "dns.pgp.st.", "hello@pgp.st"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            tcp_idle_timeout: Duration::from_secs(30),
            ns_check_enabled: true,
            ns_check_resolver: SocketAddr::from(([1, 1, 1, 1], 53)),
            ns_check_timeout: Duration::from_secs(5),
        }
    }
}

/// One source of configuration values. Files, the environment and the
/// command line each produce a layer; unset fields leave earlier values alone.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub log_level: Option<String>,
    pub bind: Option<String>,
    pub domain: Option<String>,
    pub hostname: Option<String>,
    pub email: Option<String>,
    pub redis: Option<String>,
    /// Seconds
    pub tcp_idle_timeout: Option<u64>,
    pub ns_check: Option<bool>,
    pub ns_check_resolver: Option<String>,
    /// Seconds
    pub ns_check_timeout: Option<u64>,
}

impl ConfigLayer {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reads `TUNNEL_DNS_*` variables through `lookup`, falling back to
    /// `REDIS_URL` for the store.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        let mut layer = ConfigLayer {
            log_level: var("LOG_LEVEL"),
            bind: var("BIND"),
            domain: var("DOMAIN"),
            hostname: var("HOSTNAME"),
            email: var("EMAIL"),
            redis: var("REDIS").or_else(|| lookup("REDIS_URL")),
            ns_check_resolver: var("NS_CHECK_RESOLVER"),
            ..Default::default()
        };

        if let Some(secs) = var("TCP_IDLE_TIMEOUT") {
            layer.tcp_idle_timeout = Some(parse_secs(&secs)?);
        }
        if let Some(secs) = var("NS_CHECK_TIMEOUT") {
            layer.ns_check_timeout = Some(parse_secs(&secs)?);
        }
        if let Some(flag) = var("NS_CHECK") {
            layer.ns_check = Some(parse_bool(&flag).ok_or(ConfigError::InvalidBool {
                key: "NS_CHECK",
                value: flag,
            })?);
        }

        Ok(layer)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }
}

impl DnsConfig {
    /// Defaults, then the optional TOML file, then the environment, then
    /// `overrides` (usually the command line). The result is validated.
    pub fn load(path: Option<&Path>, overrides: ConfigLayer) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.merge(ConfigLayer::from_file(path)?)?;
        }
        config.merge(ConfigLayer::from_env()?)?;
        config.merge(overrides)?;
        config.validate()?;
        Ok(config)
    }

    /// Config file path from `TUNNEL_DNS_CONFIG`, or the bare `config` variable.
    pub fn path_from_env() -> Option<String> {
        std::env::var(format!("{}CONFIG", ENV_PREFIX))
            .or_else(|_| std::env::var("config"))
            .ok()
            .filter(|p| !p.is_empty())
    }

    pub fn merge(&mut self, layer: ConfigLayer) -> Result<(), ConfigError> {
        if let Some(level) = layer.log_level {
            self.log_level = level.to_lowercase();
        }

        if let Some(bind) = layer.bind {
            self.bind = parse_bind_addr(&bind)?;
        }

        if layer.domain.is_some() || layer.hostname.is_some() || layer.email.is_some() {
            self.zone = ZoneConfig::new(
                layer.domain.unwrap_or_else(|| self.zone.domain.clone()),
                layer.hostname.unwrap_or_else(|| self.zone.hostname.clone()),
                layer.email.unwrap_or_else(|| self.zone.email.clone()),
            );
        }

        if let Some(url) = layer.redis {
            self.redis_url = url;
        }

        if let Some(secs) = layer.tcp_idle_timeout {
            self.tcp_idle_timeout = Duration::from_secs(secs);
        }

        if let Some(enabled) = layer.ns_check {
            self.ns_check_enabled = enabled;
        }

        if let Some(resolver) = layer.ns_check_resolver {
            self.ns_check_resolver = resolver
                .parse()
                .map_err(|_| ConfigError::InvalidResolver(resolver))?;
        }

        if let Some(secs) = layer.ns_check_timeout {
            self.ns_check_timeout = Duration::from_secs(secs);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        if self.zone.domain == "." || encode_name(&self.zone.domain).is_err() {
            return Err(ConfigError::InvalidDomain(self.zone.domain.clone()));
        }

        if self.zone.hostname == "." || encode_name(&self.zone.hostname).is_err() {
            return Err(ConfigError::InvalidHostname(self.zone.hostname.clone()));
        }

        if self.zone.email.is_empty() || encode_name(&self.zone.mailbox()).is_err() {
            return Err(ConfigError::InvalidEmail(self.zone.email.clone()));
        }

        self.redis_url
            .as_str()
            .into_connection_info()
            .map_err(|e| ConfigError::InvalidRedisUrl(e.to_string()))?;

        if self.tcp_idle_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "TCP idle timeout must be greater than 0".to_string(),
            ));
        }

        if self.ns_check_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "NS check timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// `tracing` filter directive for the configured level.
    pub fn log_directive(&self) -> &'static str {
        match self.log_level.as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            _ => "error",
        }
    }
}

/// Accepts `host:port`, `[v6]:port`, and `:port` meaning every IPv4
/// interface. Only the shape is checked here; the host is resolved later.
pub fn parse_bind_addr(bind: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidBindAddress(bind.to_string());

    let candidate = match bind.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => bind.trim().to_string(),
    };
    if candidate.parse::<SocketAddr>().is_ok() {
        return Ok(candidate);
    }

    let (host, port) = candidate.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(':') || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(candidate)
}

/// Resolves the bind address, taking the first address the host maps to.
pub async fn resolve_bind_addr(bind: &str) -> Result<SocketAddr, ConfigError> {
    let mut addrs = tokio::net::lookup_host(bind)
        .await
        .map_err(|e| ConfigError::InvalidBindAddress(format!("{}: {}", bind, e)))?;
    addrs
        .next()
        .ok_or_else(|| ConfigError::InvalidBindAddress(format!("{}: no addresses", bind)))
}

fn parse_secs(value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidTimeout(value.to_string()))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
