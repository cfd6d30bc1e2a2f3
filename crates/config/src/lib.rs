//! Configuration management for Mistral
//!
//! Loads and validates the gateway configuration from environment
//! variables. A `.env` file is honored when present. Every option has a
//! documented default except the broker topic and the coordinator
//! connection string, which must be set explicitly.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Listener protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenScheme {
    Http,
    Https,
}

impl ListenScheme {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "http" => Ok(ListenScheme::Http),
            "https" => Ok(ListenScheme::Https),
            other => bail!("unknown listen scheme: {other}"),
        }
    }
}

/// Authentication mode for the ingest endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    None,
    StaticBasicAuth,
}

impl AuthMode {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "none" => Ok(AuthMode::None),
            "static_basic_auth" => Ok(AuthMode::StaticBasicAuth),
            other => bail!("unknown auth mode: {other}"),
        }
    }
}

/// Broker acknowledgment strategy
///
/// Maps onto the producer's `request.required.acks` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStrategy {
    NoResponse,
    WaitForLocal,
    WaitForAll,
}

impl AckStrategy {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "NoResponse" => Ok(AckStrategy::NoResponse),
            "" | "WaitForLocal" => Ok(AckStrategy::WaitForLocal),
            "WaitForAll" => Ok(AckStrategy::WaitForAll),
            other => bail!("unknown acknowledgment strategy: {other}"),
        }
    }

    /// librdkafka value for `request.required.acks`
    pub fn broker_value(&self) -> &'static str {
        match self {
            AckStrategy::NoResponse => "0",
            AckStrategy::WaitForLocal => "1",
            AckStrategy::WaitForAll => "all",
        }
    }
}

/// TLS protocol version bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
}

impl TlsVersion {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "TLS1.0" => Ok(TlsVersion::Tls10),
            "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLS1.2" => Ok(TlsVersion::Tls12),
            other => bail!("unknown TLS version: {other}"),
        }
    }
}

/// Cipher suite policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherPolicy {
    #[default]
    Default,
    Strict,
}

impl CipherPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "default" => Ok(CipherPolicy::Default),
            "strict" => Ok(CipherPolicy::Strict),
            other => bail!("unknown cipher policy: {other}"),
        }
    }
}

/// One server certificate chain plus its private key
#[derive(Debug, Clone)]
pub struct CertificateChain {
    pub chain_file: PathBuf,
    pub key_file: PathBuf,
}

impl CertificateChain {
    /// Parse a `chain.pem:key.pem` pair
    fn parse(spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((chain, key)) if !chain.is_empty() && !key.is_empty() => {
                Ok(CertificateChain {
                    chain_file: PathBuf::from(chain),
                    key_file: PathBuf::from(key),
                })
            }
            _ => bail!("certificate chain must be specified as chain.pem:key.pem, got: {spec}"),
        }
    }
}

/// TLS listener options
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub min_version: Option<TlsVersion>,
    pub max_version: Option<TlsVersion>,
    pub ciphers: CipherPolicy,
    pub chains: Vec<CertificateChain>,
    pub roots: Vec<PathBuf>,
}

/// Logfile options; both unset means stdout
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub path: Option<PathBuf>,
    pub file: Option<String>,
    pub rotate: bool,
}

/// Main configuration for the Mistral gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listener protocol, address and port
    pub listen_scheme: ListenScheme,
    pub listen_address: String,
    pub listen_port: u16,

    /// Path the ingest endpoint is mounted on
    pub endpoint_path: String,

    /// Endpoint authentication
    pub auth_mode: AuthMode,
    pub auth_user: String,
    pub auth_password: String,

    /// Per-worker input queue depth
    pub queue_depth: usize,

    /// Broker producer settings
    pub broker_topic: String,
    pub broker_keepalive: Duration,
    pub broker_acks: AckStrategy,
    pub broker_retries: u32,

    /// Coordination service connection string (broker discovery)
    pub coord_connect: String,

    /// TLS options, used when listen_scheme is https
    pub tls: TlsOptions,

    /// Logfile options
    pub log: LogOptions,

    /// Optional instance name; becomes the metric label
    pub instance_name: String,

    /// Worker count override; None means one worker per logical CPU
    pub worker_count: Option<usize>,
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let listen_scheme = ListenScheme::parse(&var_or_default("MISTRAL_LISTEN_SCHEME", ""))?;
        let listen_address = var_or_default("MISTRAL_LISTEN_ADDRESS", "0.0.0.0");
        let listen_port = var_or_default("MISTRAL_LISTEN_PORT", "8080")
            .parse::<u16>()
            .context("MISTRAL_LISTEN_PORT must be a valid port number")?;

        let endpoint_path = var_or_default("MISTRAL_ENDPOINT_PATH", "/api/v1/metrics");
        if !endpoint_path.starts_with('/') {
            bail!("MISTRAL_ENDPOINT_PATH must start with '/'");
        }

        let auth_mode = AuthMode::parse(&var_or_default("MISTRAL_AUTH_MODE", ""))?;
        let auth_user = var_or_default("MISTRAL_AUTH_USER", "");
        let auth_password = var_or_default("MISTRAL_AUTH_PASSWORD", "");
        if auth_mode == AuthMode::StaticBasicAuth && (auth_user.is_empty() || auth_password.is_empty())
        {
            bail!("static_basic_auth requires MISTRAL_AUTH_USER and MISTRAL_AUTH_PASSWORD");
        }

        let queue_depth = var_or_default("MISTRAL_QUEUE_DEPTH", "16")
            .parse::<usize>()
            .context("MISTRAL_QUEUE_DEPTH must be a valid number")?;
        if queue_depth == 0 {
            bail!("MISTRAL_QUEUE_DEPTH must be at least 1");
        }

        let broker_topic =
            env::var("MISTRAL_BROKER_TOPIC").context("MISTRAL_BROKER_TOPIC not set")?;

        // 0 selects the 3s default, matching the broker client's keepalive
        let keepalive_ms = var_or_default("MISTRAL_BROKER_KEEPALIVE_MS", "0")
            .parse::<u64>()
            .context("MISTRAL_BROKER_KEEPALIVE_MS must be a valid number")?;
        let broker_keepalive = match keepalive_ms {
            0 => Duration::from_secs(3),
            ms => Duration::from_millis(ms),
        };

        let broker_acks = AckStrategy::parse(&var_or_default("MISTRAL_BROKER_ACKS", ""))?;

        let broker_retries = match var_or_default("MISTRAL_BROKER_RETRIES", "0")
            .parse::<u32>()
            .context("MISTRAL_BROKER_RETRIES must be a valid number")?
        {
            0 => 3,
            n => n,
        };

        let coord_connect =
            env::var("MISTRAL_COORD_CONNECT").context("MISTRAL_COORD_CONNECT not set")?;

        let tls = Self::load_tls()?;
        if listen_scheme == ListenScheme::Https && tls.chains.is_empty() {
            bail!("https requires at least one certificate chain in MISTRAL_TLS_CHAINS");
        }

        let log = LogOptions {
            path: env::var("MISTRAL_LOG_PATH").ok().map(PathBuf::from),
            file: env::var("MISTRAL_LOG_FILE").ok(),
            rotate: var_or_default("MISTRAL_LOG_ROTATE", "false")
                .parse::<bool>()
                .context("MISTRAL_LOG_ROTATE must be true or false")?,
        };

        let instance_name = var_or_default("MISTRAL_INSTANCE_NAME", "");

        let worker_count = match env::var("MISTRAL_WORKER_COUNT") {
            Ok(v) => {
                let n = v
                    .parse::<usize>()
                    .context("MISTRAL_WORKER_COUNT must be a valid number")?;
                if n == 0 {
                    bail!("MISTRAL_WORKER_COUNT must be at least 1");
                }
                Some(n)
            }
            Err(_) => None,
        };

        Ok(GatewayConfig {
            listen_scheme,
            listen_address,
            listen_port,
            endpoint_path,
            auth_mode,
            auth_user,
            auth_password,
            queue_depth,
            broker_topic,
            broker_keepalive,
            broker_acks,
            broker_retries,
            coord_connect,
            tls,
            log,
            instance_name,
            worker_count,
        })
    }

    fn load_tls() -> Result<TlsOptions> {
        let min_version = match env::var("MISTRAL_TLS_MIN") {
            Ok(v) if !v.is_empty() => Some(TlsVersion::parse(&v)?),
            _ => None,
        };
        let max_version = match env::var("MISTRAL_TLS_MAX") {
            Ok(v) if !v.is_empty() => Some(TlsVersion::parse(&v)?),
            _ => None,
        };
        let ciphers = CipherPolicy::parse(&var_or_default("MISTRAL_TLS_CIPHERS", ""))?;

        let chains = split_list(&var_or_default("MISTRAL_TLS_CHAINS", ""))
            .iter()
            .map(|spec| CertificateChain::parse(spec))
            .collect::<Result<Vec<_>>>()?;

        let roots = split_list(&var_or_default("MISTRAL_TLS_ROOTS", ""))
            .into_iter()
            .map(PathBuf::from)
            .collect();

        Ok(TlsOptions {
            min_version,
            max_version,
            ciphers,
            chains,
            roots,
        })
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}

fn var_or_default(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
