//! Broker discovery
//!
//! Workers consult the coordination service exactly once at startup to
//! enumerate broker endpoints. The service is modeled at its interface: a
//! single call returning endpoints or an error. The bundled implementation
//! resolves the endpoints straight from the coordinator connection string,
//! which carries them as a comma-separated list (an optional `static://`
//! prefix is accepted).

use anyhow::{Result, bail};

/// One call, one broker list.
pub trait BrokerDiscovery: Send + Sync {
    /// Enumerate broker endpoints as `host:port` strings.
    fn broker_list(&self) -> Result<Vec<String>>;
}

/// Connection-string-backed discovery.
pub struct StaticDiscovery {
    endpoints: Vec<String>,
}

impl StaticDiscovery {
    pub fn from_connect_string(connect: &str) -> Result<Self> {
        let raw = connect.strip_prefix("static://").unwrap_or(connect);
        let endpoints: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if endpoints.is_empty() {
            bail!("coordinator connection string contains no broker endpoints: {connect}");
        }
        for endpoint in &endpoints {
            if !endpoint.contains(':') {
                bail!("broker endpoint is missing a port: {endpoint}");
            }
        }
        Ok(StaticDiscovery { endpoints })
    }
}

impl BrokerDiscovery for StaticDiscovery {
    fn broker_list(&self) -> Result<Vec<String>> {
        Ok(self.endpoints.clone())
    }
}
