use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub store: Store,
    pub oracle: Oracle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    /// etcd endpoints, e.g. ["localhost:2379"]
    pub endpoints: Vec<String>,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oracle {
    /// Base URL of the OpenFGA-compatible relation store
    pub url: String,
    pub connect_timeout_secs: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            connect_timeout_secs: 5,
        }
    }
}

impl Default for Oracle {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl Store {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Oracle {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default("store.endpoints", Store::default().endpoints)
            .into_diagnostic()?
            .set_default(
                "store.connect_timeout_secs",
                Store::default().connect_timeout_secs,
            )
            .into_diagnostic()?
            .set_default("oracle.url", Oracle::default().url)
            .into_diagnostic()?
            .set_default(
                "oracle.connect_timeout_secs",
                Oracle::default().connect_timeout_secs,
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: LODESTAR__SERVER__PORT=9090, etc.
        builder = builder.add_source(config::Environment::with_prefix("LODESTAR").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        cfg.try_deserialize().into_diagnostic()
    }
}
