//! # Connection Descriptor
//!
//! Purpose: Describe where and how to connect, either as a compact option
//! string or as a TOML file, and translate it into link settings.
//!
//! ## Usage Notes
//!
//! - String form: `host:port[,host:port...][,name=..][,connectTimeout=secs]`
//!   `[,password=..][,ioTimeout=secs][,maxIdle=n][,maxTotal=n][,configChannel=..]`.
//! - `password=` with an empty value means no credential.
//! - `Display` writes the string form with the credential masked.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tkv_client::{ConnectionSettings, LinkConfig};

use crate::error::{StoreError, StoreResult};

/// Default endpoint used when no descriptor was ever applied.
pub const DEFAULT_ENDPOINT: &str = "localhost:6379";

/// Default logical client name.
pub const DEFAULT_CLIENT_NAME: &str = "tkv";

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Where and how to connect to the store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionDescriptor {
    /// Candidate endpoints, tried in order.
    pub endpoints: Vec<String>,
    /// Logical client name announced to the server.
    pub name: Option<String>,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Credential for AUTH.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Read/write timeout in seconds for established connections.
    pub io_timeout_secs: Option<u64>,
    /// Maximum idle pooled connections.
    pub max_idle: usize,
    /// Maximum total pooled connections.
    pub max_total: usize,
    /// Channel carrying configuration broadcasts.
    pub config_channel: Option<String>,
}

impl Default for ConnectionDescriptor {
    fn default() -> Self {
        ConnectionDescriptor {
            endpoints: vec![DEFAULT_ENDPOINT.to_string()],
            name: Some(DEFAULT_CLIENT_NAME.to_string()),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            password: None,
            io_timeout_secs: None,
            max_idle: 8,
            max_total: 16,
            config_channel: None,
        }
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("endpoints", &self.endpoints)
            .field("name", &self.name)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "*****"))
            .field("io_timeout_secs", &self.io_timeout_secs)
            .field("max_idle", &self.max_idle)
            .field("max_total", &self.max_total)
            .field("config_channel", &self.config_channel)
            .finish()
    }
}

impl ConnectionDescriptor {
    /// Descriptor for a single endpoint with default settings.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        ConnectionDescriptor {
            endpoints: vec![endpoint.into()],
            ..Self::default()
        }
    }

    /// Loads a descriptor from a TOML file.
    ///
    /// ```no_run
    /// use tkv::ConnectionDescriptor;
    ///
    /// # fn main() -> Result<(), tkv::StoreError> {
    /// let descriptor = ConnectionDescriptor::from_file("store.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| StoreError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&contents)
    }

    /// Parses a descriptor from TOML text.
    pub fn from_toml_str(contents: &str) -> StoreResult<Self> {
        let descriptor: ConnectionDescriptor =
            toml::from_str(contents).map_err(|err| StoreError::Config(err.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Serializes the descriptor as TOML.
    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|err| StoreError::Config(err.to_string()))
    }

    /// Checks invariants the link relies on.
    pub fn validate(&self) -> StoreResult<()> {
        if self.endpoints.is_empty() {
            return Err(StoreError::Config("at least one endpoint is required".to_string()));
        }
        if let Some(endpoint) = self.endpoints.iter().find(|e| !looks_like_endpoint(e)) {
            return Err(StoreError::Config(format!("invalid endpoint '{}'", endpoint)));
        }
        if self.max_total == 0 {
            return Err(StoreError::Config("maxTotal must be > 0".to_string()));
        }
        if self.max_idle > self.max_total {
            return Err(StoreError::Config("maxIdle must not exceed maxTotal".to_string()));
        }
        Ok(())
    }

    /// Translates the descriptor into store link settings.
    pub fn link_config(&self) -> LinkConfig {
        let io_timeout = self.io_timeout_secs.map(Duration::from_secs);
        LinkConfig {
            endpoints: self.endpoints.clone(),
            settings: ConnectionSettings {
                client_name: self.name.clone(),
                password: self.password.clone(),
                connect_timeout: Some(Duration::from_secs(self.connect_timeout_secs)),
                read_timeout: io_timeout,
                write_timeout: io_timeout,
            },
            max_idle: self.max_idle,
            max_total: self.max_total,
            config_channel: self.config_channel.clone(),
        }
    }
}

fn looks_like_endpoint(endpoint: &str) -> bool {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = StoreError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut descriptor = ConnectionDescriptor {
            endpoints: Vec::new(),
            name: None,
            ..ConnectionDescriptor::default()
        };

        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let Some((option, value)) = token.split_once('=') else {
                descriptor.endpoints.push(token.to_string());
                continue;
            };
            let value = value.trim();
            match option.trim() {
                "name" => descriptor.name = non_empty(value),
                "password" => descriptor.password = non_empty(value),
                "connectTimeout" => descriptor.connect_timeout_secs = parse_number(option, value)?,
                "ioTimeout" => descriptor.io_timeout_secs = Some(parse_number(option, value)?),
                "maxIdle" => descriptor.max_idle = parse_number(option, value)?,
                "maxTotal" => descriptor.max_total = parse_number(option, value)?,
                "configChannel" => descriptor.config_channel = non_empty(value),
                other => return Err(StoreError::Config(format!("unknown option '{}'", other))),
            }
        }

        descriptor.validate()?;
        Ok(descriptor)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoints.join(","))?;
        if let Some(name) = &self.name {
            write!(f, ",name={}", name)?;
        }
        write!(f, ",connectTimeout={}", self.connect_timeout_secs)?;
        if self.password.is_some() {
            f.write_str(",password=*****")?;
        }
        if let Some(secs) = self.io_timeout_secs {
            write!(f, ",ioTimeout={}", secs)?;
        }
        write!(f, ",maxIdle={},maxTotal={}", self.max_idle, self.max_total)?;
        if let Some(channel) = &self.config_channel {
            write!(f, ",configChannel={}", channel)?;
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number<T: FromStr>(option: &str, value: &str) -> StoreResult<T> {
    value
        .parse()
        .map_err(|_| {
            StoreError::Config(format!(
                "option '{}' expects a number, got '{}'",
                option, value
            ))
        })
}
