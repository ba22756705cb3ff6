use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::ExecutionMode;
use crate::error::MonitorError;
use crate::monitoring::RunConfig;
use crate::resolver::ResolverSettings;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("cannot parse {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("no config directory could be determined")]
    ConfigPathUnavailable,
}

impl From<Error> for MonitorError {
    fn from(err: Error) -> Self {
        MonitorError::Configuration(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: Store,
    pub monitor: Monitor,
    pub resolver: Resolver,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    /// Local path, `:memory:`, or a `libsql://` / `http(s)://` URL.
    pub database: Option<String>,
    /// Token for remote databases.
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Monitor {
    pub frequency_seconds: u64,
    pub cycles: u64,
    pub top_domains: usize,
    pub mode: ExecutionMode,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            frequency_seconds: RunConfig::DEFAULT_FREQUENCY_SECS,
            cycles: 0,
            top_domains: 10,
            mode: ExecutionMode::Concurrent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resolver {
    pub timeout_seconds: u64,
    pub attempts: usize,
    /// `ip` or `ip:port`; empty uses the system configuration.
    pub nameservers: Vec<String>,
}

impl Default for Resolver {
    fn default() -> Self {
        Self { timeout_seconds: 5, attempts: 2, nameservers: Vec::new() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/dns-latency-monitor/config.toml
/// or $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("dns-latency-monitor/config.toml"))
}

fn parse_nameserver(raw: &str) -> Option<SocketAddr> {
    let raw = raw.trim();
    raw.parse::<SocketAddr>()
        .ok()
        .or_else(|| raw.parse::<IpAddr>().ok().map(|ip| SocketAddr::new(ip, 53)))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Configuration:")?;
        write_title_1(f, "Store")?;
        write_1(f, "Database", &self.store.database.as_deref().unwrap_or("<unset>"))?;
        write_1(f, "Auth Token", &if self.store.auth_token.is_some() { "<set>" } else { "<unset>" })?;
        write_title_1(f, "Monitor")?;
        write_1(f, "Frequency (s)", &self.monitor.frequency_seconds)?;
        write_1(f, "Cycles", &self.monitor.cycles)?;
        write_1(f, "Top Domains", &self.monitor.top_domains)?;
        write_1(f, "Mode", &format!("{:?}", self.monitor.mode).to_lowercase())?;
        write_title_1(f, "Resolver")?;
        write_1(f, "Timeout (s)", &self.resolver.timeout_seconds)?;
        write_1(f, "Attempts", &self.resolver.attempts)?;
        let nameservers = if self.resolver.nameservers.is_empty() {
            "<system>".to_string()
        } else {
            self.resolver.nameservers.join(", ")
        };
        write_1(f, "Nameservers", &nameservers)?;

        Ok(())
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// An explicit path must exist. Without one the default location is
    /// read if present, otherwise built-in defaults are used.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let (config_path, required) = match optional_path {
            Some(path) => (normalize_toml_path(path.as_ref()), true),
            None => match default_config_path() {
                Ok(path) => (path, false),
                Err(_) => return Ok(Self::default()),
            },
        };

        if !required && !config_path.exists() {
            return Ok(Self::default());
        }

        let raw_string = fs::read_to_string(&config_path)
            .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
        toml::from_str(&raw_string).map_err(|source| Error::ParseFailed { path: config_path, source })
    }

    /// Check every mandatory and range-limited setting.
    ///
    /// A frequency of zero passes: it is the no-op configuration.
    pub fn validate(&self) -> Result<(), MonitorError> {
        let invalid = |msg: &str| Err(MonitorError::Configuration(msg.to_string()));

        match self.store.database.as_deref().map(str::trim) {
            None | Some("") => return invalid("a database must be given (--database)"),
            Some(_) => {}
        }
        if self.monitor.top_domains == 0 {
            return invalid("top domain count must be at least 1");
        }
        if self.resolver.timeout_seconds == 0 {
            return invalid("resolver timeout must be at least 1 second");
        }
        if self.resolver.attempts == 0 {
            return invalid("resolver attempts must be at least 1");
        }
        self.resolver_settings().map(|_| ())
    }

    /// The mandatory store identifier.
    pub fn database(&self) -> Result<&str, MonitorError> {
        self.store
            .database
            .as_deref()
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .ok_or_else(|| MonitorError::Configuration("a database must be given (--database)".into()))
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig::new(self.monitor.frequency_seconds, self.monitor.cycles)
    }

    pub fn resolver_settings(&self) -> Result<ResolverSettings, MonitorError> {
        let nameservers = self
            .resolver
            .nameservers
            .iter()
            .map(|raw| {
                parse_nameserver(raw)
                    .ok_or_else(|| MonitorError::Configuration(format!("invalid nameserver address {raw:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolverSettings {
            timeout: Duration::from_secs(self.resolver.timeout_seconds),
            attempts: self.resolver.attempts,
            nameservers,
        })
    }
}
