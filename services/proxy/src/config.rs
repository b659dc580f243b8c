//! Proxy configuration.
//!
//! Loaded from a TOML file. A missing file is created with default contents.
//! A few settings can be overridden from the environment, mostly so that
//! credentials do not have to live in the file.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::OperatorSettings;
use crate::route::RouteSettings;

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "idlegate.toml";

/// Where [`Config::load`] got its configuration from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// An existing file.
    File,
    /// The file was missing and has been created with default contents.
    CreatedDefault,
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub defaults: RouteDefaults,

    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

/// Crafty Controller connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Crafty ships a self-signed certificate.
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            api_url: "https://crafty:8443".to_string(),
            username: "admin".to_string(),
            password: "password".to_string(),
            accept_invalid_certs: true,
            request_timeout_secs: 30,
        }
    }
}

/// Timing and limits applied to every route unless the route overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteDefaults {
    pub idle_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub acquire_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub autoshutdown: bool,
    pub max_connections: usize,
}

impl Default for RouteDefaults {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            startup_timeout_secs: 120,
            acquire_timeout_secs: 180,
            poll_interval_ms: 1000,
            probe_timeout_ms: 1000,
            autoshutdown: true,
            max_connections: 10000,
        }
    }
}

/// One `[[routes]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Defaults to the listen endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub listen: String,
    pub backend: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Crafty server port; defaults to the backend endpoint's port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoshutdown: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl RouteEntry {
    pub fn new(listen: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: None,
            listen: listen.into(),
            backend: backend.into(),
            protocol: default_protocol(),
            server_port: None,
            idle_timeout_secs: None,
            startup_timeout_secs: None,
            acquire_timeout_secs: None,
            poll_interval_ms: None,
            probe_timeout_ms: None,
            autoshutdown: None,
            max_connections: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            control_plane: ControlPlaneConfig::default(),
            defaults: RouteDefaults::default(),
            routes: vec![RouteEntry::new("127.0.0.1:25565", "crafty:25565")],
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl Config {
    /// Load configuration from `path`, writing the defaults there if the file
    /// does not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        let (mut config, source) = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("could not read config file {}", path.display()))?;
            let config = Self::parse(&raw)
                .with_context(|| format!("could not parse config file {}", path.display()))?;
            (config, ConfigSource::File)
        } else {
            let config = Self::default();
            config.write_default(path)?;
            (config, ConfigSource::CreatedDefault)
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok((config, source))
    }

    /// Parse configuration from TOML text.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Write `self` to a new file at `path`. The file holds the control
    /// plane password, so on unix it is created owner-only (0600).
    fn write_default(&self, path: &Path) -> Result<()> {
        let rendered =
            toml::to_string_pretty(self).context("failed to render default config")?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(path)
            .with_context(|| format!("failed to create config file {}", path.display()))?;
        file.write_all(rendered.as_bytes())
            .with_context(|| format!("failed to write default config file {}", path.display()))?;
        Ok(())
    }

    /// Apply `IDLEGATE_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("IDLEGATE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = lookup("IDLEGATE_CRAFTY_URL") {
            self.control_plane.api_url = url;
        }
        if let Some(username) = lookup("IDLEGATE_CRAFTY_USERNAME") {
            self.control_plane.username = username;
        }
        if let Some(password) = lookup("IDLEGATE_CRAFTY_PASSWORD") {
            self.control_plane.password = password;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.control_plane.request_timeout_secs)
    }

    /// Validate every route and resolve it against `[defaults]`.
    pub fn resolve_routes(&self) -> Result<Vec<RouteSettings>> {
        if self.routes.is_empty() {
            bail!("no routes configured; add at least one [[routes]] entry");
        }
        if self.control_plane.request_timeout_secs == 0 {
            bail!("control_plane.request_timeout_secs must be greater than zero");
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(self.routes.len());

        for (index, entry) in self.routes.iter().enumerate() {
            let route = self
                .resolve_route(entry)
                .with_context(|| format!("invalid route #{} ({})", index + 1, entry.listen))?;

            if !seen.insert(route.listen) {
                bail!("duplicate listen endpoint {}", route.listen);
            }
            resolved.push(route);
        }

        Ok(resolved)
    }

    fn resolve_route(&self, entry: &RouteEntry) -> Result<RouteSettings> {
        if !entry.protocol.eq_ignore_ascii_case("tcp") {
            bail!(
                "unsupported protocol {:?}; only \"tcp\" is supported",
                entry.protocol
            );
        }

        let listen: SocketAddr = entry
            .listen
            .parse()
            .with_context(|| format!("listen {:?} is not a socket address", entry.listen))?;

        let backend_port = parse_backend_port(&entry.backend)?;
        let defaults = &self.defaults;

        let idle_timeout = secs(
            "idle_timeout_secs",
            entry.idle_timeout_secs.unwrap_or(defaults.idle_timeout_secs),
        )?;
        let startup_timeout = secs(
            "startup_timeout_secs",
            entry
                .startup_timeout_secs
                .unwrap_or(defaults.startup_timeout_secs),
        )?;
        let acquire_timeout = secs(
            "acquire_timeout_secs",
            entry
                .acquire_timeout_secs
                .unwrap_or(defaults.acquire_timeout_secs),
        )?;
        let poll_interval = millis(
            "poll_interval_ms",
            entry.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
        )?;
        let probe_timeout = millis(
            "probe_timeout_ms",
            entry.probe_timeout_ms.unwrap_or(defaults.probe_timeout_ms),
        )?;

        let max_connections = entry.max_connections.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            bail!("max_connections must be greater than zero");
        }

        let mut operator = OperatorSettings::new(idle_timeout, startup_timeout);
        operator.poll_interval = poll_interval;
        operator.probe_timeout = probe_timeout;

        Ok(RouteSettings {
            name: entry.name.clone().unwrap_or_else(|| entry.listen.clone()),
            listen,
            backend: entry.backend.clone(),
            server_port: entry.server_port.unwrap_or(backend_port),
            autoshutdown: entry.autoshutdown.unwrap_or(defaults.autoshutdown),
            acquire_timeout,
            max_connections,
            operator,
        })
    }
}

/// Port of a `host:port` endpoint.
fn parse_backend_port(backend: &str) -> Result<u16> {
    let (host, port) = backend
        .rsplit_once(':')
        .with_context(|| format!("backend {:?} must be host:port", backend))?;
    if host.is_empty() {
        bail!("backend {:?} is missing a host", backend);
    }
    port.parse()
        .with_context(|| format!("backend {:?} has an invalid port", backend))
}

fn secs(field: &str, value: u64) -> Result<Duration> {
    if value == 0 {
        bail!("{} must be greater than zero", field);
    }
    Ok(Duration::from_secs(value))
}

fn millis(field: &str, value: u64) -> Result<Duration> {
    if value == 0 {
        bail!("{} must be greater than zero", field);
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
log_level = "debug"

[control_plane]
api_url = "https://crafty.local:8443"
username = "ops"
password = "hunter2"

[defaults]
idle_timeout_secs = 60

[[routes]]
name = "survival"
listen = "0.0.0.0:25565"
backend = "crafty:25566"

[[routes]]
listen = "0.0.0.0:25575"
backend = "crafty:25576"
server_port = 30000
autoshutdown = false
startup_timeout_secs = 10
"#;

    #[test]
    fn test_parse_and_resolve() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.control_plane.username, "ops");
        assert!(config.control_plane.accept_invalid_certs);
        assert_eq!(config.defaults.startup_timeout_secs, 120);

        let routes = config.resolve_routes().unwrap();
        assert_eq!(routes.len(), 2);

        let survival = &routes[0];
        assert_eq!(survival.name, "survival");
        assert_eq!(survival.server_port, 25566);
        assert!(survival.autoshutdown);
        assert_eq!(survival.operator.idle_timeout, Duration::from_secs(60));
        assert_eq!(survival.acquire_timeout, Duration::from_secs(180));

        let creative = &routes[1];
        assert_eq!(creative.name, "0.0.0.0:25575");
        assert_eq!(creative.server_port, 30000);
        assert!(!creative.autoshutdown);
        assert_eq!(creative.operator.startup_timeout, Duration::from_secs(10));
        assert_eq!(creative.operator.poll_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlegate.toml");

        let (config, source) = Config::load(&path).unwrap();
        assert_eq!(source, ConfigSource::CreatedDefault);
        assert!(path.exists());
        assert_eq!(config.routes.len(), 1);

        let reloaded = Config::parse(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reloaded.routes, Config::default().routes);
        assert_eq!(reloaded.defaults, RouteDefaults::default());
        assert!(reloaded.resolve_routes().is_ok());
    }

    #[test]
    fn test_existing_file_is_loaded_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlegate.toml");
        fs::write(&path, SAMPLE).unwrap();

        let (config, source) = Config::load(&path).unwrap();
        assert_eq!(source, ConfigSource::File);
        assert_eq!(config.routes.len(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[cfg(unix)]
    #[test]
    fn test_default_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idlegate.toml");
        Config::load(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("IDLEGATE_CRAFTY_URL", "https://other:8443"),
            ("IDLEGATE_CRAFTY_PASSWORD", "s3cret"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.control_plane.api_url, "https://other:8443");
        assert_eq!(config.control_plane.password, "s3cret");
        assert_eq!(config.control_plane.username, "admin");
        assert_eq!(config.log_level, "info");
    }

    #[rstest]
    #[case::udp(r#"listen = "0.0.0.0:1"
backend = "a:1"
protocol = "udp""#, "unsupported protocol")]
    #[case::bad_listen(r#"listen = "nowhere"
backend = "a:1""#, "not a socket address")]
    #[case::backend_without_port(r#"listen = "0.0.0.0:1"
backend = "crafty""#, "must be host:port")]
    #[case::backend_without_host(r#"listen = "0.0.0.0:1"
backend = ":25565""#, "missing a host")]
    #[case::zero_idle(r#"listen = "0.0.0.0:1"
backend = "a:1"
idle_timeout_secs = 0"#, "idle_timeout_secs must be greater than zero")]
    #[case::zero_poll(r#"listen = "0.0.0.0:1"
backend = "a:1"
poll_interval_ms = 0"#, "poll_interval_ms must be greater than zero")]
    fn test_invalid_route(#[case] route: &str, #[case] expected: &str) {
        let raw = format!("[[routes]]\n{}\n", route);
        let config = Config::parse(&raw).unwrap();
        let err = config.resolve_routes().unwrap_err();
        assert!(
            format!("{:#}", err).contains(expected),
            "unexpected error: {:#}",
            err
        );
    }

    #[test]
    fn test_no_routes_rejected() {
        let config = Config::parse("log_level = \"info\"\n").unwrap();
        assert!(config.resolve_routes().is_err());
    }

    #[test]
    fn test_duplicate_listen_rejected() {
        let mut config = Config::default();
        config
            .routes
            .push(RouteEntry::new("127.0.0.1:25565", "crafty:25570"));
        let err = config.resolve_routes().unwrap_err();
        assert!(err.to_string().contains("duplicate listen endpoint"));
    }

    #[test]
    fn test_ipv6_backend() {
        assert_eq!(parse_backend_port("[::1]:25565").unwrap(), 25565);
    }
}
