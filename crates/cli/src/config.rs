//! Configuration loading for the gateway, directory and agent subcommands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent::AgentSettings;
use directory::DirectorySettings;
use gateway::GatewaySettings;
use proto::{ConfigError, GatewayEndpoint, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_DOWNLINK_PATH: &str = "/v1.0/toedged";
const DEFAULT_UPLINK_PATH: &str = "/v1.0/toedgeaccess";
const DEFAULT_BIASYNC_PATH: &str = "/v1.0/biasync";

/// Top-level config; each subcommand reads its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub directory: DirectoryConfig,
    pub agent: AgentConfig,
}

/// `[gateway]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: String,
    /// Host reported to the directory instead of `host` (proxied gateways).
    pub advertise_host: String,
    pub crt: String,
    pub key: String,
    pub toedged_path: String,
    pub toedgeaccess_path: String,
    pub biasync_path: String,
    /// Link read deadline; 0 disables it.
    pub read_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: "8080".to_string(),
            advertise_host: String::new(),
            crt: String::new(),
            key: String::new(),
            toedged_path: DEFAULT_DOWNLINK_PATH.to_string(),
            toedgeaccess_path: DEFAULT_UPLINK_PATH.to_string(),
            biasync_path: DEFAULT_BIASYNC_PATH.to_string(),
            read_timeout_secs: 90,
        }
    }
}

/// `[directory]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub host: String,
    pub port: String,
    #[serde(alias = "edgeaccess_homes")]
    pub gateway_homes: Vec<String>,
    /// Seconds without a successful probe before a gateway is stale.
    #[serde(alias = "hearbroken_interval")]
    pub heart_broken_interval: u64,
    pub ping_interval: u64,
    pub probe_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: "8000".to_string(),
            gateway_homes: Vec::new(),
            heart_broken_interval: 30,
            ping_interval: 5,
            probe_timeout_secs: 5,
        }
    }
}

/// `[agent]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(alias = "edgenode_id")]
    pub node_id: String,
    pub project_id: String,
    #[serde(alias = "placementURL")]
    pub directory_url: String,
    #[serde(alias = "retry_placement_interval")]
    pub retry_directory_interval: u64,
    #[serde(alias = "retry_edgeaccess_interval")]
    pub retry_gateway_interval: u64,
    pub report_interval: u64,
    /// Uplink reply deadline; 0 disables it.
    pub read_timeout_secs: u64,
    pub crt: String,
    pub key: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            project_id: String::new(),
            directory_url: "http://127.0.0.1:8000/v1.0/edgeaccess".to_string(),
            retry_directory_interval: 5,
            retry_gateway_interval: 5,
            report_interval: 30,
            read_timeout_secs: 90,
            crt: String::new(),
            key: String::new(),
        }
    }
}

impl Config {
    /// Loads the config file, then applies `EDGERELAY_*` environment overrides.
    /// Without an explicit path, falls back to the first existing default
    /// location, or to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = std::env::current_dir().ok();
        let home = std::env::var("HOME").ok().map(PathBuf::from);
        let config_path = resolve_path(path, cwd.as_deref(), home.as_deref());
        debug!(path = ?config_path, "Config file resolved");

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parses one file, TOML if it ends in `.toml`, JSON otherwise.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Json(e.to_string()))
        }
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(node_id) = lookup("EDGERELAY_NODE_ID") {
            self.agent.node_id = node_id;
        }
        if let Some(url) = lookup("EDGERELAY_DIRECTORY_URL") {
            self.agent.directory_url = url;
        }
        if let Some(port) = lookup("EDGERELAY_GATEWAY_PORT") {
            port.parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "EDGERELAY_GATEWAY_PORT".to_string(),
                    reason: e.to_string(),
                })?;
            self.gateway.port = port;
        }
        if let Some(homes) = lookup("EDGERELAY_GATEWAY_HOMES") {
            self.directory.gateway_homes = homes
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }
}

/// Explicit path first, then `./edgerelay.json`, `./edgerelay.toml`,
/// `~/.edgerelay/config.json`.
fn resolve_path(explicit: Option<&Path>, cwd: Option<&Path>, home: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let mut candidates = Vec::new();
    if let Some(cwd) = cwd {
        candidates.push(cwd.join("edgerelay.json"));
        candidates.push(cwd.join("edgerelay.toml"));
    }
    if let Some(home) = home {
        candidates.push(home.join(".edgerelay").join("config.json"));
    }
    candidates.into_iter().find(|p| p.exists())
}

impl GatewayConfig {
    pub fn to_settings(&self) -> Result<GatewaySettings, ConfigError> {
        let port = parse_port("gateway.port", &self.port)?;
        check_path("gateway.toedged_path", &self.toedged_path)?;
        check_path("gateway.toedgeaccess_path", &self.toedgeaccess_path)?;
        check_path("gateway.biasync_path", &self.biasync_path)?;
        if self.toedged_path == self.toedgeaccess_path {
            return Err(ConfigError::InvalidValue {
                field: "gateway.toedgeaccess_path".to_string(),
                reason: "uplink and downlink paths must differ".to_string(),
            });
        }
        warn_tls_ignored("gateway", &self.crt, &self.key);

        let advertised_host = if self.advertise_host.is_empty() {
            self.host.clone()
        } else {
            self.advertise_host.clone()
        };
        Ok(GatewaySettings {
            bind_addr: format!("{}:{port}", self.host),
            advertised: GatewayEndpoint {
                host: advertised_host,
                port: self.port.clone(),
                downlink_path: self.toedged_path.clone(),
                uplink_path: self.toedgeaccess_path.clone(),
                biasync_path: self.biasync_path.clone(),
            },
            read_timeout: optional_secs(self.read_timeout_secs),
        })
    }
}

impl DirectoryConfig {
    pub fn to_settings(&self) -> Result<DirectorySettings, ConfigError> {
        let port = parse_port("directory.port", &self.port)?;
        if self.gateway_homes.is_empty() {
            return Err(ConfigError::MissingField("directory.gateway_homes".to_string()));
        }
        Ok(DirectorySettings {
            bind_addr: format!("{}:{port}", self.host),
            homes: self.gateway_homes.clone(),
            heart_broken: nonzero_secs("directory.heart_broken_interval", self.heart_broken_interval)?,
            ping_interval: nonzero_secs("directory.ping_interval", self.ping_interval)?,
            probe_timeout: nonzero_secs("directory.probe_timeout_secs", self.probe_timeout_secs)?,
        })
    }
}

impl AgentConfig {
    pub fn to_settings(&self) -> Result<AgentSettings, ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::MissingField("agent.node_id".to_string()));
        }
        if self.directory_url.trim().is_empty() {
            return Err(ConfigError::MissingField("agent.directory_url".to_string()));
        }
        warn_tls_ignored("agent", &self.crt, &self.key);
        Ok(AgentSettings {
            node_id: NodeId::from(self.node_id.trim()),
            project_id: self.project_id.clone(),
            directory_url: self.directory_url.clone(),
            report_interval: nonzero_secs("agent.report_interval", self.report_interval)?,
            read_timeout: optional_secs(self.read_timeout_secs),
            retry_directory_interval: nonzero_secs(
                "agent.retry_directory_interval",
                self.retry_directory_interval,
            )?,
            retry_gateway_interval: nonzero_secs(
                "agent.retry_gateway_interval",
                self.retry_gateway_interval,
            )?,
        })
    }
}

fn parse_port(field: &str, port: &str) -> Result<u16, ConfigError> {
    port.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("{port:?}: {e}"),
    })
}

fn check_path(field: &str, path: &str) -> Result<(), ConfigError> {
    if path.starts_with('/') {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("{path:?} must start with '/'"),
        })
    }
}

fn nonzero_secs(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn warn_tls_ignored(section: &str, crt: &str, key: &str) {
    if !crt.is_empty() || !key.is_empty() {
        warn!(section, "TLS material is configured but not supported; serving plain text");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::test_support::EnvGuard;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("write config");
        path
    }

    #[test]
    fn defaults_cover_gateway_and_agent_paths() {
        let config = Config::default();
        let gateway = config.gateway.to_settings().expect("default gateway settings");
        assert_eq!(gateway.bind_addr, "0.0.0.0:8080");
        assert_eq!(gateway.advertised.uplink_path, "/v1.0/toedgeaccess");
        assert_eq!(gateway.advertised.downlink_path, "/v1.0/toedged");
        assert_eq!(gateway.read_timeout, Some(Duration::from_secs(90)));

        let err = config.agent.to_settings().expect_err("node id is required");
        assert!(matches!(err, ConfigError::MissingField(field) if field == "agent.node_id"));
    }

    #[test]
    fn json_accepts_legacy_key_spellings() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "edgerelay.json",
            r#"{
                "directory": {
                    "port": "9000",
                    "edgeaccess_homes": ["10.0.0.1:8080", "10.0.0.2:8080"],
                    "hearbroken_interval": 12,
                    "ping_interval": 3
                },
                "agent": {
                    "edgenode_id": "edge-9",
                    "project_id": "p1",
                    "placementURL": "http://dir:9000/v1.0/edgeaccess",
                    "retry_placement_interval": 7,
                    "retry_edgeaccess_interval": 8
                }
            }"#,
        );
        let config = Config::from_file(&path).expect("parse json");

        let directory = config.directory.to_settings().expect("directory settings");
        assert_eq!(directory.bind_addr, "0.0.0.0:9000");
        assert_eq!(directory.homes.len(), 2);
        assert_eq!(directory.heart_broken, Duration::from_secs(12));
        assert_eq!(directory.ping_interval, Duration::from_secs(3));

        let agent = config.agent.to_settings().expect("agent settings");
        assert_eq!(agent.node_id.as_str(), "edge-9");
        assert_eq!(agent.directory_url, "http://dir:9000/v1.0/edgeaccess");
        assert_eq!(agent.retry_directory_interval, Duration::from_secs(7));
        assert_eq!(agent.retry_gateway_interval, Duration::from_secs(8));
        assert_eq!(agent.report_interval, Duration::from_secs(30));
    }

    #[test]
    fn toml_extension_selects_toml_parser() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = write(
            tmp.path(),
            "edgerelay.toml",
            r#"
[gateway]
host = "127.0.0.1"
port = "7000"
advertise_host = "relay.example.com"
read_timeout_secs = 0
"#,
        );
        let config = Config::from_file(&path).expect("parse toml");
        let gateway = config.gateway.to_settings().expect("gateway settings");
        assert_eq!(gateway.bind_addr, "127.0.0.1:7000");
        assert_eq!(gateway.advertised.host, "relay.example.com");
        assert_eq!(gateway.advertised.port, "7000");
        assert_eq!(gateway.read_timeout, None);
    }

    #[test]
    fn malformed_files_report_their_format() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let json = write(tmp.path(), "bad.json", "{ nope");
        assert!(matches!(Config::from_file(&json), Err(ConfigError::Json(_))));

        let toml = write(tmp.path(), "bad.toml", "[gateway\nport = ");
        assert!(matches!(Config::from_file(&toml), Err(ConfigError::Toml(_))));

        let missing = tmp.path().join("absent.json");
        assert!(matches!(Config::from_file(&missing), Err(ConfigError::Io(_))));
    }

    #[test]
    fn gateway_validation_rejects_bad_paths_and_ports() {
        let mut gateway = GatewayConfig {
            toedgeaccess_path: "v1.0/up".to_string(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            gateway.to_settings(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "gateway.toedgeaccess_path"
        ));

        gateway.toedgeaccess_path = DEFAULT_DOWNLINK_PATH.to_string();
        assert!(gateway.to_settings().is_err(), "identical link paths");

        gateway.toedgeaccess_path = DEFAULT_UPLINK_PATH.to_string();
        gateway.port = "http".to_string();
        assert!(matches!(
            gateway.to_settings(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "gateway.port"
        ));
    }

    #[test]
    fn zero_intervals_and_empty_homes_are_rejected() {
        let directory = DirectoryConfig::default();
        assert!(matches!(
            directory.to_settings(),
            Err(ConfigError::MissingField(field)) if field == "directory.gateway_homes"
        ));

        let directory = DirectoryConfig {
            gateway_homes: vec!["gw:8080".to_string()],
            ping_interval: 0,
            ..DirectoryConfig::default()
        };
        assert!(matches!(
            directory.to_settings(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "directory.ping_interval"
        ));

        let agent = AgentConfig {
            node_id: "edge-1".to_string(),
            report_interval: 0,
            ..AgentConfig::default()
        };
        assert!(agent.to_settings().is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("EDGERELAY_NODE_ID", "edge-env"),
            ("EDGERELAY_DIRECTORY_URL", "http://other:1/v1.0/edgeaccess"),
            ("EDGERELAY_GATEWAY_PORT", "9099"),
            ("EDGERELAY_GATEWAY_HOMES", "a:1, b:2,,"),
        ]);
        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.agent.node_id, "edge-env");
        assert_eq!(config.agent.directory_url, "http://other:1/v1.0/edgeaccess");
        assert_eq!(config.gateway.port, "9099");
        assert_eq!(config.directory.gateway_homes, vec!["a:1", "b:2"]);
    }

    #[test]
    fn invalid_port_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "EDGERELAY_GATEWAY_PORT").then(|| "99999".to_string()))
            .expect_err("port out of range");
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(config.gateway.port, "8080");
    }

    #[test]
    fn resolve_path_prefers_explicit_then_cwd_then_home() {
        let cwd = tempfile::tempdir().expect("cwd");
        let home = tempfile::tempdir().expect("home");
        assert_eq!(resolve_path(None, Some(cwd.path()), Some(home.path())), None);

        std::fs::create_dir_all(home.path().join(".edgerelay")).expect("home dir");
        let home_cfg = write(&home.path().join(".edgerelay"), "config.json", "{}");
        assert_eq!(
            resolve_path(None, Some(cwd.path()), Some(home.path())),
            Some(home_cfg)
        );

        let cwd_toml = write(cwd.path(), "edgerelay.toml", "");
        assert_eq!(
            resolve_path(None, Some(cwd.path()), Some(home.path())),
            Some(cwd_toml)
        );
        let cwd_json = write(cwd.path(), "edgerelay.json", "{}");
        assert_eq!(
            resolve_path(None, Some(cwd.path()), Some(home.path())),
            Some(cwd_json)
        );

        let explicit = PathBuf::from("/etc/edgerelay/custom.json");
        assert_eq!(
            resolve_path(Some(&explicit), Some(cwd.path()), Some(home.path())),
            Some(explicit.clone())
        );
    }

    #[test]
    fn load_reads_explicit_file_and_process_env() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = write(tmp.path(), "cfg.json", r#"{"agent":{"node_id":"from-file"}}"#);

        let _env = EnvGuard::set(&[("EDGERELAY_NODE_ID", Some("from-env"))]);
        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.agent.node_id, "from-env");
    }
}
