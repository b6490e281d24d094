use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::infra::mcp::{ServerConfig, DEFAULT_CALL_TIMEOUT};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_AUTHOR: &str = "Unknown Author";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Native,
    Vexctl,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            _ => Err(ConfigError::invalid("MODE", s)),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "vexctl" => Ok(Self::Vexctl),
            _ => Err(ConfigError::invalid("VEX_BACKEND", s)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("cannot read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("{0}")]
    Rule(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str) -> Self {
        Self::Invalid { key, value: value.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub mode: Mode,
    pub port: u16,
    pub bind_addr: IpAddr,
    pub call_timeout: Duration,
    pub backend: BackendKind,
    pub vexctl_path: String,
    pub author: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Stdio,
            port: DEFAULT_PORT,
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            backend: BackendKind::Native,
            vexctl_path: "vexctl".into(),
            author: DEFAULT_AUTHOR.into(),
        }
    }
}

/// TOML layout; every key optional, env wins over the file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    mode: Option<Mode>,
    port: Option<u16>,
    bind_addr: Option<IpAddr>,
    call_timeout_ms: Option<u64>,
    #[serde(default)]
    vex: VexSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VexSection {
    backend: Option<BackendKind>,
    vexctl_path: Option<String>,
    author: Option<String>,
}

impl Config {
    /// Defaults, then the TOML file named by `VEX_CONFIG` (if any), then env.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(std::env::var("VEX_CONFIG").ok().filter(|p| !p.is_empty()).map(PathBuf::from))
    }

    pub fn load(file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(path) = file {
            cfg.apply_file(&path)?;
        }
        cfg.apply_lookup(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let file: FileConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        if let Some(v) = file.mode {
            self.mode = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(ms) = file.call_timeout_ms {
            self.call_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = file.vex.backend {
            self.backend = v;
        }
        if let Some(v) = file.vex.vexctl_path {
            self.vexctl_path = v;
        }
        if let Some(v) = file.vex.author {
            self.author = v;
        }
        Ok(())
    }

    fn apply_lookup(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = get("MODE") {
            self.mode = v.parse()?;
        }
        if let Some(v) = get("PORT") {
            self.port = v.trim().parse().map_err(|_| ConfigError::invalid("PORT", &v))?;
        }
        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v.trim().parse().map_err(|_| ConfigError::invalid("BIND_ADDR", &v))?;
        }
        if let Some(v) = get("CALL_TIMEOUT_MS") {
            let ms: u64 = v.trim().parse().map_err(|_| ConfigError::invalid("CALL_TIMEOUT_MS", &v))?;
            self.call_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = get("VEX_BACKEND") {
            self.backend = v.parse()?;
        }
        if let Some(v) = get("VEXCTL_PATH") {
            self.vexctl_path = v;
        }
        if let Some(v) = get("VEX_AUTHOR").filter(|v| !v.trim().is_empty()) {
            self.author = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == Mode::Http && self.port == 0 {
            return Err(ConfigError::Rule("PORT cannot be 0"));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Rule("CALL_TIMEOUT_MS must be greater than 0"));
        }
        if self.backend == BackendKind::Vexctl && self.vexctl_path.trim().is_empty() {
            return Err(ConfigError::Rule("VEXCTL_PATH cannot be empty"));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig { call_timeout: self.call_timeout, ..ServerConfig::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;

    const KEYS: [&str; 8] =
        ["MODE", "PORT", "BIND_ADDR", "CALL_TIMEOUT_MS", "VEX_BACKEND", "VEXCTL_PATH", "VEX_AUTHOR", "VEX_CONFIG"];

    fn clear_env() {
        for k in KEYS {
            std::env::remove_var(k);
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    #[serial]
    fn defaults_to_stdio_native_8080() {
        clear_env();
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.mode, Mode::Stdio);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.call_timeout, Duration::from_secs(30));
        assert_eq!(cfg.author, "Unknown Author");
        cfg.validate().unwrap();
    }

    #[test]
    #[serial]
    fn parses_env_overrides() {
        clear_env();
        std::env::set_var("MODE", "http");
        std::env::set_var("PORT", "9090");
        std::env::set_var("VEX_BACKEND", "vexctl");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.mode, Mode::Http);
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.backend, BackendKind::Vexctl);
        clear_env();
    }

    #[test]
    fn rejects_malformed_values() {
        let mut cfg = Config::default();
        let err = cfg.apply_lookup(lookup(&[("PORT", "abc")])).unwrap_err();
        assert_eq!(err.to_string(), "invalid PORT: 'abc'");

        let err = cfg.apply_lookup(lookup(&[("MODE", "server")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MODE", .. }));
    }

    #[test]
    fn validate_applies_rules() {
        let mut cfg = Config::default();
        cfg.apply_lookup(lookup(&[("MODE", "http"), ("PORT", "0")])).unwrap();
        assert_eq!(cfg.validate().unwrap_err().to_string(), "PORT cannot be 0");

        let mut cfg = Config::default();
        cfg.apply_lookup(lookup(&[("CALL_TIMEOUT_MS", "0")])).unwrap();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.apply_lookup(lookup(&[("VEX_BACKEND", "vexctl"), ("VEXCTL_PATH", " ")])).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "mode = \"http\"\nport = 7000\ncall_timeout_ms = 1500\n\n[vex]\nbackend = \"vexctl\"\nauthor = \"File Author\""
        )
        .unwrap();

        let mut cfg = Config::default();
        cfg.apply_file(file.path()).unwrap();
        cfg.apply_lookup(lookup(&[("PORT", "7001")])).unwrap();
        assert_eq!(cfg.mode, Mode::Http);
        assert_eq!(cfg.port, 7001);
        assert_eq!(cfg.call_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.backend, BackendKind::Vexctl);
        assert_eq!(cfg.author, "File Author");
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "colour = \"green\"").unwrap();
        let err = Config::default().apply_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
