use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use equipment_auth::{AuthConfig, DEFAULT_HASH_ITERATIONS, MIN_SECRET_BYTES};
use equipment_store::{DEFAULT_RETENTION_LIMIT, StoreOptions};

pub const MAX_RETENTION_LIMIT: usize = 100;

#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub db_max_connections: u32,
    pub db_write_timeout_ms: u64,
    pub retention_limit: usize,
    pub auth_token_secret: String,
    pub auth_token_ttl_secs: u64,
    pub auth_hash_iterations: u32,
    pub metrics_require_auth: bool,
    pub shutdown_grace_ms: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_url", &self.db_url)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_write_timeout_ms", &self.db_write_timeout_ms)
            .field("retention_limit", &self.retention_limit)
            .field("auth_token_secret", &"<redacted>")
            .field("auth_token_ttl_secs", &self.auth_token_ttl_secs)
            .field("auth_hash_iterations", &self.auth_hash_iterations)
            .field("metrics_require_auth", &self.metrics_require_auth)
            .field("shutdown_grace_ms", &self.shutdown_grace_ms)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

impl ServerConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("EQUIP_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("EQUIP_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8001),
            "EQUIP_BIND_ADDR",
        )?;

        let db_url = kv
            .get("EQUIP_DB_URL")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or("sqlite://equipment.db?mode=rwc")
            .to_string();
        if !db_url.starts_with("sqlite:") {
            return Err(invalid("EQUIP_DB_URL must be a sqlite: URL"));
        }

        let db_max_connections = parse_u32(
            kv.get("EQUIP_DB_MAX_CONNECTIONS"),
            4,
            "EQUIP_DB_MAX_CONNECTIONS",
        )?;
        if db_max_connections == 0 {
            return Err(invalid("EQUIP_DB_MAX_CONNECTIONS must be >= 1"));
        }

        let db_write_timeout_ms = parse_u64(
            kv.get("EQUIP_DB_WRITE_TIMEOUT_MS"),
            2000,
            "EQUIP_DB_WRITE_TIMEOUT_MS",
        )?;
        if db_write_timeout_ms == 0 {
            return Err(invalid("EQUIP_DB_WRITE_TIMEOUT_MS must be >= 1"));
        }

        let retention_limit = parse_usize(
            kv.get("EQUIP_RETENTION_LIMIT"),
            DEFAULT_RETENTION_LIMIT,
            "EQUIP_RETENTION_LIMIT",
        )?;
        if !(1..=MAX_RETENTION_LIMIT).contains(&retention_limit) {
            return Err(invalid(format!(
                "EQUIP_RETENTION_LIMIT must be between 1 and {}",
                MAX_RETENTION_LIMIT
            )));
        }

        let auth_token_secret = require_nonempty(kv, "EQUIP_AUTH_TOKEN_SECRET")?;
        if auth_token_secret.len() < MIN_SECRET_BYTES {
            return Err(invalid(format!(
                "EQUIP_AUTH_TOKEN_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }

        let auth_token_ttl_secs = parse_u64(
            kv.get("EQUIP_AUTH_TOKEN_TTL_SECS"),
            24 * 60 * 60,
            "EQUIP_AUTH_TOKEN_TTL_SECS",
        )?;
        if auth_token_ttl_secs == 0 {
            return Err(invalid("EQUIP_AUTH_TOKEN_TTL_SECS must be >= 1"));
        }

        let auth_hash_iterations = parse_u32(
            kv.get("EQUIP_AUTH_HASH_ITERATIONS"),
            DEFAULT_HASH_ITERATIONS,
            "EQUIP_AUTH_HASH_ITERATIONS",
        )?;
        if auth_hash_iterations == 0 {
            return Err(invalid("EQUIP_AUTH_HASH_ITERATIONS must be >= 1"));
        }

        let metrics_require_auth = match kv.get("EQUIP_METRICS_REQUIRE_AUTH") {
            None => false,
            Some(raw) if raw.trim().is_empty() => false,
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| invalid("EQUIP_METRICS_REQUIRE_AUTH must be true or false"))?,
        };

        let shutdown_grace_ms = parse_u64(
            kv.get("EQUIP_SHUTDOWN_GRACE_MS"),
            5000,
            "EQUIP_SHUTDOWN_GRACE_MS",
        )?;

        Ok(Self {
            bind_addr,
            db_url,
            db_max_connections,
            db_write_timeout_ms,
            retention_limit,
            auth_token_secret,
            auth_token_ttl_secs,
            auth_hash_iterations,
            metrics_require_auth,
            shutdown_grace_ms,
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            db_url: self.db_url.clone(),
            max_connections: self.db_max_connections,
            write_timeout: Duration::from_millis(self.db_write_timeout_ms),
            retention_limit: self.retention_limit,
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            token_secret: self.auth_token_secret.clone(),
            token_ttl: Duration::from_secs(self.auth_token_ttl_secs),
            hash_iterations: self.auth_hash_iterations,
            db_timeout: Duration::from_millis(self.db_write_timeout_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn invalid(message: impl Into<String>) -> StartupError {
    StartupError {
        code: "ERR_INVALID_CONFIG",
        message: message.into(),
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;
    parse_env_lines(&contents)
}

fn parse_env_lines(contents: &str) -> Result<HashMap<String, String>, StartupError> {
    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    kv.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v
            .trim()
            .parse::<SocketAddr>()
            .map_err(|_| invalid(format!("{} must be a valid host:port socket address", key))),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| invalid(format!("{} must be an integer", key))),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid(format!("{} must be an integer", key))),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map_err(|_| invalid(format!("{} must be an integer", key))),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
