use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

/// Control-plane configuration. Loaded from an optional JSON file
/// (`~/.tsbx/tsbx.json` by default, override with `TSBX_CONFIG_PATH`)
/// and then overridden field-by-field by `TSBX_*` environment variables:
/// the file provides the base, and any `TSBX_*`/`DATABASE_URL` variable
/// that is actually set wins for that one field, leaving the rest of the
/// file-derived base untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct TsbxConfig {
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: i64,

    #[serde(default = "default_max_lifetime_hours")]
    pub max_lifetime_hours: i64,

    #[serde(default = "default_creating_timeout_secs")]
    pub creating_timeout_secs: i64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: f64,

    #[serde(default = "default_retry_backoff_factor")]
    pub retry_backoff_factor: f64,

    #[serde(default = "default_retry_backoff_max_secs")]
    pub retry_backoff_max_secs: f64,

    #[serde(default = "default_default_timeout_secs")]
    pub default_timeout_secs: i32,

    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: i32,

    #[serde(default = "default_cpu")]
    pub default_cpu: String,

    #[serde(default = "default_memory")]
    pub default_memory: String,

    #[serde(default = "default_disk")]
    pub default_disk: String,

    #[serde(default)]
    pub disable_bwrap: bool,

    #[serde(default = "default_executor_port")]
    pub executor_port: u16,

    #[serde(default = "default_executor_connect_timeout_secs")]
    pub executor_connect_timeout_secs: u64,

    #[serde(default = "default_executor_call_timeout_secs")]
    pub executor_call_timeout_secs: u64,

    #[serde(default = "default_container_create_timeout_secs")]
    pub container_create_timeout_secs: u64,

    #[serde(default = "default_objstore_call_timeout_secs")]
    pub objstore_call_timeout_secs: u64,

    #[serde(default = "default_logs_call_timeout_secs")]
    pub logs_call_timeout_secs: u64,

    #[serde(default = "default_health_call_timeout_secs")]
    pub health_call_timeout_secs: u64,

    #[serde(default)]
    pub callback_shared_token: String,

    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_runtime_kind")]
    pub runtime_kind: String,

    #[serde(default = "default_objstore_bucket")]
    pub objstore_bucket: String,

    #[serde(default = "default_objstore_root")]
    pub objstore_root: String,

    #[serde(default = "default_cluster_endpoint")]
    pub cluster_endpoint: String,
}

fn default_idle_timeout_minutes() -> i64 {
    30
}
fn default_max_lifetime_hours() -> i64 {
    6
}
fn default_creating_timeout_secs() -> i64 {
    300
}
fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_health_check_interval_secs() -> u64 {
    30
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_base_secs() -> f64 {
    0.5
}
fn default_retry_backoff_factor() -> f64 {
    2.0
}
fn default_retry_backoff_max_secs() -> f64 {
    10.0
}
fn default_default_timeout_secs() -> i32 {
    300
}
fn default_max_timeout_secs() -> i32 {
    3600
}
fn default_cpu() -> String {
    "1".to_string()
}
fn default_memory() -> String {
    "512Mi".to_string()
}
fn default_disk() -> String {
    "1Gi".to_string()
}
fn default_executor_port() -> u16 {
    8080
}
fn default_executor_connect_timeout_secs() -> u64 {
    5
}
fn default_executor_call_timeout_secs() -> u64 {
    30
}
fn default_container_create_timeout_secs() -> u64 {
    60
}
fn default_objstore_call_timeout_secs() -> u64 {
    10
}
fn default_logs_call_timeout_secs() -> u64 {
    10
}
fn default_health_call_timeout_secs() -> u64 {
    5
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_dir() -> String {
    "/var/log/tsbx".to_string()
}
fn default_runtime_kind() -> String {
    "local".to_string()
}
fn default_objstore_bucket() -> String {
    "tsbx".to_string()
}
fn default_objstore_root() -> String {
    "/var/lib/tsbx/objstore".to_string()
}
fn default_cluster_endpoint() -> String {
    "http://cluster-scheduler:9090".to_string()
}

impl TsbxConfig {
    /// Loads the JSON base config (if present) and lets `TSBX_*`/`DATABASE_URL`
    /// environment variables override individual fields.
    pub fn load() -> Result<Self> {
        let path = resolve_config_path();
        let base = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            serde_json::from_str("{}").map_err(|e| anyhow!("default config parse: {e}"))?
        };
        let config = base.merge_env()?;

        if config.callback_shared_token.is_empty() {
            return Err(anyhow!(
                "callback_shared_token is required: set it in the config file or via TSBX_CALLBACK_SHARED_TOKEN"
            ));
        }
        if config.database_url.is_empty() {
            return Err(anyhow!("database_url is required: set it in the config file or via DATABASE_URL"));
        }
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read config at {}: {e}", path.display()))?;
        serde_json::from_str(&data)
            .map_err(|e| anyhow!("failed to parse config JSON at {}: {e}", path.display()))
    }

    /// Overlays `TSBX_*`/`DATABASE_URL` environment variables on top of
    /// `self` (the file-derived base), field by field. A field is only
    /// overridden when its environment variable is actually set and
    /// parses; otherwise the base value is kept untouched.
    fn merge_env(mut self) -> Result<Self> {
        env_parsed(&mut self.idle_timeout_minutes, "TSBX_IDLE_TIMEOUT_MINUTES")?;
        env_parsed(&mut self.max_lifetime_hours, "TSBX_MAX_LIFETIME_HOURS")?;
        env_parsed(&mut self.creating_timeout_secs, "TSBX_CREATING_TIMEOUT_SECS")?;
        env_parsed(&mut self.cleanup_interval_secs, "TSBX_CLEANUP_INTERVAL_SECS")?;
        env_parsed(&mut self.health_check_interval_secs, "TSBX_HEALTH_CHECK_INTERVAL_SECS")?;
        env_parsed(&mut self.max_retry_attempts, "TSBX_MAX_RETRY_ATTEMPTS")?;
        env_parsed(&mut self.retry_backoff_base_secs, "TSBX_RETRY_BACKOFF_BASE_SECS")?;
        env_parsed(&mut self.retry_backoff_factor, "TSBX_RETRY_BACKOFF_FACTOR")?;
        env_parsed(&mut self.retry_backoff_max_secs, "TSBX_RETRY_BACKOFF_MAX_SECS")?;
        env_parsed(&mut self.default_timeout_secs, "TSBX_DEFAULT_TIMEOUT_SECS")?;
        env_parsed(&mut self.max_timeout_secs, "TSBX_MAX_TIMEOUT_SECS")?;
        env_string(&mut self.default_cpu, "TSBX_DEFAULT_CPU");
        env_string(&mut self.default_memory, "TSBX_DEFAULT_MEMORY");
        env_string(&mut self.default_disk, "TSBX_DEFAULT_DISK");
        env_parsed(&mut self.disable_bwrap, "TSBX_DISABLE_BWRAP")?;
        env_parsed(&mut self.executor_port, "TSBX_EXECUTOR_PORT")?;
        env_parsed(&mut self.executor_connect_timeout_secs, "TSBX_EXECUTOR_CONNECT_TIMEOUT_SECS")?;
        env_parsed(&mut self.executor_call_timeout_secs, "TSBX_EXECUTOR_CALL_TIMEOUT_SECS")?;
        env_parsed(&mut self.container_create_timeout_secs, "TSBX_CONTAINER_CREATE_TIMEOUT_SECS")?;
        env_parsed(&mut self.objstore_call_timeout_secs, "TSBX_OBJSTORE_CALL_TIMEOUT_SECS")?;
        env_parsed(&mut self.logs_call_timeout_secs, "TSBX_LOGS_CALL_TIMEOUT_SECS")?;
        env_parsed(&mut self.health_call_timeout_secs, "TSBX_HEALTH_CALL_TIMEOUT_SECS")?;
        env_string(&mut self.callback_shared_token, "TSBX_CALLBACK_SHARED_TOKEN");
        env_string(&mut self.database_url, "DATABASE_URL");
        env_string(&mut self.bind_addr, "TSBX_BIND_ADDR");
        env_string(&mut self.log_dir, "TSBX_LOG_DIR");
        env_string(&mut self.runtime_kind, "TSBX_RUNTIME_KIND");
        env_string(&mut self.objstore_bucket, "TSBX_OBJSTORE_BUCKET");
        env_string(&mut self.objstore_root, "TSBX_OBJSTORE_ROOT");
        env_string(&mut self.cluster_endpoint, "TSBX_CLUSTER_ENDPOINT");
        Ok(self)
    }
}

/// Overwrites `field` with the value of `var` when the variable is set,
/// parsing it into `field`'s type. Leaves `field` untouched when the
/// variable is absent. Errors if the variable is set but fails to parse.
fn env_parsed<T: std::str::FromStr>(field: &mut T, var: &str) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => {
            *field = raw.parse().map_err(|e| anyhow!("invalid value for {var}: {e}"))?;
            Ok(())
        }
        Err(_) => Ok(()),
    }
}

/// Like `env_parsed`, specialized for plain strings (no parse failure mode).
fn env_string(field: &mut String, var: &str) {
    if let Ok(raw) = std::env::var(var) {
        *field = raw;
    }
}

pub fn resolve_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("TSBX_CONFIG_PATH") {
        return expand_path(path);
    }
    default_config_path()
}

fn expand_path(input: String) -> PathBuf {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(input)
}

fn default_config_path() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tsbx")
        .join("tsbx.json")
}

fn home_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        std::env::var_os("USERPROFILE").map(PathBuf::from)
    } else {
        std::env::var_os("HOME").map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_path_leaves_absolute_paths_untouched() {
        assert_eq!(expand_path("/etc/tsbx.json".to_string()), PathBuf::from("/etc/tsbx.json"));
    }

    #[test]
    fn expand_path_resolves_tilde_against_home() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_path("~/tsbx.json".to_string()), home.join("tsbx.json"));
        }
    }

    #[test]
    fn default_config_path_lands_under_dot_tsbx() {
        let path = default_config_path();
        assert_eq!(path.file_name().unwrap(), "tsbx.json");
        assert!(path.parent().unwrap().ends_with(".tsbx"));
    }

    fn file_base() -> TsbxConfig {
        serde_json::from_str(
            r#"{"idle_timeout_minutes": 45, "callback_shared_token": "file-token", "database_url": "file-db"}"#,
        )
        .unwrap()
    }

    #[test]
    fn merge_env_keeps_the_file_base_when_no_env_var_is_set() {
        std::env::remove_var("TSBX_IDLE_TIMEOUT_MINUTES");
        let merged = file_base().merge_env().unwrap();
        assert_eq!(merged.idle_timeout_minutes, 45);
        assert_eq!(merged.callback_shared_token, "file-token");
        assert_eq!(merged.database_url, "file-db");
    }

    #[test]
    fn merge_env_overrides_only_the_field_whose_env_var_is_set() {
        std::env::set_var("TSBX_MAX_LIFETIME_HOURS", "9");
        let merged = file_base().merge_env().unwrap();
        std::env::remove_var("TSBX_MAX_LIFETIME_HOURS");

        assert_eq!(merged.max_lifetime_hours, 9);
        assert_eq!(merged.idle_timeout_minutes, 45, "unrelated fields must keep their file-derived value");
    }

    #[test]
    fn merge_env_rejects_an_unparseable_override() {
        std::env::set_var("TSBX_MAX_LIFETIME_HOURS", "not-a-number");
        let result = file_base().merge_env();
        std::env::remove_var("TSBX_MAX_LIFETIME_HOURS");
        assert!(result.is_err());
    }
}
