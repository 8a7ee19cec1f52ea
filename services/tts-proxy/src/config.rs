//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are never read from the TOML itself. They come from
//! `ELEVENLABS_API_KEYS` (comma-separated), then `ELEVENLABS_API_KEY`, then the
//! file named by `[keys] file` (one key per line).

use common::Secret;
use key_pool::PolicyConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding a comma-separated list of keys.
pub const KEYS_ENV: &str = "ELEVENLABS_API_KEYS";

/// Single-key fallback env var.
pub const KEY_ENV: &str = "ELEVENLABS_API_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub pool: PolicyConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Where to find API keys when the env vars are unset
#[derive(Debug, Default, Deserialize)]
pub struct KeysConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_upstream_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file, then resolve API keys.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.proxy.upstream_url.starts_with("http://")
            && !config.proxy.upstream_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "upstream_url must start with http:// or https://, got: {}",
                config.proxy.upstream_url
            )));
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config
            .pool
            .build()
            .map_err(|e| common::Error::Config(format!("[pool] {e}")))?;

        config.api_keys = resolve_keys(config.keys.file.as_deref())?;
        if config.api_keys.is_empty() {
            return Err(common::Error::Config(format!(
                "no API keys configured: set {KEYS_ENV}, {KEY_ENV} or [keys] file"
            )));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("tts-proxy.toml")
    }
}

/// First non-empty key source wins: list env var, single env var, keys file.
fn resolve_keys(keys_file: Option<&Path>) -> common::Result<Vec<Secret<String>>> {
    if let Ok(list) = std::env::var(KEYS_ENV) {
        let keys = split_keys(&list);
        if !keys.is_empty() {
            return Ok(keys);
        }
    }

    if let Ok(single) = std::env::var(KEY_ENV) {
        let keys = split_keys(&single);
        if !keys.is_empty() {
            return Ok(keys);
        }
    }

    if let Some(path) = keys_file {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            common::Error::Config(format!("failed to read keys file {}: {e}", path.display()))
        })?;
        return Ok(split_keys(&contents));
    }

    Ok(Vec::new())
}

/// Split on commas and newlines, dropping blank entries.
fn split_keys(raw: &str) -> Vec<Secret<String>> {
    raw.split([',', '\n'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| Secret::new(k.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    unsafe fn clear_key_env() {
        unsafe {
            remove_env(KEYS_ENV);
            remove_env(KEY_ENV);
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("tts-proxy.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn exposed(config: &Config) -> Vec<&str> {
        config.api_keys.iter().map(|k| k.expose().as_str()).collect()
    }

    const MINIMAL: &str = r#"
[proxy]
listen_addr = "127.0.0.1:5002"
"#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);
        unsafe {
            clear_key_env();
            set_env(KEYS_ENV, "sk_one_000000000001");
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(config.proxy.upstream_url, "https://api.elevenlabs.io");
        assert_eq!(config.proxy.timeout_secs, 60);
        assert_eq!(config.proxy.max_connections, 1000);
        assert_eq!(config.pool, PolicyConfig::default());
        assert_eq!(exposed(&config), vec!["sk_one_000000000001"]);

        unsafe { clear_key_env() };
    }

    #[test]
    fn keys_env_splits_on_commas_and_drops_blanks() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);
        unsafe {
            clear_key_env();
            set_env(KEYS_ENV, " key-a-0000000001 , ,key-b-0000000002,");
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(exposed(&config), vec!["key-a-0000000001", "key-b-0000000002"]);

        unsafe { clear_key_env() };
    }

    #[test]
    fn single_key_env_is_fallback() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);
        unsafe {
            clear_key_env();
            set_env(KEYS_ENV, "  ,  ");
            set_env(KEY_ENV, "sk_single_00000001");
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(exposed(&config), vec!["sk_single_00000001"]);

        unsafe { clear_key_env() };
    }

    #[test]
    fn list_env_overrides_single_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);
        unsafe {
            clear_key_env();
            set_env(KEYS_ENV, "sk_list_a_00000001,sk_list_b_00000002");
            set_env(KEY_ENV, "sk_single_00000001");
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(
            exposed(&config),
            vec!["sk_list_a_00000001", "sk_list_b_00000002"]
        );

        unsafe { clear_key_env() };
    }

    #[test]
    fn keys_file_used_when_env_unset() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let keys_path = dir.path().join("keys");
        std::fs::write(&keys_path, "sk_file_a_00000001\n\n  sk_file_b_00000002  \n").unwrap();
        let path = write_config(
            &dir,
            &format!(
                r#"
[proxy]
listen_addr = "127.0.0.1:5002"

[keys]
file = "{}"
"#,
                keys_path.display()
            ),
        );
        unsafe { clear_key_env() };

        let config = Config::load(&path).unwrap();
        assert_eq!(
            exposed(&config),
            vec!["sk_file_a_00000001", "sk_file_b_00000002"]
        );
    }

    #[test]
    fn missing_keys_file_is_an_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:5002"

[keys]
file = "/nonexistent/keys"
"#,
        );
        unsafe { clear_key_env() };

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("failed to read keys file"), "got: {err}");
    }

    #[test]
    fn no_keys_anywhere_is_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);
        unsafe { clear_key_env() };

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("no API keys configured"), "got: {err}");
    }

    #[test]
    fn cooldown_policy_section_parsed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:5002"

[pool]
policy = "cooldown"
max_errors = 4
cooldown_period_secs = 600
"#,
        );
        unsafe {
            clear_key_env();
            set_env(KEY_ENV, "sk_single_00000001");
        }

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pool.policy, key_pool::PolicyKind::Cooldown);
        assert_eq!(config.pool.max_errors, 4);
        assert_eq!(config.pool.cooldown_period_secs, 600);

        unsafe { clear_key_env() };
    }

    #[test]
    fn zero_error_limit_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:5002"

[pool]
consecutive_error_limit = 0
"#,
        );
        unsafe {
            clear_key_env();
            set_env(KEY_ENV, "sk_single_00000001");
        }

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("[pool]"), "got: {err}");

        unsafe { clear_key_env() };
    }

    #[test]
    fn invalid_upstream_url_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[proxy]
listen_addr = "127.0.0.1:5002"
upstream_url = "api.elevenlabs.io"
"#,
        );
        unsafe {
            clear_key_env();
            set_env(KEY_ENV, "sk_single_00000001");
        }

        let err = Config::load(&path).unwrap_err();
        assert!(
            err.to_string().contains("upstream_url must start with http"),
            "got: {err}"
        );

        unsafe { clear_key_env() };
    }

    #[test]
    fn zero_timeout_and_connections_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        unsafe {
            clear_key_env();
            set_env(KEY_ENV, "sk_single_00000001");
        }

        for field in ["timeout_secs = 0", "max_connections = 0"] {
            let path = write_config(
                &dir,
                &format!("[proxy]\nlisten_addr = \"127.0.0.1:5002\"\n{field}\n"),
            );
            assert!(Config::load(&path).is_err(), "{field} must be rejected");
        }

        unsafe { clear_key_env() };
    }

    #[test]
    fn invalid_toml_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn missing_file_rejected() {
        assert!(Config::load(Path::new("/nonexistent/tts-proxy.toml")).is_err());
    }

    #[test]
    fn debug_output_hides_keys() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, MINIMAL);
        unsafe {
            clear_key_env();
            set_env(KEY_ENV, "sk_very_secret_0001");
        }

        let config = Config::load(&path).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk_very_secret_0001"), "got: {debug}");

        unsafe { clear_key_env() };
    }

    #[test]
    fn resolve_path_precedence() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        assert_eq!(
            Config::resolve_path(Some("/cli/wins.toml")),
            PathBuf::from("/cli/wins.toml")
        );
        assert_eq!(Config::resolve_path(None), PathBuf::from("/env/path.toml"));

        unsafe { remove_env("CONFIG_PATH") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("tts-proxy.toml"));
    }
}
