//! Dashboard configuration
//!
//! Loaded from a TOML file, then overridden by command-line flags and
//! `VBOXDASH_*` environment variables.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vboxdash_host::platform::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_SCRIPT_TIMEOUT};
use vboxdash_host::HostConfig;

/// Top-level configuration for the web service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// HTTP listen address
    pub listen: SocketAddr,

    /// Directory holding the provisioning scripts
    pub scripts_dir: PathBuf,

    pub store: StoreConfig,

    pub auth: AuthConfig,

    pub executor: ExecutorConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            scripts_dir: PathBuf::from("./scripts"),
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Supabase,
}

/// Where instance rows live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database file (sqlite backend)
    pub sqlite_path: PathBuf,

    /// Project URL, e.g. https://xyz.supabase.co (supabase backend)
    pub supabase_url: Option<String>,

    /// Public anon key sent as `apikey`
    pub supabase_anon_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: vboxdash_common::default_db_path(),
            supabase_url: None,
            supabase_anon_key: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Verify HS256 access tokens locally
    Jwt,
    /// Ask the Supabase auth endpoint who the token belongs to
    Supabase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,

    /// Shared HS256 secret (jwt mode)
    pub jwt_secret: Option<String>,

    /// Required `aud` claim, if any
    pub jwt_audience: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Jwt,
            jwt_secret: None,
            jwt_audience: Some("authenticated".to_string()),
        }
    }
}

/// Script execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub timeout_secs: u64,

    /// Per-stream output cap
    pub max_output_bytes: usize,

    /// Extra bash locations searched before PATH; empty keeps platform defaults
    pub shell_search_paths: Vec<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_SCRIPT_TIMEOUT.as_secs(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            shell_search_paths: Vec::new(),
        }
    }
}

impl DashboardConfig {
    /// Load configuration from file, falling back to defaults when absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Check that the selected backends have what they need.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.backend == StoreBackend::Supabase || self.auth.mode == AuthMode::Supabase {
            if self.store.supabase_url.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("supabase_url is required for the supabase backend");
            }
            if self.store.supabase_anon_key.as_deref().map_or(true, str::is_empty) {
                anyhow::bail!("supabase_anon_key is required for the supabase backend");
            }
        }
        if self.auth.mode == AuthMode::Jwt && self.auth.jwt_secret.as_deref().map_or(true, str::is_empty) {
            anyhow::bail!("jwt_secret is required in jwt auth mode");
        }
        if self.executor.timeout_secs == 0 {
            anyhow::bail!("executor.timeout_secs must be positive");
        }
        Ok(())
    }

    /// Host configuration for the prober and the executor.
    pub fn host_config(&self) -> HostConfig {
        let mut host = HostConfig::detect(&self.scripts_dir)
            .with_script_timeout(Duration::from_secs(self.executor.timeout_secs))
            .with_max_output_bytes(self.executor.max_output_bytes);
        if !self.executor.shell_search_paths.is_empty() {
            host = host.with_shell_search_paths(self.executor.shell_search_paths.clone());
        }
        host
    }
}

/// Command-line / environment overrides applied on top of the file
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// HTTP listen address
    #[arg(long, env = "VBOXDASH_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Provisioning scripts directory
    #[arg(long, env = "VBOXDASH_SCRIPTS_DIR")]
    pub scripts_dir: Option<PathBuf>,

    /// Store backend
    #[arg(long, env = "VBOXDASH_STORE", value_enum)]
    pub store: Option<StoreBackend>,

    /// SQLite database path
    #[arg(long, env = "VBOXDASH_SQLITE_PATH")]
    pub sqlite_path: Option<PathBuf>,

    #[arg(long, env = "VBOXDASH_SUPABASE_URL")]
    pub supabase_url: Option<String>,

    #[arg(long, env = "VBOXDASH_SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_anon_key: Option<String>,

    /// Token verification mode
    #[arg(long, env = "VBOXDASH_AUTH_MODE", value_enum)]
    pub auth_mode: Option<AuthMode>,

    #[arg(long, env = "VBOXDASH_JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    #[arg(long, env = "VBOXDASH_JWT_AUDIENCE")]
    pub jwt_audience: Option<String>,

    /// Script timeout in seconds
    #[arg(long, env = "VBOXDASH_SCRIPT_TIMEOUT")]
    pub script_timeout: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut DashboardConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(dir) = self.scripts_dir {
            config.scripts_dir = dir;
        }
        if let Some(backend) = self.store {
            config.store.backend = backend;
        }
        if let Some(path) = self.sqlite_path {
            config.store.sqlite_path = path;
        }
        if self.supabase_url.is_some() {
            config.store.supabase_url = self.supabase_url;
        }
        if self.supabase_anon_key.is_some() {
            config.store.supabase_anon_key = self.supabase_anon_key;
        }
        if let Some(mode) = self.auth_mode {
            config.auth.mode = mode;
        }
        if self.jwt_secret.is_some() {
            config.auth.jwt_secret = self.jwt_secret;
        }
        if self.jwt_audience.is_some() {
            config.auth.jwt_audience = self.jwt_audience;
        }
        if let Some(secs) = self.script_timeout {
            config.executor.timeout_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DashboardConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.listen, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.scripts_dir, PathBuf::from("./scripts"));
        assert_eq!(
            config.host_config().scripts_dir,
            std::env::current_dir().unwrap().join("scripts")
        );
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.executor.timeout_secs, 300);
        assert_eq!(config.executor.max_output_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
scripts_dir = "/srv/vbox/scripts"

[store]
backend = "supabase"
supabase_url = "https://example.supabase.co"
supabase_anon_key = "anon"

[auth]
mode = "supabase"

[executor]
timeout_secs = 60
"#,
        )
        .unwrap();

        let mut config = DashboardConfig::load(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Supabase);
        assert_eq!(config.auth.mode, AuthMode::Supabase);
        assert_eq!(config.executor.max_output_bytes, 10 * 1024 * 1024);
        config.validate().unwrap();

        ConfigOverrides {
            listen: Some("0.0.0.0:8080".parse().unwrap()),
            script_timeout: Some(5),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.listen.port(), 8080);
        let host = config.host_config();
        assert_eq!(host.script_timeout, Duration::from_secs(5));
        assert_eq!(host.scripts_dir, PathBuf::from("/srv/vbox/scripts"));
    }

    #[test]
    fn test_validate_requires_secrets() {
        let config = DashboardConfig::default();
        assert!(config.validate().is_err());

        let mut config = DashboardConfig::default();
        config.auth.jwt_secret = Some("secret".to_string());
        config.validate().unwrap();

        config.store.backend = StoreBackend::Supabase;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listen = 12").unwrap();
        let err = DashboardConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }
}
