use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Immutable run configuration.  Every field has a default, so the YAML file
/// is optional and may set any subset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// Provider API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Root of the open API; actions are posted to `{api_url}/{Action}`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Per-request timeout in seconds, covering connect through body read.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_api_url() -> String {
    "https://e.coding.net/open-api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("gitfile-patch/", env!("CARGO_PKG_VERSION")).to_string()
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Name of the environment variable that holds the API username.
    #[serde(default = "default_username_env")]
    pub username_env: String,
    /// Name of the environment variable that holds the API password or token.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username_env: default_username_env(),
            password_env: default_password_env(),
        }
    }
}

fn default_username_env() -> String {
    "CODING_USERNAME".to_string()
}

fn default_password_env() -> String {
    "CODING_PASSWORD".to_string()
}

/// Basic-auth pair attached to every API request.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read the pair from the environment variables named in `config`.
    ///
    /// Missing variables are not an error here: the provider rejects the
    /// request and the run fails with a provider error.
    pub fn from_env(config: &CredentialsConfig) -> Self {
        let username = std::env::var(&config.username_env).unwrap_or_default();
        let password = std::env::var(&config.password_env).unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            warn!(
                username_env = %config.username_env,
                password_env = %config.password_env,
                "credential env vars are empty, API requests will likely be rejected"
            );
        }
        Self::new(username, password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("has_password", &!self.password.is_empty())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
pub fn validate_config(config: &Config) -> Result<()> {
    let url = &config.api.api_url;
    anyhow::ensure!(
        url.starts_with("https://") || url.starts_with("http://"),
        "api_url must be an http(s) URL, got {url:?}"
    );
    anyhow::ensure!(
        config.api.request_timeout_secs > 0,
        "request_timeout_secs must be greater than 0"
    );
    anyhow::ensure!(
        config.api.connect_timeout_secs > 0,
        "connect_timeout_secs must be greater than 0"
    );
    anyhow::ensure!(
        !config.credentials.username_env.is_empty() && !config.credentials.password_env.is_empty(),
        "credential env var names must not be empty"
    );
    Ok(())
}
