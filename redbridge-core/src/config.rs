use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Environment overrides for the shared automation credential pair.
const ENV_USERNAME: &str = "REDBRIDGE_PORTAL_USERNAME";
const ENV_PASSWORD: &str = "REDBRIDGE_PORTAL_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedbridgeConfig {
    pub portal: PortalSection,
    #[serde(default)]
    pub chromium: ChromiumSection,
    #[serde(default)]
    pub selectors: SelectorSection,
    #[serde(default)]
    pub diagnostics: DiagnosticsSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalSection {
    /// Base URL of the back-office portal. Required at first use.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Bounded wait applied to every structural locator lookup.
    #[serde(default = "default_field_wait_ms")]
    pub field_wait_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Settle delay between cascading dropdown selections.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Fixed settle interval after submitting credentials.
    #[serde(default = "default_login_settle_ms")]
    pub login_settle_ms: u64,
    /// Whole-attempt ceiling; a hang anywhere in the portal UI cannot
    /// block a worker past this.
    #[serde(default = "default_pipeline_timeout_seconds")]
    pub pipeline_timeout_seconds: u64,
    /// Upper bound on the dropdown option scan.
    #[serde(default = "default_option_scan_cap")]
    pub option_scan_cap: usize,
    /// Opt-in debug mode: keep the browser open after a completed
    /// submission so an operator can inspect the portal's final state.
    #[serde(default)]
    pub hold_open_for_inspection: bool,
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_field_wait_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_settle_ms() -> u64 {
    1_500
}

fn default_login_settle_ms() -> u64 {
    4_000
}

fn default_pipeline_timeout_seconds() -> u64 {
    180
}

fn default_option_scan_cap() -> usize {
    20
}

impl PortalSection {
    /// Applies `REDBRIDGE_PORTAL_USERNAME` / `REDBRIDGE_PORTAL_PASSWORD`
    /// on top of whatever the file provided.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(username) = std::env::var(ENV_USERNAME) {
            if !username.trim().is_empty() {
                self.username = username;
            }
        }
        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            if !password.trim().is_empty() {
                self.password = password;
            }
        }
    }

    pub fn field_wait(&self) -> Duration {
        Duration::from_millis(self.field_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn login_settle(&self) -> Duration {
        Duration::from_millis(self.login_settle_ms)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChromiumSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ChromiumSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            disable_gpu: false,
            request_timeout_seconds: Some(30),
        }
    }
}

/// Every structural locator lives here so drift in the portal's DOM is
/// a data change, not a logic change.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    /// Overrides for the built-in locator defaults, keyed by field name.
    pub overrides: HashMap<String, String>,
    /// Operation-type label -> control selector. Labels missing here are
    /// unsupported operation kinds.
    pub operations: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub enabled: bool,
    pub screenshot_dir: String,
}

impl Default for DiagnosticsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            screenshot_dir: "diagnostics/screenshots".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Whole-attempt retries, applied to timeout-class failures only.
    pub max_attempts: usize,
    pub delay_seconds: u64,
    pub jitter_seconds: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            delay_seconds: 5,
            jitter_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    /// Anything other than "production" includes error detail in
    /// responses.
    pub environment: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3020".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl ServerSection {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RedbridgeConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    let mut config: RedbridgeConfig =
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            source,
            path: path.to_path_buf(),
        })?;
    config.portal.apply_env_overrides();
    Ok(config)
}
