//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Each account secret may be written inline or referenced by env-var name
//! (`password_env = "STEAM_PASSWORD_1"`) and resolved at load time.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::selector::TieBreak;
use crate::engine::PipelineConfig;
use crate::types::{AppContext, Credentials, SteamId, COMMUNITY_CONTEXT_ID, STEAM_COMMUNITY_APP_ID};

/// Top-level application configuration.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

#[derive(Debug, Deserialize)]
pub struct AccountsConfig {
    pub primary: AccountConfig,
    pub secondary: AccountConfig,
}

#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub shared_secret: Option<SecretString>,
    #[serde(default)]
    pub shared_secret_env: Option<String>,
    #[serde(default)]
    pub identity_secret: Option<SecretString>,
    #[serde(default)]
    pub identity_secret_env: Option<String>,
    /// SteamID64 of the account.
    pub steam_id: u64,
}

/// Delays and policies, all in whole seconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineSettings {
    /// Delay between the secondary and the primary login.
    pub login_stagger_secs: u64,
    /// Delay between the last login and the first cycle.
    pub warmup_secs: u64,
    pub prepare_delay_secs: u64,
    pub confirm_delay_secs: u64,
    pub accept_delay_secs: u64,
    pub cycle_delay_secs: u64,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    /// Renew a web session this long before it expires.
    pub session_refresh_margin_secs: u64,
    pub tie_break: TieBreak,
    pub offer_message: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            login_stagger_secs: 20,
            warmup_secs: 10,
            prepare_delay_secs: 2,
            confirm_delay_secs: 10,
            accept_delay_secs: 3,
            cycle_delay_secs: 10,
            poll_interval_secs: 5,
            poll_timeout_secs: 60,
            session_refresh_margin_secs: 300,
            tie_break: TieBreak::Primary,
            offer_message: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InventoryConfig {
    pub app_id: u32,
    pub context_id: u64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            app_id: STEAM_COMMUNITY_APP_ID,
            context_id: COMMUNITY_CONTEXT_ID,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (label, account) in [("primary", &self.accounts.primary), ("secondary", &self.accounts.secondary)] {
            if account.username.trim().is_empty() {
                anyhow::bail!("accounts.{label}.username is empty");
            }
            if !SteamId(account.steam_id).is_individual() {
                anyhow::bail!("accounts.{label}.steam_id {} is not a SteamID64", account.steam_id);
            }
        }
        if self.accounts.primary.steam_id == self.accounts.secondary.steam_id {
            anyhow::bail!("primary and secondary accounts must be different");
        }
        if self.pipeline.poll_timeout_secs > 0 && self.pipeline.poll_interval_secs == 0 {
            anyhow::bail!("pipeline.poll_interval_secs must be positive when polling is enabled");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

impl AccountConfig {
    /// Resolve every secret into login credentials.
    pub fn credentials(&self) -> Result<Credentials> {
        Ok(Credentials {
            account_name: self.username.clone(),
            password: resolve_secret(&self.username, "password", &self.password, &self.password_env)?,
            shared_secret: resolve_secret(
                &self.username,
                "shared_secret",
                &self.shared_secret,
                &self.shared_secret_env,
            )?,
            identity_secret: resolve_secret(
                &self.username,
                "identity_secret",
                &self.identity_secret,
                &self.identity_secret_env,
            )?,
            steam_id: SteamId(self.steam_id),
        })
    }
}

/// Inline value wins over the env-var reference.
fn resolve_secret(
    username: &str,
    field: &str,
    inline: &Option<SecretString>,
    env_name: &Option<String>,
) -> Result<SecretString> {
    use secrecy::ExposeSecret;

    if let Some(value) = inline {
        return Ok(SecretString::new(value.expose_secret().clone()));
    }
    match env_name {
        Some(env) => AppConfig::resolve_env(env).map(SecretString::new),
        None => anyhow::bail!("{username}: neither {field} nor {field}_env is set"),
    }
}

impl PipelineSettings {
    pub fn login_stagger(&self) -> Duration {
        Duration::from_secs(self.login_stagger_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    /// Build the pipeline's runtime configuration.
    pub fn pipeline_config(&self, inventory: &InventoryConfig) -> PipelineConfig {
        PipelineConfig {
            context: AppContext {
                app_id: inventory.app_id,
                context_id: inventory.context_id,
            },
            tie_break: self.tie_break,
            prepare_delay: Duration::from_secs(self.prepare_delay_secs),
            confirm_delay: Duration::from_secs(self.confirm_delay_secs),
            accept_delay: Duration::from_secs(self.accept_delay_secs),
            cycle_delay: Duration::from_secs(self.cycle_delay_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
            session_margin: Duration::from_secs(self.session_refresh_margin_secs),
            offer_message: self.offer_message.clone(),
        }
    }
}
