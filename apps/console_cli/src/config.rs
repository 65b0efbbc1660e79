use std::{fmt::Display, fs, path::Path, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use console_core::{not_found_as_empty, ListConfig};
use serde::Deserialize;
use shared::query::DEFAULT_PAGE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub loading_grace_ms: u64,
    pub page_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8080/api".into(),
            request_timeout_ms: 10_000,
            poll_interval_ms: 2_000,
            loading_grace_ms: 300,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Config for a resource list; a `NotFound` answer to a search shows as no matches.
    pub fn list_config(&self, resource: &str) -> ListConfig {
        ListConfig::named(resource)
            .with_loading_grace(Duration::from_millis(self.loading_grace_ms))
            .with_search_error_as_empty(not_found_as_empty())
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    load_settings_from(path, |key| std::env::var(key).ok())
}

/// Defaults, then the TOML file at `path` when it exists, then environment
/// overrides. `APP__<FIELD>` wins over `CONSOLE_<FIELD>`.
pub fn load_settings_from<E>(path: &Path, env: E) -> Result<Settings>
where
    E: Fn(&str) -> Option<String>,
{
    let mut settings = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        toml::from_str::<Settings>(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?
    } else {
        Settings::default()
    };

    if let Some(v) = env_override(&env, "api_base_url") {
        settings.api_base_url = v;
    }
    override_parsed(&env, "request_timeout_ms", &mut settings.request_timeout_ms)?;
    override_parsed(&env, "poll_interval_ms", &mut settings.poll_interval_ms)?;
    override_parsed(&env, "loading_grace_ms", &mut settings.loading_grace_ms)?;
    override_parsed(&env, "page_size", &mut settings.page_size)?;

    Ok(settings)
}

fn env_override<E>(env: &E, field: &str) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
{
    let field = field.to_ascii_uppercase();
    env(&format!("APP__{field}")).or_else(|| env(&format!("CONSOLE_{field}")))
}

fn override_parsed<E, T>(env: &E, field: &str, slot: &mut T) -> Result<()>
where
    E: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = env_override(env, field) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|error| anyhow::anyhow!("invalid {field} override '{raw}': {error}"))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
