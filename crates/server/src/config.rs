use std::{collections::HashMap, env, path::Path};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

/// Variables read before `APP__*` existed. `APP__*` wins when both are set.
const LEGACY_ENV: [&str; 3] = ["SERVER_BIND", "DATABASE_URL", "FRONTEND_URL"];

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    /// Origin allowed by CORS, e.g. a separately served web frontend.
    #[serde(default)]
    pub frontend_url: Option<String>,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            database_url: "sqlite://./data/server.db".into(),
            frontend_url: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Defaults, then `server.toml`, then legacy variables, then `APP__*` variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new("server.toml"), env::vars().collect())
}

pub fn load_settings_from(
    config_file: &Path,
    vars: HashMap<String, String>,
) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let legacy: HashMap<String, String> = vars
        .iter()
        .filter(|(key, _)| LEGACY_ENV.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let mut settings: Settings = Config::builder()
        .set_default("server_bind", defaults.server_bind)?
        .set_default("database_url", defaults.database_url)?
        .set_default("max_body_bytes", defaults.max_body_bytes as u64)?
        .add_source(File::from(config_file).required(false))
        .add_source(Environment::default().source(Some(legacy)))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true)
                .source(Some(vars)),
        )
        .build()
        .context("failed to assemble server configuration")?
        .try_deserialize()
        .context("invalid server configuration")?;

    settings.frontend_url = settings
        .frontend_url
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty());
    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

/// Accepts bare paths and `sqlite:` shorthands and turns them into `sqlite://` URLs.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    let path = raw_database_url
        .strip_prefix("sqlite:")
        .unwrap_or(raw_database_url);
    format!("sqlite://{}", path.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
