#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VIRAL_PORT: u16 = 3001;
pub const DEFAULT_VIRAL_HOST: &str = "127.0.0.1";
pub const DEFAULT_CANDIDATE_POOL: usize = 100;
pub const DEFAULT_MAX_RESULTS: usize = 50;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_TARGET_COUNTRIES: &[&str] = &["US", "GB", "CA", "AU", "NZ", "IE"];
pub const DEFAULT_AUDIENCE_LANGUAGE: &str = "en";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub viral_host: String,
    pub viral_port: u16,
    pub youtube_api_key: Option<String>,
    pub match_channel: bool,
    pub candidate_pool: usize,
    pub max_results: usize,
    pub cache_ttl_secs: u64,
    pub target_countries: Vec<String>,
    pub audience_language: Option<String>,
    pub log_filter: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub viral_host: Option<String>,
    pub viral_port: Option<u16>,
    pub youtube_api_key: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_runtime_settings_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> RuntimeSettings {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimeSettings {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);
    let parsed = |key: &str| lookup(key).and_then(|value| value.parse::<u64>().ok());

    let viral_host = non_blank(overrides.viral_host)
        .or_else(|| lookup("VIRAL_HOST"))
        .unwrap_or_else(|| DEFAULT_VIRAL_HOST.to_string());
    let viral_port = overrides
        .viral_port
        .or_else(|| lookup("VIRAL_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_VIRAL_PORT);
    let youtube_api_key =
        non_blank(overrides.youtube_api_key).or_else(|| lookup("YOUTUBE_API_KEY"));
    let match_channel = lookup("VIRAL_MATCH_CHANNEL")
        .and_then(|value| parse_bool(&value))
        .unwrap_or(false);
    let candidate_pool = parsed("VIRAL_CANDIDATE_POOL")
        .and_then(|value| usize::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_CANDIDATE_POOL);
    let max_results = parsed("VIRAL_MAX_RESULTS")
        .and_then(|value| usize::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_RESULTS);
    let cache_ttl_secs = parsed("VIRAL_CACHE_TTL_SECS").unwrap_or(DEFAULT_CACHE_TTL_SECS);
    // An explicitly empty list disables the country half of the audience filter,
    // so this one reads raw values instead of going through `lookup`.
    let target_countries = match raw_value("VIRAL_TARGET_COUNTRIES", file_vars, &env_lookup) {
        Some(value) => split_list(&value),
        None => DEFAULT_TARGET_COUNTRIES
            .iter()
            .map(|code| code.to_string())
            .collect(),
    };
    let audience_language = match raw_value("VIRAL_AUDIENCE_LANGUAGE", file_vars, &env_lookup) {
        Some(value) => Some(value.trim().to_ascii_lowercase()).filter(|value| !value.is_empty()),
        None => Some(DEFAULT_AUDIENCE_LANGUAGE.to_string()),
    };
    let log_filter = lookup("VIRAL_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let log_format = match lookup("VIRAL_LOG_FORMAT").as_deref() {
        Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Text,
    };

    RuntimeSettings {
        viral_host,
        viral_port,
        youtube_api_key,
        match_channel,
        candidate_pool,
        max_results,
        cache_ttl_secs,
        target_countries,
        audience_language,
        log_filter,
        log_format,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Trimmed value, or `None` when it is missing or blank.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Environment first, then the `.env` file. Blank values count as unset.
fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    non_blank(env_lookup(key)).or_else(|| non_blank(file_vars.get(key).cloned()))
}

/// Same precedence as [`lookup_value`] but keeps blank values.
fn raw_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_ascii_uppercase())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
