use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::ApiError;

const REDACTED: &str = "****";

/// Key suffixes whose values never appear in logs.
const SECRET_SUFFIXES: [&str; 4] = ["api_key", "secret", "password", "token"];

/// Environment variables understood on top of the YAML files, mapped to their
/// position in the config tree.
const ENV_OVERRIDES: [(&str, &[&str], EnvKind); 11] = [
    ("OPENAI_API_KEY", &["openai", "api_key"], EnvKind::Text),
    ("OPENAI_BASE_URL", &["openai", "base_url"], EnvKind::Text),
    ("EMBEDDING_MODEL", &["openai", "embedding_model"], EnvKind::Text),
    ("LLM_MODEL", &["openai", "chat_model"], EnvKind::Text),
    ("ADMIN_API_KEY", &["auth", "admin_api_key"], EnvKind::Text),
    ("CHUNK_SIZE", &["rag", "chunk_size"], EnvKind::Integer),
    ("CHUNK_OVERLAP", &["rag", "chunk_overlap"], EnvKind::Integer),
    ("TOP_K", &["rag", "top_k"], EnvKind::Integer),
    ("MAX_DAILY_REQUESTS", &["rate_limit", "max_daily_requests"], EnvKind::Integer),
    ("HOST", &["server", "host"], EnvKind::Text),
    ("PORT", &["server", "port"], EnvKind::Integer),
];

#[derive(Clone, Copy)]
enum EnvKind {
    Text,
    Integer,
}

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    /// Public config overlaid with the secrets file. Missing or unreadable
    /// files count as empty.
    pub fn load_config(&self) -> Value {
        let mut config = load_yaml_file(self.paths.config_file());
        merge_into(&mut config, load_yaml_file(&self.paths.secrets_file()));
        config
    }

    pub fn load_settings(&self) -> Result<Settings, ApiError> {
        let mut config = self.load_config();
        apply_env_overrides(&mut config, |name| env::var(name).ok())?;
        settings_from_value(config)
    }
}

/// Validates a raw config tree and converts it into typed settings.
pub fn settings_from_value(config: Value) -> Result<Settings, ApiError> {
    validate_config(&config)?;
    serde_json::from_value(config)
        .map_err(|err| ApiError::BadRequest(format!("Invalid config: {}", err)))
}

pub fn apply_env_overrides<F>(config: &mut Value, lookup: F) -> Result<(), ApiError>
where
    F: Fn(&str) -> Option<String>,
{
    for (name, path, kind) in ENV_OVERRIDES {
        let Some(raw) = lookup(name) else {
            continue;
        };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let value = match kind {
            EnvKind::Text => Value::String(raw.to_string()),
            EnvKind::Integer => raw.parse::<u64>().map(Value::from).map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid environment variable {}: expected a non-negative integer",
                    name
                ))
            })?,
        };
        ensure_object_path(config, path, value);
    }
    Ok(())
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

/// Objects merge key by key; any other overlay value replaces what was there.
fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Copy of `value` with every non-null secret replaced by a placeholder.
pub fn redacted(mut value: Value) -> Value {
    mask_secrets(&mut value);
    value
}

fn mask_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if is_secret_key(key) && !entry.is_null() {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    mask_secrets(entry);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_secrets),
        _ => {}
    }
}

fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_SUFFIXES.iter().any(|suffix| key.ends_with(suffix))
}
