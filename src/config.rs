//! Settings resolution: canonical env -> legacy env -> settings.json -> default.
//! Generalizes the teacher's `db::db_path`/`log::log_path` "env var with a
//! dirs-based fallback" idiom into one resolver used uniformly (REDESIGN
//! FLAGS: `resolveSetting(key)`).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use serde_json::Value;

fn warned_keys() -> &'static Mutex<HashSet<String>> {
    static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    WARNED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// One entry in the resolution table: canonical env name, legacy env name,
/// settings.json key, compiled default.
pub struct SettingSpec {
    pub canonical_env: &'static str,
    pub legacy_env: Option<&'static str>,
    pub settings_key: &'static str,
    pub default: Option<&'static str>,
}

pub const PROVIDER: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_PROVIDER",
    legacy_env: Some("CM_EXECUTOR_MODE"),
    settings_key: "provider",
    default: Some("hosted-chat"),
};
pub const MODEL: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_MODEL",
    legacy_env: Some("CLAUDE_MEM_MODEL"),
    settings_key: "model",
    default: Some("claude-sonnet-4-5-20250929"),
};
pub const API_KEY: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_API_KEY",
    legacy_env: Some("ANTHROPIC_API_KEY"),
    settings_key: "apiKey",
    default: None,
};
pub const BASE_URL: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_BASE_URL",
    legacy_env: Some("ANTHROPIC_BASE_URL"),
    settings_key: "baseUrl",
    default: Some("https://api.anthropic.com"),
};
pub const FALLBACK_POLICY: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_FALLBACK_POLICY",
    legacy_env: None,
    settings_key: "fallbackPolicy",
    default: Some("auto"),
};
pub const WORKER_HOST: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_HOST",
    legacy_env: None,
    settings_key: "host",
    default: Some("127.0.0.1"),
};
pub const WORKER_PORT: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_PORT",
    legacy_env: None,
    settings_key: "port",
    default: Some("37777"),
};
pub const DATA_DIR: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_DATA_DIR",
    legacy_env: Some("REMEM_DATA_DIR"),
    settings_key: "dataDir",
    default: None,
};
pub const CONTEXT_OBS_COUNT: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_CONTEXT_OBS_COUNT",
    legacy_env: None,
    settings_key: "contextObservationCount",
    default: Some("10"),
};
pub const CONTEXT_INCLUDE_SUMMARY: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_CONTEXT_INCLUDE_SUMMARY",
    legacy_env: None,
    settings_key: "contextIncludeLastSummary",
    default: Some("true"),
};
pub const TRANSCRIPT_ROOT: SettingSpec = SettingSpec {
    canonical_env: "MEMKEEP_TRANSCRIPT_ROOT",
    legacy_env: Some("CODEX_HOME"),
    settings_key: "transcriptRoot",
    default: None,
};

pub fn transcript_root() -> PathBuf {
    resolve(&TRANSCRIPT_ROOT)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".codex")
                .join("sessions")
        })
}

/// Keys whose values are masked on read (spec §8 testable property).
pub const SECRET_KEYS: &[&str] = &["apiKey"];
pub const MASK_SENTINEL: &str = "***MASKED***";

pub fn data_dir() -> PathBuf {
    resolve(&DATA_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".memkeep")
        })
}

pub fn settings_path() -> PathBuf {
    data_dir().join("settings.json")
}

fn load_settings_file() -> Option<Value> {
    let path = settings_path();
    let raw = std::fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&raw).ok()?;
    Some(flatten_legacy(value))
}

/// Legacy settings.json used a nested `{provider: {name, model}}` shape;
/// flatten it into the flat key-value schema spec §6 requires on read.
fn flatten_legacy(value: Value) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };
    if let Some(Value::Object(provider)) = map.remove("provider") {
        for (k, v) in provider {
            map.entry(format!("provider{}{}", &k[..1].to_uppercase(), &k[1..]))
                .or_insert(v);
        }
    }
    Value::Object(map)
}

/// Resolve a setting following canonical env -> legacy env -> file -> default.
pub fn resolve(spec: &SettingSpec) -> Option<String> {
    if let Ok(v) = std::env::var(spec.canonical_env) {
        return Some(v);
    }
    if let Some(legacy) = spec.legacy_env {
        if let Ok(v) = std::env::var(legacy) {
            warn_once(spec.canonical_env, legacy);
            return Some(v);
        }
    }
    if let Some(file) = load_settings_file() {
        if let Some(v) = file.get(spec.settings_key) {
            if let Some(s) = v.as_str() {
                return Some(s.to_string());
            }
            return Some(v.to_string());
        }
    }
    spec.default.map(|s| s.to_string())
}

fn warn_once(canonical: &str, legacy: &str) {
    let mut seen = warned_keys().lock().unwrap();
    if seen.insert(legacy.to_string()) {
        tracing::warn!(
            legacy_env = legacy,
            canonical_env = canonical,
            "using deprecated environment variable; switch to the canonical name"
        );
    }
}

/// Mask an API-key-like setting value on read, preserving only the last
/// four characters (spec §8 testable property). Operates on chars, not
/// bytes, so a secret ending mid-codepoint never panics.
pub fn mask_secret(value: &str) -> String {
    let char_count = value.chars().count();
    if char_count <= 4 {
        return MASK_SENTINEL.to_string();
    }
    let suffix: String = value.chars().skip(char_count - 4).collect();
    format!("{MASK_SENTINEL}{suffix}")
}

pub fn read_settings_masked() -> Result<Value> {
    let mut merged = load_settings_file().unwrap_or_else(|| Value::Object(Default::default()));
    if let Value::Object(ref mut map) = merged {
        for key in SECRET_KEYS {
            if let Some(v) = map.get_mut(*key) {
                if let Some(s) = v.as_str() {
                    *v = Value::String(mask_secret(s));
                }
            }
        }
    }
    Ok(merged)
}

pub fn write_settings(patch: Value) -> Result<()> {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut current = load_settings_file().unwrap_or_else(|| Value::Object(Default::default()));
    let (Value::Object(ref mut cur_map), Value::Object(patch_map)) = (&mut current, patch) else {
        anyhow::bail!("settings patch must be a JSON object");
    };
    for (k, v) in patch_map {
        cur_map.insert(k, v);
    }
    let serialized = serde_json::to_string_pretty(&current)?;
    std::fs::write(&path, serialized)
        .with_context(|| format!("failed to write settings: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_preserves_last_four_chars() {
        let masked = mask_secret("sk-ant-abcdef1234");
        assert!(masked.starts_with(MASK_SENTINEL));
        assert!(masked.ends_with("1234"));
    }

    #[test]
    fn mask_short_value_is_fully_masked() {
        assert_eq!(mask_secret("ab"), MASK_SENTINEL);
    }

    #[test]
    fn flatten_legacy_nested_provider_shape() {
        let nested = serde_json::json!({"provider": {"name": "hosted-chat", "model": "x"}});
        let flat = flatten_legacy(nested);
        assert_eq!(flat["providerName"], "hosted-chat");
        assert_eq!(flat["providerModel"], "x");
    }
}
