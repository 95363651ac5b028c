use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub llm: Option<LlmConfig>,
    pub api_keys: Option<ApiKeysConfig>,
    pub limits: Option<LimitsConfig>,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_base: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub json_mode: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub openai_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_input_chars: Option<usize>,
    pub llm_timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub num_workers: Option<usize>,
    pub requests_per_minute: Option<u32>,
    pub max_archive_size_mb: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: Option<String>,
    pub task: Option<String>,
    pub output_dir: Option<String>,
}

/// Platform config directory path: `<config_dir>/docscribe/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("docscribe").join("config.toml"))
}

/// Load config by cascading CWD `.docscribe.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".docscribe.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// First `Some` from `overlay`, then `base`, for one field of an optional section.
fn pick<S, T>(overlay: &Option<S>, base: &Option<S>, field: impl Fn(&S) -> Option<T>) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        llm: Some(LlmConfig {
            api_base: pick(&overlay.llm, &base.llm, |l| l.api_base.clone()),
            model: pick(&overlay.llm, &base.llm, |l| l.model.clone()),
            temperature: pick(&overlay.llm, &base.llm, |l| l.temperature),
            max_tokens: pick(&overlay.llm, &base.llm, |l| l.max_tokens),
            json_mode: pick(&overlay.llm, &base.llm, |l| l.json_mode),
        }),
        api_keys: Some(ApiKeysConfig {
            openai_api_key: pick(&overlay.api_keys, &base.api_keys, |a| {
                a.openai_api_key.clone()
            }),
        }),
        limits: Some(LimitsConfig {
            max_input_chars: pick(&overlay.limits, &base.limits, |l| l.max_input_chars),
            llm_timeout_secs: pick(&overlay.limits, &base.limits, |l| l.llm_timeout_secs),
            max_retries: pick(&overlay.limits, &base.limits, |l| l.max_retries),
            num_workers: pick(&overlay.limits, &base.limits, |l| l.num_workers),
            requests_per_minute: pick(&overlay.limits, &base.limits, |l| l.requests_per_minute),
            max_archive_size_mb: pick(&overlay.limits, &base.limits, |l| l.max_archive_size_mb),
        }),
        output: Some(OutputConfig {
            format: pick(&overlay.output, &base.output, |o| o.format.clone()),
            task: pick(&overlay.output, &base.output, |o| o.task.clone()),
            output_dir: pick(&overlay.output, &base.output, |o| o.output_dir.clone()),
        }),
    }
}

/// A fully populated config with the built-in defaults and no API key,
/// suitable as a starting point for users to edit.
pub fn starter() -> ConfigFile {
    let defaults = crate::Config::default();
    ConfigFile {
        llm: Some(LlmConfig {
            api_base: Some(defaults.api_base),
            model: Some(defaults.model),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            json_mode: Some(defaults.json_mode),
        }),
        api_keys: Some(ApiKeysConfig::default()),
        limits: Some(LimitsConfig {
            max_input_chars: Some(defaults.max_input_chars),
            llm_timeout_secs: Some(defaults.llm_timeout_secs),
            max_retries: Some(defaults.max_retries),
            num_workers: Some(defaults.num_workers),
            requests_per_minute: Some(defaults.requests_per_minute),
            max_archive_size_mb: Some(defaults.max_archive_size_mb),
        }),
        output: Some(OutputConfig {
            format: Some(defaults.default_format.extension().to_string()),
            task: Some(defaults.default_task.as_str().to_string()),
            output_dir: None,
        }),
    }
}

/// Save the config to the platform config directory.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf, String> {
    let path = config_path().ok_or_else(|| "Could not determine config directory".to_string())?;
    save_config_to(config, &path)?;
    Ok(path)
}

/// Save the config to an explicit path, creating parent directories.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let content =
        toml::to_string_pretty(config).map_err(|e| format!("Failed to serialize config: {}", e))?;
    std::fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_sections_deserialize_as_none() {
        let toml_str = "[llm]\nmodel = \"gpt-4o\"\n";
        let parsed: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.llm.unwrap().model.as_deref(), Some("gpt-4o"));
        assert!(parsed.limits.is_none());
        assert!(parsed.api_keys.is_none());
    }

    #[test]
    fn merge_overlay_wins() {
        let base = ConfigFile {
            llm: Some(LlmConfig {
                model: Some("base-model".into()),
                api_base: Some("http://base".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let overlay = ConfigFile {
            llm: Some(LlmConfig {
                model: Some("overlay-model".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, overlay);
        let llm = merged.llm.unwrap();
        assert_eq!(llm.model.as_deref(), Some("overlay-model"));
        assert_eq!(llm.api_base.as_deref(), Some("http://base"));
    }

    #[test]
    fn merge_base_preserved_when_overlay_absent() {
        let base = ConfigFile {
            limits: Some(LimitsConfig {
                num_workers: Some(8),
                ..Default::default()
            }),
            output: Some(OutputConfig {
                format: Some("pdf".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge(base, ConfigFile::default());
        assert_eq!(merged.limits.unwrap().num_workers, Some(8));
        assert_eq!(merged.output.unwrap().format.as_deref(), Some("pdf"));
    }

    #[test]
    fn starter_config_saves_and_reloads() {
        let dir = std::env::temp_dir().join(format!("docscribe_cfg_test_{}", std::process::id()));
        let path = dir.join("nested").join("config.toml");
        let _ = std::fs::remove_dir_all(&dir);

        save_config_to(&starter(), &path).unwrap();
        let loaded = load_from_path(&path).expect("starter config should reload");
        let config = crate::Config::from_config_file(&loaded);
        assert_eq!(config.model, crate::DEFAULT_MODEL);
        assert_eq!(config.max_input_chars, 60_000);
        assert!(config.api_key.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unparsable_file_is_ignored() {
        let dir = std::env::temp_dir().join(format!("docscribe_bad_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[llm\nmodel = ").unwrap();
        assert!(load_from_path(&path).is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
