//! `anvil` configuration stored as TOML, by default under `.anvil/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anvil_agent::AgentConfig;
use anvil_llm::HttpBackendConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "ANVIL_CONFIG";
pub const API_KEY_ENV: &str = "ANVIL_API_KEY";
pub const DEFAULT_CONFIG_PATH: &str = ".anvil/config.toml";

/// Everything the CLI needs to build a backend, a session and an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnvilConfig {
    pub backend: HttpBackendConfig,
    pub session: SessionSettings,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    /// Project root. Defaults to the directory `anvil` runs in.
    pub workspace: Option<PathBuf>,
    pub default_model: String,
    pub chat_id: Option<String>,
}

impl AnvilConfig {
    pub fn validate(&self) -> Result<()> {
        self.backend
            .validate()
            .map_err(|error| anyhow!("backend: {error}"))?;
        self.agent
            .validate()
            .map_err(|error| anyhow!("agent: {error}"))?;
        Ok(())
    }

    /// Replaces the file's API key with `api_key` when one is set.
    pub fn apply_env_overrides(&mut self, api_key: Option<String>) {
        if let Some(api_key) = api_key.filter(|key| !key.trim().is_empty()) {
            self.backend.api_key = Some(api_key);
        }
    }
}

/// `--config` wins, then `ANVIL_CONFIG`, then the workspace default.
pub fn config_path(explicit: Option<&Path>, from_env: Option<String>, workspace: &Path) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match from_env.filter(|value| !value.trim().is_empty()) {
        Some(path) => PathBuf::from(path),
        None => workspace.join(DEFAULT_CONFIG_PATH),
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AnvilConfig::default()`.
pub fn load_config(path: &Path) -> Result<AnvilConfig> {
    if !path.exists() {
        let cfg = AnvilConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AnvilConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn write_config(path: &Path, cfg: &AnvilConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, AnvilConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".anvil").join("config.toml");
        let mut cfg = AnvilConfig::default();
        cfg.session.default_model = "llama3".to_string();
        cfg.agent.max_steps = 3;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "[backend]\nbase_url = \"https://chat.example.test/\"\n\n[agent]\nauto_apply = true\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.backend.normalized_base_url(), "https://chat.example.test");
        assert_eq!(cfg.backend.retries, 2);
        assert!(cfg.agent.auto_apply);
        assert_eq!(cfg.agent.max_steps, AgentConfig::default().max_steps);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[backend]\nbase_url = \"ftp://nope\"\n").expect("write");

        let error = load_config(&path).expect_err("ftp scheme should fail");
        assert!(format!("{error:#}").contains("base_url"));
    }

    #[test]
    fn config_path_precedence() {
        let workspace = Path::new("/work");
        assert_eq!(
            config_path(Some(Path::new("/x.toml")), Some("/env.toml".into()), workspace),
            PathBuf::from("/x.toml")
        );
        assert_eq!(
            config_path(None, Some("/env.toml".into()), workspace),
            PathBuf::from("/env.toml")
        );
        assert_eq!(
            config_path(None, Some("  ".into()), workspace),
            workspace.join(DEFAULT_CONFIG_PATH)
        );
    }

    #[test]
    fn env_api_key_overrides_file() {
        let mut cfg = AnvilConfig::default();
        cfg.backend.api_key = Some("from-file".to_string());
        cfg.apply_env_overrides(None);
        assert_eq!(cfg.backend.api_key.as_deref(), Some("from-file"));
        cfg.apply_env_overrides(Some("from-env".to_string()));
        assert_eq!(cfg.backend.api_key.as_deref(), Some("from-env"));
    }
}
