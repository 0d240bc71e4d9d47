//! Configuration management for marginalia
//!
//! Stores settings in ~/.config/marginalia/config.json. Every timing and
//! threshold the engine uses lives in [`EngineConfig`] so hosts can tune the
//! assistant without touching code.

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables for trigger policy, scheduling, presentation and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum words before any proactive suggestion
    pub min_words: usize,
    /// Minimum sentences before any proactive suggestion
    pub min_sentences: usize,
    /// Never trigger while the user typed more recently than this
    pub idle_guard_ms: u64,
    /// Minimum gap between two proactive suggestions
    pub cooldown_ms: u64,
    pub help_seeking_idle_ms: u64,
    pub complete_thoughts_idle_ms: u64,
    pub incomplete_thought_idle_ms: u64,
    pub repetition_idle_ms: u64,
    pub expansion_idle_ms: u64,
    /// How far back (in characters) to look for help-seeking phrases
    pub keyword_window_chars: usize,
    /// Characters of the note fingerprinted for de-duplication
    pub fingerprint_chars: usize,
    /// Interval between heuristic checks in a polling loop
    pub poll_interval_ms: u64,
    /// Total lifetime of one polling loop
    pub poll_window_ms: u64,
    /// Indicator auto-expands after this long untouched
    pub auto_expand_ms: u64,
    /// Characters revealed per animation tick
    pub reveal_chars_per_tick: usize,
    pub reveal_tick_ms: u64,
    /// Answers longer than this render in two columns
    pub column_split_chars: usize,
    pub column_split_lines: usize,
    pub panel_gutter: f64,
    pub panel_width: f64,
    pub panel_height: f64,
    /// Characters of each attachment folded into prompts
    pub attachment_budget_chars: usize,
    /// Prior Q&A pairs folded into question prompts
    pub prior_answers_limit: usize,
    /// Shown in place of an answer when generation fails
    pub failure_message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_words: 20,
            min_sentences: 2,
            idle_guard_ms: 2_000,
            cooldown_ms: 30_000,
            help_seeking_idle_ms: 3_000,
            complete_thoughts_idle_ms: 6_000,
            incomplete_thought_idle_ms: 4_000,
            repetition_idle_ms: 7_000,
            expansion_idle_ms: 8_000,
            keyword_window_chars: 400,
            fingerprint_chars: 150,
            poll_interval_ms: 1_000,
            poll_window_ms: 10_000,
            auto_expand_ms: 5_000,
            reveal_chars_per_tick: 3,
            reveal_tick_ms: 15,
            column_split_chars: 1_000,
            column_split_lines: 15,
            panel_gutter: 16.0,
            panel_width: 320.0,
            panel_height: 240.0,
            attachment_budget_chars: 4_000,
            prior_answers_limit: 3,
            failure_message: "Sorry, I couldn't come up with an answer right now.".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }

    pub fn auto_expand(&self) -> Duration {
        Duration::from_millis(self.auto_expand_ms)
    }

    pub fn reveal_tick(&self) -> Duration {
        Duration::from_millis(self.reveal_tick_ms)
    }

    /// Number of checks a polling loop performs before giving up.
    pub fn poll_checks(&self) -> u64 {
        if self.poll_interval_ms == 0 {
            return 1;
        }
        (self.poll_window_ms / self.poll_interval_ms).max(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// OpenRouter model id override
    pub model: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

const KEYRING_SERVICE: &str = "marginalia";
const KEYRING_USERNAME: &str = "openrouter_api_key";

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("marginalia"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from `path`. A corrupt file is moved aside and defaults
    /// are returned.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    "config file was corrupted ({}); a backup was saved and defaults were loaded",
                    err
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        write_config_atomic(path, &content).context("Failed to write config")
    }

    /// Get the OpenRouter API key (from environment or keychain)
    pub fn api_key(&self) -> Option<String> {
        // Environment variable takes precedence
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!("failed to read API key from system keychain: {}", err);
                None
            }
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::warn!("failed to set temp config file permissions: {}", e);
        }
    }

    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults_match_trigger_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.idle_guard_ms, 2_000);
        assert_eq!(config.cooldown_ms, 30_000);
        assert_eq!(config.poll_checks(), 10);
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.model = Some("example/model".to_string());
        config.engine.cooldown_ms = 45_000;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.model.as_deref(), Some("example/model"));
        assert_eq!(loaded.engine.cooldown_ms, 45_000);
    }

    #[test]
    fn test_partial_engine_section_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"engine": {"auto_expand_ms": 1234}}"#).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded.engine.auto_expand_ms, 1234);
        assert_eq!(loaded.engine.min_words, 20);
    }

    #[test]
    fn test_corrupt_config_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let loaded = Config::load_from(&path);
        assert!(loaded.model.is_none());
        assert!(dir.path().join("config.json.corrupt").exists());
    }
}
