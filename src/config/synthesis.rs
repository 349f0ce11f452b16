// src/config/synthesis.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_SYNTHESIS_PATH: &str = "config/synthesis.json";

fn default_provider() -> String {
    "command".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_max_tokens() -> u32 {
    4000
}

/// Upper bound for `timeout_secs`; larger values are clamped.
const MAX_TIMEOUT_SECS: u64 = 1800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub enabled: bool,
    /// "command" | "openai" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Program and arguments for the `command` provider. The prompt goes to stdin.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            command: Vec::new(),
            model: default_model(),
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl SynthesisConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: SynthesisConfig = serde_json::from_str(&data)?;
        Ok(cfg.sanitized())
    }

    /// Like `load_from_file`, but a missing file means "disabled".
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no synthesis config, synthesis disabled");
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    fn sanitized(mut self) -> Self {
        // Normalize provider
        self.provider = self.provider.trim().to_lowercase();
        self.command.retain(|a| !a.is_empty());
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self.timeout_secs = self.timeout_secs.min(MAX_TIMEOUT_SECS);
        let base = self.base_url.trim().trim_end_matches('/').to_string();
        self.base_url = if base.is_empty() {
            default_base_url()
        } else {
            base
        };
        self
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the api key. "ENV" reads OPENAI_API_KEY at call time, so a
    /// missing key only fails the component that needs it.
    pub fn resolved_api_key(&self) -> anyhow::Result<String> {
        let raw = self.api_key.trim();
        let key = if raw.eq_ignore_ascii_case("env") {
            env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?
        } else {
            raw.to_string()
        };
        if key.is_empty() {
            anyhow::bail!("api_key is empty for provider {}", self.provider);
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults_and_values_are_sanitized() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"enabled": true, "provider": " OpenAI ", "timeout_secs": 0, "base_url": "https://llm.local/v1/"}}"#
        )
        .unwrap();
        let cfg = SynthesisConfig::load_from_file(f.path()).unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.timeout_secs, 300);
        assert_eq!(cfg.base_url, "https://llm.local/v1");
        assert_eq!(cfg.model, "gpt-4o-mini");
    }

    #[test]
    fn missing_file_is_disabled() {
        let cfg = SynthesisConfig::load_or_default("does/not/exist.json").unwrap();
        assert!(!cfg.enabled);
    }

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_lazily() {
        let cfg = SynthesisConfig {
            api_key: "ENV".into(),
            ..SynthesisConfig::default()
        };
        env::remove_var("OPENAI_API_KEY");
        assert!(cfg.resolved_api_key().is_err());
        env::set_var("OPENAI_API_KEY", "sk-test");
        assert_eq!(cfg.resolved_api_key().unwrap(), "sk-test");
        env::remove_var("OPENAI_API_KEY");
    }

    #[test]
    fn shipped_config_parses() {
        let cfg: SynthesisConfig =
            serde_json::from_str(include_str!("../../config/synthesis.json")).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.command.first().map(String::as_str), Some("claude"));
    }
}
