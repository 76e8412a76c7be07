use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;
use zeroize::Zeroizing;

pub const DEFAULT_MODEL: &str = "gemini/gemini-3-flash-preview";

/// Overrides `provider.model` when set.
pub const MODEL_ENV: &str = "TUTR_MODEL";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub display: DisplayConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name; inferred from the `provider/` prefix of `model` when unset.
    pub default: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub api_key_cmd: Option<String>,
    pub base_url: Option<String>,
    /// Ollama server, e.g. `http://gpu-box:11434`; `OLLAMA_HOST` takes precedence.
    pub ollama_host: Option<String>,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: None,
            model: DEFAULT_MODEL.into(),
            api_key: None,
            api_key_cmd: None,
            base_url: None,
            ollama_host: None,
            timeout_seconds: 60,
            max_tokens: 256,
        }
    }
}

impl ProviderConfig {
    pub fn resolve_api_key(&self, provider_name: &str) -> anyhow::Result<Zeroizing<String>> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Ok(Zeroizing::new(key.clone()));
            }
        }
        if let Some(cmd) = &self.api_key_cmd {
            #[cfg(unix)]
            let output = Command::new("sh").arg("-c").arg(cmd).output()?;
            #[cfg(windows)]
            let output = Command::new("cmd").args(["/C", cmd]).output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!(
                    "api_key_cmd failed (exit {}): {stderr}",
                    output.status.code().unwrap_or(-1)
                );
            }
            let key = String::from_utf8(output.stdout)?.trim().to_string();
            if key.is_empty() {
                anyhow::bail!("api_key_cmd returned empty string");
            }
            return Ok(Zeroizing::new(key));
        }
        let env_var = api_key_env_var(provider_name);
        if let Some(var) = env_var {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    return Ok(Zeroizing::new(key));
                }
            }
        }
        anyhow::bail!(
            "No API key for {provider_name} (tried config, api_key_cmd, ${})",
            env_var.unwrap_or("<none>")
        )
    }
}

pub fn api_key_env_var(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "gemini" => Some("GEMINI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_explanation: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Never offer to run suggested commands.
    pub no_execute: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_file()?;
        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.trim().is_empty() {
                config.provider.model = model.trim().to_string();
            }
        }
        Ok(config)
    }

    /// The config file as written, without environment overrides.
    pub fn load_file() -> anyhow::Result<Self> {
        let path = Self::path();
        let config: Config = if path.exists() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = std::fs::metadata(&path) {
                    if meta.permissions().mode() & 0o077 != 0 {
                        eprintln!(
                            "tutr: warning: {} is readable by other users. Consider: chmod 600 {}",
                            path.display(),
                            path.display()
                        );
                    }
                }
            }
            let content = std::fs::read_to_string(&path)?;
            Self::parse(&content)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Config::default()
        };
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load, falling back to defaults with a warning when the file is broken.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            eprintln!("tutr: warning: ignoring config {}: {e}", Self::path().display());
            Config::default()
        })
    }

    pub fn path() -> PathBuf {
        Self::tutr_dir().join("config.toml")
    }

    pub fn tutr_dir() -> PathBuf {
        #[cfg(windows)]
        {
            if let Some(dir) = dirs::data_local_dir() {
                return dir.join("tutr");
            }
        }
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".tutr")
    }
}
