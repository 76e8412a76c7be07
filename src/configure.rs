//! `tutr configure`: change settings in the config file, either from flags or
//! by answering a few prompts. Edits go through `toml_edit` so comments and
//! keys this command does not manage survive.

use std::io::{self, BufRead, Write};
use std::path::Path;

use toml_edit::{DocumentMut, Item, Table};

use crate::config::{api_key_env_var, Config, DEFAULT_MODEL};
use crate::provider::{resolve_model, DEFAULT_OLLAMA_HOST, KNOWN_PROVIDERS};

pub const API_KEY_CLI_WARNING: &str = "Warning: --api-key may leak secrets via shell history and process lists. \
Prefer `tutr configure --interactive` or the provider's API key environment variable.";

/// Settings to change. `None` (or `false` for the clear flags) leaves the
/// current value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub clear_api_key: bool,
    pub ollama_host: Option<String>,
    pub clear_ollama_host: bool,
    pub show_explanation: Option<bool>,
    pub no_execute: Option<bool>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(provider) = &self.provider {
            if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
                anyhow::bail!(
                    "unknown provider '{provider}' (expected one of: {})",
                    KNOWN_PROVIDERS.join(", ")
                );
            }
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            anyhow::bail!("model must not be empty");
        }
        if self.api_key.is_some() && self.clear_api_key {
            anyhow::bail!("--api-key and --clear-api-key cannot be used together");
        }
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            anyhow::bail!("API key must not be empty; use --clear-api-key to remove it");
        }
        if self.ollama_host.is_some() && self.clear_ollama_host {
            anyhow::bail!("--ollama-host and --clear-ollama-host cannot be used together");
        }
        if self.ollama_host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            anyhow::bail!("Ollama host must not be empty; use --clear-ollama-host to remove it");
        }
        Ok(())
    }

    /// Fields set in `flags` replace the ones in `self`.
    pub fn overlay(mut self, flags: ConfigUpdate) -> Self {
        if flags.provider.is_some() {
            self.provider = flags.provider;
        }
        if flags.model.is_some() {
            self.model = flags.model;
        }
        if flags.api_key.is_some() || flags.clear_api_key {
            self.api_key = flags.api_key;
            self.clear_api_key = flags.clear_api_key;
        }
        if flags.ollama_host.is_some() || flags.clear_ollama_host {
            self.ollama_host = flags.ollama_host;
            self.clear_ollama_host = flags.clear_ollama_host;
        }
        if flags.show_explanation.is_some() {
            self.show_explanation = flags.show_explanation;
        }
        if flags.no_execute.is_some() {
            self.no_execute = flags.no_execute;
        }
        self
    }

    pub fn apply(&self, doc: &mut DocumentMut) {
        if let Some(provider) = &self.provider {
            ensure_table(doc, "provider");
            doc["provider"]["default"] = toml_edit::value(provider.as_str());
        }
        if let Some(model) = &self.model {
            ensure_table(doc, "provider");
            doc["provider"]["model"] = toml_edit::value(model.trim());
        }
        if self.clear_api_key {
            remove_key(doc, "provider", "api_key");
        } else if let Some(key) = &self.api_key {
            ensure_table(doc, "provider");
            doc["provider"]["api_key"] = toml_edit::value(key.trim());
        }
        if self.clear_ollama_host {
            remove_key(doc, "provider", "ollama_host");
        } else if let Some(host) = &self.ollama_host {
            ensure_table(doc, "provider");
            doc["provider"]["ollama_host"] = toml_edit::value(host.trim());
        }
        if let Some(show) = self.show_explanation {
            ensure_table(doc, "display");
            doc["display"]["show_explanation"] = toml_edit::value(show);
        }
        if let Some(no_execute) = self.no_execute {
            ensure_table(doc, "execution");
            doc["execution"]["no_execute"] = toml_edit::value(no_execute);
        }
    }
}

fn ensure_table(doc: &mut DocumentMut, key: &str) {
    if !doc.get(key).is_some_and(|item| item.is_table_like()) {
        doc[key] = Item::Table(Table::new());
    }
}

fn remove_key(doc: &mut DocumentMut, table: &str, key: &str) {
    if let Some(table) = doc.get_mut(table).and_then(|item| item.as_table_like_mut()) {
        table.remove(key);
    }
}

pub fn load_document(path: &Path) -> anyhow::Result<DocumentMut> {
    if !path.exists() {
        return Ok(DocumentMut::new());
    }
    let content = std::fs::read_to_string(path)?;
    content
        .parse::<DocumentMut>()
        .map_err(|e| anyhow::anyhow!("{} is not valid TOML: {e}", path.display()))
}

/// Write through a temp file renamed into place, owner-only.
pub fn save_document(path: &Path, doc: &DocumentMut) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, doc.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Apply `update` to the config file at `path` and return the settings it
/// now holds. The file is left untouched if the result would not load.
pub fn update_config_file(path: &Path, update: &ConfigUpdate) -> anyhow::Result<Config> {
    update.validate()?;
    let mut doc = load_document(path)?;
    update.apply(&mut doc);
    let config = Config::parse(&doc.to_string())?;
    save_document(path, &doc)?;
    tracing::debug!("updated {}", path.display());
    Ok(config)
}

pub fn summary(path: &Path, config: &Config) -> String {
    let (provider, _) = resolve_model(config);
    let set = |v: &Option<String>| if v.as_deref().is_some_and(|s| !s.is_empty()) { "set" } else { "not set" };
    format!(
        "Configuration saved to {}\n  provider: {provider}\n  model: {}\n  api_key: {}\n  ollama_host: {}\n  show_explanation: {}\n  no_execute: {}",
        path.display(),
        config.provider.model,
        set(&config.provider.api_key),
        config.provider.ollama_host.as_deref().unwrap_or("not set"),
        config.display.show_explanation,
        config.execution.no_execute,
    )
}

/// A reasonable model for `provider` when switching to it interactively.
pub fn suggested_model(provider: &str) -> &'static str {
    match provider {
        "openai" => "openai/gpt-4o-mini",
        "anthropic" => "anthropic/claude-3-5-haiku-latest",
        "openrouter" => "openrouter/openai/gpt-4o-mini",
        "ollama" => "ollama/llama3.2",
        _ => DEFAULT_MODEL,
    }
}

fn read_line_from_tty() -> anyhow::Result<String> {
    let mut input = String::new();
    #[cfg(unix)]
    {
        if let Ok(tty) = std::fs::File::open("/dev/tty") {
            let mut reader = io::BufReader::new(tty);
            if reader.read_line(&mut input)? == 0 {
                anyhow::bail!("no input; pass options such as --model to configure non-interactively");
            }
            return Ok(input.trim().to_string());
        }
    }
    if io::stdin().read_line(&mut input)? == 0 {
        anyhow::bail!("no input; pass options such as --model to configure non-interactively");
    }
    Ok(input.trim().to_string())
}

fn prompt_line(prompt: &str, default: &str) -> anyhow::Result<String> {
    if default.is_empty() {
        eprint!("{prompt}: ");
    } else {
        eprint!("{prompt} [{default}]: ");
    }
    io::stderr().flush()?;
    let input = read_line_from_tty()?;
    Ok(if input.is_empty() { default.to_string() } else { input })
}

fn prompt_choice(prompt: &str, max: usize, default: usize) -> anyhow::Result<usize> {
    loop {
        eprint!("{prompt} [{}]: ", default + 1);
        io::stderr().flush()?;
        let input = read_line_from_tty()?;
        if input.is_empty() {
            return Ok(default);
        }
        match input.parse::<usize>() {
            Ok(n) if n >= 1 && n <= max => return Ok(n - 1),
            _ => eprintln!("  Please enter a number between 1 and {max}"),
        }
    }
}

fn prompt_yes_no(prompt: &str, default: bool) -> anyhow::Result<bool> {
    loop {
        eprint!("{prompt} [{}]: ", if default { "Y/n" } else { "y/N" });
        io::stderr().flush()?;
        match read_line_from_tty()?.to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => eprintln!("  Please answer y or n"),
        }
    }
}

fn run_wizard(current: &Config) -> anyhow::Result<ConfigUpdate> {
    eprintln!("\x1b[1mtutr configure\x1b[0m\n");
    eprintln!("Choose your LLM provider:\n");
    for (i, name) in KNOWN_PROVIDERS.iter().enumerate() {
        let found = api_key_env_var(name)
            .filter(|var| std::env::var(var).is_ok_and(|v| !v.is_empty()))
            .map(|var| format!(" (${var} found)"))
            .unwrap_or_default();
        eprintln!("  \x1b[1m{:>2}\x1b[0m) {name}{found}", i + 1);
    }
    let (current_provider, _) = resolve_model(current);
    let default = KNOWN_PROVIDERS
        .iter()
        .position(|p| *p == current_provider)
        .unwrap_or(0);
    let provider = KNOWN_PROVIDERS[prompt_choice("Select", KNOWN_PROVIDERS.len(), default)?];

    let default_model = if provider == current_provider {
        current.provider.model.as_str()
    } else {
        suggested_model(provider)
    };
    let mut update = ConfigUpdate {
        provider: Some(provider.to_string()),
        model: Some(prompt_line("Model", default_model)?),
        ..Default::default()
    };

    match api_key_env_var(provider) {
        Some(var) => {
            let key = prompt_line(&format!("API key (blank keeps the stored key or uses ${var})"), "")?;
            if !key.is_empty() {
                update.api_key = Some(key);
            }
        }
        None => {
            let host = current
                .provider
                .ollama_host
                .as_deref()
                .unwrap_or(DEFAULT_OLLAMA_HOST);
            update.ollama_host = Some(prompt_line("Ollama host", host)?);
        }
    }

    update.show_explanation = Some(prompt_yes_no(
        "Show explanations with suggestions?",
        current.display.show_explanation,
    )?);
    update.no_execute = Some(!prompt_yes_no(
        "Offer to run suggested commands in shell mode?",
        !current.execution.no_execute,
    )?);
    Ok(update)
}

/// The `tutr configure` entrypoint. Runs the prompts when asked to or when no
/// flags were given; flags always win over answers.
pub fn run_configure(flags: ConfigUpdate, interactive: bool) -> anyhow::Result<i32> {
    flags.validate()?;
    if flags.api_key.is_some() {
        eprintln!("{API_KEY_CLI_WARNING}");
    }
    let path = Config::path();
    let update = if interactive || flags.is_empty() {
        let current = Config::load_file()?;
        run_wizard(&current)?.overlay(flags)
    } else {
        flags
    };
    let config = update_config_file(&path, &update)?;
    println!("\n{}\n", summary(&path, &config));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join(".tutr").join("config.toml")
    }

    #[test]
    fn test_empty_update() {
        assert!(ConfigUpdate::default().is_empty());
        let update = ConfigUpdate {
            no_execute: Some(false),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let bad = [
            ConfigUpdate {
                provider: Some("acme".into()),
                ..Default::default()
            },
            ConfigUpdate {
                model: Some("  ".into()),
                ..Default::default()
            },
            ConfigUpdate {
                api_key: Some("sk".into()),
                clear_api_key: true,
                ..Default::default()
            },
            ConfigUpdate {
                ollama_host: Some("http://h".into()),
                clear_ollama_host: true,
                ..Default::default()
            },
        ];
        for update in bad {
            assert!(update.validate().is_err(), "{update:?}");
        }
        let ok = ConfigUpdate {
            provider: Some("ollama".into()),
            ollama_host: Some("gpu-box:11434".into()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_apply_to_empty_document() {
        let mut doc = DocumentMut::new();
        ConfigUpdate {
            provider: Some("ollama".into()),
            model: Some(" ollama/llama3.2 ".into()),
            show_explanation: Some(true),
            no_execute: Some(true),
            ..Default::default()
        }
        .apply(&mut doc);
        let config = Config::parse(&doc.to_string()).unwrap();
        assert_eq!(config.provider.default.as_deref(), Some("ollama"));
        assert_eq!(config.provider.model, "ollama/llama3.2");
        assert!(config.display.show_explanation);
        assert!(config.execution.no_execute);
    }

    #[test]
    fn test_apply_keeps_comments_and_unmanaged_keys() {
        let mut doc: DocumentMut = "# my settings\n[provider]\nmodel = \"gpt-4o\"\napi_key = \"sk-old\"\napi_key_cmd = \"pass show openai\"\ntimeout_seconds = 5\n"
            .parse()
            .unwrap();
        ConfigUpdate {
            model: Some("openai/gpt-4o-mini".into()),
            clear_api_key: true,
            ..Default::default()
        }
        .apply(&mut doc);
        let text = doc.to_string();
        assert!(text.starts_with("# my settings\n"));
        let config = Config::parse(&text).unwrap();
        assert_eq!(config.provider.model, "openai/gpt-4o-mini");
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.provider.api_key_cmd.as_deref(), Some("pass show openai"));
        assert_eq!(config.provider.timeout_seconds, 5);
    }

    #[test]
    fn test_clear_ollama_host_without_table_is_noop() {
        let mut doc = DocumentMut::new();
        ConfigUpdate {
            clear_ollama_host: true,
            ..Default::default()
        }
        .apply(&mut doc);
        assert_eq!(doc.to_string(), "");
    }

    #[test]
    fn test_overlay_prefers_flags() {
        let answers = ConfigUpdate {
            provider: Some("openai".into()),
            model: Some("openai/gpt-4o-mini".into()),
            api_key: Some("sk-typed".into()),
            show_explanation: Some(false),
            no_execute: Some(false),
            ..Default::default()
        };
        let flags = ConfigUpdate {
            model: Some("openai/gpt-4o".into()),
            clear_api_key: true,
            no_execute: Some(true),
            ..Default::default()
        };
        let merged = answers.overlay(flags);
        assert_eq!(merged.provider.as_deref(), Some("openai"));
        assert_eq!(merged.model.as_deref(), Some("openai/gpt-4o"));
        assert!(merged.api_key.is_none());
        assert!(merged.clear_api_key);
        assert_eq!(merged.show_explanation, Some(false));
        assert_eq!(merged.no_execute, Some(true));
        assert!(merged.validate().is_ok());
    }

    #[test]
    fn test_update_config_file_creates_owner_only_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        let config = update_config_file(
            &path,
            &ConfigUpdate {
                model: Some("anthropic/claude-3-5-haiku-latest".into()),
                api_key: Some("sk-ant".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("sk-ant"));
        let reread = Config::parse(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread.provider.model, "anthropic/claude-3-5-haiku-latest");
        assert!(!path.with_extension("tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }
    }

    #[test]
    fn test_update_config_file_refuses_broken_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[provider\nmodel = ").unwrap();
        let update = ConfigUpdate {
            no_execute: Some(true),
            ..Default::default()
        };
        let err = update_config_file(&path, &update).unwrap_err().to_string();
        assert!(err.contains("not valid TOML"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[provider\nmodel = ");
    }

    #[test]
    fn test_update_config_file_refuses_bad_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path(&dir);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[provider]\ntimeout_seconds = \"soon\"\n").unwrap();
        let update = ConfigUpdate {
            show_explanation: Some(true),
            ..Default::default()
        };
        assert!(update_config_file(&path, &update).is_err());
        assert!(!std::fs::read_to_string(&path).unwrap().contains("show_explanation"));
    }

    #[test]
    fn test_summary_hides_key() {
        let mut config = Config::default();
        config.provider.api_key = Some("sk-secret".into());
        let text = summary(Path::new("/tmp/c.toml"), &config);
        assert!(text.contains("api_key: set"));
        assert!(!text.contains("sk-secret"));
        assert!(text.contains("provider: gemini"));
        assert!(text.contains("ollama_host: not set"));
    }

    #[test]
    fn test_suggested_models_route_to_their_provider() {
        for provider in KNOWN_PROVIDERS {
            let mut config = Config::default();
            config.provider.model = suggested_model(provider).into();
            assert_eq!(resolve_model(&config).0, *provider);
        }
    }
}
