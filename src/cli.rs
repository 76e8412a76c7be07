use clap::{Args, Parser, Subcommand};

use crate::configure::ConfigUpdate;

#[derive(Parser)]
#[command(
    name = "tutr",
    version = env!("TUTR_BUILD_VERSION"),
    about = "Terminal tutor: suggests fixes when a command fails"
)]
pub struct Cli {
    /// Verbose logging to stderr
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start your shell inside a tutr session
    Shell,

    /// Ask for a command in plain language
    Query {
        /// Print an explanation with the command
        #[arg(long, default_value_t = false)]
        explain: bool,
        /// What you want to do, optionally starting with a command name
        #[arg(trailing_var_arg = true)]
        words: Vec<String>,
    },

    /// Change provider, model and behaviour settings
    Configure(ConfigureArgs),

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the config file path
    Path,
}

#[derive(Args, Debug, Default)]
pub struct ConfigureArgs {
    /// Ask for each setting (the default when no other option is given)
    #[arg(long)]
    pub interactive: bool,
    /// LLM provider: openai, anthropic, gemini, openrouter or ollama
    #[arg(long)]
    pub provider: Option<String>,
    /// Model id, e.g. openai/gpt-4o-mini
    #[arg(long)]
    pub model: Option<String>,
    /// Store an API key in the config file (visible in shell history)
    #[arg(long, conflicts_with = "clear_api_key")]
    pub api_key: Option<String>,
    /// Remove the stored API key
    #[arg(long)]
    pub clear_api_key: bool,
    /// Ollama server, e.g. http://localhost:11434
    #[arg(long, conflicts_with = "clear_ollama_host")]
    pub ollama_host: Option<String>,
    /// Remove the stored Ollama host
    #[arg(long)]
    pub clear_ollama_host: bool,
    /// Show explanations with suggestions
    #[arg(long, conflicts_with = "hide_explanation")]
    pub show_explanation: bool,
    /// Show only the suggested command
    #[arg(long)]
    pub hide_explanation: bool,
    /// Never offer to run suggestions in shell mode
    #[arg(long, conflicts_with = "allow_execute")]
    pub no_execute: bool,
    /// Offer to run suggestions in shell mode
    #[arg(long)]
    pub allow_execute: bool,
}

fn either(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl ConfigureArgs {
    pub fn to_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            provider: self.provider.as_ref().map(|p| p.trim().to_lowercase()),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            clear_api_key: self.clear_api_key,
            ollama_host: self.ollama_host.clone(),
            clear_ollama_host: self.clear_ollama_host,
            show_explanation: either(self.show_explanation, self.hide_explanation),
            no_execute: either(self.no_execute, self.allow_execute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_words() {
        let cli = Cli::parse_from(["tutr", "query", "--explain", "git", "undo", "last", "commit"]);
        match cli.command {
            Commands::Query { explain, words } => {
                assert!(explain);
                assert_eq!(words, vec!["git", "undo", "last", "commit"]);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_trailing_words_keep_dashes() {
        let cli = Cli::parse_from(["tutr", "query", "ls", "-la", "sorted", "by", "size"]);
        match cli.command {
            Commands::Query { explain, words } => {
                assert!(!explain);
                assert_eq!(words, vec!["ls", "-la", "sorted", "by", "size"]);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_global_debug_flag() {
        let cli = Cli::parse_from(["tutr", "shell", "--debug"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Shell));
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["tutr", "config", "path"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: Some(ConfigAction::Path)
            }
        ));
        let cli = Cli::parse_from(["tutr", "config"]);
        assert!(matches!(cli.command, Commands::Config { action: None }));
    }

    fn configure_args(argv: &[&str]) -> ConfigureArgs {
        let mut full = vec!["tutr", "configure"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Configure(args) => args,
            _ => panic!("expected configure"),
        }
    }

    #[test]
    fn test_configure_flags_to_update() {
        let args = configure_args(&[
            "--provider",
            "Ollama",
            "--model",
            "ollama/llama3.2",
            "--ollama-host",
            "gpu-box:11434",
            "--hide-explanation",
            "--no-execute",
        ]);
        assert!(!args.interactive);
        let update = args.to_update();
        assert_eq!(update.provider.as_deref(), Some("ollama"));
        assert_eq!(update.model.as_deref(), Some("ollama/llama3.2"));
        assert_eq!(update.ollama_host.as_deref(), Some("gpu-box:11434"));
        assert_eq!(update.show_explanation, Some(false));
        assert_eq!(update.no_execute, Some(true));
        assert!(update.api_key.is_none());
    }

    #[test]
    fn test_configure_without_flags_is_empty() {
        let args = configure_args(&[]);
        assert!(args.to_update().is_empty());
        assert!(configure_args(&["--interactive"]).interactive);
        assert_eq!(configure_args(&["--allow-execute"]).to_update().no_execute, Some(false));
    }

    #[test]
    fn test_configure_rejects_contradictory_flags() {
        for pair in [
            ["--show-explanation", "--hide-explanation"],
            ["--no-execute", "--allow-execute"],
            ["--api-key=sk", "--clear-api-key"],
            ["--ollama-host=h", "--clear-ollama-host"],
        ] {
            assert!(Cli::try_parse_from(["tutr", "configure", pair[0], pair[1]]).is_err());
        }
    }

    #[test]
    fn test_command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
