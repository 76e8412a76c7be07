pub mod advice;
pub mod cli;
pub mod config;
pub mod configure;
pub mod context;
pub mod detect;
pub mod json_extract;
pub mod launch;
pub mod marker;
pub mod prompt;
pub mod provider;
#[cfg(unix)]
pub mod pty;
pub mod pump;
pub mod query;
pub mod session;
pub mod shell_hooks;
pub mod spinner;

use clap::Parser;
use cli::{Cli, Commands, ConfigAction};
use query::Advisor;

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("tutr=debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_query(explain: bool, words: &[String]) -> anyhow::Result<i32> {
    if words.iter().all(|w| w.trim().is_empty()) {
        anyhow::bail!("nothing to ask: pass a description, e.g. `tutr query git undo last commit`");
    }
    let config = config::Config::load_or_default();
    let mut advisor = query::LlmAdvisor::new()?;
    let suggestion = {
        let _spinner = spinner::SpinnerGuard::new();
        advisor.advise(words, &config)?
    };

    println!("\n  $ {}\n", suggestion.command);
    if explain || config.display.show_explanation {
        if !suggestion.explanation.is_empty() {
            println!("  {}\n", suggestion.explanation);
        }
        if let Some(source) = &suggestion.source {
            println!("  source: {source}\n");
        }
    }
    Ok(0)
}

#[cfg(unix)]
fn run_shell() -> anyhow::Result<i32> {
    pty::run_wrapped_shell(config::Config::load_or_default())
}

#[cfg(not(unix))]
fn run_shell() -> anyhow::Result<i32> {
    anyhow::bail!("tutr shell requires a POSIX system with fork() and pseudo-terminals")
}

/// Parse the command line and run it. Returns the process exit code.
pub fn main_inner() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Shell => run_shell(),
        Commands::Query { explain, words } => run_query(explain, &words),
        Commands::Configure(args) => configure::run_configure(args.to_update(), args.interactive),
        Commands::Config { action } => match action {
            Some(ConfigAction::Path) | None => {
                println!("{}", config::Config::path().display());
                Ok(0)
            }
        },
    }
}
