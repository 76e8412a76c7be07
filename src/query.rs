use crate::config::Config;
use crate::{context, json_extract, prompt, provider};

pub const MAX_QUERY_LENGTH: usize = 1000;

/// A suggested command returned by the advisory pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Suggestion {
    pub command: String,
    pub explanation: String,
    pub source: Option<String>,
}

/// Turns a word-list query into a [`Suggestion`].
pub trait Advisor {
    fn advise(&mut self, words: &[String], config: &Config) -> anyhow::Result<Suggestion>;
}

/// Split raw words into an optional command (first word, if it is on `PATH`)
/// and the free-text query.
pub fn parse_input(words: &[String]) -> (Option<String>, String) {
    let Some((first, rest)) = words.split_first() else {
        return (None, String::new());
    };
    let (cmd, query) = if which::which(first).is_ok() {
        (Some(first.clone()), rest.join(" "))
    } else {
        (None, words.join(" "))
    };
    tracing::debug!("cmd={cmd:?} query={query:?}");
    (cmd, query)
}

pub fn validate_query_length(query: &str, limit: usize) -> anyhow::Result<()> {
    let len = query.chars().count();
    if len > limit {
        anyhow::bail!(
            "Query is too long ({len} characters). Please keep queries under {limit} characters."
        );
    }
    Ok(())
}

/// Interpret a model reply. A JSON object with a non-empty `command` is used
/// as-is; anything else is taken as a bare command.
pub fn parse_suggestion(reply: &str) -> anyhow::Result<Suggestion> {
    let field = |map: &serde_json::Map<String, serde_json::Value>, key: &str| {
        map.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };

    if let Some(map) = json_extract::extract_object(reply) {
        if let Some(command) = field(&map, "command") {
            return Ok(Suggestion {
                command,
                explanation: field(&map, "explanation").unwrap_or_default(),
                source: field(&map, "source"),
            });
        }
    }

    let command = reply.trim();
    if command.is_empty() {
        anyhow::bail!("model returned an empty response");
    }
    Ok(Suggestion {
        command: command.to_string(),
        ..Default::default()
    })
}

/// The LLM-backed advisor: gathers docs, builds the prompt and blocks on the
/// chat completion.
pub struct LlmAdvisor {
    runtime: tokio::runtime::Runtime,
    max_query_len: Option<usize>,
}

impl LlmAdvisor {
    /// Advisor for user-typed queries, which are length-limited.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_limit(Some(MAX_QUERY_LENGTH))
    }

    /// Advisor for queries assembled from failed commands and their output.
    pub fn unbounded() -> anyhow::Result<Self> {
        Self::with_limit(None)
    }

    fn with_limit(max_query_len: Option<usize>) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            max_query_len,
        })
    }
}

impl Advisor for LlmAdvisor {
    fn advise(&mut self, words: &[String], config: &Config) -> anyhow::Result<Suggestion> {
        let (cmd, query) = parse_input(words);
        if let Some(limit) = self.max_query_len {
            validate_query_length(&query, limit)?;
        }
        let client = provider::create_provider(config)?;
        let reply = self.runtime.block_on(async {
            let docs = context::gather_context(cmd.as_deref()).await;
            let system_info = context::system_info();
            let messages = prompt::build_messages(cmd.as_deref(), &query, &docs, &system_info);
            client.complete(&messages).await
        })?;
        tracing::debug!("model reply: {reply}");
        parse_suggestion(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_input_known_command() {
        let (cmd, query) = parse_input(&words("sh run a script quietly"));
        assert_eq!(cmd.as_deref(), Some("sh"));
        assert_eq!(query, "run a script quietly");
    }

    #[test]
    fn test_parse_input_plain_query() {
        let (cmd, query) = parse_input(&words("zzqqx-not-a-command find big files"));
        assert!(cmd.is_none());
        assert_eq!(query, "zzqqx-not-a-command find big files");
    }

    #[test]
    fn test_parse_input_empty() {
        assert_eq!(parse_input(&[]), (None, String::new()));
    }

    #[test]
    fn test_validate_query_length() {
        assert!(validate_query_length(&"a".repeat(1000), MAX_QUERY_LENGTH).is_ok());
        let err = validate_query_length(&"a".repeat(1001), MAX_QUERY_LENGTH)
            .unwrap_err()
            .to_string();
        assert!(err.contains("1001 characters"));
        assert!(err.contains("under 1000"));
    }

    #[test]
    fn test_parse_suggestion_json() {
        let s = parse_suggestion(
            r#"{"command": "git switch main", "explanation": "switch branch", "source": "git-switch(1)"}"#,
        )
        .unwrap();
        assert_eq!(s.command, "git switch main");
        assert_eq!(s.explanation, "switch branch");
        assert_eq!(s.source.as_deref(), Some("git-switch(1)"));
    }

    #[test]
    fn test_parse_suggestion_blank_optional_fields() {
        let s = parse_suggestion(r#"{"command": "ls", "explanation": "", "source": "  "}"#).unwrap();
        assert_eq!(s.explanation, "");
        assert!(s.source.is_none());
    }

    #[test]
    fn test_parse_suggestion_plain_text_fallback() {
        let s = parse_suggestion("  git status\n").unwrap();
        assert_eq!(s.command, "git status");
        assert!(s.source.is_none());
    }

    #[test]
    fn test_parse_suggestion_object_without_command_falls_back() {
        let s = parse_suggestion(r#"{"cmd": "ls"}"#).unwrap();
        assert_eq!(s.command, r#"{"cmd": "ls"}"#);
    }

    #[test]
    fn test_parse_suggestion_empty_is_error() {
        assert!(parse_suggestion("   ").is_err());
    }

    #[test]
    fn test_llm_advisor_rejects_long_query_before_network() {
        let mut advisor = LlmAdvisor::new().unwrap();
        let long = vec!["zzqqx-not-a-command".to_string(), "a".repeat(1200)];
        let err = advisor.advise(&long, &Config::default()).unwrap_err().to_string();
        assert!(err.contains("too long"));
    }

    #[test]
    fn test_llm_advisor_reports_provider_errors() {
        let mut config = Config::default();
        config.provider.model = "ollama/llama3.2".into();
        config.provider.base_url = Some("http://127.0.0.1:9/v1".into());
        config.provider.timeout_seconds = 2;
        let mut advisor = LlmAdvisor::unbounded().unwrap();
        assert!(advisor.advise(&words("zzqqx-not-a-command hi"), &config).is_err());
    }
}
