//! Request-shaping types: vendor dialect, transport mode and prompt policy

use serde::{Deserialize, Serialize};

/// Vendor API dialect spoken by an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini (`generateContent`)
    Gemini,
    /// OpenAI chat completions
    #[serde(rename = "openai")]
    OpenAI,
    /// Anthropic Claude messages
    Claude,
}

impl ProviderKind {
    /// All supported dialects
    pub fn all() -> &'static [ProviderKind] {
        &[ProviderKind::Gemini, ProviderKind::OpenAI, ProviderKind::Claude]
    }

    /// Identifier used in configuration files and logs
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
        }
    }

    /// Human-readable vendor name
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "Gemini",
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::Claude => "Claude",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::OpenAI),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Whether responses are streamed or returned in one body
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Server-sent event stream
    #[default]
    Streaming,
    /// Single JSON response body
    SingleShot,
}

impl RequestMode {
    /// Whether this mode streams
    pub fn is_streaming(&self) -> bool {
        matches!(self, RequestMode::Streaming)
    }
}

/// Prompt sent when a fixed policy carries no text
pub const DEFAULT_PROMPT: &str = "Hello, please briefly introduce yourself.";

/// How the prompt for each dispatched request is chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PromptPolicy {
    /// Same text every time
    Fixed {
        /// Prompt text; empty means [`DEFAULT_PROMPT`]
        #[serde(default)]
        text: String,
    },
    /// Variant synthesized at dispatch time
    Random {
        /// Base prompts to mutate; empty means template generation
        #[serde(default)]
        candidates: Vec<String>,
    },
}

impl PromptPolicy {
    /// Fixed policy with the given text
    pub fn fixed(text: impl Into<String>) -> Self {
        PromptPolicy::Fixed { text: text.into() }
    }

    /// Random policy over the given candidates
    pub fn random<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PromptPolicy::Random {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    /// Short label for summaries
    pub fn label(&self) -> &'static str {
        match self {
            PromptPolicy::Fixed { .. } => "fixed",
            PromptPolicy::Random { .. } => "random",
        }
    }
}

impl Default for PromptPolicy {
    fn default() -> Self {
        PromptPolicy::Fixed {
            text: DEFAULT_PROMPT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("OpenAI".parse::<ProviderKind>(), Ok(ProviderKind::OpenAI));
        assert_eq!("anthropic".parse::<ProviderKind>(), Ok(ProviderKind::Claude));
        assert!("mistral".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_serde_uses_id() {
        for kind in ProviderKind::all() {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.id()));
        }
    }

    #[test]
    fn test_prompt_policy_tagged() {
        let policy: PromptPolicy =
            serde_json::from_str(r#"{"policy":"random","candidates":["a","b"]}"#).unwrap();
        assert_eq!(policy, PromptPolicy::random(["a", "b"]));

        let policy: PromptPolicy = serde_json::from_str(r#"{"policy":"fixed"}"#).unwrap();
        assert_eq!(policy, PromptPolicy::fixed(""));
    }
}
