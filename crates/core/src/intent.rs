//! Intent definitions
//!
//! The request pipeline classifies every message into one of these intents
//! before prompt assembly. `file` and `web` come from deterministic checks,
//! `search`/`code`/`normal` from LLM arbitration.

use serde::{Deserialize, Serialize};

/// Classified intent of a user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Analyze uploaded file content
    File,
    /// Analyze a web page (URL attachment or URL in the message)
    Web,
    /// Needs a live web search
    Search,
    /// Needs Python code generation and execution
    Code,
    /// Plain conversation
    Normal,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::File => "file",
            Intent::Web => "web",
            Intent::Search => "search",
            Intent::Code => "code",
            Intent::Normal => "normal",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Intent::File),
            "web" => Ok(Intent::Web),
            "search" => Ok(Intent::Search),
            "code" => Ok(Intent::Code),
            "normal" => Ok(Intent::Normal),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for intent in [Intent::File, Intent::Web, Intent::Search, Intent::Code, Intent::Normal] {
            assert_eq!(intent.as_str().parse::<Intent>().unwrap(), intent);
        }
    }

    #[test]
    fn test_unknown_is_error() {
        assert!("image".parse::<Intent>().is_err());
    }

    #[test]
    fn test_serde_form() {
        assert_eq!(serde_json::to_string(&Intent::Search).unwrap(), "\"search\"");
    }
}
