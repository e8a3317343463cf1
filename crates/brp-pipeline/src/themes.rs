//! Keyword theme tagging.

use brp_core::FALLBACK_THEME;
use regex::Regex;

pub const THEME_SEPARATOR: &str = "; ";

/// Theme names and their keywords, in reporting order.
pub const DEFAULT_THEMES: &[(&str, &[&str])] = &[
    (
        "Account Access Issues",
        &["login", "password", "access", "account blocked"],
    ),
    (
        "Transaction Performance",
        &["transfer", "slow", "pending", "failed", "delay"],
    ),
    (
        "User Interface & Experience",
        &["UI", "design", "app layout", "navigation"],
    ),
    (
        "Customer Support",
        &["support", "help", "call", "chat", "response"],
    ),
    ("Feature Requests", &["feature", "add", "improve", "wish"]),
];

#[derive(Debug, Clone)]
struct Theme {
    name: String,
    pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct ThemeTable {
    themes: Vec<Theme>,
}

impl ThemeTable {
    /// Compiles one whole-word alternation per theme. Keywords are lowered
    /// to match the lowered review text.
    pub fn new(table: &[(&str, &[&str])]) -> Result<Self, regex::Error> {
        let themes = table
            .iter()
            .map(|(name, keywords)| -> Result<Theme, regex::Error> {
                let alternation = keywords
                    .iter()
                    .map(|k| regex::escape(&k.to_lowercase()))
                    .collect::<Vec<_>>()
                    .join("|");
                Ok(Theme {
                    name: (*name).to_string(),
                    pattern: Regex::new(&format!(r"\b(?:{alternation})\b"))?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { themes })
    }

    pub fn builtin() -> Result<Self, regex::Error> {
        Self::new(DEFAULT_THEMES)
    }

    pub fn matching_themes(&self, text: &str) -> Vec<&str> {
        let lowered = text.to_lowercase();
        self.themes
            .iter()
            .filter(|t| t.pattern.is_match(&lowered))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Matching theme names joined in table order, or `"Other"`.
    pub fn identify(&self, text: &str) -> String {
        let matched = self.matching_themes(text);
        if matched.is_empty() {
            FALLBACK_THEME.to_string()
        } else {
            matched.join(THEME_SEPARATOR)
        }
    }
}
