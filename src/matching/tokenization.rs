//! Provides:
//!   - normalize_for_matching: lowercase, URLs removed, deunicoded, whitespace collapsed
//!   - TokenizedText: normalized text, tokens, unique token set, space-padded token string

use deunicode::deunicode;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref URL_RE: Regex = Regex::new(r"https?://\S+").unwrap();
    // words and numbers; punctuation, currency signs and separators split tokens
    static ref TOKEN_RE: Regex = Regex::new(r"[a-z0-9]+").unwrap();
    static ref YEAR_RE: Regex = Regex::new(r"^(19|20)\d{2}$").unwrap();
}

pub fn normalize_for_matching(text: &str) -> String {
    // 1) remove URLs (they are noise)
    let no_url = URL_RE.replace_all(text, " ");

    // 2) deunicode (é -> e, ñ -> n, …) before lowercasing, transliterations can be capitalized
    let ascii = deunicode(&no_url);

    // 3) lowercase for consistency
    let lower = ascii.to_lowercase();

    // 4) collapse multiple whitespace (spaces, tabs, newlines...)
    lower.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Query or title text prepared for lexical scoring.
#[derive(Debug, Clone, Default)]
pub struct TokenizedText {
    normalized: String,
    tokens: Vec<String>,
    unique: HashSet<String>,
    padded: String,
}

impl TokenizedText {
    pub fn new(text: &str) -> Self {
        let normalized = normalize_for_matching(text);
        let tokens: Vec<String> = TOKEN_RE
            .find_iter(&normalized)
            .map(|m| m.as_str().to_string())
            .collect();
        let unique = tokens.iter().cloned().collect();
        let padded = format!(" {} ", tokens.join(" "));

        Self {
            normalized,
            tokens,
            unique,
            padded,
        }
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Distinct tokens; overlap ratios are computed over these.
    pub fn unique(&self) -> &HashSet<String> {
        &self.unique
    }

    /// Tokens joined by single spaces with a leading and trailing space, so that
    /// `" phrase "` lookups only hit whole words.
    pub fn padded(&self) -> &str {
        &self.padded
    }

    pub fn joined(&self) -> String {
        self.tokens.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// First four-digit year token (1900-2099), if any.
    pub fn first_year(&self) -> Option<i32> {
        self.tokens
            .iter()
            .find(|t| YEAR_RE.is_match(t))
            .and_then(|t| t.parse().ok())
    }
}
