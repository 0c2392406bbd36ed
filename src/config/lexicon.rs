//! Lookup tables used by the heuristic scorer: curated phrases, synonyms, category
//! expectations and temporal reference phrases.
//!
//! Tables are plain data (`lexicon.yml`) compiled once into Aho-Corasick automata over
//! space-padded token strings, so every lookup is a whole-word match. `LexiconHandle`
//! lets the tables be swapped at runtime without touching in-flight matching calls.

use crate::matching::tokenization::TokenizedText;
use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use config::{Config, File, FileFormat};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct SynonymEntry {
    pub term: String,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    pub term: String,
    pub expected: Vec<String>,
}

/// Raw, editable form of the tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lexicon {
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<SynonymEntry>,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
    #[serde(default)]
    pub year_end_refs: Vec<String>,
    #[serde(default)]
    pub near_term_refs: Vec<String>,
}

lazy_static! {
    /// Built-in tables, shipped as `lexicon.yml` at the crate root.
    static ref BUILTIN: Lexicon = Lexicon::from_yaml(include_str!("../../lexicon.yml"))
        .expect("bundled lexicon.yml is valid");
}

impl Default for Lexicon {
    fn default() -> Self {
        BUILTIN.clone()
    }
}

impl Lexicon {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .context("reading lexicon yaml")?;
        cfg.try_deserialize().context("deserializing lexicon")
    }

    /// Load tables from a YAML/TOML/JSON file (format picked from the extension).
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::from(path))
            .build()
            .with_context(|| format!("reading lexicon {}", path.display()))?;
        let lexicon: Lexicon = cfg.try_deserialize().context("deserializing lexicon")?;
        Ok(lexicon)
    }
}

/// Whole-word phrase matcher over `TokenizedText::padded`.
#[derive(Debug, Clone)]
pub struct PhraseSet {
    phrases: Vec<String>,
    ac: Option<AhoCorasick>,
}

impl PhraseSet {
    pub fn new<S: AsRef<str>>(items: &[S]) -> Self {
        let mut seen = HashSet::new();
        let mut phrases = Vec::new();
        for item in items {
            let joined = TokenizedText::new(item.as_ref()).joined();
            if !joined.is_empty() && seen.insert(joined.clone()) {
                phrases.push(joined);
            }
        }

        let patterns: Vec<String> = phrases.iter().map(|p| format!(" {} ", p)).collect();
        let ac = if patterns.is_empty() {
            None
        } else {
            match AhoCorasick::new(&patterns) {
                Ok(ac) => Some(ac),
                Err(e) => {
                    warn!(?e, "failed to build phrase automaton; phrase set disabled");
                    None
                }
            }
        };

        Self { phrases, ac }
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn phrase(&self, idx: usize) -> &str {
        &self.phrases[idx]
    }

    /// Indices of every phrase present in `text`, ascending, without repeats.
    pub fn matches(&self, text: &TokenizedText) -> Vec<usize> {
        let Some(ac) = &self.ac else {
            return Vec::new();
        };
        let mut hits: Vec<usize> = ac
            .find_overlapping_iter(text.padded())
            .map(|m| m.pattern().as_usize())
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    pub fn any_in(&self, text: &TokenizedText) -> bool {
        match &self.ac {
            Some(ac) => ac.is_match(text.padded()),
            None => false,
        }
    }
}

/// Tables ready for scoring.
#[derive(Debug, Clone)]
pub struct CompiledLexicon {
    pub phrases: PhraseSet,
    pub synonym_terms: PhraseSet,
    /// Indexed like `synonym_terms`.
    pub synonym_alternatives: Vec<PhraseSet>,
    pub category_terms: PhraseSet,
    /// Indexed like `category_terms`; lowercase.
    pub category_expectations: Vec<Vec<String>>,
    pub year_end_refs: PhraseSet,
    pub near_term_refs: PhraseSet,
}

/// Merge entries that share a normalized key so per-key indices stay aligned with
/// the key automaton.
fn merge_by_key<'a>(
    entries: impl Iterator<Item = (&'a str, &'a [String])>,
) -> (Vec<String>, Vec<Vec<String>>) {
    let mut keys: Vec<String> = Vec::new();
    let mut values: Vec<Vec<String>> = Vec::new();
    for (term, items) in entries {
        let key = TokenizedText::new(term).joined();
        if key.is_empty() {
            continue;
        }
        match keys.iter().position(|k| *k == key) {
            Some(i) => values[i].extend(items.iter().cloned()),
            None => {
                keys.push(key);
                values.push(items.to_vec());
            }
        }
    }
    (keys, values)
}

impl CompiledLexicon {
    pub fn compile(lexicon: &Lexicon) -> Self {
        let (synonym_keys, synonym_alts) = merge_by_key(
            lexicon
                .synonyms
                .iter()
                .map(|e| (e.term.as_str(), e.alternatives.as_slice())),
        );
        let (category_keys, category_exp) = merge_by_key(
            lexicon
                .categories
                .iter()
                .map(|e| (e.term.as_str(), e.expected.as_slice())),
        );

        Self {
            phrases: PhraseSet::new(&lexicon.phrases),
            synonym_terms: PhraseSet::new(&synonym_keys),
            synonym_alternatives: synonym_alts.iter().map(|a| PhraseSet::new(a)).collect(),
            category_terms: PhraseSet::new(&category_keys),
            category_expectations: category_exp
                .into_iter()
                .map(|exp| exp.iter().map(|c| c.to_lowercase()).collect())
                .collect(),
            year_end_refs: PhraseSet::new(&lexicon.year_end_refs),
            near_term_refs: PhraseSet::new(&lexicon.near_term_refs),
        }
    }
}

impl Default for CompiledLexicon {
    fn default() -> Self {
        Self::compile(&Lexicon::default())
    }
}

/// Shared, hot-swappable lexicon. Each matching call takes one `snapshot()` and
/// keeps it for its whole lifetime.
#[derive(Clone)]
pub struct LexiconHandle {
    inner: Arc<RwLock<Arc<CompiledLexicon>>>,
}

impl Default for LexiconHandle {
    fn default() -> Self {
        Self::new(&Lexicon::default())
    }
}

impl LexiconHandle {
    pub fn new(lexicon: &Lexicon) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(CompiledLexicon::compile(lexicon)))),
        }
    }

    /// Handle over the file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let lexicon = Lexicon::load(path)?;
        Ok(Self::new(&lexicon))
    }

    pub fn snapshot(&self) -> Arc<CompiledLexicon> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, lexicon: &Lexicon) {
        let compiled = Arc::new(CompiledLexicon::compile(lexicon));
        match self.inner.write() {
            Ok(mut guard) => *guard = compiled,
            Err(poisoned) => *poisoned.into_inner() = compiled,
        }
    }

    /// Re-read the tables from disk. On failure the current tables stay in place.
    pub fn reload_from(&self, path: &Path) -> Result<()> {
        let lexicon = Lexicon::load(path)?;
        self.replace(&lexicon);
        info!(
            path = %path.display(),
            phrases = lexicon.phrases.len(),
            synonyms = lexicon.synonyms.len(),
            categories = lexicon.categories.len(),
            "lexicon reloaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_phrase_matching_is_whole_word() {
        let set = PhraseSet::new(&["fed", "rate cut", "ai"]);

        let text = TokenizedText::new("Federal Reserve rate cut in Taiwan");
        let hits: Vec<&str> = set.matches(&text).into_iter().map(|i| set.phrase(i)).collect();
        assert_eq!(hits, vec!["rate cut"]);

        let text = TokenizedText::new("Will the Fed cut?");
        assert!(set.any_in(&text));
    }

    #[test]
    fn test_overlapping_phrases_both_found() {
        let set = PhraseSet::new(&["interest rate", "interest rates", "rates"]);
        let text = TokenizedText::new("interest rates rise");
        let hits: Vec<&str> = set.matches(&text).into_iter().map(|i| set.phrase(i)).collect();
        assert_eq!(hits, vec!["interest rates", "rates"]);
    }

    #[test]
    fn test_entries_are_normalized() {
        // "$200,000" tokenizes to "200 000" and must match the same title text.
        let set = PhraseSet::new(&["$200,000"]);
        let text = TokenizedText::new("Will Bitcoin reach $200,000 by end of 2025?");
        assert!(set.any_in(&text));
    }

    #[test]
    fn test_builtin_tables_come_from_bundled_yaml() {
        let lexicon = Lexicon::default();
        assert!(lexicon.phrases.iter().any(|p| p == "federal reserve"));
        assert!(lexicon.synonyms.iter().any(|s| s.term == "fed"));
        assert!(lexicon.categories.iter().any(|c| c.term == "bitcoin"));
        // camelCase keys survive the config loader
        assert!(lexicon.year_end_refs.iter().any(|r| r == "december"));
        assert!(lexicon.near_term_refs.iter().any(|r| r == "soon"));

        let compiled = CompiledLexicon::compile(&lexicon);
        let text = TokenizedText::new("Will the Fed cut rates at the FOMC meeting?");
        assert!(compiled.synonym_terms.any_in(&text));
    }

    #[test]
    fn test_compile_merges_duplicate_terms() {
        let lexicon = Lexicon {
            phrases: vec![],
            synonyms: vec![
                SynonymEntry {
                    term: "Fed".into(),
                    alternatives: vec!["fomc".into()],
                },
                SynonymEntry {
                    term: "fed".into(),
                    alternatives: vec!["powell".into()],
                },
            ],
            categories: vec![],
            year_end_refs: vec![],
            near_term_refs: vec![],
        };
        let compiled = CompiledLexicon::compile(&lexicon);
        assert_eq!(compiled.synonym_terms.len(), 1);
        assert_eq!(compiled.synonym_alternatives.len(), 1);
        assert_eq!(compiled.synonym_alternatives[0].len(), 2);
    }

    #[test]
    fn test_handle_reload_from_yaml() {
        let dir = std::env::temp_dir().join(format!("lexicon-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("lexicon.yml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
phrases:
  - "world cup"
synonyms:
  - term: soccer
    alternatives: [football]
yearEndRefs: ["this year"]
nearTermRefs: ["soon"]
"#
        )
        .unwrap();

        let handle = LexiconHandle::default();
        let before = handle.snapshot();
        assert!(before.phrases.len() > 1);

        handle.reload_from(&path).unwrap();
        let after = handle.snapshot();
        assert_eq!(after.phrases.len(), 1);
        assert_eq!(after.synonym_terms.len(), 1);
        assert!(after.category_terms.is_empty());
        // the old snapshot is untouched
        assert!(before.phrases.len() > 1);

        // a missing file keeps the current tables
        assert!(handle.reload_from(&dir.join("missing.yml")).is_err());
        assert_eq!(handle.snapshot().phrases.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
