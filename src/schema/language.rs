//! The active language set.
//!
//! Every multi-language text property fans out into one column per language,
//! named `{column}_{language}` with the language id reduced to identifier
//! characters (`en-US` becomes `en_US`).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Ordered, non-empty set of language identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageSet {
    languages: Vec<String>,
}

impl LanguageSet {
    /// Build a set; duplicates are dropped, order is kept.
    pub fn new<S: AsRef<str>>(languages: impl IntoIterator<Item = S>) -> Result<Self, ConfigError> {
        let mut list: Vec<String> = Vec::new();
        for lang in languages {
            let lang = lang.as_ref().trim();
            if !lang.is_empty() && !list.iter().any(|l| l.eq_ignore_ascii_case(lang)) {
                list.push(lang.to_string());
            }
        }
        if list.is_empty() {
            return Err(ConfigError::EmptyLanguageSet);
        }
        Ok(Self { languages: list })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.languages.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// First language; the source language of the translation sweep.
    pub fn primary(&self) -> &str {
        &self.languages[0]
    }

    pub fn contains(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }

    /// Column holding `language` for a multi-language column.
    pub fn column_name(column: &str, language: &str) -> String {
        format!("{}_{}", column, encode_language(language))
    }
}

/// Identifier-safe form of a language id.
pub fn encode_language(language: &str) -> String {
    language
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
