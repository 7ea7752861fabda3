//! Canned dialogue content: keyword lists, response pools and paraphrase
//! templates. Loaded once at startup and shared read-only.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::classifier::{KeywordTable, TopicCategory};

/// Placeholder replaced with the scenario context in paraphrase templates.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

const BUILTIN_CONTENT: &str = include_str!("../data/content.json");

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ContentError {
    #[error("context template `{0}` does not contain {{context}}")]
    TemplateWithoutPlaceholder(String),
    #[error("apology text must not be empty")]
    EmptyApology,
    #[error("failed to read content file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    keywords: HashMap<TopicCategory, Vec<String>>,
    responses: HashMap<TopicCategory, Vec<String>>,
    context_templates: Vec<String>,
    apology: String,
}

/// Immutable configuration data for the responder and classifier.
#[derive(Debug, Clone)]
pub struct DialogueContent {
    keywords: KeywordTable,
    responses: HashMap<TopicCategory, Vec<String>>,
    context_templates: Vec<String>,
    apology: String,
}

impl DialogueContent {
    /// Loads the content that ships with this crate.
    ///
    /// # Errors
    ///
    /// Returns `ContentError` if the embedded content is invalid.
    pub fn builtin() -> Result<Self, ContentError> {
        Self::from_json_str(BUILTIN_CONTENT)
    }

    /// # Errors
    ///
    /// Returns `ContentError` if the file cannot be read or is invalid.
    pub fn from_path(path: &Path) -> Result<Self, ContentError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ContentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// # Errors
    ///
    /// Returns `ContentError` on malformed JSON, templates without the
    /// `{context}` placeholder, or an empty apology.
    pub fn from_json_str(raw: &str) -> Result<Self, ContentError> {
        let file: ContentFile = serde_json::from_str(raw)?;
        Self::new(
            KeywordTable::from(file.keywords),
            file.responses,
            file.context_templates,
            file.apology,
        )
    }

    /// # Errors
    ///
    /// Returns `ContentError` on templates without the `{context}`
    /// placeholder or an empty apology.
    pub fn new(
        keywords: KeywordTable,
        responses: HashMap<TopicCategory, Vec<String>>,
        context_templates: Vec<String>,
        apology: String,
    ) -> Result<Self, ContentError> {
        if let Some(bad) = context_templates
            .iter()
            .find(|t| !t.contains(CONTEXT_PLACEHOLDER))
        {
            return Err(ContentError::TemplateWithoutPlaceholder(bad.clone()));
        }
        if apology.trim().is_empty() {
            return Err(ContentError::EmptyApology);
        }
        Ok(Self {
            keywords,
            responses,
            context_templates,
            apology,
        })
    }

    #[must_use]
    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    /// Canned replies for a category; empty when none are configured.
    #[must_use]
    pub fn pool(&self, category: TopicCategory) -> &[String] {
        self.responses
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn context_templates(&self) -> &[String] {
        &self.context_templates
    }

    #[must_use]
    pub fn apology(&self) -> &str {
        &self.apology
    }
}
