//! Keyword-based topic classification of learner utterances.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of topics a learner utterance can be mapped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicCategory {
    Greeting,
    Pain,
    Medication,
    Vitals,
    Aftercare,
    Default,
}

impl TopicCategory {
    /// Keyword categories in the order they are tested. `Default` is not part
    /// of it; it is what remains when nothing matches.
    pub const PRIORITY: [TopicCategory; 5] = [
        TopicCategory::Greeting,
        TopicCategory::Pain,
        TopicCategory::Medication,
        TopicCategory::Vitals,
        TopicCategory::Aftercare,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TopicCategory::Greeting => "greeting",
            TopicCategory::Pain => "pain",
            TopicCategory::Medication => "medication",
            TopicCategory::Vitals => "vitals",
            TopicCategory::Aftercare => "aftercare",
            TopicCategory::Default => "default",
        }
    }

    fn priority_slot(self) -> Option<usize> {
        Self::PRIORITY.iter().position(|c| *c == self)
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cased keywords per category, stored in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordTable {
    by_priority: [Vec<String>; 5],
}

impl KeywordTable {
    /// Builds a table from `(category, keywords)` pairs in any order.
    ///
    /// Keywords are trimmed and lower-cased; blank keywords are dropped so they
    /// cannot match every input. Keywords listed under `Default` are ignored.
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (TopicCategory, K)>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        let mut table = Self::default();
        for (category, keywords) in entries {
            let Some(slot) = category.priority_slot() else {
                continue;
            };
            table.by_priority[slot].extend(
                keywords
                    .into_iter()
                    .map(|k| k.as_ref().trim().to_lowercase())
                    .filter(|k| !k.is_empty()),
            );
        }
        table
    }

    #[must_use]
    pub fn keywords(&self, category: TopicCategory) -> &[String] {
        category
            .priority_slot()
            .map(|slot| self.by_priority[slot].as_slice())
            .unwrap_or(&[])
    }
}

impl From<HashMap<TopicCategory, Vec<String>>> for KeywordTable {
    fn from(map: HashMap<TopicCategory, Vec<String>>) -> Self {
        Self::new(map)
    }
}

/// Maps free text to a [`TopicCategory`] by case-insensitive substring
/// containment, testing categories in [`TopicCategory::PRIORITY`] order.
#[derive(Debug, Clone, Copy)]
pub struct ResponseClassifier<'a> {
    table: &'a KeywordTable,
}

impl<'a> ResponseClassifier<'a> {
    #[must_use]
    pub fn new(table: &'a KeywordTable) -> Self {
        Self { table }
    }

    /// Total over all inputs: returns `Default` when no keyword matches.
    #[must_use]
    pub fn classify(&self, text: &str) -> TopicCategory {
        let lowered = text.to_lowercase();
        TopicCategory::PRIORITY
            .iter()
            .zip(&self.table.by_priority)
            .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map_or(TopicCategory::Default, |(category, _)| *category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> KeywordTable {
        KeywordTable::new([
            (TopicCategory::Aftercare, vec!["discharge", "home"]),
            (TopicCategory::Greeting, vec!["hello", "guten tag"]),
            (TopicCategory::Pain, vec!["pain", "Schmerz"]),
            (TopicCategory::Medication, vec!["tablet"]),
            (TopicCategory::Vitals, vec!["blood pressure", "  "]),
        ])
    }

    #[test]
    fn pain_keywords_match_case_insensitively() {
        let table = table();
        let classifier = ResponseClassifier::new(&table);

        assert_eq!(classifier.classify("Wo haben Sie SCHMERZEN?"), TopicCategory::Pain);
        assert_eq!(classifier.classify("any schmerz at all"), TopicCategory::Pain);
        assert_eq!(classifier.classify("Is the pain better?"), TopicCategory::Pain);
    }

    #[test]
    fn unmatched_text_falls_back_to_default() {
        let table = table();
        let classifier = ResponseClassifier::new(&table);

        assert_eq!(classifier.classify("The weather is nice"), TopicCategory::Default);
        assert_eq!(classifier.classify(""), TopicCategory::Default);
    }

    #[test]
    fn earlier_category_wins_when_several_match() {
        let table = table();
        let classifier = ResponseClassifier::new(&table);

        assert_eq!(
            classifier.classify("Hello, any pain before you go home?"),
            TopicCategory::Greeting
        );
        assert_eq!(
            classifier.classify("Take this tablet for the pain"),
            TopicCategory::Pain
        );
    }

    #[test]
    fn blank_keywords_never_match() {
        let table = table();
        assert_eq!(table.keywords(TopicCategory::Vitals), ["blood pressure"]);
        assert!(table.keywords(TopicCategory::Default).is_empty());
    }
}
