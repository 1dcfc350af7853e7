use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pre-validated answer returned when every phrase in `all_of` occurs in the question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownAnswer {
    pub all_of: Vec<String>,
    pub answer: String,
}

/// Optional stage between retrieval and synthesis. Entries are checked in file
/// order and the first match wins. Empty unless loaded from a file.
#[derive(Debug, Clone, Default)]
pub struct KnownAnswerTable {
    entries: Vec<KnownAnswer>,
}

impl KnownAnswerTable {
    pub fn new(entries: Vec<KnownAnswer>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|entry| !entry.all_of.is_empty())
            .map(|entry| KnownAnswer {
                all_of: entry.all_of.iter().map(|phrase| phrase.to_lowercase()).collect(),
                answer: entry.answer,
            })
            .collect();
        Self { entries }
    }

    pub fn from_json_str(json: &str) -> Result<Self, IngestError> {
        let entries: Vec<KnownAnswer> = serde_json::from_str(json)
            .map_err(|error| IngestError::InvalidArgument(format!("known-answer table: {error}")))?;
        Ok(Self::new(entries))
    }

    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, question: &str) -> Option<&str> {
        let lowered = question.to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.all_of.iter().all(|phrase| lowered.contains(phrase.as_str())))
            .map(|entry| entry.answer.as_str())
    }
}
