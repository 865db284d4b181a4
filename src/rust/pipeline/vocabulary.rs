use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::error::PipelineError;

/// Bijective mapping between label strings and dense integer keys.
///
/// Keys are assigned in first-appearance order, starting at 0. The vocabulary
/// is built once from training labels and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelVocabulary {
    labels: Vec<String>,
    keys: HashMap<String, usize>,
}

impl LabelVocabulary {
    /// Builds a vocabulary from label values, ignoring repeats
    ///
    /// # Example
    /// ```
    /// use occipital::LabelVocabulary;
    ///
    /// let vocab = LabelVocabulary::from_labels(["cat", "dog", "cat"]);
    /// assert_eq!(vocab.len(), 2);
    /// assert_eq!(vocab.key_of("dog").unwrap(), 1);
    /// ```
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let mut vocab = Self {
            labels: Vec::new(),
            keys: HashMap::new(),
        };
        for label in labels {
            if !vocab.keys.contains_key(label) {
                vocab.keys.insert(label.to_string(), vocab.labels.len());
                vocab.labels.push(label.to_string());
            }
        }
        vocab
    }

    /// Returns the key for `label`, or `UnknownLabel` when it was never seen in training
    pub fn key_of(&self, label: &str) -> Result<usize, PipelineError> {
        self.keys
            .get(label)
            .copied()
            .ok_or_else(|| PipelineError::UnknownLabel(label.to_string()))
    }

    pub fn label_of(&self, key: usize) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.keys.contains_key(label)
    }

    /// Labels in key order
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl TryFrom<Vec<String>> for LabelVocabulary {
    type Error = String;

    fn try_from(labels: Vec<String>) -> Result<Self, Self::Error> {
        let vocab = Self::from_labels(labels.iter().map(String::as_str));
        if vocab.len() != labels.len() {
            return Err("vocabulary contains duplicate labels".to_string());
        }
        Ok(vocab)
    }
}

impl From<LabelVocabulary> for Vec<String> {
    fn from(vocab: LabelVocabulary) -> Self {
        vocab.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_follow_first_appearance() {
        let vocab = LabelVocabulary::from_labels(["dog", "cat", "dog", "bird"]);
        assert_eq!(vocab.labels(), &["dog", "cat", "bird"]);
        assert_eq!(vocab.key_of("bird").unwrap(), 2);
        assert_eq!(vocab.label_of(1), Some("cat"));
        assert_eq!(vocab.label_of(3), None);
    }

    #[test]
    fn test_unknown_label_is_reported() {
        let vocab = LabelVocabulary::from_labels(["cat", "dog"]);
        match vocab.key_of("toaster") {
            Err(PipelineError::UnknownLabel(label)) => assert_eq!(label, "toaster"),
            other => panic!("expected UnknownLabel, got {:?}", other),
        }
    }

    #[test]
    fn test_serialized_form_is_label_list() {
        let vocab = LabelVocabulary::from_labels(["cat", "dog"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["cat","dog"]"#);
        let restored: LabelVocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vocab);
    }

    #[test]
    fn test_duplicate_labels_rejected_on_deserialize() {
        let result: Result<LabelVocabulary, _> = serde_json::from_str(r#"["cat","cat"]"#);
        assert!(result.is_err());
    }
}
