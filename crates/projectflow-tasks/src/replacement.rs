//! Replacement sets and placeholder substitution
//!
//! An iterator carries a [`ReplacementSet`]: placeholder names mapped to
//! equal-length value sequences. Expansion `i` substitutes the `i`-th value
//! of every sequence for `{name}` in descendant templates.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use projectflow_core::ConfigError;

/// Placeholder names must be identifiers
static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"));

/// `{name}` occurrences in a template
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("Invalid regex"));

/// Substitution values visible to one expansion
pub type Substitutions = BTreeMap<String, String>;

/// Named, equal-length value sequences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplacementSet {
    sequences: BTreeMap<String, Vec<String>>,
}

impl ReplacementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a placeholder's value sequence
    pub fn with<I, V>(mut self, placeholder: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        self.insert(placeholder, values);
        self
    }

    pub fn insert<I, V>(&mut self, placeholder: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        self.sequences.insert(
            placeholder.into(),
            values.into_iter().map(|v| v.to_string()).collect(),
        );
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }

    pub fn values(&self, placeholder: &str) -> Option<&[String]> {
        self.sequences.get(placeholder).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Number of expansions (length of the first sequence)
    pub fn len(&self) -> usize {
        self.sequences.values().next().map_or(0, Vec::len)
    }

    /// Check placeholder names and sequence lengths, returning the expansion count
    pub fn validate(&self, iterator: &str) -> Result<usize, ConfigError> {
        if self.sequences.is_empty() {
            return Err(ConfigError::EmptyReplacementSet(iterator.to_string()));
        }

        for placeholder in self.sequences.keys() {
            if !PLACEHOLDER_REGEX.is_match(placeholder) {
                return Err(ConfigError::InvalidPlaceholder {
                    task: iterator.to_string(),
                    placeholder: placeholder.clone(),
                });
            }
        }

        let expected = self.len();
        if self.sequences.values().any(|v| v.len() != expected) {
            let lengths = self
                .sequences
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.len()))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::ReplacementLengthMismatch {
                iterator: iterator.to_string(),
                lengths,
            });
        }

        Ok(expected)
    }

    /// Substitutions for expansion `index`, layered over an outer context.
    ///
    /// Values may themselves reference outer placeholders; those are
    /// substituted first.
    pub fn context(&self, index: usize, outer: &Substitutions) -> Substitutions {
        let mut subs = outer.clone();
        for (placeholder, values) in &self.sequences {
            if let Some(value) = values.get(index) {
                subs.insert(placeholder.clone(), substitute(value, outer));
            }
        }
        subs
    }

    /// Every context this set produces over `outer`, in index order
    pub fn contexts(&self, outer: &Substitutions) -> Vec<Substitutions> {
        (0..self.len()).map(|i| self.context(i, outer)).collect()
    }
}

/// Replace every `{name}` in `template` with its value in a single pass;
/// unknown placeholders are left untouched
pub fn substitute(template: &str, subs: &Substitutions) -> String {
    if subs.is_empty() || !template.contains('{') {
        return template.to_string();
    }

    TOKEN_REGEX
        .replace_all(template, |caps: &Captures<'_>| match subs.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
