//! Value types flowing through the inference pipeline

use std::fmt;

/// Dedup key for one author, `"{first} {last}"`.
///
/// Two different people with the same name share a key; the pipeline
/// infers them once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuthorKey(String);

impl AuthorKey {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self(format!("{first_name} {last_name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AuthorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First and last name of one author role from one input row.
///
/// Both parts are trimmed, non-empty, and free of tab/newline characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePair {
    first_name: String,
    last_name: String,
}

impl NamePair {
    /// Returns `None` when either part is blank after normalization
    pub fn new(first_name: &str, last_name: &str) -> Option<Self> {
        let first_name = normalize_name(first_name);
        let last_name = normalize_name(last_name);
        if first_name.is_empty() || last_name.is_empty() {
            return None;
        }
        Some(Self {
            first_name,
            last_name,
        })
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn key(&self) -> AuthorKey {
        AuthorKey::new(&self.first_name, &self.last_name)
    }
}

/// Collapse control whitespace to single spaces and trim.
///
/// Keeps the output file's one-row-per-line shape and makes keys
/// identical whether built from the input or read back from the output.
fn normalize_name(raw: &str) -> String {
    raw.split(|c: char| c == '\t' || c == '\n' || c == '\r')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Inferred gender label.
///
/// `NotRetrievable` is a real classifier answer; `Unknown` means the
/// response could not be parsed and no field of it is trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
    Other,
    NotRetrievable,
    Unknown,
}

impl Gender {
    pub const ALL: [Gender; 5] = [
        Gender::Male,
        Gender::Female,
        Gender::Other,
        Gender::NotRetrievable,
        Gender::Unknown,
    ];

    /// Label written to the output file
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
            Self::NotRetrievable => "not retrievable",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a label produced by the model.
    ///
    /// Case-insensitive; `not_retrievable`, `not-retrievable` and extra
    /// spaces are accepted. `unknown` is not a model answer and is rejected.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalized.as_str() {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            "other" => Some(Self::Other),
            "not retrievable" => Some(Self::NotRetrievable),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Male => 0,
            Self::Female => 1,
            Self::Other => 2,
            Self::NotRetrievable => 3,
            Self::Unknown => 4,
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inferred author, written as one output row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResult {
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub reasoning: String,
}

impl InferenceResult {
    pub fn new(pair: &NamePair, gender: Gender, reasoning: impl Into<String>) -> Self {
        Self {
            first_name: pair.first_name().to_string(),
            last_name: pair.last_name().to_string(),
            gender,
            reasoning: reasoning.into(),
        }
    }

    /// Result for a response that could not be parsed
    pub fn unparsed(pair: &NamePair) -> Self {
        Self::new(pair, Gender::Unknown, String::new())
    }

    pub fn key(&self) -> AuthorKey {
        AuthorKey::new(&self.first_name, &self.last_name)
    }
}

/// Per-label row counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenderCounts([usize; 5]);

impl GenderCounts {
    pub fn add(&mut self, gender: Gender) {
        self.0[gender.index()] += 1;
    }

    pub fn get(&self, gender: Gender) -> usize {
        self.0[gender.index()]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}
