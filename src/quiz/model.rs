//! Quiz data model and the theme enumeration.
//!
//! Field names on the wire are the French ones the quiz front end reads
//! (`titre`, `q`, `explication`, ...). Older artifacts used `theme` where
//! newer ones use `theme_global`; both are accepted on read.

use serde::{Deserialize, Serialize};

/// Questions per quiz.
pub const QUESTION_COUNT: usize = 10;

/// Options per question.
pub const OPTION_COUNT: usize = 4;

/// One multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "q")]
    pub prompt: String,
    pub options: Vec<String>,
    /// Zero-based index into `options`.
    #[serde(rename = "correct")]
    pub correct_index: usize,
    #[serde(rename = "explication")]
    pub explanation: String,
}

/// A validated quiz produced from one newsletter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizArtifact {
    #[serde(rename = "titre")]
    pub title: String,
    #[serde(rename = "theme_global", alias = "theme")]
    pub theme: String,
    pub questions: Vec<Question>,
}

impl QuizArtifact {
    /// Structural check: question count, option count, answer index.
    ///
    /// Theme membership is checked separately against a [`ThemeSet`].
    pub fn check_shape(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("empty title".into());
        }
        if self.questions.len() != QUESTION_COUNT {
            return Err(format!(
                "expected {QUESTION_COUNT} questions, got {}",
                self.questions.len()
            ));
        }
        for (i, q) in self.questions.iter().enumerate() {
            let n = i + 1;
            if q.prompt.trim().is_empty() {
                return Err(format!("question {n}: empty prompt"));
            }
            if q.options.len() != OPTION_COUNT {
                return Err(format!(
                    "question {n}: expected {OPTION_COUNT} options, got {}",
                    q.options.len()
                ));
            }
            if q.options.iter().any(|o| o.trim().is_empty()) {
                return Err(format!("question {n}: empty option"));
            }
            if q.correct_index >= OPTION_COUNT {
                return Err(format!(
                    "question {n}: correct index {} out of range",
                    q.correct_index
                ));
            }
        }
        Ok(())
    }
}

const DEFAULT_THEMES: [&str; 8] = [
    "POLITIQUE EN FRANCE",
    "POLITIQUE INTERNATIONALE ET CONFLITS",
    "SOCIÉTÉ / FAITS DE SOCIÉTÉ",
    "ÉCONOMIE ET EMPLOI",
    "ENVIRONNEMENT ET CLIMAT",
    "SCIENCE, SANTÉ ET TECHNOLOGIE",
    "CULTURE ET MÉDIAS",
    "SPORT",
];

/// The fixed set of themes a quiz may be filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeSet {
    themes: Vec<String>,
}

impl Default for ThemeSet {
    fn default() -> Self {
        Self {
            themes: DEFAULT_THEMES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl ThemeSet {
    /// Parse a `|`-separated list. `None` if nothing remains after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::from_names(raw.split('|'))
    }

    pub fn from_names<I, S>(names: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut themes: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if !name.is_empty() && !themes.iter().any(|t| t.eq_ignore_ascii_case(name)) {
                themes.push(name.to_string());
            }
        }
        (!themes.is_empty()).then_some(Self { themes })
    }

    pub fn len(&self) -> usize {
        self.themes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.themes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.themes.iter().map(String::as_str)
    }

    /// Configured spelling of `candidate`, matched case-insensitively.
    pub fn canonical(&self, candidate: &str) -> Option<&str> {
        let wanted = candidate.trim().to_lowercase();
        self.themes
            .iter()
            .find(|t| t.to_lowercase() == wanted)
            .map(String::as_str)
    }

    pub fn join(&self, sep: &str) -> String {
        self.themes.join(sep)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A quiz that passes every check against the default theme set.
    pub fn valid_quiz(title: &str) -> QuizArtifact {
        QuizArtifact {
            title: title.to_string(),
            theme: "SPORT".to_string(),
            questions: (0..QUESTION_COUNT)
                .map(|i| Question {
                    prompt: format!("Question {}", i + 1),
                    options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                    correct_index: i % OPTION_COUNT,
                    explanation: format!("Because {}", i + 1),
                })
                .collect(),
        }
    }
}
