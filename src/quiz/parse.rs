//! Turning raw generator output into a validated [`QuizArtifact`].
//!
//! Two stages: strict parse of the whole response, then the first balanced
//! `{...}` span. The parsed value is checked against the quiz schema before
//! anything reads its fields.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ResponseError;
use crate::quiz::model::{Question, QuizArtifact, ThemeSet};

/// Lenient wire shape. Models drift between French and English keys.
#[derive(Debug, Deserialize)]
struct WireQuiz {
    #[serde(alias = "title")]
    titre: Option<String>,
    #[serde(alias = "theme")]
    theme_global: Option<String>,
    #[serde(default)]
    questions: Vec<WireQuestion>,
}

#[derive(Debug, Deserialize)]
struct WireQuestion {
    #[serde(alias = "question", alias = "prompt")]
    q: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(alias = "correct_index", alias = "answer")]
    correct: Option<Value>,
    #[serde(alias = "explanation")]
    explication: Option<String>,
}

/// Parse and validate one generator response.
pub fn parse_quiz(response: &str, themes: &ThemeSet) -> Result<QuizArtifact, ResponseError> {
    let value = parse_json(response)?;
    if !value.is_object() {
        return Err(ResponseError::Schema("top-level value is not an object".into()));
    }
    let wire: WireQuiz =
        serde_json::from_value(value).map_err(|e| ResponseError::Schema(e.to_string()))?;
    validate(wire, themes)
}

fn parse_json(response: &str) -> Result<Value, ResponseError> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let span = extract_json_object(trimmed)
        .ok_or_else(|| ResponseError::Parse("no balanced JSON object in response".into()))?;
    serde_json::from_str(span).map_err(|e| ResponseError::Parse(e.to_string()))
}

/// First balanced `{...}` span, skipping braces inside string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(&text[start..]) {
            return Some(&text[start..start + end]);
        }
        search_from = start + 1;
    }
    None
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate(wire: WireQuiz, themes: &ThemeSet) -> Result<QuizArtifact, ResponseError> {
    let title = wire
        .titre
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    let raw_theme = wire
        .theme_global
        .ok_or_else(|| ResponseError::Schema("missing theme".into()))?;
    let theme = themes
        .canonical(&raw_theme)
        .ok_or_else(|| ResponseError::Schema(format!("theme '{raw_theme}' is not in the theme set")))?
        .to_string();

    let questions = wire
        .questions
        .into_iter()
        .enumerate()
        .map(|(i, q)| to_question(i + 1, q))
        .collect::<Result<Vec<_>, _>>()?;

    let quiz = QuizArtifact {
        title,
        theme,
        questions,
    };
    quiz.check_shape().map_err(ResponseError::Schema)?;
    Ok(quiz)
}

fn to_question(n: usize, wire: WireQuestion) -> Result<Question, ResponseError> {
    let correct = wire
        .correct
        .ok_or_else(|| ResponseError::Schema(format!("question {n}: missing correct answer")))?;
    let correct_index = answer_index(&correct).ok_or_else(|| {
        ResponseError::Schema(format!("question {n}: unreadable correct answer {correct}"))
    })?;

    Ok(Question {
        prompt: wire.q.map(|s| s.trim().to_string()).unwrap_or_default(),
        options: wire.options.into_iter().map(|o| o.trim().to_string()).collect(),
        correct_index,
        explanation: wire
            .explication
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    })
}

/// Accepts `2`, `"2"` or a letter `"C"`.
fn answer_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<usize>() {
                return Some(n);
            }
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c @ 'A'..='Z'), None) | (Some(c @ 'a'..='z'), None) => {
                    Some((c.to_ascii_uppercase() as u8 - b'A') as usize)
                }
                _ => None,
            }
        }
        _ => None,
    }
}
