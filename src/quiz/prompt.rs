//! Generation prompt template.

use crate::quiz::model::{OPTION_COUNT, QUESTION_COUNT, ThemeSet};

/// Output contract shown to the model.
pub const SCHEMA: &str = r#"{
  "titre": "titre court du quiz",
  "theme_global": "UN des thèmes listés",
  "questions": [
    {
      "q": "question courte et précise",
      "options": ["option A", "option B", "option C", "option D"],
      "correct": 0,
      "explication": "explication détaillée de la bonne réponse"
    }
  ]
}"#;

const DEFAULT_TEMPLATE: &str = "\
Analyse cette newsletter d'actualité et génère un quiz.

Règles :
- EXACTEMENT {question_count} questions QCM, chacune avec 4 options.
- Une seule bonne réponse par question ; \"correct\" est l'indice (0 à 3) de la bonne option.
- Questions courtes et précises, explications détaillées.
- Attribue au quiz UN des thèmes suivants : {themes}

Réponds uniquement avec un objet JSON, sans texte autour, au format :
{schema}

Contenu :
{content}
";

/// System instruction sent with every request.
pub const SYSTEM_INSTRUCTION: &str =
    "Tu es un générateur de quiz. Tu réponds toujours par un unique objet JSON valide.";

/// Prompt text with `{themes}`, `{schema}`, `{question_count}` and `{content}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    /// A template must at least place the newsletter content.
    pub fn new(text: impl Into<String>) -> Result<Self, String> {
        let text = text.into();
        if !text.contains("{content}") {
            return Err("template has no {content} placeholder".into());
        }
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn render(&self, themes: &ThemeSet, content: &str) -> String {
        // Content goes last so braces inside the newsletter are never
        // mistaken for placeholders.
        self.text
            .replace("{themes}", &themes.join(", "))
            .replace("{schema}", SCHEMA)
            .replace("{question_count}", &QUESTION_COUNT.to_string())
            .replace("{option_count}", &OPTION_COUNT.to_string())
            .replace("{content}", content)
    }
}
