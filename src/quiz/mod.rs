//! Quiz model, prompt, response parsing and generation.

pub mod generator;
pub mod model;
pub mod parse;
pub mod prompt;

pub use generator::QuizGenerator;
pub use model::{OPTION_COUNT, QUESTION_COUNT, Question, QuizArtifact, ThemeSet};
pub use parse::parse_quiz;
pub use prompt::PromptTemplate;
