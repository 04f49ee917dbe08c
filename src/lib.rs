//! Newsletter Quiz: turns newsletter emails into multiple-choice quizzes.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod quiz;
pub mod store;
