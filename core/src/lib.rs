mod cli;

pub use cli::{ask_bool_with_default, ask_question, ask_question_with_default};
