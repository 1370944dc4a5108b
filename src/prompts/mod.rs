//! System prompts and quick prompts for study conversations
//!
//! A conversation scoped to a book gets instructions naming that book and
//! a set of suggested opening questions about it. Unscoped conversations
//! use a general study prompt.

pub mod books;

pub use books::{find_book, Book, Testament, BOOKS};

const BASE_PROMPT: &str = "You are a Bible study companion. Answer with care and \
humility, cite chapter and verse when you refer to the text, and say plainly when \
Christian traditions disagree instead of presenting one reading as settled. Reply \
in the language the user writes in.";

/// Builds the system prompt for a conversation
///
/// # Arguments
///
/// * `book` - The book the conversation is scoped to, if any
///
/// # Examples
///
/// ```
/// use lampstand::prompts::{build_system_prompt, find_book};
///
/// let prompt = build_system_prompt(find_book("rute"));
/// assert!(prompt.contains("Rute"));
/// ```
pub fn build_system_prompt(book: Option<&Book>) -> String {
    match book {
        Some(book) => {
            let testament = match book.testament {
                Testament::Old => "Old Testament",
                Testament::New => "New Testament",
            };
            format!(
                "{}\n\nThis conversation is about the book of {} ({}). Keep answers \
                 anchored in {}, drawing on the rest of Scripture only to illuminate it.",
                BASE_PROMPT, book.name, testament, book.name
            )
        }
        None => BASE_PROMPT.to_string(),
    }
}

/// Appends a translation preference to a system prompt
pub fn with_translation(prompt: String, translation: Option<&str>) -> String {
    match translation.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => format!("{}\n\nQuote Scripture from the {} translation.", prompt, t),
        None => prompt,
    }
}

/// Suggested opening questions shown before the first message
pub fn quick_prompts(book: Option<&Book>) -> Vec<String> {
    match book {
        Some(book) => vec![
            format!("Qual é o tema central de {}?", book.name),
            format!("Quem escreveu {} e em que contexto?", book.name),
            format!("Como {} aponta para Cristo?", book.name),
            format!("Quais versículos de {} são mais citados?", book.name),
        ],
        None => vec![
            "Por onde começo a ler a Bíblia?".to_string(),
            "Qual a diferença entre o Antigo e o Novo Testamento?".to_string(),
            "Como montar um plano de leitura anual?".to_string(),
        ],
    }
}
