//! API key storage command

use crate::credentials;
use crate::error::Result;
use colored::Colorize;
use rustyline::DefaultEditor;

/// Prompt for the completion API key and store it, or clear it
///
/// # Errors
///
/// Returns an error if the prompt fails, the key is blank, or the keyring
/// rejects the change.
pub fn authenticate(clear: bool) -> Result<()> {
    if clear {
        credentials::clear_api_key()?;
        println!("{}", "Removed stored API key".green());
        return Ok(());
    }

    let mut rl = DefaultEditor::new()?;
    let key = rl.readline("API key: ")?;
    credentials::store_api_key(&key)?;
    println!("{}", "API key stored in the system keyring".green());

    if std::env::var(credentials::API_KEY_ENV).is_ok() {
        println!(
            "{}",
            format!(
                "Note: {} is set and takes precedence over the stored key",
                credentials::API_KEY_ENV
            )
            .yellow()
        );
    }
    Ok(())
}
