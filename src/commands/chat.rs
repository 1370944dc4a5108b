//! Interactive chat handler
//!
//! Builds a [`ChatController`] for the local user and runs a
//! readline-based loop that sends each line and streams the reply to the
//! terminal as it arrives.

use crate::cache::{LocalCache, ReadingPosition};
use crate::chat::{ChatController, ChatServices, Notice, SendOutcome};
use crate::commands::Services;
use crate::completion::{
    CompletionRequest, CompletionService, OpenAiCompletion, ScriptedCompletion,
};
use crate::config::Config;
use crate::credentials;
use crate::error::{LampstandError, Result};
use crate::identity::LocalIdentity;
use crate::prompts::{self, Book};
use crate::sessions::Role;
use async_trait::async_trait;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::sync::Arc;

const OFFLINE_REPLY: &str = "Offline mode: no assistant is connected, so this is a canned reply.";

/// Options gathered from the `chat` command line
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Local user id
    pub user: String,
    /// Book slug to scope new conversations to
    pub book: Option<String>,
    /// Session slug to resume, or `"last"`
    pub resume: Option<String>,
    /// Preferred translation
    pub translation: Option<String>,
    /// Use canned replies
    pub offline: bool,
}

/// Prints chunks to stdout as they stream
struct ConsoleStream {
    inner: Arc<dyn CompletionService>,
}

#[async_trait]
impl CompletionService for ConsoleStream {
    async fn complete(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String> {
        let mut print_chunk = |chunk: &str| {
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
            on_chunk(chunk);
        };
        self.inner.complete(request, &mut print_chunk).await
    }
}

/// Input line meaning
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Message(String),
    QuickPrompt(usize),
    New,
    Quota,
    Help,
    Exit,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return Input::Message(trimmed.to_string());
    };
    match command.to_lowercase().as_str() {
        "new" => Input::New,
        "quota" => Input::Quota,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Exit,
        n => match n.parse::<usize>() {
            Ok(index) if index > 0 => Input::QuickPrompt(index - 1),
            _ => Input::Unknown(trimmed.to_string()),
        },
    }
}

fn resolve_book(slug: Option<&str>, cache: Option<&LocalCache>) -> Result<Option<&'static Book>> {
    if let Some(slug) = slug {
        return prompts::find_book(slug)
            .map(Some)
            .ok_or_else(|| LampstandError::InvalidInput(format!("Unknown book: {}", slug)).into());
    }
    Ok(cache
        .and_then(|c| c.reading_position())
        .and_then(|p| prompts::find_book(&p.book)))
}

fn build_completion(config: &Config, offline: bool) -> Result<Arc<dyn CompletionService>> {
    if offline {
        tracing::info!("Using offline canned replies");
        return Ok(Arc::new(ScriptedCompletion::echoing(OFFLINE_REPLY)));
    }

    let api_key = credentials::resolve_api_key()?;
    if api_key.is_none() {
        tracing::warn!(
            "No API key found, sending unauthenticated requests. Run `lampstand auth` or set {}",
            credentials::API_KEY_ENV
        );
    }
    Ok(Arc::new(OpenAiCompletion::new(
        config.completion.clone(),
        api_key,
    )?))
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::CompletionFailed(_) | Notice::StoreUnavailable(_) => {
            println!("{}", notice.to_string().red())
        }
        _ => println!("{}", notice.to_string().yellow()),
    }
}

fn print_transcript(controller: &ChatController) {
    for entry in controller.transcript() {
        let who = match entry.message.role {
            Role::User => "you".bold().cyan(),
            Role::Assistant => "lampstand".bold().green(),
        };
        println!("{}: {}\n", who, entry.message.content);
    }
}

fn print_welcome(book: Option<&Book>, quick: &[String]) {
    println!("{}", "Lampstand".bold());
    match book {
        Some(book) => println!("Studying {}", book.name.cyan()),
        None => println!("General Bible study"),
    }
    println!("Type /help for commands.\n");
    print_quick_prompts(quick);
}

fn print_quick_prompts(quick: &[String]) {
    for (i, prompt) in quick.iter().enumerate() {
        println!("  {} {}", format!("/{}", i + 1).cyan(), prompt);
    }
    println!();
}

fn print_help() {
    println!("  /N       send quick prompt N");
    println!("  /new     start a new conversation");
    println!("  /quota   show remaining messages");
    println!("  /quit    leave\n");
}

async fn print_quota(services: &Services, user: &str) {
    match services.ledger.status(user).await {
        Ok(status) => match (status.remaining, status.limit) {
            (Some(remaining), Some(limit)) => println!(
                "{}",
                format!("{} of {} messages left this month", remaining, limit).cyan()
            ),
            _ => println!("{}", "Unlimited messages".green()),
        },
        Err(e) => println!("{}", format!("Could not read quota: {}", e).red()),
    }
}

fn remember_session(cache: &mut Option<LocalCache>, slug: Option<String>) {
    if let Some(cache) = cache.as_mut() {
        if cache.last_session() != slug.as_deref() {
            cache.set_last_session(slug);
            if let Err(e) = cache.save() {
                tracing::warn!("Could not save local cache: {}", e);
            }
        }
    }
}

/// Start interactive chat
///
/// # Arguments
///
/// * `config` - Global configuration
/// * `options` - Chat command options
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the book is unknown.
pub async fn run_chat(config: Config, options: ChatOptions) -> Result<()> {
    let services = Services::from_config(&config)?;

    let mut cache = match LocalCache::default_path().and_then(LocalCache::load) {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!("Local cache unavailable: {}", e);
            None
        }
    };

    let book = resolve_book(options.book.as_deref(), cache.as_ref())?;
    if let (Some(book), Some(cache)) = (book, cache.as_mut()) {
        if cache.reading_position().map(|p| p.book.as_str()) != Some(book.slug) {
            cache.set_reading_position(ReadingPosition {
                book: book.slug.to_string(),
                chapter: 1,
                verse: None,
            });
        }
    }
    let translation = match options.translation {
        Some(t) => {
            if let Some(cache) = cache.as_mut() {
                cache.set_translation(t.clone());
            }
            Some(t)
        }
        None => cache
            .as_ref()
            .and_then(|c| c.translation())
            .map(str::to_string),
    };

    let completion = build_completion(&config, options.offline)?;
    let identity = Arc::new(LocalIdentity::new(Some(options.user.clone())));
    let controller = ChatController::new(
        ChatServices {
            identity,
            ledger: services.ledger.clone(),
            sessions: services.sessions.clone(),
            entitlements: services.entitlements.clone(),
            completion: Arc::new(ConsoleStream { inner: completion }),
        },
        config.chat.clone(),
    )
    .with_book(book)
    .with_translation(translation);

    let resume = match options.resume.as_deref() {
        Some("last") => cache.as_ref().and_then(|c| c.last_session()).map(str::to_string),
        other => other.map(str::to_string),
    };
    if let Some(slug) = resume {
        tracing::info!(slug = %slug, "Resuming conversation");
        match controller.open_session(&slug).await {
            Some(notice) => print_notice(&notice),
            None => print_transcript(&controller),
        }
    }

    let mut quick = prompts::quick_prompts(controller.book());
    print_welcome(controller.book(), &quick);

    let mut rl = DefaultEditor::new()?;
    let mut draft = String::new();

    loop {
        let prompt = format!("{} ", ">".bold());
        let line = if draft.is_empty() {
            rl.readline(&prompt)
        } else {
            rl.readline_with_initial(&prompt, (std::mem::take(&mut draft).as_str(), ""))
        };

        let text = match line {
            Ok(line) => match parse_input(&line) {
                Input::Message(text) if text.is_empty() => continue,
                Input::Message(text) => text,
                Input::QuickPrompt(index) => match quick.get(index) {
                    Some(text) => {
                        println!("{} {}", ">".bold(), text);
                        text.clone()
                    }
                    None => {
                        println!("{}", "No such quick prompt".yellow());
                        continue;
                    }
                },
                Input::New => {
                    controller.new_conversation();
                    remember_session(&mut cache, None);
                    quick = prompts::quick_prompts(controller.book());
                    println!("{}\n", "Started a new conversation".green());
                    print_quick_prompts(&quick);
                    continue;
                }
                Input::Quota => {
                    print_quota(&services, &options.user).await;
                    continue;
                }
                Input::Help => {
                    print_help();
                    continue;
                }
                Input::Exit => break,
                Input::Unknown(command) => {
                    println!("{}", format!("Unknown command: {}", command).yellow());
                    continue;
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Readline error: {}", e);
                break;
            }
        };
        rl.add_history_entry(text.as_str())?;

        println!();
        match controller.send(&text).await {
            SendOutcome::Completed { slug, notices, .. } => {
                println!("\n");
                for notice in &notices {
                    print_notice(notice);
                }
                remember_session(&mut cache, slug);
            }
            SendOutcome::Blocked { notice, draft: d } => {
                print_notice(&notice);
                draft = d;
            }
            SendOutcome::Failed(notice) => {
                println!();
                print_notice(&notice);
            }
            SendOutcome::Superseded => println!(),
        }
    }

    if let Some(cache) = cache.as_ref() {
        if let Err(e) = cache.save() {
            tracing::warn!("Could not save local cache: {}", e);
        }
    }
    Ok(())
}
