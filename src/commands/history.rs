use crate::cli::HistoryCommand;
use crate::commands::Services;
use crate::error::{LampstandError, Result};
use crate::prompts;
use crate::sessions::{ChatSession, Role, SessionSummary};
use colored::Colorize;
use prettytable::{format, Table};

const TITLE_COLUMN_CHARS: usize = 40;

/// Handle history commands for `user_id`
///
/// Sessions owned by someone else are reported as not found.
pub async fn handle_history(
    services: &Services,
    user_id: &str,
    command: HistoryCommand,
) -> Result<()> {
    match command {
        HistoryCommand::List => {
            let listing = services
                .sessions
                .list(user_id, services.clock.now())
                .await?;

            if listing.is_empty() {
                println!("{}", "No conversation history found.".yellow());
                return Ok(());
            }

            let groups = [
                ("Pinned", &listing.pinned),
                ("Today", &listing.today),
                ("This week", &listing.this_week),
                ("Older", &listing.older),
            ];
            for (heading, sessions) in groups {
                if sessions.is_empty() {
                    continue;
                }
                println!("\n{}", heading.bold());
                session_table(sessions).printstd();
            }
            println!();
            println!(
                "Use {} to resume a session.",
                "lampstand chat --resume <SLUG>".cyan()
            );
            println!();
        }
        HistoryCommand::Show { slug } => {
            let session = owned_session(services, user_id, &slug).await?;
            println!("{}\n", session.title.bold());
            for message in &session.messages {
                let who = match message.role {
                    Role::User => "you".bold().cyan(),
                    Role::Assistant => "lampstand".bold().green(),
                };
                println!("{}: {}\n", who, message.content);
            }
        }
        HistoryCommand::Rename { slug, title } => {
            owned_session(services, user_id, &slug).await?;
            services.sessions.rename(&slug, &title).await?;
            println!("{}", format!("Renamed {} to \"{}\"", slug, title.trim()).green());
        }
        HistoryCommand::Pin { slug } => {
            owned_session(services, user_id, &slug).await?;
            let pinned = services.sessions.toggle_pin(&slug).await?;
            let verb = if pinned { "Pinned" } else { "Unpinned" };
            println!("{}", format!("{} {}", verb, slug).green());
        }
        HistoryCommand::Delete { slug } => {
            owned_session(services, user_id, &slug).await?;
            services.sessions.soft_delete(&slug).await?;
            println!("{}", format!("Deleted conversation {}", slug).green());
        }
    }

    Ok(())
}

async fn owned_session(services: &Services, user_id: &str, slug: &str) -> Result<ChatSession> {
    match services.sessions.get(slug).await? {
        Some(session) if session.user_id == user_id => Ok(session),
        _ => Err(LampstandError::SessionNotFound(slug.to_string()).into()),
    }
}

fn session_table(sessions: &[SessionSummary]) -> Table {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "Slug".bold(),
        "Title".bold(),
        "Book".bold(),
        "Messages".bold(),
        "Last Opened".bold()
    ]);

    for session in sessions {
        let book = session
            .book_slug
            .as_deref()
            .and_then(prompts::find_book)
            .map(|b| b.name)
            .unwrap_or("-");
        let accessed = session
            .last_accessed
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M")
            .to_string();

        table.add_row(prettytable::row![
            session.slug.cyan(),
            shorten(&session.title, TITLE_COLUMN_CHARS),
            book,
            session.message_count,
            accessed
        ]);
    }
    table
}

fn shorten(title: &str, max_chars: usize) -> String {
    if title.chars().count() > max_chars {
        let head: String = title.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        title.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_error_contains, memory_services};

    fn services() -> Services {
        memory_services().0
    }

    #[test]
    fn test_shorten_counts_characters() {
        assert_eq!(shorten("Gênesis", 40), "Gênesis");
        assert_eq!(shorten("ãããããããããã", 6), "ããã...");
    }

    #[tokio::test]
    async fn test_rename_pin_delete_own_session() {
        let services = services();
        let slug = services
            .sessions
            .create_session("u1", "Quem foi Boaz?", Some("rute"))
            .await
            .unwrap();

        handle_history(
            &services,
            "u1",
            HistoryCommand::Rename {
                slug: slug.clone(),
                title: "Boaz".to_string(),
            },
        )
        .await
        .unwrap();
        handle_history(&services, "u1", HistoryCommand::Pin { slug: slug.clone() })
            .await
            .unwrap();

        let session = services.sessions.get(&slug).await.unwrap().unwrap();
        assert_eq!(session.title, "Boaz");
        assert!(session.pinned);

        handle_history(&services, "u1", HistoryCommand::List)
            .await
            .unwrap();
        handle_history(&services, "u1", HistoryCommand::Delete { slug: slug.clone() })
            .await
            .unwrap();
        assert!(services.sessions.get(&slug).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_session_is_not_found() {
        let services = services();
        let slug = services
            .sessions
            .create_session("u1", "Salmo 23", None)
            .await
            .unwrap();

        let result =
            handle_history(&services, "u2", HistoryCommand::Delete { slug: slug.clone() }).await;
        assert_error_contains(result, "Session not found");
        assert!(services.sessions.get(&slug).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_empty_history() {
        let services = services();
        handle_history(&services, "nobody", HistoryCommand::List)
            .await
            .unwrap();
    }
}
