use crate::commands::Services;
use crate::error::Result;
use crate::quota::QuotaStatus;
use colored::Colorize;

/// Print the message quota for `user_id`
pub async fn show_quota(services: &Services, user_id: &str) -> Result<()> {
    let status = services.ledger.status(user_id).await?;
    println!("{}", describe(&status));
    Ok(())
}

fn describe(status: &QuotaStatus) -> String {
    let resets = status
        .resets_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d");

    match (status.limit, status.remaining) {
        (Some(limit), Some(remaining)) => {
            let line = format!(
                "{}/{} messages used, {} left. Resets on {}.",
                status.count, limit, remaining, resets
            );
            if remaining == 0 {
                format!("{}\n{}", line.red(), "Subscribe for unlimited messages.".yellow())
            } else {
                line.cyan().to_string()
            }
        }
        _ => format!(
            "{} ({} sent this month)",
            "Subscribed: unlimited messages".green(),
            status.count
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn status(count: u32, limit: Option<u32>) -> QuotaStatus {
        QuotaStatus {
            count,
            limit,
            remaining: limit.map(|l| l.saturating_sub(count)),
            subscribed: limit.is_none(),
            resets_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_describe_free_tier() {
        colored::control::set_override(false);
        let text = describe(&status(3, Some(10)));
        assert!(text.contains("3/10 messages used, 7 left"));
    }

    #[test]
    fn test_describe_exhausted() {
        colored::control::set_override(false);
        assert!(describe(&status(10, Some(10))).contains("Subscribe"));
    }

    #[test]
    fn test_describe_subscriber() {
        colored::control::set_override(false);
        let text = describe(&status(42, None));
        assert!(text.contains("unlimited"));
        assert!(text.contains("42 sent"));
    }
}
