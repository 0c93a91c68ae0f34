use teloxide::utils::command::BotCommands;
use teloxide::utils::html::{bold, escape};

use crate::commands::Command;
use crate::registry::Subscriber;

/// Telegram stops resolving mentions somewhere above this.
pub const MAX_MENTIONS: usize = 50;

/// Inviter shown when an armed gathering fires.
pub const SCHEDULED_INVITER: &str = "Scheduled System";

pub fn welcome() -> String {
    format!(
        "🎮 {}\nGatherings tag everyone; /list is silent.\n\n{}",
        bold("Game Bot Active"),
        escape(&Command::descriptions().to_string())
    )
}

pub fn mention(subscriber: &Subscriber) -> String {
    format!(
        "<a href=\"tg://user?id={}\">{}</a>",
        subscriber.id,
        escape(&subscriber.first_name)
    )
}

pub fn announcement(
    category: &str,
    message: &str,
    invited_by: &str,
    subscribers: &[Subscriber],
) -> String {
    let mentions = subscribers
        .iter()
        .take(MAX_MENTIONS)
        .map(mention)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "🎮 {}\n{}\n\nInvited by: {}\n\n🔔 {}",
        bold(&escape(category)),
        escape(message),
        escape(invited_by),
        mentions
    )
}

/// Never mentions anyone, banned or not.
pub fn group_summary(categories: &[(String, Vec<Subscriber>)]) -> String {
    if categories.is_empty() {
        return escape("📋 No active categories.");
    }

    let mut result = format!("📋 {}\n", bold("Group Categories:"));
    for (name, subscribers) in categories {
        let names = subscribers
            .iter()
            .map(|s| escape(&s.first_name))
            .collect::<Vec<_>>()
            .join(", ");
        result += &format!(
            "\n🔹 {} ({}): {}",
            bold(&escape(name)),
            subscribers.len(),
            names
        );
    }

    result
}

pub fn joined(category: &str) -> String {
    escape(&format!("✅ Joined {category}"))
}

pub fn already_joined() -> String {
    escape("✨ Already in list.")
}

pub fn left(category: &str) -> String {
    escape(&format!("🗑 Left {category}"))
}

pub fn scheduled(category: &str, delay_minutes: i64) -> String {
    escape(&format!("⏳ Scheduled {category} in {delay_minutes} mins."))
}

pub fn banned(user_id: u64) -> String {
    escape(&format!("🔨 User {user_id} restricted."))
}

pub fn unbanned(user_id: u64) -> String {
    escape(&format!("✅ User {user_id} unrestricted."))
}

pub fn category_removed(category: &str) -> String {
    escape(&format!("🗑 Category {category} removed."))
}

pub fn usage(usage: &str) -> String {
    escape(&format!("❌ Usage: {usage}"))
}
