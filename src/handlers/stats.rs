use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId};

use crate::database::{self, DatabasePool, StatsSnapshot, UserRow};
use crate::handlers::admin::is_admin;

type HandlerResult = Result<(), anyhow::Error>;

pub const USERS_PER_PAGE: i64 = 10;

pub async fn stats_handler(bot: Bot, msg: Message, db_pool: Arc<DatabasePool>) -> HandlerResult {
    if !is_admin(&msg).await {
        bot.send_message(msg.chat.id, "⛔ Admins only.").await?;
        return Ok(());
    }

    match database::stats_snapshot(&db_pool).await {
        Ok(stats) => {
            bot.send_message(msg.chat.id, format_stats(&stats)).await?;
        }
        Err(e) => {
            log::error!("Stats DB error: {}", e);
            bot.send_message(msg.chat.id, "Failed to retrieve statistics.").await?;
        }
    }

    Ok(())
}

pub async fn users_handler(bot: Bot, msg: Message, db_pool: Arc<DatabasePool>) -> HandlerResult {
    if !is_admin(&msg).await {
        bot.send_message(msg.chat.id, "⛔ Admins only.").await?;
        return Ok(());
    }

    send_users_page(&bot, msg.chat.id, None, &db_pool, 0).await
}

/// Renders one page of the user listing. With `edit` set the existing
/// message is rewritten in place (pagination buttons), otherwise a new
/// one is sent.
pub async fn send_users_page(
    bot: &Bot,
    chat_id: ChatId,
    edit: Option<MessageId>,
    db_pool: &DatabasePool,
    offset: i64,
) -> HandlerResult {
    let (total, users) = match database::list_users_page(db_pool, offset, USERS_PER_PAGE).await {
        Ok(page) => page,
        Err(e) => {
            log::error!("Users DB error: {}", e);
            bot.send_message(chat_id, "Failed to retrieve users list.").await?;
            return Ok(());
        }
    };

    let text = format_users_page(total, offset, &users);
    let keyboard = page_keyboard(total, offset);

    match edit {
        Some(message_id) => {
            bot.edit_message_text(chat_id, message_id, text).await?;
            bot.edit_message_reply_markup(chat_id, message_id)
                .reply_markup(keyboard)
                .await?;
        }
        None => {
            bot.send_message(chat_id, text).reply_markup(keyboard).await?;
        }
    }

    Ok(())
}

pub fn format_stats(stats: &StatsSnapshot) -> String {
    format!(
        "📊 Statistics\n\n\
         👥 Total users: {}\n\
         📈 Active today: {}\n\
         ✉️ Messages seen: {}\n\
         📢 Broadcasts: {}",
        stats.total_users, stats.active_today, stats.total_messages, stats.broadcasts
    )
}

pub fn format_users_page(total: i64, offset: i64, users: &[UserRow]) -> String {
    if total == 0 {
        return String::from("No users yet.");
    }

    let mut text = format!(
        "👥 Users {}-{} of {} (page {}/{})\n\n",
        offset + 1,
        offset + users.len() as i64,
        total,
        offset / USERS_PER_PAGE + 1,
        page_count(total),
    );
    for user in users {
        let name = user.display_name.as_deref().unwrap_or("<no name>");
        text.push_str(&format!(
            "{} | ID: {} | msgs: {} | seen: {} | last: {}\n",
            name, user.telegram_id, user.message_count, user.first_seen, user.last_active
        ));
    }
    text
}

pub fn page_count(total: i64) -> i64 {
    (total + USERS_PER_PAGE - 1) / USERS_PER_PAGE
}

/// Offsets for the Prev/Next buttons, `None` when the edge of the listing
/// has been reached.
pub fn nav_offsets(total: i64, offset: i64) -> (Option<i64>, Option<i64>) {
    let prev = if offset > 0 {
        Some((offset - USERS_PER_PAGE).max(0))
    } else {
        None
    };
    let next = if offset + USERS_PER_PAGE < total {
        Some(offset + USERS_PER_PAGE)
    } else {
        None
    };
    (prev, next)
}

fn page_keyboard(total: i64, offset: i64) -> InlineKeyboardMarkup {
    let (prev, next) = nav_offsets(total, offset);

    let mut nav_buttons = Vec::new();
    if let Some(prev) = prev {
        nav_buttons.push(InlineKeyboardButton::callback(
            "⬅️ Prev",
            format!("users_page_{}", prev),
        ));
    }
    if let Some(next) = next {
        nav_buttons.push(InlineKeyboardButton::callback(
            "Next ➡️",
            format!("users_page_{}", next),
        ));
    }

    let rows = if nav_buttons.is_empty() {
        Vec::new()
    } else {
        vec![nav_buttons]
    };
    InlineKeyboardMarkup::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> UserRow {
        UserRow {
            telegram_id: id,
            display_name: Some(format!("user{}", id)),
            first_seen: "2026-01-01 00:00:00".to_string(),
            last_active: "2026-01-02 00:00:00".to_string(),
            message_count: 3,
        }
    }

    #[test]
    fn page_count_rounds_up() {
        assert_eq!(page_count(0), 0);
        assert_eq!(page_count(1), 1);
        assert_eq!(page_count(10), 1);
        assert_eq!(page_count(11), 2);
        assert_eq!(page_count(25), 3);
    }

    #[test]
    fn first_page_has_no_prev() {
        assert_eq!(nav_offsets(25, 0), (None, Some(10)));
    }

    #[test]
    fn middle_page_has_both_directions() {
        assert_eq!(nav_offsets(25, 10), (Some(0), Some(20)));
    }

    #[test]
    fn last_page_has_no_next() {
        assert_eq!(nav_offsets(25, 20), (Some(10), None));
    }

    #[test]
    fn exact_multiple_ends_on_last_full_page() {
        assert_eq!(nav_offsets(20, 10), (Some(0), None));
    }

    #[test]
    fn single_page_needs_no_navigation() {
        assert_eq!(nav_offsets(7, 0), (None, None));
    }

    #[test]
    fn empty_listing_message() {
        assert_eq!(format_users_page(0, 0, &[]), "No users yet.");
    }

    #[test]
    fn page_header_counts_rows() {
        let users: Vec<UserRow> = (1..=10).map(row).collect();
        let text = format_users_page(25, 10, &users);
        assert!(text.starts_with("👥 Users 11-20 of 25 (page 2/3)"));
        assert!(text.contains("user1 | ID: 1"));
    }

    #[test]
    fn missing_display_name_gets_a_placeholder() {
        let mut user = row(5);
        user.display_name = None;
        let text = format_users_page(1, 0, &[user]);
        assert!(text.contains("<no name> | ID: 5"));
    }
}
