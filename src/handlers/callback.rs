use std::sync::Arc;
use teloxide::prelude::*;

use crate::database::DatabasePool;
use crate::handlers::admin::is_admin_id;
use crate::handlers::stats::send_users_page;

/// Callbacks that are valid outside the broadcast dialogue; currently
/// only user-listing pagination.
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    db_pool: Arc<DatabasePool>,
) -> Result<(), anyhow::Error> {
    let Some(data) = &q.data else { return Ok(()) };
    log::info!("Received callback query with data: {}", data);

    if let Some(offset_str) = data.strip_prefix("users_page_") {
        if !is_admin_id(q.from.id) {
            bot.answer_callback_query(q.id).text("Access denied.").await?;
            return Ok(());
        }

        let offset = offset_str.parse::<i64>().unwrap_or(0).max(0);

        if let Some(ref maybe_message) = q.message {
            if let Some(message) = maybe_message.regular_message() {
                send_users_page(&bot, message.chat.id, Some(message.id), &db_pool, offset).await?;
            }
        }

        bot.answer_callback_query(q.id).await?;
    }

    Ok(())
}
