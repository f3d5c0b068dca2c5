use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use crate::commands::{AdminCommand, Command};
use crate::database::{self, DatabasePool};
use crate::handlers::admin::is_admin;
use crate::handlers::broadcast::{BroadcastDialogue, start_broadcast};
use crate::handlers::stats::{stats_handler, users_handler};

type HandlerResult = Result<(), anyhow::Error>;

const WELCOME: &str = "👋 Hello! I relay announcements from the admins.\n\
                       Use /help to see what I can do.";

const ADMIN_WELCOME: &str = "\n\n👑 Admin commands:\n\
                             /broadcast - message every user\n\
                             /stats - usage statistics\n\
                             /users - registered users";

fn sender_id(msg: &Message) -> i64 {
    // In private chats the chat id is the user id; fall back to it when
    // the sender is hidden.
    msg.from
        .as_ref()
        .map(|user| user.id.0 as i64)
        .unwrap_or(msg.chat.id.0)
}

fn display_name(msg: &Message) -> Option<String> {
    let user = msg.from.as_ref()?;
    let mut name = user.full_name();
    if let Some(username) = &user.username {
        name.push_str(&format!(" (@{})", username));
    }
    Some(name)
}

async fn touch_user(db_pool: &DatabasePool, msg: &Message) {
    if let Err(e) = database::record_user(db_pool, sender_id(msg), display_name(msg)).await {
        log::error!("Failed to update user activity: {}", e);
    }
}

pub async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    db_pool: Arc<DatabasePool>,
) -> HandlerResult {
    touch_user(&db_pool, &msg).await;

    match cmd {
        Command::Start => {
            let mut text = String::from(WELCOME);
            if is_admin(&msg).await {
                text.push_str(ADMIN_WELCOME);
            }
            bot.send_message(msg.chat.id, text).await?;
        }
        Command::Help => {
            let mut text = Command::descriptions().to_string();
            if is_admin(&msg).await {
                text.push_str("\n\n");
                text.push_str(&AdminCommand::descriptions().to_string());
            }
            bot.send_message(msg.chat.id, text).await?;
        }
    }

    Ok(())
}

pub async fn admin_command_handler(
    bot: Bot,
    msg: Message,
    cmd: AdminCommand,
    db_pool: Arc<DatabasePool>,
    dialogue: BroadcastDialogue,
) -> HandlerResult {
    touch_user(&db_pool, &msg).await;

    // Each handler re-checks authorization itself; routing stays dumb.
    match cmd {
        AdminCommand::Broadcast => start_broadcast(bot, dialogue, msg).await,
        AdminCommand::Stats => stats_handler(bot, msg, db_pool).await,
        AdminCommand::Users => users_handler(bot, msg, db_pool).await,
    }
}

/// Fallback for anything that is not a command: keeps the registry fresh,
/// otherwise stays silent.
pub async fn message_handler(msg: Message, db_pool: Arc<DatabasePool>) -> HandlerResult {
    touch_user(&db_pool, &msg).await;
    Ok(())
}
