use serde::Serialize;
use std::sync::Arc;
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ParseMode};
use tokio::time::{Duration, sleep};
use uuid::Uuid;

use crate::database::{self, DatabasePool};
use crate::handlers::admin::is_admin;

pub type BroadcastDialogue = Dialogue<BroadcastState, InMemStorage<BroadcastState>>;
type HandlerResult = Result<(), anyhow::Error>;

/// Pause between consecutive deliveries, keeps the loop inside the Bot
/// API send limits.
const PER_MESSAGE_DELAY: Duration = Duration::from_millis(50);
/// Upper bound on how long a RetryAfter response may stall the loop.
const MAX_FLOOD_WAIT: Duration = Duration::from_secs(30);

const PREVIEW_CHARS: usize = 120;

#[derive(Clone, Default, Debug)]
pub enum BroadcastState {
    #[default]
    Idle,
    WaitingForMessage,
    WaitingForConfirmation { payload: BroadcastPayload },
}

/// What the admin asked to broadcast. Text is re-sent as a fresh message;
/// anything with media is re-delivered via `copyMessage` so captions and
/// attachments survive without a "forwarded from" header.
#[derive(Clone, Debug)]
pub enum BroadcastPayload {
    Text(String),
    Copy { from_chat: ChatId, message_id: MessageId },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

impl BroadcastOutcome {
    pub fn report(&self) -> String {
        format!(
            "✅ Broadcast completed!\n📊 Sent: {}/{}\n❌ Failed: {}",
            self.sent, self.total, self.failed
        )
    }
}

pub async fn start_broadcast(bot: Bot, dialogue: BroadcastDialogue, msg: Message) -> HandlerResult {
    if !is_admin(&msg).await {
        bot.send_message(msg.chat.id, "⛔ Admins only.").await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        "📢 Send the broadcast now: text (HTML supported) or a media post.\n/cancel to abort.",
    )
    .await?;

    dialogue.update(BroadcastState::WaitingForMessage).await?;
    Ok(())
}

pub async fn receive_broadcast_message(
    bot: Bot,
    dialogue: BroadcastDialogue,
    msg: Message,
) -> HandlerResult {
    if msg.text() == Some("/cancel") {
        bot.send_message(msg.chat.id, "❌ Cancelled.").await?;
        dialogue.exit().await?;
        return Ok(());
    }

    let payload = match msg.text() {
        Some(text) => BroadcastPayload::Text(text.to_string()),
        None => BroadcastPayload::Copy {
            from_chat: msg.chat.id,
            message_id: msg.id,
        },
    };

    // Show the admin exactly what users will receive.
    bot.send_message(msg.chat.id, "📝 Preview:").await?;
    deliver(&bot, &payload, msg.chat.id).await?;

    let keyboard = InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Send to all", "broadcast_confirm"),
        InlineKeyboardButton::callback("❌ Cancel", "broadcast_cancel"),
    ]]);

    bot.send_message(msg.chat.id, "Send this message to all users?")
        .reply_markup(keyboard)
        .await?;

    dialogue
        .update(BroadcastState::WaitingForConfirmation { payload })
        .await?;
    Ok(())
}

pub async fn handle_broadcast_confirmation(
    bot: Bot,
    dialogue: BroadcastDialogue,
    q: CallbackQuery,
    db_pool: Arc<DatabasePool>,
    payload: BroadcastPayload,
) -> HandlerResult {
    let Some(data) = &q.data else { return Ok(()) };

    // Drop the confirm/cancel buttons either way.
    if let Some(msg) = &q.message {
        let _ = bot.edit_message_reply_markup(msg.chat().id, msg.id()).await;
    }

    if data == "broadcast_cancel" {
        bot.answer_callback_query(q.id)
            .text("❌ Broadcast cancelled")
            .await?;
        dialogue.exit().await?;
        return Ok(());
    }

    if data == "broadcast_confirm" {
        bot.answer_callback_query(q.id)
            .text("🚀 Starting broadcast...")
            .await?;

        if let Some(msg) = &q.message {
            let report_chat = msg.chat().id;
            bot.send_message(report_chat, "🚀 Broadcasting...").await?;

            match database::all_user_ids(&db_pool).await {
                Ok(users) => {
                    let outcome = run_broadcast(&bot, &payload, &users).await;
                    if let Err(e) = record_outcome(&db_pool, &payload, &outcome).await {
                        log::error!("Failed to record broadcast run: {}", e);
                    }
                    bot.send_message(report_chat, outcome.report()).await?;
                }
                Err(e) => {
                    log::error!("DB error: {}", e);
                    bot.send_message(report_chat, "❌ Database error.").await?;
                }
            }
        }

        dialogue.exit().await?;
    }

    Ok(())
}

/// Sends the payload to every user in turn. A failed delivery is logged
/// and counted, never fatal: blocked bots and deleted accounts are the
/// normal case in any registry that only ever grows.
pub async fn run_broadcast(bot: &Bot, payload: &BroadcastPayload, users: &[i64]) -> BroadcastOutcome {
    let mut outcome = BroadcastOutcome {
        total: users.len(),
        ..Default::default()
    };

    for (idx, user_id) in users.iter().enumerate() {
        if idx > 0 {
            sleep(PER_MESSAGE_DELAY).await;
        }

        match deliver(bot, payload, ChatId(*user_id)).await {
            Ok(()) => outcome.sent += 1,
            Err(e) => {
                log::warn!("Failed to send to {}: {}", user_id, e);
                outcome.failed += 1;

                if let Some(wait) = flood_wait(&e) {
                    log::info!("Rate limited, pausing broadcast for {:?}", wait);
                    sleep(wait).await;
                }
            }
        }
    }

    outcome
}

async fn deliver(
    bot: &Bot,
    payload: &BroadcastPayload,
    chat: ChatId,
) -> Result<(), teloxide::RequestError> {
    match payload {
        BroadcastPayload::Text(text) => {
            bot.send_message(chat, text).parse_mode(ParseMode::Html).await?;
        }
        BroadcastPayload::Copy { from_chat, message_id } => {
            bot.copy_message(chat, *from_chat, *message_id).await?;
        }
    }
    Ok(())
}

fn flood_wait(err: &teloxide::RequestError) -> Option<Duration> {
    match err {
        teloxide::RequestError::RetryAfter(seconds) => {
            Some(seconds.duration().min(MAX_FLOOD_WAIT))
        }
        _ => None,
    }
}

#[derive(Serialize)]
struct PayloadSummary<'a> {
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preview: Option<&'a str>,
}

fn payload_json(payload: &BroadcastPayload) -> String {
    let summary = match payload {
        BroadcastPayload::Text(text) => PayloadSummary {
            kind: "text",
            preview: Some(truncate_chars(text, PREVIEW_CHARS)),
        },
        BroadcastPayload::Copy { .. } => PayloadSummary {
            kind: "copy",
            preview: None,
        },
    };
    serde_json::to_string(&summary).unwrap_or_else(|_| String::from("{}"))
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn record_outcome(
    pool: &DatabasePool,
    payload: &BroadcastPayload,
    outcome: &BroadcastOutcome,
) -> anyhow::Result<()> {
    database::record_broadcast(
        pool,
        Uuid::new_v4().to_string(),
        payload_json(payload),
        outcome.total as i64,
        outcome.sent as i64,
        outcome.failed as i64,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::Seconds;

    #[test]
    fn report_counts_sent_and_failed() {
        let outcome = BroadcastOutcome { total: 10, sent: 8, failed: 2 };
        let report = outcome.report();
        assert!(report.contains("8/10"));
        assert!(report.contains("Failed: 2"));
    }

    #[test]
    fn text_payload_summary_keeps_a_preview() {
        let payload = BroadcastPayload::Text("hello <b>world</b>".to_string());
        let json = payload_json(&payload);
        assert!(json.contains("\"kind\":\"text\""));
        assert!(json.contains("hello"));
    }

    #[test]
    fn copy_payload_summary_has_no_preview() {
        let payload = BroadcastPayload::Copy {
            from_chat: ChatId(1),
            message_id: MessageId(2),
        };
        assert_eq!(payload_json(&payload), "{\"kind\":\"copy\"}");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 120), "short");
    }

    #[test]
    fn flood_wait_only_for_retry_after() {
        let retry = teloxide::RequestError::RetryAfter(Seconds::from_seconds(5));
        assert_eq!(flood_wait(&retry), Some(Duration::from_secs(5)));

        let capped = teloxide::RequestError::RetryAfter(Seconds::from_seconds(300));
        assert_eq!(flood_wait(&capped), Some(MAX_FLOOD_WAIT));
    }
}
