use anyhow::Error;
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Arc, Mutex};
use teloxide::dispatching::UpdateHandler;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dptree;
use teloxide::prelude::*;

use crate::commands::{AdminCommand, Command};
use crate::database::DatabasePool;
use crate::handlers::{
    BroadcastState, admin_command_handler, callback_handler, command_handler,
    handle_broadcast_confirmation, message_handler, receive_broadcast_message,
};

mod commands;
mod config;
mod database;
mod handlers;

fn parse_level(raw: &str, default: LevelFilter) -> LevelFilter {
    match raw.to_uppercase().as_str() {
        "OFF" => LevelFilter::Off,
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "INFO" | "ALL" => LevelFilter::Info,
        "DEBUG" => LevelFilter::Debug,
        _ => default,
    }
}

/// Console logging always, file logging opt-in via FILE_LOG_LEVEL. Both
/// sinks share one formatter so the levels can differ per sink.
fn init_logging() -> Result<(), Error> {
    let console_level = parse_level(
        &std::env::var("CONSOLE_LOG_LEVEL").unwrap_or_default(),
        LevelFilter::Info,
    );
    let file_level = parse_level(
        &std::env::var("FILE_LOG_LEVEL").unwrap_or_default(),
        LevelFilter::Off,
    );

    let log_file = if file_level != LevelFilter::Off {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open("bot_errors.log")?;
        Some(Arc::new(Mutex::new(file)))
    } else {
        None
    };

    pretty_env_logger::formatted_builder()
        .filter(None, console_level.max(file_level))
        .format(move |buf, record| {
            let line = format!(
                "{} [{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            );

            if record.level() <= console_level {
                writeln!(buf, "{}", line)?;
            }

            if record.level() <= file_level {
                if let Some(file_handle) = &log_file {
                    if let Ok(mut guard) = file_handle.lock() {
                        let _ = writeln!(guard, "{}", line);
                    }
                }
            }
            Ok(())
        })
        .init();

    Ok(())
}

fn schema() -> UpdateHandler<Error> {
    let message_branch = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<BroadcastState>, BroadcastState>()
        .branch(
            dptree::case![BroadcastState::WaitingForMessage]
                .endpoint(receive_broadcast_message),
        )
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(command_handler),
        )
        .branch(
            dptree::entry()
                .filter_command::<AdminCommand>()
                .endpoint(admin_command_handler),
        )
        .branch(dptree::endpoint(message_handler));

    let callback_branch = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<BroadcastState>, BroadcastState>()
        .branch(
            dptree::case![BroadcastState::WaitingForConfirmation { payload }]
                .endpoint(handle_broadcast_confirmation),
        )
        .branch(dptree::endpoint(callback_handler));

    dptree::entry().branch(message_branch).branch(callback_branch)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging()?;

    log::info!("Starting herald bot...");
    let start_time = std::time::Instant::now();

    if let Err(e) = config::load_environment() {
        log::error!("Failed to load environment: {}", e);
        return Err(e);
    }

    if let Err(e) = database::init_database() {
        log::error!("Failed to initialize the database: {}", e);
        return Err(e);
    }
    log::info!("Database initialized successfully.");

    let db_pool = Arc::new(DatabasePool::new(
        database::get_database_path(),
        3, // Maximum 3 simultaneous database connections
    ));

    let bot = Bot::from_env();

    log::info!("Bot initialization completed in {:.2?}", start_time.elapsed());
    log::info!("Starting to dispatch updates...");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![db_pool, InMemStorage::<BroadcastState>::new()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    log::info!("Bot shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!(parse_level("error", LevelFilter::Info), LevelFilter::Error);
        assert_eq!(parse_level("ALL", LevelFilter::Off), LevelFilter::Info);
        assert_eq!(parse_level("off", LevelFilter::Info), LevelFilter::Off);
    }

    #[test]
    fn unknown_level_falls_back_to_default() {
        assert_eq!(parse_level("", LevelFilter::Info), LevelFilter::Info);
        assert_eq!(parse_level("verbose", LevelFilter::Off), LevelFilter::Off);
    }
}
