use anyhow::{Result, anyhow};
use std::env;

/// Loads `.env` if present and validates the variables the bot cannot run
/// without. Called once from `main` before anything talks to Telegram.
pub fn load_environment() -> Result<()> {
    dotenv::dotenv().ok();

    if env::var("TELOXIDE_TOKEN").map_or(true, |token| token.trim().is_empty()) {
        return Err(anyhow!("TELOXIDE_TOKEN must be set"));
    }

    let admins = crate::handlers::admin::admin_ids();
    if admins.is_empty() {
        log::warn!("ADMIN_IDS is empty; broadcast and stats commands will refuse everyone");
    } else {
        log::info!("Loaded {} admin id(s)", admins.len());
    }

    Ok(())
}
