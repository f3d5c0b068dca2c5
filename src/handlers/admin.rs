use std::env;
use teloxide::prelude::*;
use teloxide::types::UserId;

/// Admin user ids from the `ADMIN_IDS` environment variable. Re-read on
/// every check so the variable stays the single source of truth.
pub fn admin_ids() -> Vec<u64> {
    parse_admin_ids(&env::var("ADMIN_IDS").unwrap_or_default())
}

fn parse_admin_ids(raw: &str) -> Vec<u64> {
    raw.split(',').filter_map(|s| s.trim().parse().ok()).collect()
}

pub fn is_admin_id(id: UserId) -> bool {
    admin_ids().contains(&id.0)
}

pub async fn is_admin(msg: &Message) -> bool {
    // Check the sender, not the chat: in groups they differ.
    match msg.from.as_ref() {
        Some(user) => is_admin_id(user.id),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_ids() {
        assert_eq!(parse_admin_ids("123456,789012, 345678"), vec![123456, 789012, 345678]);
    }

    #[test]
    fn empty_input_parses_to_no_admins() {
        assert_eq!(parse_admin_ids(""), Vec::<u64>::new());
    }

    #[test]
    fn garbage_entries_are_skipped() {
        assert_eq!(parse_admin_ids("111, nope, 222, -5"), vec![111, 222]);
    }

    #[test]
    fn admin_id_matching() {
        let admins = parse_admin_ids("123456,789012");
        assert!(admins.contains(&123456));
        assert!(!admins.contains(&555555));
    }
}
