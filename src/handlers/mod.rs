pub mod admin;
pub mod broadcast;
pub mod callback;
pub mod command;
pub mod stats;

pub use broadcast::{
    BroadcastState, handle_broadcast_confirmation, receive_broadcast_message,
};
pub use callback::callback_handler;
pub use command::{admin_command_handler, command_handler, message_handler};
