mod health;
mod history;
mod websocket;

pub use health::{health_handler, metrics_handler};
pub use history::past_messages_handler;
pub use websocket::websocket_handler;
