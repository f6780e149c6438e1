pub mod commands;
pub mod events;
pub mod types;

pub use commands::BackendCommand;
pub use events::{BackendEvent, SubscriptionStatus};
pub use types::{Message, NewMessage, Session};
