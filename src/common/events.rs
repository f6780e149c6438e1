use super::types::{Message, NewMessage};

/// Events the backend task sends up to the UI.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Result of the initial or periodic history query.
    MessagesLoaded(Vec<Message>),
    LoadFailed(String),
    /// Change notification: a row was inserted.
    RemoteInsert(Message),
    /// Change notification: the row with this id was deleted.
    RemoteDelete(String),
    SendConfirmed(NewMessage),
    SendFailed { message: NewMessage, reason: String },
    Subscription(SubscriptionStatus),
}

/// State of the live change subscription, shown in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Connecting,
    Subscribed,
    Offline,
}
