use super::types::NewMessage;

/// Commands the UI sends down to the backend task.
#[derive(Debug, Clone)]
pub enum BackendCommand {
    /// Insert one message. The UI has already shown it optimistically.
    SendMessage(NewMessage),
    /// Re-run the recent-history query outside the polling timer.
    Refresh,
    /// The window is closing: leave the channel and stop the timers.
    Shutdown,
}
