use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

use crate::common::{BackendEvent, Message, NewMessage, Session, SubscriptionStatus};

pub const NAME_MIN_CHARS: usize = 2;
pub const NAME_MAX_CHARS: usize = 30;

pub const LOAD_ERROR: &str = "Failed to load messages";
pub const SEND_ERROR: &str = "Failed to send message";

/// An own optimistic entry and a server row with the same sender and content
/// are the same message when their timestamps are at most this far apart.
pub const RECONCILE_WINDOW: TimeDelta = TimeDelta::seconds(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    EnteringName,
    Joining { ready_at: Instant },
    Joined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Load,
    Send,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBanner {
    pub kind: ErrorKind,
    pub text: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Server,
    /// Shown before the insert resolved; `confirmed` once it succeeded.
    Optimistic { confirmed: bool },
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    origin: Origin,
}

impl Entry {
    fn is_unconfirmed(&self) -> bool {
        self.origin == Origin::Optimistic { confirmed: false }
    }

    fn is_optimistic(&self) -> bool {
        matches!(self.origin, Origin::Optimistic { .. })
    }

    fn matches(&self, sender_id: &str, content: &str) -> bool {
        self.message.sender_id == sender_id && self.message.content == content
    }

    fn reconciles_with(&self, row: &Message) -> bool {
        self.is_optimistic()
            && self.matches(&row.sender_id, &row.content)
            && (row.created_at - self.message.created_at).abs() <= RECONCILE_WINDOW
    }
}

/// Displayed messages, keyed by id. Insert and remove are idempotent so the
/// poll, the change feed and the optimistic path can race freely.
#[derive(Debug, Default)]
pub struct MessageList {
    entries: Vec<Entry>,
    ids: HashSet<String>,
}

impl MessageList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|entry| &entry.message)
    }

    fn push(&mut self, message: Message, origin: Origin) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.entries.push(Entry { message, origin });
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        if !self.ids.remove(id) {
            return false;
        }
        self.entries.retain(|entry| entry.message.id != id);
        true
    }

    /// Swaps the optimistic entry matching `row` for the row itself, keeping
    /// its position in the list.
    fn reconcile(&mut self, row: Message) -> Result<(), Message> {
        let Some(index) = self.entries.iter().position(|entry| entry.reconciles_with(&row)) else {
            return Err(row);
        };
        let old_id = self.entries[index].message.id.clone();
        self.ids.remove(&old_id);
        self.ids.insert(row.id.clone());
        self.entries[index] = Entry {
            message: row,
            origin: Origin::Server,
        };
        Ok(())
    }

    fn find_unconfirmed(&self, sender_id: &str, content: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_unconfirmed() && entry.matches(sender_id, content))
    }

    fn remove_at(&mut self, index: usize) -> Message {
        let entry = self.entries.remove(index);
        self.ids.remove(&entry.message.id);
        entry.message
    }
}

/// One rendered message bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bubble<'a> {
    pub label: &'a str,
    pub text: &'a str,
    pub own: bool,
    pub pending: bool,
}

/// All state owned by the chat window. Mutated only through the transition
/// methods below.
pub struct AppState {
    pub name_input: String,
    pub draft: String,
    pub subscription: Option<SubscriptionStatus>,
    session: Session,
    phase: JoinPhase,
    join_delay: Duration,
    history_window: TimeDelta,
    messages: MessageList,
    error: Option<ErrorBanner>,
    scroll_to_bottom: bool,
}

impl AppState {
    pub fn new(session: Session, join_delay: Duration, history_window: Duration) -> Self {
        Self {
            name_input: String::new(),
            draft: String::new(),
            subscription: None,
            session,
            phase: JoinPhase::EnteringName,
            join_delay,
            history_window: TimeDelta::from_std(history_window).unwrap_or(TimeDelta::MAX),
            messages: MessageList::default(),
            error: None,
            scroll_to_bottom: false,
        }
    }

    pub fn phase(&self) -> JoinPhase {
        self.phase
    }

    pub fn display_name(&self) -> Option<&str> {
        self.session.name.as_deref()
    }

    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    pub fn error(&self) -> Option<&ErrorBanner> {
        self.error.as_ref()
    }

    pub fn name_is_valid(&self) -> bool {
        valid_name(&self.name_input)
    }

    /// Join form submitted. Starts the cosmetic delay; returns `false` when
    /// the name is out of range or a join already happened.
    pub fn begin_join(&mut self, now: Instant) -> bool {
        if self.phase != JoinPhase::EnteringName || !self.name_is_valid() {
            return false;
        }
        self.phase = JoinPhase::Joining {
            ready_at: now + self.join_delay,
        };
        true
    }

    /// Finishes a pending join once its delay elapsed. Returns `true` on the
    /// single frame where the chat screen becomes visible.
    pub fn poll_join(&mut self, now: Instant) -> bool {
        let JoinPhase::Joining { ready_at } = self.phase else {
            return false;
        };
        if now < ready_at {
            return false;
        }
        let name = self.name_input.trim().to_string();
        self.name_input = name.clone();
        self.session.name = Some(name);
        self.phase = JoinPhase::Joined;
        self.scroll_to_bottom = true;
        true
    }

    pub fn messages_loaded(&mut self, rows: Vec<Message>, now: DateTime<Utc>) {
        let oldest_kept = now
            .checked_sub_signed(self.history_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let previous = std::mem::take(&mut self.messages);
        let shown: HashSet<String> = previous
            .entries
            .iter()
            .filter(|entry| entry.origin == Origin::Server)
            .map(|entry| entry.message.id.clone())
            .collect();

        for row in rows {
            self.messages.push(row, Origin::Server);
        }

        // Each new row stands in for at most one own optimistic entry. Own
        // messages the server has not returned yet stay visible.
        let mut absorbed = vec![false; self.messages.entries.len()];
        for entry in previous.entries.into_iter().filter(Entry::is_optimistic) {
            let stand_in = self
                .messages
                .entries
                .iter()
                .enumerate()
                .position(|(index, loaded)| {
                    !absorbed[index]
                        && !shown.contains(&loaded.message.id)
                        && entry.reconciles_with(&loaded.message)
                });
            if let Some(index) = stand_in {
                absorbed[index] = true;
                continue;
            }
            if entry.is_unconfirmed() || entry.message.created_at >= oldest_kept {
                self.messages.push(entry.message, entry.origin);
            }
        }

        if self.error.as_ref().is_some_and(|banner| banner.kind == ErrorKind::Load) {
            self.error = None;
        }
        self.scroll_to_bottom = true;
    }

    pub fn load_failed(&mut self) {
        self.error = Some(ErrorBanner {
            kind: ErrorKind::Load,
            text: LOAD_ERROR,
        });
    }

    /// Send form submitted. Shows the message right away and hands back the
    /// payload for the remote insert, or `None` when nothing may be sent.
    pub fn begin_send(&mut self, now: DateTime<Utc>) -> Option<NewMessage> {
        let name = self.session.name.as_deref()?.trim();
        let content = self.draft.trim();
        if name.is_empty() || content.is_empty() {
            return None;
        }

        let payload = NewMessage {
            content: content.to_string(),
            sender_id: self.session.user_id.clone(),
            sender_name: name.to_string(),
        };
        self.messages.push(
            payload.clone().into_optimistic(now),
            Origin::Optimistic { confirmed: false },
        );
        self.draft.clear();
        self.scroll_to_bottom = true;
        Some(payload)
    }

    pub fn send_confirmed(&mut self, payload: &NewMessage) {
        if let Some(index) = self
            .messages
            .find_unconfirmed(&payload.sender_id, &payload.content)
        {
            self.messages.entries[index].origin = Origin::Optimistic { confirmed: true };
        }
        self.error = None;
    }

    /// Reverts exactly one optimistic entry for (sender, content) and puts
    /// the text back into the input. A no-op once the server row already
    /// replaced the entry.
    pub fn send_failed(&mut self, payload: NewMessage) {
        let Some(index) = self
            .messages
            .find_unconfirmed(&payload.sender_id, &payload.content)
        else {
            log::debug!("\"{}\" already delivered; nothing to roll back", payload.content);
            return;
        };
        self.messages.remove_at(index);
        self.scroll_to_bottom = true;
        self.error = Some(ErrorBanner {
            kind: ErrorKind::Send,
            text: SEND_ERROR,
        });
        self.draft = payload.content;
    }

    pub fn remote_insert(&mut self, row: Message) {
        if self.messages.contains(&row.id) {
            return;
        }
        let row = if row.sender_id == self.session.user_id {
            match self.messages.reconcile(row) {
                Ok(()) => {
                    self.scroll_to_bottom = true;
                    return;
                }
                Err(row) => row,
            }
        } else {
            row
        };
        if self.messages.push(row, Origin::Server) {
            self.scroll_to_bottom = true;
        }
    }

    pub fn remote_delete(&mut self, id: &str) {
        if self.messages.remove(id) {
            self.scroll_to_bottom = true;
        }
    }

    pub fn apply(&mut self, event: BackendEvent, now: DateTime<Utc>) {
        match event {
            BackendEvent::MessagesLoaded(rows) => self.messages_loaded(rows, now),
            BackendEvent::LoadFailed(reason) => {
                log::debug!("History load failed: {reason}");
                self.load_failed();
            }
            BackendEvent::RemoteInsert(row) => self.remote_insert(row),
            BackendEvent::RemoteDelete(id) => self.remote_delete(&id),
            BackendEvent::SendConfirmed(payload) => self.send_confirmed(&payload),
            BackendEvent::SendFailed { message, reason } => {
                log::debug!("Rolling back \"{}\": {reason}", message.content);
                self.send_failed(message);
            }
            BackendEvent::Subscription(status) => self.subscription = Some(status),
        }
    }

    pub fn bubbles(&self) -> Vec<Bubble<'_>> {
        self.messages
            .entries
            .iter()
            .map(|entry| {
                let own = entry.message.sender_id == self.session.user_id;
                Bubble {
                    label: if own {
                        "You"
                    } else {
                        entry.message.sender_name.as_str()
                    },
                    text: &entry.message.content,
                    own,
                    pending: entry.is_unconfirmed(),
                }
            })
            .collect()
    }

    /// `true` once after every change to the list.
    pub fn take_scroll_request(&mut self) -> bool {
        std::mem::take(&mut self.scroll_to_bottom)
    }
}

pub fn valid_name(raw: &str) -> bool {
    let len = raw.trim().chars().count();
    (NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&len)
}
