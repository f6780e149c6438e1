use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::common::{BackendCommand, BackendEvent, NewMessage, SubscriptionStatus};
use crate::config::AppConfig;
use crate::error::Result;

use super::realtime::{self, ChannelSignal, Frame, RealtimeChannel, RealtimeSocket};
use super::store::MessageStore;

/// Upper bound for the history window so the timestamp math cannot overflow.
const MAX_WINDOW_SECS: u64 = 60 * 60 * 24 * 365;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns every call to the managed backend: the polling timer, the live
/// subscription and the inserts requested by the UI.
pub struct ChatBackend<S: MessageStore> {
    store: S,
    config: AppConfig,
    realtime_url: Option<String>,
    event_sender: mpsc::Sender<BackendEvent>,
    command_receiver: mpsc::Receiver<BackendCommand>,
    fetch_task: Option<JoinHandle<()>>,
}

impl<S: MessageStore> ChatBackend<S> {
    pub fn new(
        store: S,
        config: AppConfig,
        event_sender: mpsc::Sender<BackendEvent>,
        command_receiver: mpsc::Receiver<BackendCommand>,
    ) -> Self {
        Self {
            store,
            config,
            realtime_url: None,
            event_sender,
            command_receiver,
            fetch_task: None,
        }
    }

    /// Enables the change subscription. Without it the backend only polls.
    pub fn with_realtime(mut self, url: String) -> Self {
        self.realtime_url = Some(url);
        self
    }

    pub async fn run(mut self) -> Result<()> {
        let mut channel = RealtimeChannel::new(
            &self.config.schema,
            &self.config.table,
            &self.config.supabase_anon_key,
        );
        // The handshake runs beside the loop so a stalled endpoint cannot
        // hold back loads, sends or shutdown.
        let mut connecting = self.start_subscription().await;
        let mut socket: Option<RealtimeSocket> = None;

        // First tick fires immediately: that is the initial load.
        let mut poll = time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let beat = self.config.heartbeat_interval();
        let mut heartbeat = time::interval_at(Instant::now() + beat, beat);

        log::info!("Backend event loop started");

        loop {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(BackendCommand::SendMessage(message)) => self.spawn_insert(message),
                        Some(BackendCommand::Refresh) => self.spawn_fetch(),
                        Some(BackendCommand::Shutdown) | None => break,
                    }
                }
                _ = poll.tick() => {
                    self.spawn_fetch();
                }
                connected = wait_connected(&mut connecting) => {
                    connecting = None;
                    socket = self.join_subscription(connected, &mut channel).await;
                }
                _ = heartbeat.tick(), if socket.is_some() => {
                    let frame = channel.heartbeat_frame();
                    if let Err(err) = send_frame(&mut socket, &frame).await {
                        log::warn!("Realtime heartbeat failed: {err}");
                        self.drop_subscription(&mut socket).await;
                    }
                }
                incoming = next_ws_message(&mut socket) => {
                    self.handle_ws_message(incoming, &channel, &mut socket).await;
                }
            }
        }

        if let Some(task) = connecting {
            task.abort();
        }
        self.close_subscription(socket, &mut channel).await;
        log::info!("Backend event loop stopped");
        Ok(())
    }

    async fn start_subscription(&self) -> Option<JoinHandle<Result<RealtimeSocket>>> {
        let url = self.realtime_url.clone()?;
        self.emit(BackendEvent::Subscription(SubscriptionStatus::Connecting))
            .await;
        Some(tokio::spawn(async move {
            realtime::connect(&url, CONNECT_TIMEOUT).await
        }))
    }

    async fn join_subscription(
        &self,
        connected: Result<RealtimeSocket>,
        channel: &mut RealtimeChannel,
    ) -> Option<RealtimeSocket> {
        let mut socket = match connected {
            Ok(socket) => Some(socket),
            Err(err) => {
                log::warn!("Realtime connection failed, continuing with polling only: {err}");
                self.emit(BackendEvent::Subscription(SubscriptionStatus::Offline))
                    .await;
                return None;
            }
        };

        let join = channel.join_frame();
        if let Err(err) = send_frame(&mut socket, &join).await {
            log::warn!("Failed to join {}: {err}", channel.topic());
            self.drop_subscription(&mut socket).await;
            return None;
        }
        log::info!("Joining realtime channel {}", channel.topic());
        socket
    }

    async fn close_subscription(
        &self,
        mut socket: Option<RealtimeSocket>,
        channel: &mut RealtimeChannel,
    ) {
        if socket.is_none() {
            return;
        }
        let leave = channel.leave_frame();
        if let Err(err) = send_frame(&mut socket, &leave).await {
            log::debug!("Leaving {} failed: {err}", channel.topic());
        }
        if let Some(mut socket) = socket {
            if let Err(err) = socket.close(None).await {
                log::debug!("Realtime close failed: {err}");
            }
        }
    }

    async fn drop_subscription(&self, socket: &mut Option<RealtimeSocket>) {
        *socket = None;
        self.emit(BackendEvent::Subscription(SubscriptionStatus::Offline))
            .await;
    }

    async fn handle_ws_message(
        &self,
        incoming: Option<std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
        channel: &RealtimeChannel,
        socket: &mut Option<RealtimeSocket>,
    ) {
        let text = match incoming {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(frame))) => {
                log::warn!("Realtime socket closed by server: {frame:?}");
                self.drop_subscription(socket).await;
                return;
            }
            Some(Ok(_)) => return,
            Some(Err(err)) => {
                log::warn!("Realtime socket error: {err}");
                self.drop_subscription(socket).await;
                return;
            }
            None => {
                log::warn!("Realtime socket ended");
                self.drop_subscription(socket).await;
                return;
            }
        };

        let frame = match Frame::decode(&text) {
            Ok(frame) => frame,
            Err(err) => {
                log::debug!("Ignoring undecodable realtime frame: {err}");
                return;
            }
        };

        match channel.interpret(&frame) {
            ChannelSignal::Insert(message) => self.emit(BackendEvent::RemoteInsert(message)).await,
            ChannelSignal::Delete(id) => self.emit(BackendEvent::RemoteDelete(id)).await,
            ChannelSignal::Joined => {
                log::info!("Subscribed to {}", channel.topic());
                self.emit(BackendEvent::Subscription(SubscriptionStatus::Subscribed))
                    .await;
            }
            ChannelSignal::JoinRejected(reason) => {
                log::warn!("Realtime join rejected: {reason}");
                self.drop_subscription(socket).await;
            }
            ChannelSignal::Closed => {
                log::warn!("Realtime channel {} closed ({})", channel.topic(), frame.event);
                self.drop_subscription(socket).await;
            }
            ChannelSignal::Ignored => {
                log::debug!("Ignoring realtime frame {} on {}", frame.event, frame.topic);
            }
        }
    }

    fn spawn_fetch(&mut self) {
        if self
            .fetch_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            log::debug!("Previous history fetch still running; skipping");
            return;
        }

        let window = self.config.history_window_secs.min(MAX_WINDOW_SECS) as i64;
        let since = Utc::now() - TimeDelta::seconds(window);
        let store = self.store.clone();
        let events = self.event_sender.clone();

        self.fetch_task = Some(tokio::spawn(async move {
            let event = match store.fetch_since(since).await {
                Ok(messages) => {
                    log::debug!("Loaded {} recent messages", messages.len());
                    BackendEvent::MessagesLoaded(messages)
                }
                Err(err) => {
                    log::warn!("Error fetching messages: {err}");
                    BackendEvent::LoadFailed(err.to_string())
                }
            };
            emit_to(&events, event).await;
        }));
    }

    fn spawn_insert(&self, message: NewMessage) {
        let store = self.store.clone();
        let events = self.event_sender.clone();

        tokio::spawn(async move {
            let result = store.insert(std::slice::from_ref(&message)).await;
            let event = match result {
                Ok(()) => BackendEvent::SendConfirmed(message),
                Err(err) => {
                    log::warn!("Error sending message: {err}");
                    BackendEvent::SendFailed {
                        message,
                        reason: err.to_string(),
                    }
                }
            };
            emit_to(&events, event).await;
        });
    }

    async fn emit(&self, event: BackendEvent) {
        emit_to(&self.event_sender, event).await;
    }
}

async fn emit_to(sender: &mpsc::Sender<BackendEvent>, event: BackendEvent) {
    if sender.send(event).await.is_err() {
        log::debug!("UI closed; dropping backend event");
    }
}

async fn send_frame(socket: &mut Option<RealtimeSocket>, frame: &Frame) -> Result<()> {
    if let Some(socket) = socket.as_mut() {
        socket.send(WsMessage::Text(frame.encode()?)).await?;
    }
    Ok(())
}

async fn wait_connected(
    task: &mut Option<JoinHandle<Result<RealtimeSocket>>>,
) -> Result<RealtimeSocket> {
    match task.as_mut() {
        Some(task) => task.await?,
        None => std::future::pending().await,
    }
}

async fn next_ws_message(
    socket: &mut Option<RealtimeSocket>,
) -> Option<std::result::Result<WsMessage, tokio_tungstenite::tungstenite::Error>> {
    match socket.as_mut() {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Utc};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use super::*;
    use crate::common::Message;
    use crate::error::ChatError;

    #[derive(Clone, Default)]
    struct MemoryStore {
        rows: Arc<Mutex<Vec<Message>>>,
        inserted: Arc<Mutex<Vec<NewMessage>>>,
        fail: Arc<AtomicBool>,
    }

    impl MessageStore for MemoryStore {
        async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<Message>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatError::Config("offline".into()));
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.created_at >= since)
                .cloned()
                .collect())
        }

        async fn insert(&self, messages: &[NewMessage]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatError::Config("offline".into()));
            }
            self.inserted.lock().unwrap().extend_from_slice(messages);
            Ok(())
        }
    }

    fn row(id: &str, age_secs: i64) -> Message {
        Message {
            id: id.to_string(),
            content: format!("message {id}"),
            created_at: Utc::now() - TimeDelta::seconds(age_secs),
            sender_id: "bob".to_string(),
            sender_name: "Bob".to_string(),
        }
    }

    fn payload(content: &str) -> NewMessage {
        NewMessage {
            content: content.to_string(),
            sender_id: "ada-id".to_string(),
            sender_name: "Ada".to_string(),
        }
    }

    fn start(
        store: MemoryStore,
        realtime_url: Option<String>,
    ) -> (
        mpsc::Sender<BackendCommand>,
        mpsc::Receiver<BackendEvent>,
        JoinHandle<Result<()>>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let config = AppConfig {
            supabase_anon_key: "anon".into(),
            poll_interval_secs: 60,
            ..AppConfig::default()
        };
        let mut backend = ChatBackend::new(store, config, event_tx, cmd_rx);
        if let Some(url) = realtime_url {
            backend = backend.with_realtime(url);
        }
        (cmd_tx, event_rx, tokio::spawn(backend.run()))
    }

    async fn next_event(events: &mut mpsc::Receiver<BackendEvent>) -> BackendEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for backend event")
            .expect("backend event channel closed")
    }

    #[tokio::test]
    async fn test_initial_load_only_returns_recent_window() {
        let store = MemoryStore::default();
        store
            .rows
            .lock()
            .unwrap()
            .extend([row("old", 120), row("new", 5)]);
        let (commands, mut events, handle) = start(store, None);

        match next_event(&mut events).await {
            BackendEvent::MessagesLoaded(messages) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].id, "new");
            }
            other => panic!("expected load, got {other:?}"),
        }

        commands.send(BackendCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_load_reports_error() {
        let store = MemoryStore::default();
        store.fail.store(true, Ordering::SeqCst);
        let (commands, mut events, handle) = start(store, None);

        assert!(matches!(
            next_event(&mut events).await,
            BackendEvent::LoadFailed(_)
        ));

        drop(commands);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_insert_confirmed_once() {
        let store = MemoryStore::default();
        let (commands, mut events, handle) = start(store.clone(), None);
        next_event(&mut events).await;

        commands
            .send(BackendCommand::SendMessage(payload("hi")))
            .await
            .unwrap();
        match next_event(&mut events).await {
            BackendEvent::SendConfirmed(message) => assert_eq!(message.content, "hi"),
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(store.inserted.lock().unwrap().len(), 1);

        commands.send(BackendCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_insert_failure_carries_payload_back() {
        let store = MemoryStore::default();
        let (commands, mut events, handle) = start(store.clone(), None);
        next_event(&mut events).await;

        store.fail.store(true, Ordering::SeqCst);
        commands
            .send(BackendCommand::SendMessage(payload("hi")))
            .await
            .unwrap();
        match next_event(&mut events).await {
            BackendEvent::SendFailed { message, .. } => assert_eq!(message, payload("hi")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(store.inserted.lock().unwrap().is_empty());

        commands.send(BackendCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_realtime_connection_failure_keeps_polling() {
        let store = MemoryStore::default();
        // Nothing listens on port 9 locally.
        let (commands, mut events, handle) =
            start(store, Some("ws://127.0.0.1:9/realtime/v1/websocket".into()));

        assert!(matches!(
            next_event(&mut events).await,
            BackendEvent::Subscription(SubscriptionStatus::Connecting)
        ));

        let (mut offline, mut loaded) = (false, false);
        while !(offline && loaded) {
            match next_event(&mut events).await {
                BackendEvent::Subscription(SubscriptionStatus::Offline) => offline = true,
                BackendEvent::MessagesLoaded(_) => loaded = true,
                other => panic!("unexpected event {other:?}"),
            }
        }

        commands.send(BackendCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_silent_realtime_endpoint_does_not_block_loads_or_sends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts the TCP connection but never answers the upgrade.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let store = MemoryStore::default();
        store.rows.lock().unwrap().push(row("recent", 1));
        let (commands, mut events, handle) = start(
            store.clone(),
            Some(format!("ws://{addr}/realtime/v1/websocket")),
        );

        let mut loaded = None;
        while loaded.is_none() {
            match next_event(&mut events).await {
                BackendEvent::MessagesLoaded(messages) => loaded = Some(messages),
                BackendEvent::Subscription(SubscriptionStatus::Connecting) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(loaded.unwrap().len(), 1);

        commands
            .send(BackendCommand::SendMessage(payload("hi")))
            .await
            .unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            BackendEvent::SendConfirmed(_)
        ));

        commands.send(BackendCommand::Shutdown).await.unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("backend stopped while the handshake was pending")
            .unwrap()
            .unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn test_subscription_delivers_changes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let join = loop {
                if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                    let frame = Frame::decode(&text).unwrap();
                    if frame.event == "phx_join" {
                        break frame;
                    }
                }
            };
            let reply = json!({
                "topic": join.topic,
                "event": "phx_reply",
                "payload": { "status": "ok", "response": {} },
                "ref": join.reference,
            });
            ws.send(WsMessage::Text(reply.to_string())).await.unwrap();

            let insert = json!({
                "topic": "realtime:messages",
                "event": "postgres_changes",
                "payload": { "data": {
                    "type": "INSERT",
                    "table": "messages",
                    "record": {
                        "id": "x",
                        "content": "hello back",
                        "created_at": "2024-05-01T10:00:00+00:00",
                        "sender_id": "bob",
                        "sender_name": "Bob"
                    }
                }},
                "ref": null,
            });
            ws.send(WsMessage::Text(insert.to_string())).await.unwrap();

            let delete = json!({
                "topic": "realtime:messages",
                "event": "postgres_changes",
                "payload": { "data": { "type": "DELETE", "old_record": { "id": "x" } } },
                "ref": null,
            });
            ws.send(WsMessage::Text(delete.to_string())).await.unwrap();

            // Wait for the leave frame / close from the client.
            while let Some(Ok(message)) = ws.next().await {
                if message.is_close() {
                    break;
                }
            }
        });

        let (commands, mut events, handle) = start(
            MemoryStore::default(),
            Some(format!("ws://{addr}/realtime/v1/websocket")),
        );

        let mut subscribed = false;
        let mut inserted = None;
        let mut deleted = None;
        while deleted.is_none() {
            match next_event(&mut events).await {
                BackendEvent::Subscription(SubscriptionStatus::Subscribed) => subscribed = true,
                BackendEvent::RemoteInsert(message) => inserted = Some(message),
                BackendEvent::RemoteDelete(id) => deleted = Some(id),
                _ => {}
            }
        }

        assert!(subscribed);
        assert_eq!(inserted.map(|message| message.sender_name), Some("Bob".into()));
        assert_eq!(deleted.as_deref(), Some("x"));

        commands.send(BackendCommand::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
        timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
    }
}
