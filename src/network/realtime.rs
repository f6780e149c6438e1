use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::common::Message;
use crate::error::{ChatError, Result};

pub type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PHOENIX_TOPIC: &str = "phoenix";

/// One Phoenix channel frame (serializer vsn 1.0.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// What an incoming frame means for the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    Insert(Message),
    Delete(String),
    Joined,
    JoinRejected(String),
    Closed,
    Ignored,
}

/// A `postgres_changes` subscription on one table.
pub struct RealtimeChannel {
    topic: String,
    schema: String,
    table: String,
    access_token: String,
    next_ref: u64,
    join_ref: Option<String>,
}

impl RealtimeChannel {
    pub fn new(schema: &str, table: &str, access_token: &str) -> Self {
        Self {
            topic: format!("realtime:{table}"),
            schema: schema.to_string(),
            table: table.to_string(),
            access_token: access_token.to_string(),
            next_ref: 0,
            join_ref: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn make_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    pub fn join_frame(&mut self) -> Frame {
        let reference = self.make_ref();
        self.join_ref = Some(reference.clone());
        Frame {
            topic: self.topic.clone(),
            event: "phx_join".to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [
                        { "event": "*", "schema": self.schema, "table": self.table }
                    ]
                },
                "access_token": self.access_token,
            }),
            reference: Some(reference),
        }
    }

    pub fn heartbeat_frame(&mut self) -> Frame {
        Frame {
            topic: PHOENIX_TOPIC.to_string(),
            event: "heartbeat".to_string(),
            payload: json!({}),
            reference: Some(self.make_ref()),
        }
    }

    pub fn leave_frame(&mut self) -> Frame {
        Frame {
            topic: self.topic.clone(),
            event: "phx_leave".to_string(),
            payload: json!({}),
            reference: Some(self.make_ref()),
        }
    }

    pub fn interpret(&self, frame: &Frame) -> ChannelSignal {
        if frame.topic != self.topic {
            return ChannelSignal::Ignored;
        }

        match frame.event.as_str() {
            "postgres_changes" => self.interpret_change(&frame.payload),
            "phx_reply" if frame.reference.is_some() && frame.reference == self.join_ref => {
                match frame.payload.get("status").and_then(Value::as_str) {
                    Some("ok") => ChannelSignal::Joined,
                    other => ChannelSignal::JoinRejected(
                        frame
                            .payload
                            .pointer("/response/reason")
                            .and_then(Value::as_str)
                            .unwrap_or(other.unwrap_or("no status"))
                            .to_string(),
                    ),
                }
            }
            "phx_error" | "phx_close" => ChannelSignal::Closed,
            _ => ChannelSignal::Ignored,
        }
    }

    fn interpret_change(&self, payload: &Value) -> ChannelSignal {
        let Some(data) = payload.get("data") else {
            return ChannelSignal::Ignored;
        };
        let table = data.get("table").and_then(Value::as_str);
        if table.is_some_and(|table| table != self.table) {
            return ChannelSignal::Ignored;
        }

        match data.get("type").and_then(Value::as_str) {
            Some("INSERT") => match data.get("record").cloned() {
                Some(record) => match serde_json::from_value::<Message>(record) {
                    Ok(message) => ChannelSignal::Insert(message),
                    Err(err) => {
                        log::warn!("Dropping malformed INSERT record: {err}");
                        ChannelSignal::Ignored
                    }
                },
                None => ChannelSignal::Ignored,
            },
            Some("DELETE") => match data.pointer("/old_record/id").and_then(Value::as_str) {
                Some(id) => ChannelSignal::Delete(id.to_string()),
                None => {
                    log::warn!("DELETE notification without old_record.id");
                    ChannelSignal::Ignored
                }
            },
            _ => ChannelSignal::Ignored,
        }
    }
}

/// Opens the socket, giving up when the handshake takes longer than `limit`.
pub async fn connect(url: &str, limit: Duration) -> Result<RealtimeSocket> {
    let (socket, response) = tokio::time::timeout(limit, connect_async(url))
        .await
        .map_err(|_| ChatError::Timeout(limit))??;
    log::debug!("Realtime handshake status {}", response.status());
    Ok(socket)
}
