use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    #[serde(with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    pub sender_id: String,
    pub sender_name: String,
}

/// Insert payload. The server assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub sender_id: String,
    pub sender_name: String,
}

impl NewMessage {
    /// Materializes the payload locally with a client-generated id.
    pub fn into_optimistic(self, created_at: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            content: self.content,
            created_at,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
        }
    }
}

/// In-memory identity for the lifetime of the process. `name` is set once
/// the user joined.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub name: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_user_id(Uuid::new_v4().to_string())
    }

    pub fn with_user_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// PostgREST returns `timestamptz` with an offset, the Realtime service
/// sometimes emits it without one. Both are read as UTC.
mod lenient_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        // Postgres prints `+00` instead of `+00:00`.
        if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|err| format!("invalid timestamp `{raw}`: {err}"))
    }
}
