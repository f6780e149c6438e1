use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::common::{Message, NewMessage};
use crate::config::AppConfig;
use crate::error::{ChatError, Result};

/// Query/insert half of the backend. The realtime half lives in `realtime`.
pub trait MessageStore: Clone + Send + Sync + 'static {
    /// Rows with `created_at >= since`, oldest first.
    fn fetch_since(&self, since: DateTime<Utc>)
    -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn insert(&self, messages: &[NewMessage]) -> impl Future<Output = Result<()>> + Send;
}

/// PostgREST client for the message table.
#[derive(Clone)]
pub struct RestStore {
    http: reqwest::Client,
    table_url: String,
}

impl RestStore {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&config.supabase_anon_key)?);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", config.supabase_anon_key))?,
        );
        if config.schema != "public" {
            headers.insert("Accept-Profile", header_value(&config.schema)?);
            headers.insert("Content-Profile", header_value(&config.schema)?);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            table_url: format!("{}/rest/v1/{}", config.rest_base(), config.table),
        })
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| ChatError::Config(format!("value not usable as a header: {err}")))
}

/// Query string for the recent-history select.
pub fn history_query(since: DateTime<Utc>) -> Vec<(&'static str, String)> {
    vec![
        ("select", "*".to_string()),
        (
            "created_at",
            format!(
                "gte.{}",
                since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            ),
        ),
        ("order", "created_at.asc".to_string()),
    ]
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChatError::Status { status, body })
}

impl MessageStore for RestStore {
    async fn fetch_since(&self, since: DateTime<Utc>) -> Result<Vec<Message>> {
        let response = self
            .http
            .get(&self.table_url)
            .query(&history_query(since))
            .send()
            .await?;
        let messages = check_status(response).await?.json::<Vec<Message>>().await?;
        Ok(messages)
    }

    async fn insert(&self, messages: &[NewMessage]) -> Result<()> {
        let response = self
            .http
            .post(&self.table_url)
            .header("Prefer", "return=minimal")
            .json(messages)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
