use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";

const URL_ENV: &str = "SUPABASE_URL";
const KEY_ENV: &str = "SUPABASE_ANON_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Project endpoint, e.g. `https://xyzcompany.supabase.co`.
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub schema: String,
    pub table: String,
    /// How far back the history query reaches.
    pub history_window_secs: u64,
    pub poll_interval_secs: u64,
    /// Cosmetic pause between "Join Chat" and the chat screen.
    pub join_delay_ms: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            schema: "public".to_string(),
            table: "messages".to_string(),
            history_window_secs: 40,
            poll_interval_secs: 5,
            join_delay_ms: 800,
            heartbeat_interval_secs: 25,
        }
    }
}

impl AppConfig {
    pub fn history_window(&self) -> Duration {
        Duration::from_secs(self.history_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn join_delay(&self) -> Duration {
        Duration::from_millis(self.join_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Base URL without a trailing slash.
    pub fn rest_base(&self) -> String {
        self.supabase_url.trim_end_matches('/').to_string()
    }

    /// `https://host` → `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`
    pub fn realtime_url(&self) -> Result<String> {
        let base = self.rest_base();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ChatError::Config(format!(
                "supabase_url must start with http:// or https:// (got `{base}`)"
            )));
        };
        let mut url = reqwest::Url::parse(&format!("{ws_base}/realtime/v1/websocket"))
            .map_err(|err| ChatError::Config(format!("invalid supabase_url `{base}`: {err}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.supabase_anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url.into())
    }

    pub fn validate(&self) -> Result<()> {
        if self.supabase_url.trim().is_empty() {
            return Err(ChatError::Config(format!(
                "missing endpoint; set {URL_ENV} or supabase_url"
            )));
        }
        if self.supabase_anon_key.trim().is_empty() {
            return Err(ChatError::Config(format!(
                "missing API key; set {KEY_ENV} or supabase_anon_key"
            )));
        }
        if self.table.trim().is_empty() {
            return Err(ChatError::Config("table name is empty".to_string()));
        }
        self.realtime_url().map(|_| ())
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var(URL_ENV) {
            self.supabase_url = url;
        }
        if let Ok(key) = env::var(KEY_ENV) {
            self.supabase_anon_key = key;
        }
    }
}

pub fn load_config(path: &str) -> AppConfig {
    let path = Path::new(path);
    let mut config = match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("Failed to parse config file {}: {err}", path.display());
                AppConfig::default()
            }
        },
        Err(err) => {
            log::info!(
                "Config file {} not found ({err}); using defaults",
                path.display()
            );
            AppConfig::default()
        }
    };
    config.apply_env_overrides();
    config
}
