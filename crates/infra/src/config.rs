//! Environment-driven configuration.

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Duration;

use crate::store::{ForumStore, InMemoryForumStore, PostgresForumStore};

const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_CODE_TTL_HOURS: i64 = 24;
const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10_000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumConfig {
    /// Postgres URL; `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub registration_code_ttl: Duration,
    pub max_message_length: usize,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            registration_code_ttl: Duration::hours(DEFAULT_CODE_TTL_HOURS),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

impl ForumConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        if let Some(raw) = lookup("FORUM_DB_MAX_CONNECTIONS") {
            config.db_max_connections = raw
                .trim()
                .parse()
                .with_context(|| format!("FORUM_DB_MAX_CONNECTIONS must be a positive integer (got '{raw}')"))?;
            if config.db_max_connections == 0 {
                bail!("FORUM_DB_MAX_CONNECTIONS must be at least 1");
            }
        }

        if let Some(filter) = lookup("FORUM_LOG_FILTER").filter(|f| !f.trim().is_empty()) {
            config.log_filter = filter;
        }

        if let Some(raw) = lookup("FORUM_REGISTRATION_CODE_TTL_HOURS") {
            let hours: i64 = raw
                .trim()
                .parse()
                .with_context(|| format!("FORUM_REGISTRATION_CODE_TTL_HOURS must be an integer (got '{raw}')"))?;
            if hours <= 0 {
                bail!("FORUM_REGISTRATION_CODE_TTL_HOURS must be positive (got {hours})");
            }
            config.registration_code_ttl = Duration::hours(hours);
        }

        if let Some(raw) = lookup("FORUM_MAX_MESSAGE_LENGTH") {
            config.max_message_length = raw
                .trim()
                .parse()
                .with_context(|| format!("FORUM_MAX_MESSAGE_LENGTH must be a positive integer (got '{raw}')"))?;
            if config.max_message_length == 0 {
                bail!("FORUM_MAX_MESSAGE_LENGTH must be at least 1");
            }
        }

        Ok(config)
    }

    /// Open the configured store: Postgres when `database_url` is set
    /// (schema applied on connect), the in-memory store otherwise.
    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn ForumStore>> {
        match &self.database_url {
            Some(url) => {
                let store = PostgresForumStore::connect(url, self.db_max_connections)
                    .await
                    .context("failed to connect to Postgres")?;
                store.migrate().await.context("failed to apply forum schema")?;
                tracing::info!(max_connections = self.db_max_connections, "using postgres forum store");
                Ok(Arc::new(store))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; using in-memory forum store");
                Ok(Arc::new(InMemoryForumStore::new()))
            }
        }
    }
}
