//! Event sink backends.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::EventError;

/// One mutation destined for the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Function path (e.g. `"sessions:create"`).
    pub path: String,
    /// JSON arguments.
    pub args: Value,
}

/// Trait for realtime sink backends.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Executes one mutation at `path` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError`] when the sink rejects the mutation or is
    /// unreachable. Callers treat this as best-effort.
    async fn mutate(&self, path: &str, args: Value) -> Result<(), EventError>;
}

/// HTTP sink posting mutations to a realtime backend.
#[derive(Debug)]
pub struct HttpEventSink {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSink {
    /// Creates a sink for the backend at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Unreachable`] when the HTTP client cannot
    /// be constructed.
    pub fn new(url: impl Into<String>) -> Result<Self, EventError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EventError::Unreachable {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn mutate(&self, path: &str, args: Value) -> Result<(), EventError> {
        let response = self
            .client
            .post(format!("{}/api/mutation", self.url))
            .json(&json!({"path": path, "args": args, "format": "json"}))
            .send()
            .await
            .map_err(|e| EventError::Unreachable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EventError::Http {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }
        Ok(())
    }
}

/// In-memory sink recording every mutation, for tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    mutations: Mutex<Vec<Mutation>>,
}

impl MemoryEventSink {
    /// Copies of all recorded mutations in arrival order.
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations
            .lock()
            .map_or_else(|_| Vec::new(), |m| m.clone())
    }

    /// Event types observed via `events:emit`, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.mutations()
            .into_iter()
            .filter(|m| m.path == "events:emit")
            .filter_map(|m| {
                m.args
                    .get("event_type")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn mutate(&self, path: &str, args: Value) -> Result<(), EventError> {
        if let Ok(mut mutations) = self.mutations.lock() {
            mutations.push(Mutation {
                path: path.to_string(),
                args,
            });
        }
        Ok(())
    }
}

/// Sink that discards everything (streaming disabled).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn mutate(&self, _path: &str, _args: Value) -> Result<(), EventError> {
        Ok(())
    }
}
