#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use vetrina::application::QueryBackend;
use vetrina::resilience::BackendError;

/// Replays scripted outcomes in order, then echoes the variables back.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<Value, BackendError>>>,
    calls: AtomicUsize,
    latency: Duration,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Result<Value, BackendError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, outcome: Result<Value, BackendError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryBackend for ScriptedBackend {
    async fn execute(&self, _query: &str, variables: &Value) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(json!({ "echo": variables })))
    }
}

pub fn permanent() -> BackendError {
    BackendError::graphql(["Cannot query field \"nope\" on type \"Query\""])
}
