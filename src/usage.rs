//! Usage gate: policy hook bracketing every model request.
//!
//! The engine opens a [`UsageEvent`] before each request and closes it after
//! the response arrives. A gate may decline the request at the start, which
//! ends the exchange without an error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::TokenUsage;

/// Start/end record of a single model request. Not persisted.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub id: Uuid,
    /// Which component issued the request (e.g. "agent").
    pub source: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub metadata: BTreeMap<String, Value>,
}

impl UsageEvent {
    /// Open an event for a request made by `source` to `model`.
    pub fn start(source: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            model: model.into(),
            started_at: Utc::now(),
            finished_at: None,
            input_tokens: 0,
            output_tokens: 0,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Close the event with the provider's counters.
    pub fn finish(&mut self, usage: Option<TokenUsage>) {
        self.finished_at = Some(Utc::now());
        if let Some(u) = usage {
            self.input_tokens = u.input_tokens;
            self.output_tokens = u.output_tokens;
        }
    }

    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Policy consulted around each model request.
#[async_trait]
pub trait UsageGate: Send + Sync {
    /// Return `false` to veto the request.
    async fn request_started(&self, event: &UsageEvent) -> bool;

    async fn request_finished(&self, event: &UsageEvent);
}

/// Gate that allows every request and only logs.
#[derive(Debug, Default, Clone)]
pub struct OpenGate;

#[async_trait]
impl UsageGate for OpenGate {
    async fn request_started(&self, _event: &UsageEvent) -> bool {
        true
    }

    async fn request_finished(&self, event: &UsageEvent) {
        tracing::debug!(
            source = %event.source,
            model = %event.model,
            input_tokens = event.input_tokens,
            output_tokens = event.output_tokens,
            "Model request finished"
        );
    }
}

/// Gate that declines new requests once a token budget has been spent.
///
/// The budget is checked before a request, so the request that crosses the
/// limit still completes.
#[derive(Debug)]
pub struct TokenBudgetGate {
    budget: u64,
    spent: AtomicU64,
    requests: AtomicU64,
}

impl TokenBudgetGate {
    /// Create a gate allowing `budget` tokens in total.
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            spent: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }

    /// Tokens recorded so far.
    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::Relaxed)
    }

    /// Tokens left before requests are refused.
    pub fn remaining(&self) -> u64 {
        self.budget.saturating_sub(self.spent())
    }

    /// Number of requests recorded.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl UsageGate for TokenBudgetGate {
    async fn request_started(&self, event: &UsageEvent) -> bool {
        if self.remaining() == 0 {
            tracing::warn!(
                source = %event.source,
                budget = self.budget,
                "Token budget exhausted, declining model request"
            );
            return false;
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn request_finished(&self, event: &UsageEvent) {
        let total = self
            .spent
            .fetch_add(event.total_tokens(), Ordering::Relaxed)
            .saturating_add(event.total_tokens());
        tracing::debug!(
            source = %event.source,
            spent = total,
            budget = self.budget,
            "Token budget updated"
        );
    }
}
