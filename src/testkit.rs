#![cfg(any(test, feature = "testkit"))]
//! Backend stand-ins for exercising loaders and caches without a real store.

use crate::budget::TimeBudget;
use crate::traits::BatchFetcher;
use crate::types::{FetchReply, Fetched};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StubError(pub String);

/// Serves from a fixed table, records every batch it is asked to resolve,
/// and can be slowed down, broken, or made to violate the reply contract on
/// demand.
pub struct StubFetcher {
    table: HashMap<String, String>,
    recorded: Mutex<Vec<Vec<String>>>,
    delay: Duration,
    fail_with: Option<String>,
    omit: Vec<String>,
}

impl StubFetcher {
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        Self {
            table: rows
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            recorded: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail_with: None,
            omit: Vec::new(),
        }
    }

    /// Every fetch sleeps this long before replying; for timeout and
    /// pipelining scenarios.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every fetch fails with this message instead of replying.
    pub fn with_failure(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// The key is silently dropped from replies — the reply-contract
    /// violation a loader must surface per key.
    pub fn omitting(mut self, key: impl Into<String>) -> Self {
        self.omit.push(key.into());
        self
    }

    /// Every batch this fetcher has resolved so far, in dispatch order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.recorded.lock().expect("recorder lock").clone()
    }

    pub fn batch_count(&self) -> usize {
        self.recorded.lock().expect("recorder lock").len()
    }

    /// Sizes of the recorded batches, sorted for order-insensitive
    /// assertions.
    pub fn batch_sizes(&self) -> Vec<usize> {
        let mut sizes = self
            .recorded
            .lock()
            .expect("recorder lock")
            .iter()
            .map(Vec::len)
            .collect::<Vec<_>>();
        sizes.sort_unstable();
        sizes
    }
}

#[async_trait]
impl BatchFetcher for StubFetcher {
    type Key = String;
    type Value = String;
    type Error = StubError;

    async fn fetch(&self, keys: Vec<String>, _budget: &TimeBudget) -> Result<FetchReply<Self>, StubError> {
        self.recorded.lock().expect("recorder lock").push(keys.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(message) = &self.fail_with {
            return Err(StubError(message.clone()));
        }

        let mut reply = HashMap::new();
        for key in keys {
            if self.omit.contains(&key) {
                continue;
            }
            let fetched = match self.table.get(&key) {
                Some(value) => Fetched::Hit(value.clone()),
                None => Fetched::Missing,
            };
            reply.insert(key, fetched);
        }
        Ok(reply)
    }
}
