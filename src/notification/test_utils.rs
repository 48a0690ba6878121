//! Scriptable channel adapter for tests.

use crate::core::{ChannelAdapter, ChannelKind, SendError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// An adapter that replays a scripted sequence of results.
///
/// Once the script runs out every further call returns the fallback result.
#[derive(Debug)]
pub struct ScriptedAdapter {
    kind: ChannelKind,
    script: Mutex<VecDeque<Result<(), SendError>>>,
    fallback: Result<(), SendError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    recipients: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    /// Plays `script` in order, then succeeds.
    pub fn new(kind: ChannelKind, script: Vec<Result<(), SendError>>) -> Self {
        Self {
            kind,
            script: Mutex::new(script.into()),
            fallback: Ok(()),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            recipients: Mutex::new(Vec::new()),
        }
    }

    /// Returns `result` on every call.
    pub fn always(kind: ChannelKind, result: Result<(), SendError>) -> Self {
        let mut adapter = Self::new(kind, Vec::new());
        adapter.fallback = result;
        adapter
    }

    /// Makes every send take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The highest number of sends that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Recipients in the order the sends started.
    pub fn recipients(&self) -> Vec<String> {
        self.recipients.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelAdapter for ScriptedAdapter {
    fn kind(&self) -> ChannelKind {
        self.kind.clone()
    }

    async fn send(&self, recipient: &str, _payload: &str) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.recipients.lock().unwrap().push(recipient.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
