//! Scripted adapter for exercising instrument drivers without hardware.

use crate::adapters::LineAdapter;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    connected: bool,
    queued: VecDeque<Result<String, String>>,
    rules: Vec<(String, String)>,
    transcript: Vec<String>,
}

/// In-memory [`LineAdapter`] that answers queries from a script.
///
/// Queued responses are consumed first, in order; after that, standing rules
/// answer any query starting with a registered prefix. Clones share state, so a
/// test can keep a handle after moving the adapter into a driver.
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// New disconnected adapter with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response line for the next query.
    pub fn push_response(&self, line: &str) -> &Self {
        self.lock().queued.push_back(Ok(line.to_string()));
        self
    }

    /// Make the next query fail as if the link dropped.
    pub fn push_failure(&self, message: &str) -> &Self {
        self.lock().queued.push_back(Err(message.to_string()));
        self
    }

    /// Answer every query starting with `prefix` with `line`, once the queue is empty.
    pub fn respond_to(&self, prefix: &str, line: &str) -> &Self {
        self.lock().rules.push((prefix.to_string(), line.to_string()));
        self
    }

    /// Every command and query written so far, in order.
    pub fn transcript(&self) -> Vec<String> {
        self.lock().transcript.clone()
    }

    /// True between `connect` and `disconnect`.
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked mid-script
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LineAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&mut self) -> AppResult<()> {
        self.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> AppResult<()> {
        self.lock().connected = false;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> AppResult<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(DaqError::SerialPortNotConnected);
        }
        state.transcript.push(command.to_string());
        Ok(())
    }

    async fn query(&mut self, query: &str) -> AppResult<String> {
        let mut state = self.lock();
        if !state.connected {
            return Err(DaqError::SerialPortNotConnected);
        }
        state.transcript.push(query.to_string());

        if let Some(next) = state.queued.pop_front() {
            return next.map_err(|message| DaqError::device("mock", message));
        }
        state
            .rules
            .iter()
            .find(|(prefix, _)| query.starts_with(prefix.as_str()))
            .map(|(_, line)| line.clone())
            .ok_or_else(|| DaqError::device("mock", format!("no scripted response for '{query}'")))
    }
}
