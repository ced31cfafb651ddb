use minidash_proto::MetricsSnapshot;

use crate::{history::HistoryBuffer, sample::Sample};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

/// What a presenter should show, derived from the engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    /// No poll has succeeded and none has failed yet.
    Loading,
    Live,
    /// The last poll failed; `latest` may still hold stale data.
    Error,
}

/// Everything the poller owns, mutated only as a whole under one lock.
#[derive(Debug, Clone)]
pub struct EngineState {
    endpoint: String,
    generation: u64,
    latest: Option<MetricsSnapshot>,
    history: HistoryBuffer,
    connection: ConnectionState,
    last_error: Option<String>,
}

impl EngineState {
    pub fn new(endpoint: impl Into<String>, history_capacity: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            generation: 0,
            latest: None,
            history: HistoryBuffer::new(history_capacity),
            connection: ConnectionState::Disconnected,
            last_error: None,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Bumped every time the endpoint actually changes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` when `endpoint` is already the target.
    pub fn set_endpoint(&mut self, endpoint: String, clear_history: bool) -> bool {
        if endpoint == self.endpoint {
            return false;
        }
        self.endpoint = endpoint;
        self.generation += 1;
        if clear_history {
            self.history.clear();
        }
        true
    }

    /// Apply a successful poll. Returns the previous connection state.
    pub fn record_success(&mut self, snapshot: MetricsSnapshot, sample: Sample) -> ConnectionState {
        self.history.append(sample);
        self.latest = Some(snapshot);
        self.last_error = None;
        std::mem::replace(&mut self.connection, ConnectionState::Connected)
    }

    /// Apply a failed poll. History and the last snapshot stay untouched.
    pub fn record_failure(&mut self, error: String) -> ConnectionState {
        self.last_error = Some(error);
        std::mem::replace(&mut self.connection, ConnectionState::Disconnected)
    }

    pub fn latest(&self) -> Option<&MetricsSnapshot> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn view(&self) -> DashboardView {
        DashboardView {
            endpoint: self.endpoint.clone(),
            latest: self.latest.clone(),
            history: self.history.snapshot(),
            connection: self.connection,
            last_error: self.last_error.clone(),
        }
    }
}

/// Owned copy of the engine state for a presenter.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub endpoint: String,
    pub latest: Option<MetricsSnapshot>,
    pub history: Vec<Sample>,
    pub connection: ConnectionState,
    pub last_error: Option<String>,
}

impl DashboardView {
    pub fn status(&self) -> ViewStatus {
        match (&self.last_error, &self.latest) {
            (Some(_), _) => ViewStatus::Error,
            (None, None) => ViewStatus::Loading,
            (None, Some(_)) => ViewStatus::Live,
        }
    }
}
