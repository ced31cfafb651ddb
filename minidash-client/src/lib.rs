//! Polling engine for a minidash metrics endpoint: fetches snapshots on a
//! timer, tracks the connection state and keeps a bounded sample history for
//! a presenter to draw from.
#![forbid(unsafe_code)]

pub mod error;
pub mod format;
pub mod history;
mod http_util;
pub mod poller;
pub mod sample;
pub mod source;
pub mod state;

pub use error::FetchError;
pub use format::format_bytes;
pub use history::HistoryBuffer;
pub use poller::{Dashboard, Poller, PollerConfig, ScheduleMode};
pub use sample::Sample;
pub use source::{HttpSource, MetricsSource};
pub use state::{ConnectionState, DashboardView, ViewStatus};
