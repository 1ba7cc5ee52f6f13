//! # mailbell-ingest
//!
//! Redundant alert ingestion. Up to three independent workers feed the same
//! [`AlertSink`](mailbell_core::AlertSink):
//!
//! - [`stream`] - long-lived event stream with capped linear backoff
//! - [`poll`] - periodic "alerts since" request with a bounded recently-seen set
//! - [`push`] - platform push inbox, including relayed app notifications
//!
//! [`supervisor`] owns the connection and the liveness watchdog that
//! restarts dead workers. [`dedup`] holds the rules that keep each alert to
//! one delivery.

pub mod dedup;
pub mod error;
pub mod health;
pub mod poll;
pub mod push;
pub mod source;
pub mod stream;
pub mod supervisor;
pub mod worker;

pub use dedup::{Forwarder, HighWaterMark, RecentlySeen};
pub use error::{IngestError, Result};
pub use health::{WatchdogReport, WorkerHealth};
pub use poll::{PollState, PollWorker};
pub use push::{FileInbox, NotificationFilter, PushInbox, PushMessage, PushWorker};
pub use source::{AlertSource, HttpAlertSource, LineStream};
pub use stream::StreamWorker;
pub use supervisor::IngestSupervisor;
pub use worker::WorkerContext;
