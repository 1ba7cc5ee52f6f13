//! # mailbell-alert
//!
//! Turns a confirmed alert into perceptible output on the device.
//!
//! - [`capability`] - One trait per platform concern, plus [`Capabilities`]
//! - [`guard`] - [`PersistenceGuard`]: wake locks and audio focus as RAII holds
//! - [`session`] - [`AlertSession`]: active flag, extendable deadline, cancellation token
//! - [`channels`] - The five delivery channels
//! - [`actuator`] - [`AlertActuator`]: starts, extends and cancels sessions
//! - [`dispatcher`] - [`AlertDispatcher`]: counter, alert log, journal, trigger
//! - [`console`] - Desktop stand-in capabilities
//! - [`testing`] - Recording fakes for every capability
//!
//! ## Example
//!
//! ```no_run
//! use mailbell_alert::{AlertActuator, AlertDispatcher, Capabilities};
//! use mailbell_core::{AlertConfig, AlertEvent, AlertSink};
//!
//! # async fn run() -> mailbell_core::Result<()> {
//! let actuator = AlertActuator::new(Capabilities::detect(), AlertConfig::default())?;
//! let dispatcher = AlertDispatcher::new(actuator.clone());
//!
//! dispatcher
//!     .handle(AlertEvent::new("Invoice", "billing@x.com", 1000.0))
//!     .await;
//! actuator.wait_idle().await;
//! # Ok(())
//! # }
//! ```

pub mod actuator;
pub mod capability;
pub mod channels;
pub mod console;
pub mod dispatcher;
pub mod guard;
pub mod journal;
pub mod session;
pub mod testing;

pub use actuator::{AlertActuator, SessionSummary, TriggerOutcome};
pub use capability::{Capabilities, CapabilityError, CapabilityResult, ToneSource};
pub use channels::{ChannelKind, ChannelReport, ChannelTimings};
pub use dispatcher::AlertDispatcher;
pub use guard::{FocusHold, PersistenceGuard, WakeHold};
pub use journal::{AlertJournal, JournalEntry};
pub use session::{AlertSession, AlertText};
